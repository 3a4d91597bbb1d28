// Copyright 2022 Singularity Data
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::cmp::Ordering;
use std::fmt;

use chrono::{Datelike, NaiveDate, NaiveDateTime};

/// Logical column types understood by the scan backend.
///
/// `Struct`, `List` and `Map` exist so that plans mentioning them can be
/// rejected with a typed error instead of a panic; no reader is ever built
/// for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalType {
    TinyInt,
    UnsignedTinyInt,
    SmallInt,
    UnsignedSmallInt,
    Int,
    UnsignedInt,
    BigInt,
    UnsignedBigInt,
    LargeInt,
    Float,
    Double,
    /// Doubles that only ever hold integral values; stored through the
    /// integer codec.
    DiscreteDouble,
    Date,
    DateTime,
    Decimal { precision: u8, scale: u8 },
    Char { len: u32 },
    Varchar { len: u32 },
    Hll,
    Struct,
    List,
    Map,
}

impl LogicalType {
    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Struct | Self::List | Self::Map)
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Self::Char { .. } | Self::Varchar { .. } | Self::Hll)
    }

    /// Maximum byte length for string types, `None` otherwise.
    pub fn max_length(&self) -> Option<u32> {
        match self {
            Self::Char { len } | Self::Varchar { len } => Some(*len),
            Self::Hll => Some(u16::MAX as u32),
            _ => None,
        }
    }
}

/// A single non-null scalar value.
#[derive(Debug, Clone)]
pub enum ScalarImpl {
    Bool(bool),
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Int128(i128),
    Float32(f32),
    Float64(f64),
    Decimal(Decimal),
    Date(Date),
    DateTime(DateTime),
    Utf8(String),
}

/// A nullable scalar. `None` is SQL NULL and sorts before every value.
pub type Datum = Option<ScalarImpl>;

impl ScalarImpl {
    fn type_tag(&self) -> u8 {
        match self {
            Self::Bool(_) => 0,
            Self::Int8(_) => 1,
            Self::UInt8(_) => 2,
            Self::Int16(_) => 3,
            Self::UInt16(_) => 4,
            Self::Int32(_) => 5,
            Self::UInt32(_) => 6,
            Self::Int64(_) => 7,
            Self::UInt64(_) => 8,
            Self::Int128(_) => 9,
            Self::Float32(_) => 10,
            Self::Float64(_) => 11,
            Self::Decimal(_) => 12,
            Self::Date(_) => 13,
            Self::DateTime(_) => 14,
            Self::Utf8(_) => 15,
        }
    }

    /// Widen any integer-family value to `i128` for cross-width literal
    /// coercion. Returns `None` for non-integer values.
    pub fn as_integral(&self) -> Option<i128> {
        match self {
            Self::Int8(v) => Some(*v as i128),
            Self::UInt8(v) => Some(*v as i128),
            Self::Int16(v) => Some(*v as i128),
            Self::UInt16(v) => Some(*v as i128),
            Self::Int32(v) => Some(*v as i128),
            Self::UInt32(v) => Some(*v as i128),
            Self::Int64(v) => Some(*v as i128),
            Self::UInt64(v) => Some(*v as i128),
            Self::Int128(v) => Some(*v),
            _ => None,
        }
    }
}

impl PartialEq for ScalarImpl {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScalarImpl {}

impl PartialOrd for ScalarImpl {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScalarImpl {
    /// Values of the same type compare by value (floats by IEEE-754 total
    /// order). Mismatched types indicate a schema mix-up and fall back to a
    /// stable ordering by type tag.
    fn cmp(&self, other: &Self) -> Ordering {
        use ScalarImpl::*;
        match (self, other) {
            (Bool(a), Bool(b)) => a.cmp(b),
            (Int8(a), Int8(b)) => a.cmp(b),
            (UInt8(a), UInt8(b)) => a.cmp(b),
            (Int16(a), Int16(b)) => a.cmp(b),
            (UInt16(a), UInt16(b)) => a.cmp(b),
            (Int32(a), Int32(b)) => a.cmp(b),
            (UInt32(a), UInt32(b)) => a.cmp(b),
            (Int64(a), Int64(b)) => a.cmp(b),
            (UInt64(a), UInt64(b)) => a.cmp(b),
            (Int128(a), Int128(b)) => a.cmp(b),
            (Float32(a), Float32(b)) => a.total_cmp(b),
            (Float64(a), Float64(b)) => a.total_cmp(b),
            (Decimal(a), Decimal(b)) => a.cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            (DateTime(a), DateTime(b)) => a.cmp(b),
            (Utf8(a), Utf8(b)) => a.cmp(b),
            _ => self.type_tag().cmp(&other.type_tag()),
        }
    }
}

impl fmt::Display for ScalarImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ScalarImpl::*;
        match self {
            Bool(v) => write!(f, "{}", v),
            Int8(v) => write!(f, "{}", v),
            UInt8(v) => write!(f, "{}", v),
            Int16(v) => write!(f, "{}", v),
            UInt16(v) => write!(f, "{}", v),
            Int32(v) => write!(f, "{}", v),
            UInt32(v) => write!(f, "{}", v),
            Int64(v) => write!(f, "{}", v),
            UInt64(v) => write!(f, "{}", v),
            Int128(v) => write!(f, "{}", v),
            Float32(v) => write!(f, "{}", v),
            Float64(v) => write!(f, "{}", v),
            Decimal(v) => write!(f, "{}", v),
            Date(v) => write!(f, "{}", v),
            DateTime(v) => write!(f, "{}", v),
            Utf8(v) => write!(f, "{}", v),
        }
    }
}

/// Fixed-point decimal in the column-file layout: a signed integral part and
/// a fractional part scaled to 10^9, both carried as `i64`.
///
/// Invariant: a well-formed value has `frac_part.abs() < 10^9` and the signs
/// of the two parts agree (zero is sign-neutral).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Decimal {
    int_part: i64,
    frac_part: i64,
}

impl Decimal {
    pub const FRAC_DIGITS: u32 = 9;
    pub const FRAC_SCALE: i64 = 1_000_000_000;

    pub fn new(int_part: i64, frac_part: i64) -> Self {
        debug_assert!(frac_part.abs() < Self::FRAC_SCALE);
        debug_assert!(int_part == 0 || frac_part == 0 || (int_part < 0) == (frac_part < 0));
        Self {
            int_part,
            frac_part,
        }
    }

    pub fn int_part(&self) -> i64 {
        self.int_part
    }

    pub fn frac_part(&self) -> i64 {
        self.frac_part
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.int_part < 0 || self.frac_part < 0 {
            "-"
        } else {
            ""
        };
        write!(
            f,
            "{}{}.{:09}",
            sign,
            self.int_part.abs(),
            self.frac_part.abs()
        )
    }
}

/// Calendar date, stored as days since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Date(i32);

/// Day number of 1970-01-01 in chrono's proleptic-Gregorian day count.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

impl Date {
    pub fn from_days(days: i32) -> Self {
        Self(days)
    }

    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day)
            .map(|d| Self(d.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE))
    }

    pub fn days(&self) -> i32 {
        self.0
    }

    pub fn to_naive(&self) -> Option<NaiveDate> {
        NaiveDate::from_num_days_from_ce_opt(self.0 + UNIX_EPOCH_DAYS_FROM_CE)
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_naive() {
            Some(d) => write!(f, "{}", d),
            None => write!(f, "date({})", self.0),
        }
    }
}

/// Calendar timestamp, stored as seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DateTime(i64);

impl DateTime {
    pub fn from_timestamp(secs: i64) -> Self {
        Self(secs)
    }

    pub fn timestamp(&self) -> i64 {
        self.0
    }

    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::from_timestamp_opt(self.0, 0)
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_naive() {
            Some(t) => write!(f, "{}", t),
            None => write!(f, "datetime({})", self.0),
        }
    }
}
