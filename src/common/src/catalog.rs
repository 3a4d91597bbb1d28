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

use crate::types::{Datum, LogicalType};

/// Identifier of a column that is stable across schema changes. Segment
/// streams are keyed by it.
pub type ColumnUniqueId = u32;

/// Descriptor of one column of a table.
#[derive(Debug, Clone)]
pub struct ColumnDesc {
    pub name: String,
    pub unique_id: ColumnUniqueId,
    pub logical_type: LogicalType,
    pub is_nullable: bool,
    /// `None` means the column declares no default. `Some(None)` declares an
    /// explicit NULL default.
    pub default_value: Option<Datum>,
    /// Ordinals of sub-columns owned by this column, in declaration order.
    pub sub_column_ordinals: Vec<usize>,
}

impl ColumnDesc {
    pub fn new(
        name: impl Into<String>,
        unique_id: ColumnUniqueId,
        logical_type: LogicalType,
    ) -> Self {
        Self {
            name: name.into(),
            unique_id,
            logical_type,
            is_nullable: false,
            default_value: None,
            sub_column_ordinals: vec![],
        }
    }

    pub fn nullable(mut self) -> Self {
        self.is_nullable = true;
        self
    }

    pub fn with_default(mut self, default: Datum) -> Self {
        self.default_value = Some(default);
        self
    }
}

/// Descriptor of the table a scan runs against: its columns plus the ordered
/// key prefix used for scan-key composition and range pruning.
#[derive(Debug, Clone)]
pub struct TableDesc {
    pub columns: Vec<ColumnDesc>,
    /// Ordinals into `columns` forming the table key, most significant first.
    pub key_column_ordinals: Vec<usize>,
}

impl TableDesc {
    pub fn new(columns: Vec<ColumnDesc>, key_column_ordinals: Vec<usize>) -> Self {
        debug_assert!(key_column_ordinals.iter().all(|&i| i < columns.len()));
        Self {
            columns,
            key_column_ordinals,
        }
    }

    pub fn column_ordinal(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, ordinal: usize) -> &ColumnDesc {
        &self.columns[ordinal]
    }

    pub fn key_columns(&self) -> impl Iterator<Item = &ColumnDesc> {
        self.key_column_ordinals.iter().map(|&i| &self.columns[i])
    }

    /// Position of `name` within the key prefix, if it is a key column.
    pub fn key_position(&self, name: &str) -> Option<usize> {
        self.key_columns().position(|c| c.name == name)
    }
}
