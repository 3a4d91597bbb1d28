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

use shale_common::types::Datum;

/// Stand-in for a column the schema declares but the segment never wrote:
/// synthesizes the declared default (or NULL) on every row and owns no
/// streams, so skip and seek are no-ops.
pub(crate) struct SyntheticReader {
    value: Datum,
}

impl SyntheticReader {
    pub fn null() -> Self {
        Self { value: None }
    }

    pub fn with_default(value: Datum) -> Self {
        Self { value }
    }

    pub fn next_value(&self) -> Datum {
        self.value.clone()
    }
}
