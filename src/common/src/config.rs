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

use serde::{Deserialize, Serialize};

/// Knobs of the scan backend. Every field falls back to its default when
/// absent from the deserialized source, so partial configs stay valid.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Upper bound on concurrently running scanners per scan node.
    #[serde(default = "default::parallelism")]
    pub parallelism: usize,

    /// Capacity of the materialized-batch queue between scanners and the
    /// consumer. Producers block once it is full.
    #[serde(default = "default::max_materialized_row_batches")]
    pub max_materialized_row_batches: usize,

    /// Maximum rows per emitted row batch.
    #[serde(default = "default::batch_capacity")]
    pub batch_capacity: usize,

    /// Rows between two adjacent row-index entries in a built segment.
    #[serde(default = "default::index_stride")]
    pub index_stride: usize,

    /// A string column is dictionary-encoded when its distinct-value ratio
    /// is at or below this threshold.
    #[serde(default = "default::dictionary_threshold")]
    pub dictionary_threshold: f64,

    /// Cap on the number of key tuples an IN-list may expand a scan key to.
    #[serde(default = "default::max_scan_key_count")]
    pub max_scan_key_count: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            parallelism: default::parallelism(),
            max_materialized_row_batches: default::max_materialized_row_batches(),
            batch_capacity: default::batch_capacity(),
            index_stride: default::index_stride(),
            dictionary_threshold: default::dictionary_threshold(),
            max_scan_key_count: default::max_scan_key_count(),
        }
    }
}

mod default {
    pub fn parallelism() -> usize {
        4
    }

    pub fn max_materialized_row_batches() -> usize {
        64
    }

    pub fn batch_capacity() -> usize {
        1024
    }

    pub fn index_stride() -> usize {
        1024
    }

    pub fn dictionary_threshold() -> f64 {
        0.3
    }

    pub fn max_scan_key_count() -> usize {
        1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_source() {
        let config: ScanConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.parallelism, 4);
        assert_eq!(config.max_materialized_row_batches, 64);
        assert_eq!(config.batch_capacity, 1024);
        assert_eq!(config.index_stride, 1024);
        assert_eq!(config.dictionary_threshold, 0.3);
        assert_eq!(config.max_scan_key_count, 1024);
    }

    #[test]
    fn test_partial_override() {
        let config: ScanConfig = serde_json::from_str(r#"{"parallelism": 16}"#).unwrap();
        assert_eq!(config.parallelism, 16);
        assert_eq!(config.batch_capacity, 1024);
    }
}
