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

use prometheus::core::{AtomicU64, GenericCounter};
use prometheus::{
    exponential_buckets, histogram_opts, register_histogram_with_registry,
    register_int_counter_with_registry, Histogram, Registry,
};

/// Scan-node metrics, registered against the caller's registry.
pub struct ScanMetrics {
    /// Time a scanner spends producing one row batch.
    pub scan_batch_duration: Histogram,
    /// Time the merge task spends assembling one output batch.
    pub merge_batch_duration: Histogram,
    pub rows_scanned: GenericCounter<AtomicU64>,
    pub rows_returned: GenericCounter<AtomicU64>,
    pub rows_filtered: GenericCounter<AtomicU64>,
    pub tablets_selected: GenericCounter<AtomicU64>,
    pub tablets_pruned: GenericCounter<AtomicU64>,
}

impl ScanMetrics {
    pub fn new(registry: Registry) -> Self {
        let opts = histogram_opts!(
            "batch_scan_batch_duration",
            "Time spent decoding one row batch from a segment.",
            exponential_buckets(0.0001, 2.0, 20).unwrap()
        );
        let scan_batch_duration = register_histogram_with_registry!(opts, registry).unwrap();

        let opts = histogram_opts!(
            "batch_scan_merge_batch_duration",
            "Time spent merging one ordered output batch.",
            exponential_buckets(0.0001, 2.0, 20).unwrap()
        );
        let merge_batch_duration = register_histogram_with_registry!(opts, registry).unwrap();

        let rows_scanned = register_int_counter_with_registry!(
            "batch_scan_rows_scanned",
            "Rows decoded from segments before filtering.",
            registry
        )
        .unwrap();
        let rows_returned = register_int_counter_with_registry!(
            "batch_scan_rows_returned",
            "Rows that passed all predicates and were emitted.",
            registry
        )
        .unwrap();
        let rows_filtered = register_int_counter_with_registry!(
            "batch_scan_rows_filtered",
            "Rows dropped by pushdown filters or residual predicates.",
            registry
        )
        .unwrap();
        let tablets_selected = register_int_counter_with_registry!(
            "batch_scan_tablets_selected",
            "Tablet scan ranges that survived key-range pruning.",
            registry
        )
        .unwrap();
        let tablets_pruned = register_int_counter_with_registry!(
            "batch_scan_tablets_pruned",
            "Tablet scan ranges dropped by key-range pruning.",
            registry
        )
        .unwrap();

        Self {
            scan_batch_duration,
            merge_batch_duration,
            rows_scanned,
            rows_returned,
            rows_filtered,
            tablets_selected,
            tablets_pruned,
        }
    }

    /// Create a `ScanMetrics` instance backed by a throwaway registry, used
    /// in tests or other places.
    pub fn for_test() -> Self {
        Self::new(Registry::new())
    }
}
