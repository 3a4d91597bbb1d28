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

//! The scan node: normalizes conjuncts, prunes and splits scan ranges, fans
//! out scanners under a bounded admission window, and funnels their batches
//! to the caller either free-order through one bounded queue or through a
//! sort-preserving k-way merge.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use itertools::Itertools;
use parking_lot::Mutex;
use shale_common::catalog::TableDesc;
use shale_common::config::ScanConfig;
use shale_common::row::RowBatch;
use shale_common::types::Datum;
use shale_common::util::sort_util::OrderType;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::conjuncts::{normalize_conjuncts, Conjunct};
use super::scan_key::{
    key_range_overlaps, split_scan_range, ExtendOutcome, KeyRange, ScanKeys, ScanRangeParams,
};
use super::scanner::Scanner;
use crate::error::{ScanError, ScanResult};
use crate::monitor::ScanMetrics;

/// Scan description handed over by the planner.
pub struct ScanPlan {
    pub table: Arc<TableDesc>,
    pub conjuncts: Vec<Conjunct>,
    pub scan_ranges: Vec<ScanRangeParams>,
    /// Request sort-preserving output ordered by `sort_column`.
    pub is_result_order: bool,
    pub sort_column: Option<String>,
    pub order: OrderType,
}

/// State shared between the consumer and every scan task: the cancellation
/// flag and the write-once first-error slot.
struct ScanShared {
    done: AtomicBool,
    status: Mutex<Option<ScanError>>,
}

impl ScanShared {
    fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
            status: Mutex::new(None),
        }
    }

    fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    fn set_done(&self) {
        self.done.store(true, Ordering::Release);
    }

    /// First failure wins; later ones are logged and dropped. Any failure
    /// also cancels the scan.
    fn record_first_error(&self, error: ScanError) {
        {
            let mut slot = self.status.lock();
            if slot.is_none() {
                *slot = Some(error);
            } else {
                tracing::warn!(error = %error, "dropping non-first scan error");
            }
        }
        self.set_done();
    }

    fn first_error(&self) -> Option<ScanError> {
        self.status.lock().clone()
    }
}

/// Columnar scan node. `open` spawns the pipeline, `get_next` hands batches
/// to the caller, `close` cancels and joins everything; free-order and
/// ordered-merge modes are mutually exclusive and fixed at `open`.
pub struct ScanNode {
    plan: ScanPlan,
    config: ScanConfig,
    metrics: Arc<ScanMetrics>,
    shared: Arc<ScanShared>,
    batch_rx: Option<mpsc::Receiver<RowBatch>>,
    tasks: Vec<JoinHandle<()>>,
    opened: bool,
}

impl ScanNode {
    pub fn new(plan: ScanPlan, config: ScanConfig, metrics: Arc<ScanMetrics>) -> Self {
        Self {
            plan,
            config,
            metrics,
            shared: Arc::new(ScanShared::new()),
            batch_rx: None,
            tasks: vec![],
            opened: false,
        }
    }

    pub async fn open(&mut self) -> ScanResult<()> {
        debug_assert!(!self.opened);
        self.opened = true;

        let normalized = normalize_conjuncts(&self.plan.table, &self.plan.conjuncts)?;
        if normalized.has_empty_range() {
            tracing::debug!("conjunction is contradictory; scan is empty");
            return Ok(());
        }

        let mut scan_keys = ScanKeys::new(self.config.max_scan_key_count);
        let key_columns = self
            .plan
            .table
            .key_columns()
            .map(|c| c.name.clone())
            .collect_vec();
        for column in &key_columns {
            let Some(range) = normalized.column_ranges.get(column) else {
                break;
            };
            if scan_keys.extend(range)? == ExtendOutcome::Stopped {
                break;
            }
        }
        let key_ranges = scan_keys.key_ranges();

        let pushdown_filters = Arc::new(normalized.pushdown_filters);
        let residuals: Arc<Vec<Conjunct>> = Arc::new(
            normalized
                .vectorized_residuals
                .into_iter()
                .chain(normalized.row_residuals)
                .collect(),
        );

        let mut sub_ranges = Vec::new();
        for params in &self.plan.scan_ranges {
            let matching: Vec<Option<&KeyRange>> = if key_ranges.is_empty() {
                vec![None]
            } else {
                let overlapping: Vec<Option<&KeyRange>> = key_ranges
                    .iter()
                    .filter(|kr| key_range_overlaps(kr, &params.start_key, &params.end_key))
                    .map(Some)
                    .collect();
                if overlapping.is_empty() {
                    self.metrics.tablets_pruned.inc();
                    tracing::debug!(tablet_id = params.tablet_id, "scan range pruned");
                    continue;
                }
                overlapping
            };
            self.metrics.tablets_selected.inc();
            for key_range in matching {
                sub_ranges.extend(split_scan_range(
                    params,
                    key_range,
                    self.config.parallelism.max(1),
                ));
            }
        }
        if sub_ranges.is_empty() {
            return Ok(());
        }

        let scanners = sub_ranges
            .into_iter()
            .enumerate()
            .map(|(id, sub_range)| {
                Scanner::new(
                    id,
                    self.plan.table.clone(),
                    sub_range,
                    pushdown_filters.clone(),
                    residuals.clone(),
                    self.config.batch_capacity.max(1),
                    self.metrics.clone(),
                )
            })
            .collect_vec();

        if self.plan.is_result_order && self.plan.sort_column.is_some() {
            let sort_column = self.plan.sort_column.as_ref().unwrap();
            let sort_ordinal = self
                .plan
                .table
                .column_ordinal(sort_column)
                .ok_or_else(|| ScanError::Plan(format!("unknown sort column {sort_column}")))?;
            self.start_merge(scanners, sort_ordinal, self.plan.order);
        } else {
            self.start_free_order(scanners);
        }
        Ok(())
    }

    /// Free-order mode: one bounded queue, scanners admitted at most
    /// `parallelism` at a time; a finished scanner admits the next pending
    /// one.
    fn start_free_order(&mut self, scanners: Vec<Scanner>) {
        let (batch_tx, batch_rx) =
            mpsc::channel(self.config.max_materialized_row_batches.max(1));
        let parallelism = self.config.parallelism.max(1);
        let shared = self.shared.clone();

        let transfer = tokio::spawn(async move {
            let mut admitted = stream::iter(scanners.into_iter().map(|scanner| {
                let shared = shared.clone();
                let tx = batch_tx.clone();
                async move { tokio::spawn(run_scanner(scanner, shared, tx)).await }
            }))
            .buffer_unordered(parallelism);
            while let Some(joined) = admitted.next().await {
                if let Err(e) = joined {
                    shared.record_first_error(ScanError::Internal(format!(
                        "scanner task panicked: {e}"
                    )));
                }
            }
        });
        self.tasks.push(transfer);
        self.batch_rx = Some(batch_rx);
    }

    /// Ordered mode: every scanner feeds its own small queue and a k-way
    /// heap merge assembles globally ordered batches. All scanners run,
    /// since the heap needs a head from each.
    fn start_merge(&mut self, scanners: Vec<Scanner>, sort_ordinal: usize, order: OrderType) {
        let (batch_tx, batch_rx) =
            mpsc::channel(self.config.max_materialized_row_batches.max(1));
        let mut source_rxs = Vec::with_capacity(scanners.len());
        for scanner in scanners {
            let (tx, rx) = mpsc::channel(2);
            source_rxs.push(rx);
            self.tasks
                .push(tokio::spawn(run_scanner(scanner, self.shared.clone(), tx)));
        }
        self.tasks.push(tokio::spawn(run_merge(
            source_rxs,
            batch_tx,
            self.shared.clone(),
            sort_ordinal,
            order,
            self.config.batch_capacity.max(1),
            self.metrics.clone(),
        )));
        self.batch_rx = Some(batch_rx);
    }

    /// Returns the next batch, or `None` at end of stream. After a failure
    /// the first captured error is returned and no further batches surface.
    pub async fn get_next(&mut self) -> ScanResult<Option<RowBatch>> {
        if let Some(error) = self.shared.first_error() {
            self.drain();
            return Err(error);
        }
        let Some(rx) = self.batch_rx.as_mut() else {
            return Ok(None);
        };
        match rx.recv().await {
            Some(batch) => {
                // An error racing in while this batch sat in the queue makes
                // the result partial; fail instead of surfacing it.
                if let Some(error) = self.shared.first_error() {
                    self.drain();
                    return Err(error);
                }
                Ok(Some(batch))
            }
            None => {
                self.batch_rx = None;
                match self.shared.first_error() {
                    Some(error) => Err(error),
                    None => Ok(None),
                }
            }
        }
    }

    fn drain(&mut self) {
        if let Some(rx) = self.batch_rx.as_mut() {
            while rx.try_recv().is_ok() {}
        }
        self.batch_rx = None;
    }

    /// Cancels the scan and joins every task. Safe to call at any point,
    /// more than once, and after errors.
    pub async fn close(&mut self) {
        self.shared.set_done();
        self.drain();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "scan task aborted");
            }
        }
    }
}

async fn run_scanner(
    mut scanner: Scanner,
    shared: Arc<ScanShared>,
    tx: mpsc::Sender<RowBatch>,
) {
    if shared.is_done() {
        scanner.close();
        return;
    }
    if let Err(e) = scanner.open() {
        shared.record_first_error(e);
        scanner.close();
        return;
    }
    loop {
        if shared.is_done() {
            break;
        }
        match scanner.next_batch() {
            Ok(Some(batch)) => {
                if !batch.is_empty() && tx.send(batch).await.is_err() {
                    // Consumer went away; stop quietly.
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                shared.record_first_error(e);
                break;
            }
        }
    }
    scanner.close();
}

/// Heap entry of the sort-preserving merge: ordered by the sort key under
/// the requested direction, ties broken by scanner id so the output is
/// deterministic.
struct HeapEntry {
    key: Datum,
    order: OrderType,
    scanner: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.order
            .compare(&self.key, &other.key)
            .then(self.scanner.cmp(&other.scanner))
    }
}

struct MergeSource {
    rx: mpsc::Receiver<RowBatch>,
    /// The batch currently being drained. It stays alive here until its last
    /// row is taken, keeping every yielded row valid.
    batch: Option<RowBatch>,
    idx: usize,
}

async fn next_batch_from(rx: &mut mpsc::Receiver<RowBatch>) -> Option<RowBatch> {
    loop {
        match rx.recv().await {
            Some(batch) if batch.is_empty() => continue,
            other => return other,
        }
    }
}

async fn run_merge(
    source_rxs: Vec<mpsc::Receiver<RowBatch>>,
    tx: mpsc::Sender<RowBatch>,
    shared: Arc<ScanShared>,
    sort_ordinal: usize,
    order: OrderType,
    batch_capacity: usize,
    metrics: Arc<ScanMetrics>,
) {
    let mut sources: Vec<MergeSource> = source_rxs
        .into_iter()
        .map(|rx| MergeSource {
            rx,
            batch: None,
            idx: 0,
        })
        .collect();

    let mut heap = BinaryHeap::with_capacity(sources.len());
    for (scanner, source) in sources.iter_mut().enumerate() {
        if let Some(batch) = next_batch_from(&mut source.rx).await {
            let key = batch.rows()[0].datum(sort_ordinal).clone();
            source.batch = Some(batch);
            source.idx = 0;
            heap.push(Reverse(HeapEntry {
                key,
                order,
                scanner,
            }));
        }
    }

    let mut out = RowBatch::with_capacity(batch_capacity);
    let mut timer = metrics.merge_batch_duration.start_timer();
    while let Some(Reverse(entry)) = heap.pop() {
        if shared.is_done() {
            timer.stop_and_discard();
            return;
        }
        let source = &mut sources[entry.scanner];
        let (row, next_key) = {
            let batch = source.batch.as_mut().expect("merge source lost its batch");
            let row = batch.take_row(source.idx);
            source.idx += 1;
            let next_key = (source.idx < batch.len())
                .then(|| batch.rows()[source.idx].datum(sort_ordinal).clone());
            (row, next_key)
        };

        match next_key {
            Some(key) => heap.push(Reverse(HeapEntry {
                key,
                order,
                scanner: entry.scanner,
            })),
            None => {
                source.batch = None;
                if let Some(batch) = next_batch_from(&mut source.rx).await {
                    let key = batch.rows()[0].datum(sort_ordinal).clone();
                    source.batch = Some(batch);
                    source.idx = 0;
                    heap.push(Reverse(HeapEntry {
                        key,
                        order,
                        scanner: entry.scanner,
                    }));
                }
                // Otherwise the scanner hit EOF and drops out of the heap.
            }
        }

        out.push(row);
        if out.is_full() {
            timer.observe_duration();
            let full = std::mem::replace(&mut out, RowBatch::with_capacity(batch_capacity));
            if tx.send(full).await.is_err() {
                return;
            }
            timer = metrics.merge_batch_duration.start_timer();
        }
    }
    timer.observe_duration();
    if !out.is_empty() {
        let _ = tx.send(out).await;
    }
}
