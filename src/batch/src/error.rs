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

use shale_storage::SegmentError;
use thiserror::Error;

/// Errors surfaced by the scan node. Storage failures pass through; the rest
/// are plan-shape problems or cancellation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScanError {
    #[error("storage error: {0}")]
    Storage(#[from] SegmentError),

    #[error("invalid plan: {0}")]
    Plan(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("scan cancelled")]
    Cancelled,
}

pub type ScanResult<T> = Result<T, ScanError>;
