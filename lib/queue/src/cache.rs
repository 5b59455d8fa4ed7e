//! Fast-path dedup cache keyed by execution id.

use crate::error::QueueError;
use async_trait::async_trait;
use rootcause::Report;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal outcome remembered for an execution id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupMarker {
    Completed,
    Failed,
}

impl fmt::Display for DedupMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// A TTL-bounded cache of processed execution ids.
///
/// Only an optimization: the execution table's unique constraint stays the
/// authority, so callers treat cache errors as a miss.
#[async_trait]
pub trait DedupCache: Send + Sync {
    async fn get(&self, execution_id: &str) -> Result<Option<DedupMarker>, Report<QueueError>>;

    async fn set(&self, execution_id: &str, marker: DedupMarker) -> Result<(), Report<QueueError>>;
}
