//! Stripe I/O Adapter
//!
//! Fans the per-stripe operations of one group out to every backend at once
//! and collects one outcome per stripe once all of them have settled.
//!
//! ```text
//!            ┌──────────┐
//!  group ───►│StripeSet │──► read/write/truncate/stat on stripe 0
//!            │ join_all │──► ...                       stripe 1
//!            └──────────┘──► ...                       stripe N-1
//!                  │
//!                  ▼
//!        Vec<StripeOutcome<T>> (index order)
//! ```
//!
//! Nothing is retried here; a failed stripe is reported and the caller
//! decides between degraded bookkeeping, recovery and hard failure.

use bytes::Bytes;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::domain::ports::StripeBackend;
use crate::error::StripeError;

// =============================================================================
// Outcomes
// =============================================================================

/// Result of one operation on one stripe
#[derive(Debug)]
pub struct StripeOutcome<T> {
    /// Physical stripe index
    pub stripe: usize,
    pub result: Result<T, StripeError>,
    pub duration: Duration,
}

impl<T> StripeOutcome<T> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Physical indices of the failed outcomes
pub fn failed_stripes<T>(outcomes: &[StripeOutcome<T>]) -> Vec<usize> {
    outcomes
        .iter()
        .filter(|o| !o.is_ok())
        .map(|o| o.stripe)
        .collect()
}

/// One read of a stripe-local range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripeRead {
    pub stripe: usize,
    pub offset: u64,
    pub len: usize,
}

// =============================================================================
// Stripe Set
// =============================================================================

/// Ordered list of stripe backends of one file
#[derive(Debug, Clone)]
pub struct StripeSet {
    stripes: Vec<Arc<dyn StripeBackend>>,
}

impl StripeSet {
    pub fn new(stripes: Vec<Arc<dyn StripeBackend>>) -> Self {
        Self { stripes }
    }

    pub fn len(&self) -> usize {
        self.stripes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stripes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<dyn StripeBackend>> {
        self.stripes.get(index)
    }

    /// Issue all reads concurrently; outcomes follow request order
    pub async fn read_many(&self, requests: &[StripeRead]) -> Vec<StripeOutcome<Bytes>> {
        let futures = requests.iter().map(|req| async move {
            let start = Instant::now();
            let result = match self.stripes.get(req.stripe) {
                Some(stripe) => stripe.read(req.offset, req.len).await,
                None => Err(missing(req.stripe)),
            };
            self.settle(req.stripe, "read", result, start)
        });
        join_all(futures).await
    }

    /// Write one block per listed stripe at `offset`, concurrently
    pub async fn write_many(
        &self,
        offset: u64,
        blocks: &[(usize, &[u8])],
    ) -> Vec<StripeOutcome<()>> {
        let futures = blocks.iter().map(|&(index, data)| async move {
            let start = Instant::now();
            let result = match self.stripes.get(index) {
                Some(stripe) => stripe.write(offset, data).await,
                None => Err(missing(index)),
            };
            self.settle(index, "write", result, start)
        });
        join_all(futures).await
    }

    /// Set the listed stripes to `len` bytes
    pub async fn truncate_many(&self, indexes: &[usize], len: u64) -> Vec<StripeOutcome<()>> {
        let futures = indexes.iter().map(|&index| async move {
            let start = Instant::now();
            let result = match self.stripes.get(index) {
                Some(stripe) => stripe.truncate(len).await,
                None => Err(missing(index)),
            };
            self.settle(index, "truncate", result, start)
        });
        join_all(futures).await
    }

    /// Current length of every stripe
    pub async fn stat_all(&self) -> Vec<StripeOutcome<u64>> {
        let indexes: Vec<usize> = (0..self.stripes.len()).collect();
        self.stat_many(&indexes).await
    }

    /// Current length of the listed stripes
    pub async fn stat_many(&self, indexes: &[usize]) -> Vec<StripeOutcome<u64>> {
        let futures = indexes.iter().map(|&index| async move {
            let start = Instant::now();
            let result = match self.stripes.get(index) {
                Some(stripe) => stripe.stat().await,
                None => Err(missing(index)),
            };
            self.settle(index, "stat", result, start)
        });
        join_all(futures).await
    }

    fn settle<T>(
        &self,
        index: usize,
        op: &str,
        result: Result<T, StripeError>,
        start: Instant,
    ) -> StripeOutcome<T> {
        let duration = start.elapsed();
        let name = self.stripes.get(index).map(|s| s.name()).unwrap_or("?");
        match &result {
            Ok(_) => debug!("Stripe {} ({}) {} ok in {:?}", index, name, op, duration),
            Err(e) => warn!("Stripe {} ({}) {} failed: {}", index, name, op, e),
        }
        StripeOutcome {
            stripe: index,
            result,
            duration,
        }
    }
}

fn missing(index: usize) -> StripeError {
    StripeError::Unreachable(format!("no stripe at index {}", index))
}

// =============================================================================
// Tests
// =============================================================================
