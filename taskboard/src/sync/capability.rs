//! Optional-column capability detection.
//!
//! The prober starts by asking for the full column set. The first time the
//! store answers with an unknown-column failure it switches to the reduced
//! set for good and retries that one call.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use taskboard_proto::column::ColumnSet;
use taskboard_proto::failure::Failure;

/// Per-engine record of whether the store supports the optional column.
#[derive(Debug, Default)]
pub struct CapabilityProber {
    degraded: AtomicBool,
}

impl CapabilityProber {
    /// Creates a prober that assumes the full column set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            degraded: AtomicBool::new(false),
        }
    }

    /// Column set the next call should use.
    #[must_use]
    pub fn columns(&self) -> ColumnSet {
        if self.is_degraded() {
            ColumnSet::Reduced
        } else {
            ColumnSet::Full
        }
    }

    /// Whether the prober has fallen back to the reduced set.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Runs `call` with the current column set, retrying once with the
    /// reduced set if a full-set call fails with an unknown column.
    ///
    /// Any other failure, and any failure of the retry, is returned as is.
    ///
    /// # Errors
    ///
    /// Returns the failure of the last attempt.
    pub async fn with_fallback<T, F, Fut>(&self, mut call: F) -> Result<T, Failure>
    where
        F: FnMut(ColumnSet) -> Fut,
        Fut: Future<Output = Result<T, Failure>>,
    {
        let columns = self.columns();
        match call(columns).await {
            Err(failure) if columns == ColumnSet::Full && failure.is_unknown_column() => {
                if !self.degraded.swap(true, Ordering::AcqRel) {
                    tracing::info!(error = %failure, "store lacks optional column, degrading");
                }
                call(ColumnSet::Reduced).await
            }
            other => other,
        }
    }
}
