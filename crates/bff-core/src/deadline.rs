//! Per-request deadlines
//!
//! A request carries one deadline from the moment it enters the pipeline.
//! Every upstream call runs under that deadline, optionally tightened by its
//! own budget (10s for identity validation, 30s for Kubernetes lists).
//! Cancellation is drop-based: when the inbound request future is dropped,
//! every upstream future bound to it is dropped with it.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Error, Result};

/// Longest budget a deadline accepts; larger budgets are clamped to it
pub const MAX_BUDGET: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Absolute point in time by which an operation must complete
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(Instant);

impl Deadline {
    /// Deadline `budget` from now, with `budget` clamped to [`MAX_BUDGET`]
    pub fn after(budget: Duration) -> Self {
        Self(Instant::now() + budget.min(MAX_BUDGET))
    }

    /// Deadline at an explicit instant
    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    /// The underlying instant
    pub fn instant(&self) -> Instant {
        self.0
    }

    /// The earlier of this deadline and `budget` from now
    pub fn capped(self, budget: Duration) -> Self {
        self.min(Self::after(budget))
    }

    /// Time left before the deadline, zero when already past
    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    /// Whether the deadline has passed
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.0
    }

    /// Run `fut` to completion or fail with [`Error::Timeout`] at the deadline
    pub async fn run<F, T>(self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout_at(self.0, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!("{} exceeded deadline", operation))),
        }
    }
}
