//! The "do the work" step of a stage: pluggable, bounded in time, retried a
//! few times. Shutdown does not interrupt it; the lifecycle's grace period
//! bounds how long it may keep running.

use crate::model::Order;
use crate::stage::StageError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum WorkError {
    #[error("Work timed out after {0:?}")]
    TimedOut(Duration),
    #[error("Work failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait Work: Send + Sync {
    async fn perform(&self, order: &Order) -> Result<(), WorkError>;
}

/// Stands in for real kitchen or courier work by sleeping.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedWork {
    duration: Duration,
}

impl SimulatedWork {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl Work for SimulatedWork {
    async fn perform(&self, _order: &Order) -> Result<(), WorkError> {
        tokio::time::sleep(self.duration).await;
        Ok(())
    }
}

/// Time limit and attempt count for one stage's work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkPolicy {
    pub timeout: Duration,
    pub attempts: u32,
}

impl WorkPolicy {
    pub fn new(timeout: Duration, attempts: u32) -> Self {
        Self {
            timeout,
            attempts: attempts.max(1),
        }
    }

    /// Runs `work` under the timeout, up to `attempts` times.
    pub async fn run(&self, work: &dyn Work, order: &Order) -> Result<(), StageError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = tokio::time::timeout(self.timeout, work.perform(order)).await;
            let error = match outcome {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => e,
                Err(_) => WorkError::TimedOut(self.timeout),
            };
            if attempt >= self.attempts {
                return Err(StageError::Work(error));
            }
            warn!(order_id = %order.id, attempt, error = %error, "Work attempt failed");
        }
    }
}
