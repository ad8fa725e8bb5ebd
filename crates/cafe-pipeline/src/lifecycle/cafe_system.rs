use crate::authority::AuthGate;
use crate::config::PipelineConfig;
use crate::intake::Intake;
use crate::lifecycle::Backends;
use crate::query::StatusQuery;
use crate::stage::{
    Fulfillment, Preparation, SimulatedWork, Stage, StageRunner, StatusTracker, WorkPolicy,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The running pipeline.
///
/// `CafeSystem` is responsible for:
/// - **Wiring**: building intake, query and the stages over one set of [`Backends`]
/// - **Lifecycle**: spawning the stage runners and stopping them on shutdown
///
/// # Example
///
/// ```ignore
/// let config = PipelineConfig::default();
/// let system = CafeSystem::start(&config, Backends::in_memory(&config));
///
/// let order = system.intake.submit(new_order, Some(&token)).await?;
/// let snapshot = system.query.lookup(&order.id).await?;
///
/// system.shutdown().await;
/// ```
pub struct CafeSystem {
    pub intake: Intake,
    pub query: StatusQuery,
    pub gate: AuthGate,
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    grace: Duration,
    backends: Backends,
}

impl CafeSystem {
    /// Spawns `workers_per_stage` runners for each stage.
    pub fn start(config: &PipelineConfig, backends: Backends) -> Self {
        let shutdown = CancellationToken::new();
        let policy = WorkPolicy::new(config.work_timeout, config.work_attempts);

        let stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(Preparation::new(
                backends.bus.clone(),
                Arc::new(SimulatedWork::new(config.preparation_time)),
                policy,
            )),
            Arc::new(StatusTracker::new(
                backends.store.clone(),
                backends.cache.clone(),
            )),
            Arc::new(Fulfillment::new(
                backends.store.clone(),
                backends.cache.clone(),
                Arc::new(SimulatedWork::new(config.delivery_time)),
                policy,
            )),
        ];

        let mut handles = Vec::new();
        for stage in &stages {
            for _ in 0..config.workers_per_stage {
                let runner = StageRunner::new(stage.clone(), backends.bus.clone(), shutdown.clone());
                handles.push(tokio::spawn(runner.run()));
            }
        }
        info!(
            stages = stages.len(),
            runners = handles.len(),
            partitions = config.partitions,
            "Cafe pipeline started"
        );

        let gate = AuthGate::new(backends.authority.clone());
        let intake = Intake::new(
            gate.clone(),
            backends.bus.clone(),
            backends.cache.clone(),
            backends.store.clone(),
        );
        let query = StatusQuery::new(backends.cache.clone(), backends.store.clone());

        Self {
            intake,
            query,
            gate,
            shutdown,
            handles,
            grace: config.shutdown_grace,
            backends,
        }
    }

    /// Token cancelled when shutdown begins. Ingress should stop on it too.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stops the runners, waiting up to the grace period for in-flight
    /// messages to finish, then releases the backends.
    pub async fn shutdown(self) {
        info!("Shutting down cafe pipeline");
        self.shutdown.cancel();

        let deadline = tokio::time::Instant::now() + self.grace;
        let mut aborted = 0;
        for mut handle in self.handles {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                handle.abort();
                aborted += 1;
            }
        }
        if aborted > 0 {
            warn!(aborted, "Stage runners did not drain within the grace period");
        }

        // Connections close only after every runner is gone.
        drop(self.intake);
        drop(self.query);
        drop(self.gate);
        drop(self.backends);
        info!("Cafe pipeline stopped");
    }
}
