//! Per-branch run supersession for the webhook listener.
//!
//! At most one run per branch is in flight. Starting a run for a branch that
//! already has one aborts the older task; dropping its future kills any child
//! process it spawned and removes its temporary tree. The newer run waits for
//! that teardown before launching. Different branches run side by side.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use metrics::counter;
use tokio::{task::JoinHandle, time::Instant};
use tracing::{error, info};
use uuid::Uuid;

use crate::application::{
    error::AppError, pipeline::Pipeline, providers::SourceCheckout, report::RunReport,
};

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Something that can carry out one full run for a branch.
#[async_trait]
pub trait RunLauncher: Send + Sync + 'static {
    async fn launch(&self, run_id: Uuid, branch: &str) -> Result<RunReport, AppError>;
}

/// Clones the pushed branch fresh and drives the pipeline over it.
pub struct PipelineLauncher {
    pipeline: Pipeline,
    checkout: Arc<dyn SourceCheckout>,
}

impl PipelineLauncher {
    pub fn new(pipeline: Pipeline, checkout: Arc<dyn SourceCheckout>) -> Self {
        Self { pipeline, checkout }
    }
}

#[async_trait]
impl RunLauncher for PipelineLauncher {
    async fn launch(&self, run_id: Uuid, branch: &str) -> Result<RunReport, AppError> {
        self.pipeline
            .run_fresh(run_id, self.checkout.as_ref(), branch)
            .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunTicket {
    pub run_id: Uuid,
    /// The run this one cancelled, if any.
    pub superseded: Option<Uuid>,
}

struct ActiveRun {
    run_id: Uuid,
    handle: JoinHandle<()>,
}

#[derive(Clone)]
pub struct RunCoordinator {
    launcher: Arc<dyn RunLauncher>,
    active: Arc<Mutex<HashMap<String, ActiveRun>>>,
}

impl RunCoordinator {
    pub fn new(launcher: Arc<dyn RunLauncher>) -> Self {
        Self {
            launcher,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start a run for `branch`, cancelling the branch's in-flight run.
    pub fn start(&self, branch: &str) -> RunTicket {
        let run_id = Uuid::new_v4();
        let mut active = self.lock();

        let previous = active.remove(branch).map(|previous| {
            previous.handle.abort();
            counter!("pageship_run_superseded_total").increment(1);
            info!(
                target = "pageship::coordinator",
                branch = %branch,
                run_id = %previous.run_id,
                superseded_by = %run_id,
                "in-flight run superseded"
            );
            previous
        });
        let superseded = previous.as_ref().map(|previous| previous.run_id);

        // The task cannot observe the map before this insert: its cleanup
        // takes the same lock.
        let task = tokio::spawn({
            let launcher = Arc::clone(&self.launcher);
            let registry = Arc::clone(&self.active);
            let branch = branch.to_string();
            async move {
                if let Some(previous) = previous {
                    // Resolves once the cancelled future has been dropped.
                    let _ = previous.handle.await;
                }

                match launcher.launch(run_id, &branch).await {
                    Ok(report) => info!(
                        target = "pageship::coordinator",
                        branch = %branch,
                        run_id = %run_id,
                        clean = report.is_clean(),
                        "run completed"
                    ),
                    Err(err) => error!(
                        target = "pageship::coordinator",
                        branch = %branch,
                        run_id = %run_id,
                        stage = err.stage(),
                        error = %err,
                        "run failed"
                    ),
                }

                let mut active = registry.lock().unwrap_or_else(PoisonError::into_inner);
                if active
                    .get(&branch)
                    .is_some_and(|current| current.run_id == run_id)
                {
                    active.remove(&branch);
                }
            }
        });

        active.insert(
            branch.to_string(),
            ActiveRun {
                run_id,
                handle: task,
            },
        );

        RunTicket { run_id, superseded }
    }

    /// Branches with a run currently in flight, with their run ids.
    pub fn active(&self) -> Vec<(String, Uuid)> {
        let mut runs: Vec<_> = self
            .lock()
            .iter()
            .map(|(branch, run)| (branch.clone(), run.run_id))
            .collect();
        runs.sort();
        runs
    }

    /// Wait until no run is in flight, giving up after `limit`.
    pub async fn wait_idle(&self, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            if self.lock().is_empty() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(IDLE_POLL_INTERVAL).await;
        }
    }

    /// Abort every in-flight run. Used when the listener shuts down.
    pub fn shutdown(&self) {
        for (branch, run) in self.lock().drain() {
            run.handle.abort();
            info!(
                target = "pageship::coordinator",
                branch = %branch,
                run_id = %run.run_id,
                "in-flight run aborted on shutdown"
            );
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ActiveRun>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
