//! Deployment pruning: list a window of history, apply retention, delete the rest.

use std::{num::NonZeroU32, sync::Arc, time::Duration};

use metrics::counter;
use thiserror::Error;
use tracing::{info, warn};

use crate::application::providers::{DeploymentsApi, ProviderError};
use crate::domain::deployments::{Branches, Deployment, PrunePlan, RetentionPolicy, plan_prune};

#[derive(Debug, Error)]
pub enum PruneError {
    #[error("failed to list deployments (page {page}): {source}")]
    Listing {
        page: u32,
        #[source]
        source: ProviderError,
    },
}

/// Knobs for one pruning pass.
#[derive(Debug, Clone)]
pub struct PruneConfig {
    pub retention: RetentionPolicy,
    pub page_size: NonZeroU32,
    pub max_pages: NonZeroU32,
    pub delete_delay: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteFailure {
    pub id: String,
    pub status: Option<u16>,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct PruneOutcome {
    pub listed: usize,
    pub plan: PrunePlan,
    pub deleted: Vec<String>,
    pub failed: Vec<DeleteFailure>,
}

#[derive(Clone)]
pub struct DeploymentPruner {
    api: Arc<dyn DeploymentsApi>,
    branches: Branches,
    config: PruneConfig,
}

impl DeploymentPruner {
    pub fn new(api: Arc<dyn DeploymentsApi>, branches: Branches, config: PruneConfig) -> Self {
        Self {
            api,
            branches,
            config,
        }
    }

    pub async fn prune(&self) -> Result<PruneOutcome, PruneError> {
        let listing = self.list_window().await?;
        let listed = listing.len();
        let plan = plan_prune(listing, &self.branches, &self.config.retention);

        info!(
            target = "pageship::prune",
            listed,
            doomed = plan.doomed.len(),
            retained_production = plan.retained_production,
            retained_secondary = plan.retained_secondary,
            ignored = plan.ignored,
            "deployment retention applied"
        );

        let mut outcome = PruneOutcome {
            listed,
            ..PruneOutcome::default()
        };

        for (index, (role, deployment)) in plan.doomed.iter().enumerate() {
            if index > 0 && !self.config.delete_delay.is_zero() {
                tokio::time::sleep(self.config.delete_delay).await;
            }

            match self.api.delete_deployment(&deployment.id).await {
                Ok(()) => {
                    counter!("pageship_prune_deleted_total", "role" => role.as_str())
                        .increment(1);
                    info!(
                        target = "pageship::prune",
                        id = %deployment.id,
                        branch = %deployment.branch,
                        created_on = %deployment.created_on,
                        "deployment deleted"
                    );
                    outcome.deleted.push(deployment.id.clone());
                }
                Err(err) => {
                    counter!("pageship_prune_delete_failed_total", "role" => role.as_str())
                        .increment(1);
                    warn!(
                        target = "pageship::prune",
                        id = %deployment.id,
                        branch = %deployment.branch,
                        status = err.status(),
                        error = %err,
                        "failed to delete deployment; continuing"
                    );
                    outcome.failed.push(DeleteFailure {
                        id: deployment.id.clone(),
                        status: err.status(),
                        error: err.to_string(),
                    });
                }
            }
        }

        outcome.plan = plan;
        Ok(outcome)
    }

    async fn list_window(&self) -> Result<Vec<Deployment>, PruneError> {
        let per_page = self.config.page_size.get();
        let mut listing = Vec::new();

        for page in 1..=self.config.max_pages.get() {
            let batch = self
                .api
                .list_deployments(page, per_page)
                .await
                .map_err(|source| PruneError::Listing { page, source })?;

            let fetched = batch.deployments.len();
            listing.extend(batch.deployments);

            let last_page = batch.total_pages.is_some_and(|total| page >= total);
            if last_page || fetched < per_page as usize {
                break;
            }
        }

        Ok(listing)
    }
}
