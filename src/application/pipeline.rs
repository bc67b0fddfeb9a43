//! The deployment-lifecycle pipeline for one pushed branch.
//!
//! build → publish → purge (production) → prune → warm (production).
//! Build, publish and the prune listing are fatal; purge, individual
//! deletions and warm-up fetches are best-effort and land in the report.

use std::{path::Path, sync::Arc, time::Instant};

use metrics::histogram;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::application::{
    error::AppError,
    providers::{EdgeCache, Publisher, SiteBuilder, SourceCheckout, StepError},
    prune::{DeploymentPruner, PruneOutcome},
    report::{PurgeStatus, RunReport},
    warm::CacheWarmer,
};
use crate::domain::deployments::{BranchRole, Branches};

/// Collaborators a [`Pipeline`] is assembled from.
pub struct PipelineParts {
    pub builder: Arc<dyn SiteBuilder>,
    pub publisher: Arc<dyn Publisher>,
    pub edge_cache: Arc<dyn EdgeCache>,
    pub pruner: DeploymentPruner,
    pub warmer: CacheWarmer,
    pub branches: Branches,
}

#[derive(Clone)]
pub struct Pipeline {
    builder: Arc<dyn SiteBuilder>,
    publisher: Arc<dyn Publisher>,
    edge_cache: Arc<dyn EdgeCache>,
    pruner: DeploymentPruner,
    warmer: CacheWarmer,
    branches: Branches,
}

impl Pipeline {
    pub fn new(parts: PipelineParts) -> Self {
        let PipelineParts {
            builder,
            publisher,
            edge_cache,
            pruner,
            warmer,
            branches,
        } = parts;
        Self {
            builder,
            publisher,
            edge_cache,
            pruner,
            warmer,
            branches,
        }
    }

    /// Run against an already checked-out tree.
    pub async fn run(
        &self,
        run_id: Uuid,
        branch: &str,
        source_dir: &Path,
    ) -> Result<RunReport, AppError> {
        self.run_inner(run_id, branch, source_dir)
            .instrument(run_span(run_id, branch))
            .await
    }

    /// Clone a fresh tree into a temporary directory, then run against it.
    ///
    /// The directory is removed when the run finishes or is cancelled.
    pub async fn run_fresh(
        &self,
        run_id: Uuid,
        checkout: &dyn SourceCheckout,
        branch: &str,
    ) -> Result<RunReport, AppError> {
        self.checkout_and_run(run_id, checkout, branch)
            .instrument(run_span(run_id, branch))
            .await
    }

    async fn checkout_and_run(
        &self,
        run_id: Uuid,
        checkout: &dyn SourceCheckout,
        branch: &str,
    ) -> Result<RunReport, AppError> {
        let workspace = tempfile::Builder::new()
            .prefix("pageship-")
            .tempdir()
            .map_err(|err| AppError::Checkout(StepError::Workspace(err)))?;
        let tree = workspace.path().join("src");

        timed("checkout", checkout.checkout(branch, &tree))
            .await
            .map_err(AppError::Checkout)?;

        self.run_inner(run_id, branch, &tree).await
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        branch: &str,
        source_dir: &Path,
    ) -> Result<RunReport, AppError> {
        let role = self.branches.classify(branch);
        info!(
            target = "pageship::pipeline",
            role = role.map(BranchRole::as_str),
            source_dir = %source_dir.display(),
            "pipeline started"
        );

        let output_dir = timed("build", self.builder.build(source_dir))
            .await
            .map_err(AppError::Build)?;
        info!(
            target = "pageship::pipeline",
            output_dir = %output_dir.display(),
            "site built"
        );

        timed("publish", self.publisher.publish(&output_dir, branch))
            .await
            .map_err(AppError::Publish)?;
        info!(target = "pageship::pipeline", "site published");

        let production = role == Some(BranchRole::Production);
        if role.is_none() {
            warn!(
                target = "pageship::pipeline",
                production = %self.branches.production,
                secondary = %self.branches.secondary,
                "branch is not managed; skipping purge and warm-up"
            );
        }

        let purge = if production {
            self.purge().await
        } else {
            PurgeStatus::Skipped
        };

        let prune: PruneOutcome = timed("prune", self.pruner.prune()).await?;

        let warm = if production {
            self.warmer.warm_all().await
        } else {
            Vec::new()
        };

        let report = RunReport {
            run_id,
            branch: branch.to_string(),
            role,
            purge,
            prune,
            warm,
        };
        report.log();
        Ok(report)
    }

    async fn purge(&self) -> PurgeStatus {
        match timed("purge", self.edge_cache.purge_everything()).await {
            Ok(()) => {
                info!(target = "pageship::pipeline", "edge cache purged");
                PurgeStatus::Purged
            }
            Err(err) => {
                warn!(
                    target = "pageship::pipeline",
                    error = %err,
                    status = err.status(),
                    "cache purge failed; continuing"
                );
                PurgeStatus::Failed(err.to_string())
            }
        }
    }
}

fn run_span(run_id: Uuid, branch: &str) -> tracing::Span {
    info_span!("run", run_id = %run_id, branch = %branch)
}

async fn timed<T>(step: &'static str, fut: impl Future<Output = T>) -> T {
    let started_at = Instant::now();
    let output = fut.await;
    histogram!("pageship_step_ms", "step" => step).record(started_at.elapsed().as_millis() as f64);
    output
}

#[cfg(test)]
mod tests {
    use std::{
        num::{NonZeroU32, NonZeroUsize},
        path::PathBuf,
        sync::Mutex,
        time::Duration,
    };

    use async_trait::async_trait;
    use time::{Duration as TimeDuration, macros::datetime};

    use super::*;
    use crate::application::providers::{
        DeploymentPage, DeploymentsApi, PageFetcher, ProviderError,
    };
    use crate::application::prune::{PruneConfig, PruneError};
    use crate::domain::deployments::{Deployment, RetentionPolicy};

    #[derive(Default)]
    struct Journal(Mutex<Vec<String>>);

    impl Journal {
        fn push(&self, entry: impl Into<String>) {
            self.0.lock().expect("lock").push(entry.into());
        }

        fn entries(&self) -> Vec<String> {
            self.0.lock().expect("lock").clone()
        }
    }

    struct FakeBuilder {
        journal: Arc<Journal>,
        fail: bool,
    }

    #[async_trait]
    impl SiteBuilder for FakeBuilder {
        async fn build(&self, source_dir: &Path) -> Result<PathBuf, StepError> {
            self.journal.push("build");
            if self.fail {
                return Err(StepError::Failed {
                    program: "hugo".into(),
                    exit_code: Some(1),
                    stderr: "broken template".into(),
                });
            }
            Ok(source_dir.join("public"))
        }
    }

    struct FakePublisher {
        journal: Arc<Journal>,
        fail: bool,
    }

    #[async_trait]
    impl Publisher for FakePublisher {
        async fn publish(&self, _output_dir: &Path, branch: &str) -> Result<(), StepError> {
            self.journal.push(format!("publish:{branch}"));
            if self.fail {
                return Err(StepError::Failed {
                    program: "wrangler".into(),
                    exit_code: Some(1),
                    stderr: "auth".into(),
                });
            }
            Ok(())
        }
    }

    struct FakeCache {
        journal: Arc<Journal>,
        fail: bool,
    }

    #[async_trait]
    impl EdgeCache for FakeCache {
        async fn purge_everything(&self) -> Result<(), ProviderError> {
            self.journal.push("purge");
            if self.fail {
                return Err(ProviderError::Unsuccessful("zone locked".into()));
            }
            Ok(())
        }
    }

    struct FakeApi {
        journal: Arc<Journal>,
        deployments: Option<Vec<Deployment>>,
    }

    #[async_trait]
    impl DeploymentsApi for FakeApi {
        async fn list_deployments(
            &self,
            _page: u32,
            _per_page: u32,
        ) -> Result<DeploymentPage, ProviderError> {
            self.journal.push("list");
            match &self.deployments {
                Some(deployments) => Ok(DeploymentPage {
                    deployments: deployments.clone(),
                    total_pages: Some(1),
                }),
                None => Err(ProviderError::Unsuccessful("no success flag".into())),
            }
        }

        async fn delete_deployment(&self, id: &str) -> Result<(), ProviderError> {
            self.journal.push(format!("delete:{id}"));
            Ok(())
        }
    }

    struct FakeFetcher {
        journal: Arc<Journal>,
    }

    #[async_trait]
    impl PageFetcher for FakeFetcher {
        async fn fetch_document(&self, url: &str) -> Result<String, ProviderError> {
            self.journal.push(format!("document:{url}"));
            if url.ends_with("sitemap.xml") {
                Ok("<urlset><loc>https://example.com/</loc></urlset>".into())
            } else {
                Ok(r#"<link href="/a.css">"#.into())
            }
        }

        async fn touch(&self, url: &str) -> Result<u16, ProviderError> {
            self.journal.push(format!("touch:{url}"));
            Ok(200)
        }
    }

    #[derive(Default)]
    struct Knobs {
        fail_build: bool,
        fail_publish: bool,
        fail_purge: bool,
        listing_fails: bool,
    }

    fn pipeline(journal: &Arc<Journal>, knobs: Knobs) -> Pipeline {
        let deployments = (0..9)
            .map(|age| Deployment {
                id: format!("p{age}"),
                branch: "main".into(),
                created_on: datetime!(2024-06-01 12:00 UTC) - TimeDuration::minutes(age),
            })
            .chain((0..3).map(|age| Deployment {
                id: format!("d{age}"),
                branch: "develop".into(),
                created_on: datetime!(2024-06-01 12:00 UTC) - TimeDuration::minutes(age),
            }))
            .collect();

        let api = Arc::new(FakeApi {
            journal: Arc::clone(journal),
            deployments: (!knobs.listing_fails).then_some(deployments),
        });
        let fetcher = Arc::new(FakeFetcher {
            journal: Arc::clone(journal),
        });

        Pipeline::new(PipelineParts {
            builder: Arc::new(FakeBuilder {
                journal: Arc::clone(journal),
                fail: knobs.fail_build,
            }),
            publisher: Arc::new(FakePublisher {
                journal: Arc::clone(journal),
                fail: knobs.fail_publish,
            }),
            edge_cache: Arc::new(FakeCache {
                journal: Arc::clone(journal),
                fail: knobs.fail_purge,
            }),
            pruner: DeploymentPruner::new(
                api,
                Branches::new("main", "develop"),
                PruneConfig {
                    retention: RetentionPolicy::default(),
                    page_size: NonZeroU32::new(25).expect("non-zero"),
                    max_pages: NonZeroU32::new(1).expect("non-zero"),
                    delete_delay: Duration::ZERO,
                },
            ),
            warmer: CacheWarmer::new(
                fetcher,
                "https://example.com",
                NonZeroUsize::new(1).expect("non-zero"),
            ),
            branches: Branches::new("main", "develop"),
        })
    }

    #[tokio::test]
    async fn production_run_executes_every_stage_in_order() {
        let journal = Arc::new(Journal::default());
        let report = pipeline(&journal, Knobs::default())
            .run(Uuid::nil(), "main", Path::new("/srv/blog"))
            .await
            .expect("run succeeds");

        assert_eq!(
            journal.entries(),
            vec![
                "build",
                "publish:main",
                "purge",
                "list",
                "delete:p7",
                "delete:p8",
                "delete:d1",
                "delete:d2",
                "document:https://example.com/sitemap.xml",
                "touch:https://example.com/",
                "document:https://example.com/",
                "touch:https://example.com/a.css",
            ]
        );
        assert_eq!(report.purge, PurgeStatus::Purged);
        assert_eq!(report.prune.deleted.len(), 4);
        assert_eq!(report.warm.len(), 2);
    }

    #[tokio::test]
    async fn secondary_run_skips_purge_and_warm_up() {
        let journal = Arc::new(Journal::default());
        let report = pipeline(&journal, Knobs::default())
            .run(Uuid::nil(), "develop", Path::new("/srv/blog"))
            .await
            .expect("run succeeds");

        let entries = journal.entries();
        assert!(!entries.iter().any(|entry| entry == "purge"));
        assert!(!entries.iter().any(|entry| entry.starts_with("touch:")));
        assert!(entries.iter().any(|entry| entry == "list"));
        assert_eq!(report.purge, PurgeStatus::Skipped);
        assert!(report.warm.is_empty());
    }

    #[tokio::test]
    async fn build_failure_stops_before_publish() {
        let journal = Arc::new(Journal::default());
        let err = pipeline(
            &journal,
            Knobs {
                fail_build: true,
                ..Default::default()
            },
        )
        .run(Uuid::nil(), "main", Path::new("/srv/blog"))
        .await
        .expect_err("build failure is fatal");

        assert!(matches!(err, AppError::Build(_)));
        assert_eq!(journal.entries(), vec!["build"]);
    }

    #[tokio::test]
    async fn publish_failure_is_fatal() {
        let journal = Arc::new(Journal::default());
        let err = pipeline(
            &journal,
            Knobs {
                fail_publish: true,
                ..Default::default()
            },
        )
        .run(Uuid::nil(), "main", Path::new("/srv/blog"))
        .await
        .expect_err("publish failure is fatal");

        assert!(matches!(err, AppError::Publish(_)));
        assert_eq!(journal.entries(), vec!["build", "publish:main"]);
    }

    #[tokio::test]
    async fn purge_failure_does_not_stop_the_run() {
        let journal = Arc::new(Journal::default());
        let report = pipeline(
            &journal,
            Knobs {
                fail_purge: true,
                ..Default::default()
            },
        )
        .run(Uuid::nil(), "main", Path::new("/srv/blog"))
        .await
        .expect("purge failure is tolerated");

        assert!(matches!(report.purge, PurgeStatus::Failed(_)));
        assert_eq!(report.prune.deleted.len(), 4);
    }

    #[tokio::test]
    async fn listing_failure_aborts_before_deletions_and_warm_up() {
        let journal = Arc::new(Journal::default());
        let err = pipeline(
            &journal,
            Knobs {
                listing_fails: true,
                ..Default::default()
            },
        )
        .run(Uuid::nil(), "main", Path::new("/srv/blog"))
        .await
        .expect_err("listing failure is fatal");

        assert!(matches!(err, AppError::Prune(PruneError::Listing { .. })));
        let entries = journal.entries();
        assert!(!entries.iter().any(|entry| entry.starts_with("delete:")));
        assert!(!entries.iter().any(|entry| entry.starts_with("document:")));
    }

    struct FakeCheckout {
        journal: Arc<Journal>,
        tree: Mutex<Option<PathBuf>>,
    }

    #[async_trait]
    impl SourceCheckout for FakeCheckout {
        async fn checkout(&self, branch: &str, into: &Path) -> Result<(), StepError> {
            self.journal.push(format!("checkout:{branch}"));
            std::fs::create_dir_all(into).map_err(StepError::Workspace)?;
            *self.tree.lock().expect("lock") = Some(into.to_path_buf());
            Ok(())
        }
    }

    #[tokio::test]
    async fn fresh_run_checks_out_into_a_temporary_tree() {
        let journal = Arc::new(Journal::default());
        let checkout = FakeCheckout {
            journal: Arc::clone(&journal),
            tree: Mutex::new(None),
        };

        pipeline(&journal, Knobs::default())
            .run_fresh(Uuid::new_v4(), &checkout, "develop")
            .await
            .expect("run succeeds");

        let entries = journal.entries();
        assert_eq!(entries[0], "checkout:develop");
        assert_eq!(entries[1], "build");
        let tree = checkout.tree.lock().expect("lock").clone().expect("checked out");
        assert!(!tree.exists(), "temporary tree should be removed after the run");
    }
}
