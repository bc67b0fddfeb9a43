use tracing::{info, warn};
use uuid::Uuid;

use crate::application::{prune::PruneOutcome, warm::WarmOutcome};
use crate::domain::deployments::BranchRole;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurgeStatus {
    /// Not a production run.
    Skipped,
    Purged,
    Failed(String),
}

impl PurgeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Purged => "purged",
            Self::Failed(_) => "failed",
        }
    }
}

/// What one successful pipeline run did, including the best-effort failures
/// that did not abort it.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub branch: String,
    pub role: Option<BranchRole>,
    pub purge: PurgeStatus,
    pub prune: PruneOutcome,
    pub warm: Vec<WarmOutcome>,
}

impl RunReport {
    pub fn warm_attempted(&self) -> usize {
        self.warm.iter().map(|outcome| outcome.attempted).sum()
    }

    pub fn warm_failed(&self) -> usize {
        self.warm
            .iter()
            .map(|outcome| outcome.failures.len() + usize::from(outcome.seed_error.is_some()))
            .sum()
    }

    /// True when every best-effort step also went through cleanly.
    pub fn is_clean(&self) -> bool {
        !matches!(self.purge, PurgeStatus::Failed(_))
            && self.prune.failed.is_empty()
            && self.warm_failed() == 0
    }

    pub fn log(&self) {
        if self.is_clean() {
            info!(
                target = "pageship::report",
                run_id = %self.run_id,
                branch = %self.branch,
                role = self.role.map(BranchRole::as_str),
                purge = self.purge.as_str(),
                listed = self.prune.listed,
                deleted = self.prune.deleted.len(),
                warmed = self.warm_attempted(),
                "run finished"
            );
        } else {
            warn!(
                target = "pageship::report",
                run_id = %self.run_id,
                branch = %self.branch,
                role = self.role.map(BranchRole::as_str),
                purge = self.purge.as_str(),
                listed = self.prune.listed,
                deleted = self.prune.deleted.len(),
                delete_failed = self.prune.failed.len(),
                warmed = self.warm_attempted(),
                warm_failed = self.warm_failed(),
                "run finished with best-effort failures"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::prune::DeleteFailure;
    use crate::application::warm::{WarmFailure, WarmPass};

    fn report() -> RunReport {
        RunReport {
            run_id: Uuid::nil(),
            branch: "main".into(),
            role: Some(BranchRole::Production),
            purge: PurgeStatus::Purged,
            prune: PruneOutcome::default(),
            warm: vec![WarmOutcome {
                pass: WarmPass::Sitemap,
                attempted: 3,
                succeeded: 3,
                failures: Vec::new(),
                seed_error: None,
            }],
        }
    }

    #[test]
    fn clean_report() {
        let report = report();
        assert!(report.is_clean());
        assert_eq!(report.warm_attempted(), 3);
    }

    #[test]
    fn any_best_effort_failure_marks_report_unclean() {
        let mut purge_failed = report();
        purge_failed.purge = PurgeStatus::Failed("zone locked".into());
        assert!(!purge_failed.is_clean());

        let mut delete_failed = report();
        delete_failed.prune.failed.push(DeleteFailure {
            id: "p8".into(),
            status: Some(500),
            error: "boom".into(),
        });
        assert!(!delete_failed.is_clean());

        let mut warm_failed = report();
        warm_failed.warm[0].failures.push(WarmFailure {
            url: "https://example.com/gone".into(),
            status: Some(404),
            error: None,
        });
        assert_eq!(warm_failed.warm_failed(), 1);
        assert!(!warm_failed.is_clean());
    }
}
