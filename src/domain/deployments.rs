//! Deployment history and the retention rule that bounds it.
//!
//! Pruning is a pure function over one listing window: records are bucketed by
//! the branch that produced them, each bucket is ordered newest first, and
//! everything after the per-branch retention prefix is scheduled for deletion.
//! Records from branches the pipeline does not manage are left alone.

use std::collections::HashSet;

use pageship_api_types::DeploymentRecord;
use time::OffsetDateTime;

/// Role a branch plays in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchRole {
    Production,
    Secondary,
}

impl BranchRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Secondary => "secondary",
        }
    }
}

/// The two branch names the pipeline manages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branches {
    pub production: String,
    pub secondary: String,
}

impl Branches {
    pub fn new(production: impl Into<String>, secondary: impl Into<String>) -> Self {
        Self {
            production: production.into(),
            secondary: secondary.into(),
        }
    }

    pub fn classify(&self, branch: &str) -> Option<BranchRole> {
        if branch == self.production {
            Some(BranchRole::Production)
        } else if branch == self.secondary {
            Some(BranchRole::Secondary)
        } else {
            None
        }
    }
}

/// A deployment as seen by the pruner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub id: String,
    pub branch: String,
    pub created_on: OffsetDateTime,
}

impl From<DeploymentRecord> for Deployment {
    fn from(record: DeploymentRecord) -> Self {
        let branch = record.branch().unwrap_or_default().to_string();
        Self {
            id: record.id,
            branch,
            created_on: record.created_on,
        }
    }
}

/// Number of most-recent deployments kept per branch role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub production: usize,
    pub secondary: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            production: 7,
            secondary: 1,
        }
    }
}

impl RetentionPolicy {
    pub fn keep_for(&self, role: BranchRole) -> usize {
        match role {
            BranchRole::Production => self.production,
            BranchRole::Secondary => self.secondary,
        }
    }
}

/// Outcome of applying a [`RetentionPolicy`] to a listing window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrunePlan {
    /// Deployments to delete, production bucket first, each bucket oldest last.
    pub doomed: Vec<(BranchRole, Deployment)>,
    pub retained_production: usize,
    pub retained_secondary: usize,
    /// Records whose branch is neither production nor secondary.
    pub ignored: usize,
}

impl PrunePlan {
    pub fn is_empty(&self) -> bool {
        self.doomed.is_empty()
    }

    pub fn doomed_for(&self, role: BranchRole) -> impl Iterator<Item = &Deployment> {
        self.doomed
            .iter()
            .filter(move |(r, _)| *r == role)
            .map(|(_, deployment)| deployment)
    }
}

/// Split a listing window into the deployments to keep and the ones to delete.
///
/// Duplicate ids (a record shifting across page boundaries between requests)
/// are counted once.
pub fn plan_prune(
    deployments: impl IntoIterator<Item = Deployment>,
    branches: &Branches,
    retention: &RetentionPolicy,
) -> PrunePlan {
    let mut seen = HashSet::new();
    let mut production = Vec::new();
    let mut secondary = Vec::new();
    let mut ignored = 0;

    for deployment in deployments {
        if !seen.insert(deployment.id.clone()) {
            continue;
        }
        match branches.classify(&deployment.branch) {
            Some(BranchRole::Production) => production.push(deployment),
            Some(BranchRole::Secondary) => secondary.push(deployment),
            None => ignored += 1,
        }
    }

    let mut plan = PrunePlan {
        ignored,
        ..PrunePlan::default()
    };

    for (role, mut bucket) in [
        (BranchRole::Production, production),
        (BranchRole::Secondary, secondary),
    ] {
        newest_first(&mut bucket);
        let keep = retention.keep_for(role).min(bucket.len());
        let doomed = bucket.split_off(keep);
        match role {
            BranchRole::Production => plan.retained_production = bucket.len(),
            BranchRole::Secondary => plan.retained_secondary = bucket.len(),
        }
        plan.doomed
            .extend(doomed.into_iter().map(|deployment| (role, deployment)));
    }

    plan
}

fn newest_first(bucket: &mut [Deployment]) {
    bucket.sort_by(|a, b| {
        b.created_on
            .cmp(&a.created_on)
            .then_with(|| a.id.cmp(&b.id))
    });
}
