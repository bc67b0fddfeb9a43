//! Wire types for the Cloudflare v4 API endpoints pageship talks to.
//!
//! Every response is wrapped in the same envelope; the `success` flag is the
//! only thing callers may trust to decide whether `result` is meaningful.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Standard response envelope. A missing `success` field decodes as `false`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub errors: Vec<ApiMessage>,
    #[serde(default)]
    pub messages: Vec<ApiMessage>,
    pub result: Option<T>,
    #[serde(default)]
    pub result_info: Option<ResultInfo>,
}

impl<T> ApiEnvelope<T> {
    /// Join the provider's error messages into a single line for logging.
    pub fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            return "response did not report success".to_string();
        }
        self.errors
            .iter()
            .map(ApiMessage::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiMessage {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

impl std::fmt::Display for ApiMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ResultInfo {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub per_page: u32,
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub total_count: Option<u32>,
    #[serde(default)]
    pub total_pages: Option<u32>,
}

/// A single Pages deployment as returned by the listing endpoint.
///
/// Only the fields retention needs are decoded; the rest of the record is
/// ignored.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeploymentRecord {
    pub id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_on: OffsetDateTime,
    #[serde(default)]
    pub deployment_trigger: Option<DeploymentTrigger>,
}

impl DeploymentRecord {
    /// Branch that produced the deployment, when the provider reported one.
    pub fn branch(&self) -> Option<&str> {
        self.deployment_trigger
            .as_ref()
            .and_then(|trigger| trigger.metadata.as_ref())
            .and_then(|meta| meta.branch.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeploymentTrigger {
    #[serde(default)]
    pub metadata: Option<TriggerMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TriggerMetadata {
    #[serde(default)]
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PurgeCacheRequest {
    pub purge_everything: bool,
}

impl PurgeCacheRequest {
    pub fn everything() -> Self {
        Self {
            purge_everything: true,
        }
    }
}

/// Body of the push webhook accepted by `pageship serve`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PushEvent {
    #[serde(rename = "ref")]
    pub git_ref: String,
}

impl PushEvent {
    /// Branch name with any `refs/heads/` prefix removed.
    pub fn branch(&self) -> &str {
        self.git_ref
            .strip_prefix("refs/heads/")
            .unwrap_or(&self.git_ref)
    }
}
