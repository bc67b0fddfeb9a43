//! Traits describing the external collaborators the pipeline drives.
//!
//! Everything the orchestrator touches lives outside the process: the site
//! builder and publisher are child processes, deployment history and edge
//! cache sit behind the provider API, and warm-up goes through plain HTTP.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::deployments::Deployment;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("provider reported failure: {0}")]
    Unsuccessful(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ProviderError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    /// HTTP status carried by the error, if the request got that far.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// One page of the deployment listing.
#[derive(Debug, Clone, Default)]
pub struct DeploymentPage {
    pub deployments: Vec<Deployment>,
    pub total_pages: Option<u32>,
}

#[async_trait]
pub trait DeploymentsApi: Send + Sync {
    /// List deployments newest first. `page` is 1-based.
    async fn list_deployments(&self, page: u32, per_page: u32)
    -> Result<DeploymentPage, ProviderError>;

    /// Delete one deployment, forcing removal of any branch alias pointing at it.
    async fn delete_deployment(&self, id: &str) -> Result<(), ProviderError>;
}

#[async_trait]
pub trait EdgeCache: Send + Sync {
    async fn purge_everything(&self) -> Result<(), ProviderError>;
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// GET a document and return its body. Non-2xx responses are errors.
    async fn fetch_document(&self, url: &str) -> Result<String, ProviderError>;

    /// GET a URL, drain the body, and report the status code.
    async fn touch(&self, url: &str) -> Result<u16, ProviderError>;
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("`{program}` exited with {exit_code:?}: {stderr}")]
    Failed {
        program: String,
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("expected output directory {0} is missing")]
    MissingOutput(PathBuf),
    #[error("failed to prepare working directory: {0}")]
    Workspace(#[source] io::Error),
}

#[async_trait]
pub trait SiteBuilder: Send + Sync {
    /// Build the content tree at `source_dir`, returning the output directory.
    async fn build(&self, source_dir: &Path) -> Result<PathBuf, StepError>;
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, output_dir: &Path, branch: &str) -> Result<(), StepError>;
}

#[async_trait]
pub trait SourceCheckout: Send + Sync {
    /// Materialize a fresh tree of `branch` inside the empty directory `into`.
    async fn checkout(&self, branch: &str, into: &Path) -> Result<(), StepError>;
}
