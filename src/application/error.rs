use std::error::Error as StdError;

use thiserror::Error;

use crate::{
    application::{
        providers::{ProviderError, StepError},
        prune::PruneError,
    },
    config::LoadError,
    infra::error::InfraError,
};

/// Fatal outcomes. Anything that reaches `main` as an `AppError` exits non-zero.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("checkout failed: {0}")]
    Checkout(#[source] StepError),
    #[error("site build failed: {0}")]
    Build(#[source] StepError),
    #[error("publish failed: {0}")]
    Publish(#[source] StepError),
    #[error(transparent)]
    Prune(#[from] PruneError),
    #[error("cache purge failed: {0}")]
    Purge(#[source] ProviderError),
}

impl AppError {
    /// Stable short name of the failing stage, used as a log field.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Infra(_) => "infra",
            Self::Checkout(_) => "checkout",
            Self::Build(_) => "build",
            Self::Publish(_) => "publish",
            Self::Prune(_) => "prune",
            Self::Purge(_) => "purge",
        }
    }

    /// The error and every source below it, outermost first.
    pub fn chain(&self) -> Vec<String> {
        let mut messages = vec![self.to_string()];
        let mut current = StdError::source(self);
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        messages
    }
}
