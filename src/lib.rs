//! Deployment-lifecycle orchestration for a statically generated blog.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
