//! Adapters to the outside world and runtime bootstrap.

pub mod cloudflare;
pub mod error;
pub mod fetcher;
pub mod http;
pub mod process;
pub mod telemetry;
