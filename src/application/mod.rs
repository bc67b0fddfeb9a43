//! Pipeline orchestration: the stages, their outcomes, and run supersession.

pub mod coordinator;
pub mod error;
pub mod pipeline;
pub mod providers;
pub mod prune;
pub mod report;
pub mod warm;
