//! Error types for the documentation pipeline.
//!
//! Collaborator traits (see [`crate::contract`]) return [`BoxError`] so real
//! clients and mocks can surface whatever their transport produces. Stages wrap
//! those into [`PipelineError`], whose `Display` text is what ends up on a
//! failed job.

use thiserror::Error;

/// Boxed error used at every collaborator boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Pull or log of the repository failed
    #[error("git error: {0}")]
    Git(String),

    /// The completion service call failed
    #[error("completion error: {0}")]
    Completion(String),

    /// The model response could not be parsed into the expected shape
    #[error("unparseable model output: {0}")]
    Structure(String),

    /// Planner gave up after exhausting its retries
    #[error("catalogue planning failed after {attempts} attempts: {last_error}")]
    PlannerExhausted { attempts: u32, last_error: String },

    /// Persistent store operation failed
    #[error("store error: {0}")]
    Store(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("job cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn git(e: impl std::fmt::Display) -> Self {
        Self::Git(e.to_string())
    }

    pub fn completion(e: impl std::fmt::Display) -> Self {
        Self::Completion(e.to_string())
    }

    pub fn store(e: impl std::fmt::Display) -> Self {
        Self::Store(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
