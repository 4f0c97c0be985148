//! Data model shared by every pipeline stage and the persistent store.
//!
//! Rows here are plain data: ids are generated with `uuid` at creation time and
//! never reassigned. The orchestrator is the only writer of [`RepositoryJob`]
//! status; every other row is scoped to one job id and replaced wholesale on a
//! re-run.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Generates a compact row id (uuid v4 without hyphens).
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Lifecycle of a repository job. Transitions only move forward:
/// `Pending -> Processing -> {Completed | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// A job in one of these states blocks a new submission for the same address.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            JobStatus::Pending | JobStatus::Processing | JobStatus::Completed
        )
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

/// Basic credentials for cloning private repositories.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// One request to generate documentation for a repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryJob {
    pub id: String,
    pub address: String,
    pub credentials: Option<Credentials>,
    pub status: JobStatus,
    pub error: Option<String>,
    /// Repository name, written back after the first successful pull.
    pub name: String,
    pub organization: String,
    pub branch: String,
    /// Commit SHA the documents were generated from.
    pub version: String,
}

impl RepositoryJob {
    pub fn new(address: impl Into<String>, credentials: Option<Credentials>) -> Self {
        Self {
            id: new_id(),
            address: address.into(),
            credentials,
            status: JobStatus::Pending,
            error: None,
            name: String::new(),
            organization: String::new(),
            branch: String::new(),
            version: String::new(),
        }
    }
}

/// Local checkout metadata produced by the git collaborator, immutable for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySnapshot {
    pub local_path: PathBuf,
    pub organization: String,
    pub repository_name: String,
    pub branch: String,
    pub commit_sha: String,
    pub commit_time: String,
    pub commit_author: String,
    pub commit_message: String,
}

/// One entry of `git log`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitEntry {
    pub author: String,
    pub message: String,
    pub time: String,
}

/// The per-run document identity. Overviews are keyed on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub job_id: String,
    pub local_path: PathBuf,
}

/// A planned documentation section. `order` is the 0-based position among siblings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicNode {
    pub id: String,
    pub job_id: String,
    pub document_id: String,
    pub parent_id: Option<String>,
    pub name: String,
    pub url_slug: String,
    pub prompt: String,
    pub order: usize,
}

/// Body content generated for one topic node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedDocument {
    pub id: String,
    pub topic_id: String,
    pub title: String,
    pub body: String,
    pub request_tokens: u64,
    pub response_tokens: u64,
    pub elapsed_ms: u64,
}

/// A source file read while generating a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttribution {
    pub id: String,
    pub document_id: String,
    pub path: String,
}

/// Changelog distilled from the most recent commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub id: String,
    pub job_id: String,
    pub changelog: String,
    pub last_committer: String,
}

/// Narrative overview of the whole project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectOverview {
    pub id: String,
    pub document_id: String,
    pub body: String,
}

/// Read-only context shared by every generation call of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationContext {
    pub address: String,
    pub branch: String,
    pub local_path: PathBuf,
    /// Newline-delimited path listing, README entries excluded.
    pub catalogue: String,
    pub readme: String,
}

/// Everything the generation stages produce for one job, persisted in one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentSet {
    pub topics: Vec<TopicNode>,
    pub documents: Vec<GeneratedDocument>,
    pub attributions: Vec<FileAttribution>,
}
