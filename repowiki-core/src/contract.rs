#![allow(unused)]

//! # contract: collaborator interfaces consumed by the pipeline
//!
//! The pipeline never talks to a network, a git binary or a database directly.
//! It is handed three trait objects:
//!
//! - [`CompletionService`]: streaming chat completions, optionally granted the
//!   file-reading capability ([`FileTools`]) so the model can open source files.
//! - [`GitClient`]: pull/clone a repository and read its commit log.
//! - [`DocumentStore`]: persistence of jobs and their generated document sets.
//!
//! ## Mocking & Testing
//! Every trait is annotated for `mockall`; the mocks are exported under the
//! default `test-export-mocks` feature so the CLI crate's tests can use them too.
//!
//! ## Errors
//! All methods return [`BoxError`]. Stages convert them into
//! [`crate::error::PipelineError`] at the call site.

use std::path::PathBuf;

use async_trait::async_trait;
use futures::stream::BoxStream;
use mockall::{automock, predicate::*};
use serde::{Deserialize, Serialize};

use crate::error::BoxError;
use crate::model::{
    CommitEntry, CommitSummary, Credentials, DocumentRecord, DocumentSet, JobStatus,
    ProjectOverview, RepositoryJob, RepositorySnapshot,
};
use crate::tools::FileTools;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One message of a chat history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }
}

/// Per-call sampling options.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChatOptions {
    /// Model name; also selects the max-token default (see [`max_tokens_for_model`]).
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// A chat completion request. When `tools` is set the client may let the model
/// call back into the repository's files; every successful read lands in the
/// tools' read log.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub options: ChatOptions,
    pub tools: Option<FileTools>,
}

/// Stream of text deltas produced by a completion.
pub type ChatStream = BoxStream<'static, Result<String, BoxError>>;

/// Default output-token budget per model.
pub fn max_tokens_for_model(model: &str) -> u32 {
    match model {
        "DeepSeek-V3" => 16384,
        "QwQ-32B" => 8192,
        "gpt-4.1-mini" | "gpt-4.1" => 32768,
        "gpt-4o" => 16384,
        "o4-mini" | "o3-mini" => 100_000,
        _ => 16384,
    }
}

/// Streaming chat completion backend (OpenAI-compatible HTTP in production).
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Start a completion and return its text deltas in order.
    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream, BoxError>;
}

/// Drains a completion stream into one string.
pub async fn collect_stream(mut stream: ChatStream) -> Result<String, BoxError> {
    use futures::StreamExt;

    let mut out = String::new();
    while let Some(delta) = stream.next().await {
        out.push_str(&delta?);
    }
    Ok(out)
}

/// Convenience: start a completion and collect its full text.
pub async fn complete(
    service: &dyn CompletionService,
    request: ChatRequest,
) -> Result<String, BoxError> {
    let stream = service.stream_chat(request).await?;
    collect_stream(stream).await
}

/// What to pull and how to authenticate.
#[derive(Debug, Clone, PartialEq)]
pub struct PullRequest {
    pub address: String,
    pub credentials: Option<Credentials>,
    /// Branch to check out; `None` keeps the remote default.
    pub branch: Option<String>,
}

/// Git collaborator: produces a local checkout and its commit history.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait GitClient: Send + Sync {
    /// Clone the repository, or refresh an existing checkout, and describe HEAD.
    async fn pull(&self, request: PullRequest) -> Result<RepositorySnapshot, BoxError>;

    /// The most recent `limit` commits, ordered oldest to newest.
    async fn commit_log(&self, local_path: PathBuf, limit: usize)
        -> Result<Vec<CommitEntry>, BoxError>;
}

/// Everything persisted for a job, as read back by callers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobOutputs {
    pub document: Option<DocumentRecord>,
    pub overview: Option<ProjectOverview>,
    pub commit_summary: Option<CommitSummary>,
    pub set: DocumentSet,
}

/// Persistence of jobs and generated documentation.
///
/// Every per-job write is scoped to one job id and replaces what was there.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Delete any job with the same address (and all of its outputs), then insert `job`.
    async fn replace_job(&self, job: RepositoryJob) -> Result<(), BoxError>;

    async fn get_job(&self, job_id: &str) -> Result<Option<RepositoryJob>, BoxError>;

    async fn find_job_by_address(&self, address: &str)
        -> Result<Option<RepositoryJob>, BoxError>;

    /// Jobs still in `Pending`, in submission order.
    async fn pending_jobs(&self) -> Result<Vec<RepositoryJob>, BoxError>;

    async fn update_job_status(
        &self,
        job_id: &str,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<(), BoxError>;

    /// Write name, organization, branch and version from a fresh snapshot onto the job.
    async fn record_snapshot(
        &self,
        job_id: &str,
        snapshot: RepositorySnapshot,
    ) -> Result<(), BoxError>;

    /// Drop the job's previous document record (and its overview) and insert `record`.
    async fn replace_document(&self, record: DocumentRecord) -> Result<(), BoxError>;

    async fn delete_commit_summaries(&self, job_id: &str) -> Result<(), BoxError>;

    async fn insert_commit_summary(&self, summary: CommitSummary) -> Result<(), BoxError>;

    async fn has_overview(&self, document_id: &str) -> Result<bool, BoxError>;

    async fn insert_overview(&self, overview: ProjectOverview) -> Result<(), BoxError>;

    /// Replace the job's topic tree, documents and attribution rows in one batch.
    async fn persist_document_set(&self, job_id: &str, set: DocumentSet)
        -> Result<(), BoxError>;

    /// Remove every per-job output row: document record, overview, commit
    /// summaries, topics, documents and attribution.
    async fn delete_job_outputs(&self, job_id: &str) -> Result<(), BoxError>;

    async fn load_outputs(&self, job_id: &str) -> Result<JobOutputs, BoxError>;
}
