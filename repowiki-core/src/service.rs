//! Submission entry point: admits repository jobs into the store and the queue.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::contract::DocumentStore;
use crate::error::PipelineError;
use crate::model::{Credentials, JobStatus, RepositoryJob};
use crate::queue::JobQueue;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The job was stored and queued.
    Accepted { job_id: String },
    /// A job for the same address is already pending, processing or completed.
    Rejected { existing_job_id: String, status: JobStatus },
}

/// Canonical form of a repository address: trimmed, with a `.git` suffix.
pub fn normalise_address(address: &str) -> String {
    let trimmed = address.trim().trim_end_matches('/');
    if trimmed.ends_with(".git") {
        trimmed.to_string()
    } else {
        format!("{trimmed}.git")
    }
}

pub struct DocumentationService {
    store: Arc<dyn DocumentStore>,
    queue: Arc<JobQueue>,
    /// Serialises the check-then-insert of concurrent submissions.
    admission: Mutex<()>,
}

impl DocumentationService {
    pub fn new(store: Arc<dyn DocumentStore>, queue: Arc<JobQueue>) -> Self {
        Self {
            store,
            queue,
            admission: Mutex::new(()),
        }
    }

    /// Admit a repository. A previous job for the same address is replaced
    /// only when it failed; any other prior state rejects the submission.
    pub async fn submit(
        &self,
        address: &str,
        credentials: Option<Credentials>,
    ) -> Result<SubmitOutcome, PipelineError> {
        let address = normalise_address(address);
        let _guard = self.admission.lock().await;

        if let Some(existing) = self
            .store
            .find_job_by_address(&address)
            .await
            .map_err(PipelineError::store)?
        {
            if existing.status.is_active() {
                info!(
                    address = %address,
                    job_id = %existing.id,
                    status = ?existing.status,
                    "[SUBMIT] Rejected duplicate repository"
                );
                return Ok(SubmitOutcome::Rejected {
                    existing_job_id: existing.id,
                    status: existing.status,
                });
            }
        }

        let job = RepositoryJob::new(address.clone(), credentials);
        let job_id = job.id.clone();
        self.store
            .replace_job(job.clone())
            .await
            .map_err(PipelineError::store)?;
        if !self.queue.submit(job).await {
            // stays Pending in the store and is picked up on the next recovery
            warn!(address = %address, job_id = %job_id, "[SUBMIT] Queue closed, job left pending");
            return Err(PipelineError::Cancelled);
        }
        info!(address = %address, job_id = %job_id, "[SUBMIT] Accepted repository");
        Ok(SubmitOutcome::Accepted { job_id })
    }
}
