//! The documentation pipeline worker: takes jobs off the queue one at a time
//! and drives each through pull → README → changelog → overview → plan →
//! fan-out → (mermaid repair) → persist.
//!
//! # Responsibilities
//! - Sole writer of [`RepositoryJob`] status: `Pending → Processing → {Completed | Failed}`
//! - Fail-fast per job: any all-or-nothing stage error fails the job and removes
//!   every per-job row written so far; the worker loop itself never stops on a job error
//! - Per-topic failures are isolated by the fan-out and only show up as dropped
//!   counts in the [`RunReport`]
//!
//! # Cancellation
//! Each job runs under a child of the worker's token. Cancelling the worker
//! aborts queue waits, backoff sleeps and in-flight completion calls; the job in
//! flight is marked Failed with a cancellation error and nothing it generated is kept.
//!
//! # Navigation
//! - Long-running loop: [`Pipeline::run`]
//! - Batch use (CLI): [`Pipeline::recover`] then [`Pipeline::drain`]
//! - One job: [`Pipeline::process_job`]

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::catalogue;
use crate::config::PipelineConfig;
use crate::contract::{CompletionService, DocumentStore, GitClient, PullRequest};
use crate::documents::DocumentWriter;
use crate::error::PipelineError;
use crate::fanout::FanOutExecutor;
use crate::mermaid::MermaidRepairer;
use crate::model::{
    new_id, CommitSummary, DocumentRecord, DocumentSet, GenerationContext, JobStatus,
    ProjectOverview, RepositoryJob,
};
use crate::planner::{flatten, CataloguePlanner};
use crate::queue::JobQueue;
use crate::topic::TopicGenerator;

/// Outcome of one job run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub job_id: String,
    pub address: String,
    pub status: JobStatus,
    pub error: Option<String>,
    pub topics_planned: usize,
    pub topics_generated: usize,
    pub topics_dropped: usize,
    pub mermaid_repaired: usize,
}

impl RunReport {
    fn new(job: &RepositoryJob) -> Self {
        Self {
            job_id: job.id.clone(),
            address: job.address.clone(),
            status: JobStatus::Processing,
            error: None,
            topics_planned: 0,
            topics_generated: 0,
            topics_dropped: 0,
            mermaid_repaired: 0,
        }
    }
}

pub struct Pipeline {
    store: Arc<dyn DocumentStore>,
    git: Arc<dyn GitClient>,
    completion: Arc<dyn CompletionService>,
    queue: Arc<JobQueue>,
    config: PipelineConfig,
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl std::future::Future<Output = Result<T, PipelineError>>,
) -> Result<T, PipelineError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        out = fut => out,
    }
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        git: Arc<dyn GitClient>,
        completion: Arc<dyn CompletionService>,
        queue: Arc<JobQueue>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            git,
            completion,
            queue,
            config,
        }
    }

    /// Re-enqueue every job the store still holds as Pending. Call once at
    /// startup, before accepting new submissions.
    pub async fn recover(&self) -> Result<usize, PipelineError> {
        let pending = self
            .store
            .pending_jobs()
            .await
            .map_err(PipelineError::store)?;
        let mut requeued = 0;
        for job in pending {
            let id = job.id.clone();
            if !self.queue.submit(job).await {
                warn!(job_id = %id, "[PIPELINE] Queue closed during recovery");
                break;
            }
            requeued += 1;
        }
        info!(requeued, "[PIPELINE] Recovered pending jobs");
        Ok(requeued)
    }

    /// Process jobs until the queue is cancelled or closed.
    pub async fn run(&self, cancel: &CancellationToken) {
        info!("[PIPELINE] Worker started");
        loop {
            let job = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                job = self.queue.take() => job,
            };
            let Some(job) = job else {
                break;
            };
            if let Some(report) = self.handle(job, cancel).await {
                info!(
                    job_id = %report.job_id,
                    status = ?report.status,
                    "[PIPELINE] Job finished"
                );
            }
        }
        info!("[PIPELINE] Worker stopped");
    }

    /// Process every job currently queued and return their reports.
    pub async fn drain(&self, cancel: &CancellationToken) -> Vec<RunReport> {
        let mut reports = Vec::new();
        while !cancel.is_cancelled() {
            let Some(job) = self.queue.try_take().await else {
                break;
            };
            if let Some(report) = self.handle(job, cancel).await {
                reports.push(report);
            }
        }
        reports
    }

    /// Reload the dequeued job and process it if it is still Pending. A job
    /// replaced or already handled since it was queued is skipped.
    async fn handle(&self, queued: RepositoryJob, cancel: &CancellationToken) -> Option<RunReport> {
        match self.store.get_job(&queued.id).await {
            Ok(Some(job)) if job.status == JobStatus::Pending => {
                Some(self.process_job(job, cancel).await)
            }
            Ok(_) => {
                info!(job_id = %queued.id, "[PIPELINE] Skipping job that is no longer pending");
                None
            }
            Err(e) => {
                error!(job_id = %queued.id, error = %e, "[PIPELINE] Failed to load queued job");
                None
            }
        }
    }

    /// Run one job end to end and record its final status.
    pub async fn process_job(&self, job: RepositoryJob, cancel: &CancellationToken) -> RunReport {
        let mut report = RunReport::new(&job);
        info!(job_id = %job.id, address = %job.address, "[PIPELINE] Starting job");

        if let Err(e) = self
            .store
            .update_job_status(&job.id, JobStatus::Processing, None)
            .await
        {
            error!(job_id = %job.id, error = %e, "[PIPELINE][ERROR] Could not mark job processing");
            report.status = JobStatus::Failed;
            report.error = Some(PipelineError::store(e).to_string());
            return report;
        }

        let job_cancel = cancel.child_token();
        match self.execute(&job, &job_cancel, &mut report).await {
            Ok(()) => {
                match self
                    .store
                    .update_job_status(&job.id, JobStatus::Completed, None)
                    .await
                {
                    Ok(()) => {
                        report.status = JobStatus::Completed;
                        info!(
                            job_id = %job.id,
                            planned = report.topics_planned,
                            generated = report.topics_generated,
                            dropped = report.topics_dropped,
                            mermaid_repaired = report.mermaid_repaired,
                            "[PIPELINE] Job completed"
                        );
                        if report.topics_dropped > 0 {
                            warn!(
                                job_id = %job.id,
                                dropped = report.topics_dropped,
                                "[PIPELINE] Job completed with dropped topics"
                            );
                        }
                    }
                    Err(e) => self.fail(&job, PipelineError::store(e), &mut report).await,
                }
            }
            Err(e) => self.fail(&job, e, &mut report).await,
        }
        report
    }

    async fn fail(&self, job: &RepositoryJob, e: PipelineError, report: &mut RunReport) {
        let message = e.to_string();
        error!(job_id = %job.id, error = %message, "[PIPELINE][ERROR] Job failed");
        if let Err(cleanup) = self.store.delete_job_outputs(&job.id).await {
            error!(job_id = %job.id, error = %cleanup, "[PIPELINE][ERROR] Failed to remove partial rows");
        }
        if let Err(status) = self
            .store
            .update_job_status(&job.id, JobStatus::Failed, Some(message.clone()))
            .await
        {
            error!(job_id = %job.id, error = %status, "[PIPELINE][ERROR] Failed to mark job failed");
        }
        report.status = JobStatus::Failed;
        report.error = Some(message);
    }

    async fn execute(
        &self,
        job: &RepositoryJob,
        cancel: &CancellationToken,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        // --- Pull ---
        let snapshot = cancellable(cancel, async {
            self.git
                .pull(PullRequest {
                    address: job.address.clone(),
                    credentials: job.credentials.clone(),
                    branch: None,
                })
                .await
                .map_err(PipelineError::git)
        })
        .await?;
        info!(
            job_id = %job.id,
            path = %snapshot.local_path.display(),
            branch = %snapshot.branch,
            commit = %snapshot.commit_sha,
            "[PIPELINE] Repository pulled"
        );
        self.store
            .record_snapshot(&job.id, snapshot.clone())
            .await
            .map_err(PipelineError::store)?;

        let document = DocumentRecord {
            id: new_id(),
            job_id: job.id.clone(),
            local_path: snapshot.local_path.clone(),
        };
        self.store
            .replace_document(document.clone())
            .await
            .map_err(PipelineError::store)?;

        // --- Catalogue and README ---
        let root = snapshot.local_path.clone();
        let listing = tokio::task::spawn_blocking(move || catalogue::build_catalogue(&root))
            .await
            .map_err(|e| PipelineError::Io(std::io::Error::other(e)))??;

        let mut ctx = GenerationContext {
            address: job.address.clone(),
            branch: snapshot.branch.clone(),
            local_path: snapshot.local_path.clone(),
            catalogue: listing,
            readme: String::new(),
        };
        let writer = DocumentWriter::new(self.completion.as_ref(), self.config.chat_model.clone());
        ctx.readme = match catalogue::read_readme(&snapshot.local_path).await? {
            Some(readme) => {
                info!(job_id = %job.id, "[PIPELINE] Using repository README");
                readme
            }
            None => writer.generate_readme(&ctx, cancel).await?,
        };
        let ctx = Arc::new(ctx);

        // --- Changelog ---
        self.store
            .delete_commit_summaries(&job.id)
            .await
            .map_err(PipelineError::store)?;
        let commits = cancellable(cancel, async {
            self.git
                .commit_log(snapshot.local_path.clone(), self.config.commit_limit)
                .await
                .map_err(PipelineError::git)
        })
        .await?;
        let changelog = writer.generate_changelog(&ctx, &commits, cancel).await?;
        self.store
            .insert_commit_summary(CommitSummary {
                id: new_id(),
                job_id: job.id.clone(),
                changelog: changelog.text,
                last_committer: changelog.last_committer,
            })
            .await
            .map_err(PipelineError::store)?;

        // --- Overview ---
        let has_overview = self
            .store
            .has_overview(&document.id)
            .await
            .map_err(PipelineError::store)?;
        if !has_overview {
            let body = writer.generate_overview(&ctx, cancel).await?;
            self.store
                .insert_overview(ProjectOverview {
                    id: new_id(),
                    document_id: document.id.clone(),
                    body,
                })
                .await
                .map_err(PipelineError::store)?;
        }

        // --- Plan ---
        let plan = CataloguePlanner::new(self.completion.as_ref(), self.config.analysis_model.clone())
            .plan(&ctx, cancel)
            .await?;
        let topics = flatten(&plan, &job.id, &document.id);
        report.topics_planned = topics.len();

        // --- Fan-out ---
        let generator = TopicGenerator::new(self.completion.clone(), self.config.chat_model.clone());
        let outcome = FanOutExecutor::new(generator, self.config.concurrency)
            .run(ctx.clone(), &topics, cancel)
            .await?;
        let mut documents = outcome.documents;
        report.topics_generated = documents.len();
        report.topics_dropped = outcome.dropped.len();

        // --- Mermaid repair ---
        if self.config.repair_mermaid {
            report.mermaid_repaired =
                MermaidRepairer::new(self.completion.as_ref(), self.config.chat_model.clone())
                    .repair_all(&mut documents, cancel)
                    .await;
        }
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        // --- Persist ---
        self.store
            .persist_document_set(
                &job.id,
                DocumentSet {
                    topics,
                    documents,
                    attributions: outcome.attributions,
                },
            )
            .await
            .map_err(PipelineError::store)?;
        info!(job_id = %job.id, "[PIPELINE] Document set persisted");
        Ok(())
    }
}
