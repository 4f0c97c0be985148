//! In-process [`DocumentStore`] backed by a `tokio` read-write lock.
//!
//! Used by the CLI for single-run generation and by tests to inspect exactly
//! which rows a job left behind.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::contract::{DocumentStore, JobOutputs};
use crate::error::BoxError;
use crate::model::{
    CommitSummary, DocumentRecord, DocumentSet, JobStatus, ProjectOverview, RepositoryJob,
    RepositorySnapshot,
};

#[derive(Debug, Default)]
struct State {
    /// Submission order.
    jobs: Vec<RepositoryJob>,
    documents: HashMap<String, DocumentRecord>,
    overviews: Vec<ProjectOverview>,
    summaries: Vec<CommitSummary>,
    sets: HashMap<String, DocumentSet>,
}

impl State {
    fn job_mut(&mut self, job_id: &str) -> Result<&mut RepositoryJob, BoxError> {
        self.jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or_else(|| format!("job {job_id} not found").into())
    }

    fn drop_document(&mut self, job_id: &str) {
        if let Some(old) = self.documents.remove(job_id) {
            self.overviews.retain(|o| o.document_id != old.id);
        }
    }

    fn drop_outputs(&mut self, job_id: &str) {
        self.drop_document(job_id);
        self.summaries.retain(|s| s.job_id != job_id);
        self.sets.remove(job_id);
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every job, in submission order.
    pub async fn jobs(&self) -> Vec<RepositoryJob> {
        self.state.read().await.jobs.clone()
    }

    /// Count of topic, document and attribution rows across all jobs.
    pub async fn row_counts(&self) -> (usize, usize, usize) {
        let state = self.state.read().await;
        state.sets.values().fold((0, 0, 0), |(t, d, a), set| {
            (
                t + set.topics.len(),
                d + set.documents.len(),
                a + set.attributions.len(),
            )
        })
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn replace_job(&self, job: RepositoryJob) -> Result<(), BoxError> {
        let mut state = self.state.write().await;
        let stale: Vec<String> = state
            .jobs
            .iter()
            .filter(|j| j.address == job.address)
            .map(|j| j.id.clone())
            .collect();
        for id in &stale {
            state.drop_outputs(id);
        }
        state.jobs.retain(|j| j.address != job.address);
        state.jobs.push(job);
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<RepositoryJob>, BoxError> {
        let state = self.state.read().await;
        Ok(state.jobs.iter().find(|j| j.id == job_id).cloned())
    }

    async fn find_job_by_address(
        &self,
        address: &str,
    ) -> Result<Option<RepositoryJob>, BoxError> {
        let state = self.state.read().await;
        Ok(state.jobs.iter().find(|j| j.address == address).cloned())
    }

    async fn pending_jobs(&self) -> Result<Vec<RepositoryJob>, BoxError> {
        let state = self.state.read().await;
        Ok(state
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::Pending)
            .cloned()
            .collect())
    }

    async fn update_job_status(
        &self,
        job_id: &str,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<(), BoxError> {
        let mut state = self.state.write().await;
        let job = state.job_mut(job_id)?;
        if !job.status.can_transition_to(status) {
            return Err(format!(
                "job {job_id}: illegal transition {:?} -> {status:?}",
                job.status
            )
            .into());
        }
        job.status = status;
        job.error = error;
        Ok(())
    }

    async fn record_snapshot(
        &self,
        job_id: &str,
        snapshot: RepositorySnapshot,
    ) -> Result<(), BoxError> {
        let mut state = self.state.write().await;
        let job = state.job_mut(job_id)?;
        job.name = snapshot.repository_name;
        job.organization = snapshot.organization;
        job.branch = snapshot.branch;
        job.version = snapshot.commit_sha;
        Ok(())
    }

    async fn replace_document(&self, record: DocumentRecord) -> Result<(), BoxError> {
        let mut state = self.state.write().await;
        state.drop_document(&record.job_id);
        state.documents.insert(record.job_id.clone(), record);
        Ok(())
    }

    async fn delete_commit_summaries(&self, job_id: &str) -> Result<(), BoxError> {
        let mut state = self.state.write().await;
        state.summaries.retain(|s| s.job_id != job_id);
        Ok(())
    }

    async fn insert_commit_summary(&self, summary: CommitSummary) -> Result<(), BoxError> {
        self.state.write().await.summaries.push(summary);
        Ok(())
    }

    async fn has_overview(&self, document_id: &str) -> Result<bool, BoxError> {
        let state = self.state.read().await;
        Ok(state.overviews.iter().any(|o| o.document_id == document_id))
    }

    async fn insert_overview(&self, overview: ProjectOverview) -> Result<(), BoxError> {
        self.state.write().await.overviews.push(overview);
        Ok(())
    }

    async fn persist_document_set(
        &self,
        job_id: &str,
        set: DocumentSet,
    ) -> Result<(), BoxError> {
        let mut state = self.state.write().await;
        state.sets.insert(job_id.to_string(), set);
        Ok(())
    }

    async fn delete_job_outputs(&self, job_id: &str) -> Result<(), BoxError> {
        self.state.write().await.drop_outputs(job_id);
        Ok(())
    }

    async fn load_outputs(&self, job_id: &str) -> Result<JobOutputs, BoxError> {
        let state = self.state.read().await;
        let document = state.documents.get(job_id).cloned();
        let overview = document.as_ref().and_then(|d| {
            state
                .overviews
                .iter()
                .find(|o| o.document_id == d.id)
                .cloned()
        });
        Ok(JobOutputs {
            document,
            overview,
            commit_summary: state.summaries.iter().find(|s| s.job_id == job_id).cloned(),
            set: state.sets.get(job_id).cloned().unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::new_id;

    #[tokio::test]
    async fn status_transitions_only_move_forward() {
        let store = InMemoryStore::new();
        let job = RepositoryJob::new("https://example.com/a/b.git", None);
        let id = job.id.clone();
        store.replace_job(job).await.unwrap();

        store
            .update_job_status(&id, JobStatus::Processing, None)
            .await
            .unwrap();
        store
            .update_job_status(&id, JobStatus::Completed, None)
            .await
            .unwrap();
        assert!(store
            .update_job_status(&id, JobStatus::Processing, None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn replacing_a_job_drops_the_old_jobs_outputs() {
        let store = InMemoryStore::new();
        let old = RepositoryJob::new("https://example.com/a/b.git", None);
        let old_id = old.id.clone();
        store.replace_job(old).await.unwrap();
        let record = DocumentRecord {
            id: new_id(),
            job_id: old_id.clone(),
            local_path: "/tmp/a/b".into(),
        };
        store.replace_document(record.clone()).await.unwrap();
        store
            .insert_overview(ProjectOverview {
                id: new_id(),
                document_id: record.id.clone(),
                body: "overview".into(),
            })
            .await
            .unwrap();

        let new = RepositoryJob::new("https://example.com/a/b.git", None);
        let new_id = new.id.clone();
        store.replace_job(new).await.unwrap();

        assert_eq!(store.jobs().await.len(), 1);
        assert!(store.get_job(&old_id).await.unwrap().is_none());
        assert!(!store.has_overview(&record.id).await.unwrap());
        assert_eq!(
            store.find_job_by_address("https://example.com/a/b.git").await.unwrap().unwrap().id,
            new_id
        );
    }
}
