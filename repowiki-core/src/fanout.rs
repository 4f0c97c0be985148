//! Bounded-concurrency generation of every topic in a planned tree.
//!
//! One task per node is spawned on a [`JoinSet`]. A task takes a semaphore
//! permit for the duration of one attempt only, so a node waiting out its
//! backoff never occupies a slot. A node that exhausts its retries, or whose
//! task panics, is dropped and the remaining nodes carry on.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::PipelineError;
use crate::model::{new_id, FileAttribution, GeneratedDocument, GenerationContext, TopicNode};
use crate::retry::{RetryError, RetryPolicy};
use crate::topic::{TopicGenerator, TopicOutput};

/// Default number of topics generated at once.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// What the fan-out produced. Documents follow the order of the input nodes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FanOutResult {
    pub documents: Vec<GeneratedDocument>,
    pub attributions: Vec<FileAttribution>,
    pub dropped: Vec<TopicNode>,
}

pub struct FanOutExecutor {
    generator: TopicGenerator,
    concurrency: usize,
    policy: RetryPolicy,
}

enum NodeOutcome {
    Done(TopicOutput),
    Dropped(String),
    Cancelled,
}

impl FanOutExecutor {
    pub fn new(generator: TopicGenerator, concurrency: usize) -> Self {
        Self {
            generator,
            concurrency: concurrency.max(1),
            policy: RetryPolicy::topic(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Generate every node and wait for all of them. Fails only on cancellation.
    pub async fn run(
        &self,
        ctx: Arc<GenerationContext>,
        nodes: &[TopicNode],
        cancel: &CancellationToken,
    ) -> Result<FanOutResult, PipelineError> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        info!(
            topics = nodes.len(),
            concurrency = self.concurrency,
            "[FANOUT] Generating topics"
        );

        for (index, node) in nodes.iter().cloned().enumerate() {
            let generator = self.generator.clone();
            let ctx = ctx.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let policy = self.policy;
            let task_node = node.clone();
            tasks.spawn(async move {
                let attempts = async move {
                    let label = format!("topic '{}'", node.name);
                    let retryable = |e: &PipelineError| !matches!(e, PipelineError::Cancelled);
                    let result = policy
                        .run(&label, &cancel, retryable, |_attempt| {
                            let generator = generator.clone();
                            let ctx = ctx.clone();
                            let semaphore = semaphore.clone();
                            let node = node.clone();
                            async move {
                                let _permit = semaphore
                                    .acquire_owned()
                                    .await
                                    .map_err(|_| PipelineError::Cancelled)?;
                                generator.generate(&ctx, &node).await
                            }
                        })
                        .await;
                    match result {
                        Ok(out) => NodeOutcome::Done(out),
                        Err(RetryError::Cancelled) => NodeOutcome::Cancelled,
                        Err(RetryError::Aborted { error, .. }) => {
                            if matches!(error, PipelineError::Cancelled) {
                                NodeOutcome::Cancelled
                            } else {
                                NodeOutcome::Dropped(error.to_string())
                            }
                        }
                        Err(RetryError::Exhausted { last, .. }) => NodeOutcome::Dropped(last.to_string()),
                    }
                };
                let outcome = match AssertUnwindSafe(attempts).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(_) => NodeOutcome::Dropped("topic task panicked".into()),
                };
                (index, task_node, outcome)
            });
        }

        let mut finished: Vec<(usize, TopicOutput)> = Vec::with_capacity(nodes.len());
        let mut dropped: Vec<(usize, TopicNode)> = Vec::new();
        let mut cancelled = false;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, _, NodeOutcome::Done(out))) => finished.push((index, out)),
                Ok((index, node, NodeOutcome::Dropped(reason))) => {
                    error!(topic = %node.name, error = %reason, "[FANOUT] Topic dropped");
                    dropped.push((index, node));
                }
                Ok((_, _, NodeOutcome::Cancelled)) => cancelled = true,
                Err(e) => error!(error = %e, "[FANOUT] Topic task failed to complete"),
            }
        }
        if cancelled || cancel.is_cancelled() {
            warn!("[FANOUT] Cancelled, discarding generated topics");
            return Err(PipelineError::Cancelled);
        }

        finished.sort_by_key(|(index, _)| *index);
        dropped.sort_by_key(|(index, _)| *index);

        let mut result = FanOutResult::default();
        for (_, out) in finished {
            for path in out.files_read {
                result.attributions.push(FileAttribution {
                    id: new_id(),
                    document_id: out.document.id.clone(),
                    path,
                });
            }
            result.documents.push(out.document);
        }
        result.dropped = dropped.into_iter().map(|(_, node)| node).collect();

        info!(
            generated = result.documents.len(),
            dropped = result.dropped.len(),
            "[FANOUT] Topics finished"
        );
        Ok(result)
    }
}
