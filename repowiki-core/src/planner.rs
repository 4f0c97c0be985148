//! Catalogue planning: turns the repository listing and README into a topic tree.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::contract::{self, max_tokens_for_model, ChatMessage, ChatOptions, ChatRequest, CompletionService};
use crate::error::PipelineError;
use crate::extract::extract_tagged;
use crate::model::{new_id, GenerationContext, TopicNode};
use crate::prompts::{self, ANALYZE_CATALOGUE, STRUCTURE_TAG};
use crate::retry::{RetryError, RetryPolicy};

/// One planned section. The same type is used at every depth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogueItem {
    pub name: String,
    /// URL slug.
    pub title: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub children: Vec<CatalogueItem>,
}

impl CatalogueItem {
    fn count(&self) -> usize {
        1 + self.children.iter().map(CatalogueItem::count).sum::<usize>()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CataloguePlan {
    pub items: Vec<CatalogueItem>,
}

impl CataloguePlan {
    /// Total number of nodes at every depth.
    pub fn len(&self) -> usize {
        self.items.iter().map(CatalogueItem::count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn strip_code_fence(s: &str) -> &str {
    let s = s.trim();
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn validate(items: &[CatalogueItem]) -> Result<(), PipelineError> {
    for item in items {
        if item.name.trim().is_empty() {
            return Err(PipelineError::Structure("catalogue item without a name".into()));
        }
        validate(&item.children)?;
    }
    Ok(())
}

/// Parse a raw model reply into a plan. The payload may be wrapped in the
/// structure tag and/or a json code fence.
pub fn parse_plan(raw: &str) -> Result<CataloguePlan, PipelineError> {
    let payload = strip_code_fence(extract_tagged(raw, STRUCTURE_TAG));
    let plan: CataloguePlan = serde_json::from_str(payload)
        .map_err(|e| PipelineError::Structure(format!("catalogue JSON: {e}")))?;
    if plan.items.is_empty() {
        return Err(PipelineError::Structure("catalogue has no items".into()));
    }
    validate(&plan.items)?;
    Ok(plan)
}

/// Depth-first, parents before children. `order` restarts at 0 under every parent.
pub fn flatten(plan: &CataloguePlan, job_id: &str, document_id: &str) -> Vec<TopicNode> {
    fn walk(
        items: &[CatalogueItem],
        parent_id: Option<&str>,
        job_id: &str,
        document_id: &str,
        out: &mut Vec<TopicNode>,
    ) {
        for (order, item) in items.iter().enumerate() {
            let node = TopicNode {
                id: new_id(),
                job_id: job_id.to_string(),
                document_id: document_id.to_string(),
                parent_id: parent_id.map(str::to_string),
                name: item.name.clone(),
                url_slug: item.title.clone(),
                prompt: item.prompt.clone(),
                order,
            };
            let id = node.id.clone();
            out.push(node);
            walk(&item.children, Some(&id), job_id, document_id, out);
        }
    }

    let mut out = Vec::with_capacity(plan.len());
    walk(&plan.items, None, job_id, document_id, &mut out);
    out
}

pub struct CataloguePlanner<'a> {
    completion: &'a dyn CompletionService,
    model: String,
    policy: RetryPolicy,
}

impl<'a> CataloguePlanner<'a> {
    pub fn new(completion: &'a dyn CompletionService, model: impl Into<String>) -> Self {
        Self {
            completion,
            model: model.into(),
            policy: RetryPolicy::planner(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn request(&self, ctx: &GenerationContext) -> ChatRequest {
        let prompt = prompts::render(
            ANALYZE_CATALOGUE,
            &[("catalogue", ctx.catalogue.as_str()), ("readme", ctx.readme.as_str())],
        );
        ChatRequest {
            messages: vec![ChatMessage::user(prompt)],
            options: ChatOptions {
                model: self.model.clone(),
                temperature: Some(0.5),
                max_tokens: Some(max_tokens_for_model(&self.model)),
            },
            tools: None,
        }
    }

    /// Ask for a plan until one parses, retrying call and parse failures alike.
    pub async fn plan(
        &self,
        ctx: &GenerationContext,
        cancel: &CancellationToken,
    ) -> Result<CataloguePlan, PipelineError> {
        let outcome = self
            .policy
            .run("planner", cancel, |_: &PipelineError| true, |attempt| {
                let request = self.request(ctx);
                async move {
                    info!(attempt, address = %ctx.address, "[PLANNER] Requesting catalogue");
                    let raw = contract::complete(self.completion, request)
                        .await
                        .map_err(PipelineError::completion)?;
                    parse_plan(&raw).inspect_err(|e| {
                        warn!(attempt, error = %e, "[PLANNER] Unusable catalogue reply");
                    })
                }
            })
            .await;

        match outcome {
            Ok(plan) => {
                info!(
                    address = %ctx.address,
                    top_level = plan.items.len(),
                    total = plan.len(),
                    "[PLANNER] Catalogue planned"
                );
                Ok(plan)
            }
            Err(RetryError::Exhausted { attempts, last }) => Err(PipelineError::PlannerExhausted {
                attempts,
                last_error: last.to_string(),
            }),
            Err(RetryError::Aborted { error, .. }) => Err(error),
            Err(RetryError::Cancelled) => Err(PipelineError::Cancelled),
        }
    }
}
