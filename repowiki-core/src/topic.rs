//! Content generation for a single topic node.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::contract::{self, max_tokens_for_model, ChatMessage, ChatOptions, ChatRequest, CompletionService};
use crate::error::PipelineError;
use crate::extract::extract_tagged;
use crate::model::{new_id, GeneratedDocument, GenerationContext, TopicNode};
use crate::prompts::{self, BLOG_TAG, GENERATE_TOPIC};
use crate::tools::FileTools;

/// A generated document and the repository files read while producing it.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicOutput {
    pub document: GeneratedDocument,
    pub files_read: Vec<String>,
}

/// Rough token estimate (four bytes per token); the completion stream carries no usage data.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

#[derive(Clone)]
pub struct TopicGenerator {
    completion: Arc<dyn CompletionService>,
    model: String,
}

impl TopicGenerator {
    pub fn new(completion: Arc<dyn CompletionService>, model: impl Into<String>) -> Self {
        Self {
            completion,
            model: model.into(),
        }
    }

    /// One attempt: a single completion with the file tools granted, using a
    /// read log private to this call.
    pub async fn generate(
        &self,
        ctx: &GenerationContext,
        node: &TopicNode,
    ) -> Result<TopicOutput, PipelineError> {
        let tools = FileTools::new(ctx.local_path.clone());
        let log = tools.log();
        let prompt = prompts::render(
            GENERATE_TOPIC,
            &[
                ("catalogue", ctx.catalogue.as_str()),
                ("prompt", node.prompt.as_str()),
                ("readme", ctx.readme.as_str()),
                ("git_repository", ctx.address.as_str()),
                ("branch", ctx.branch.as_str()),
                ("title", node.name.as_str()),
            ],
        );
        let request_tokens = estimate_tokens(&prompt);
        let request = ChatRequest {
            messages: vec![ChatMessage::user(prompt)],
            options: ChatOptions {
                model: self.model.clone(),
                temperature: None,
                max_tokens: Some(max_tokens_for_model(&self.model)),
            },
            tools: Some(tools),
        };

        debug!(topic = %node.name, "[TOPIC] Generating");
        let started = Instant::now();
        let raw = contract::complete(self.completion.as_ref(), request)
            .await
            .map_err(PipelineError::completion)?;
        let body = extract_tagged(&raw, BLOG_TAG).trim();
        if body.is_empty() {
            return Err(PipelineError::Structure(format!(
                "empty content for topic '{}'",
                node.name
            )));
        }

        let files_read = log.paths();
        let document = GeneratedDocument {
            id: new_id(),
            topic_id: node.id.clone(),
            title: node.name.clone(),
            body: body.to_string(),
            request_tokens,
            response_tokens: estimate_tokens(&raw),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            topic = %node.name,
            files = files_read.len(),
            elapsed_ms = document.elapsed_ms,
            "[TOPIC] Generated"
        );
        Ok(TopicOutput {
            document,
            files_read,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::MockCompletionService;
    use crate::error::BoxError;
    use futures::stream;
    use std::fs;
    use tempfile::tempdir;

    fn node() -> TopicNode {
        TopicNode {
            id: "t1".into(),
            job_id: "j".into(),
            document_id: "d".into(),
            parent_id: None,
            name: "Architecture".into(),
            url_slug: "architecture".into(),
            prompt: "Explain the modules".into(),
            order: 0,
        }
    }

    #[tokio::test]
    async fn records_files_read_through_the_granted_tools() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("main.rs"), "fn main() {}").unwrap();
        let ctx = GenerationContext {
            address: "https://example.com/a/b.git".into(),
            branch: "main".into(),
            local_path: dir.path().to_path_buf(),
            catalogue: "main.rs\n".into(),
            readme: String::new(),
        };

        let mut mock = MockCompletionService::new();
        mock.expect_stream_chat().times(1).returning(|req| {
            let tools = req.tools.expect("tools granted");
            let s = stream::once(async move {
                tools.read_file("main.rs").await;
                tools.read_file("missing.rs").await;
                Ok::<_, BoxError>("<blog>## Architecture\nSee main.rs</blog>".to_string())
            });
            Ok(Box::pin(s))
        });

        let out = TopicGenerator::new(Arc::new(mock), "gpt-4.1")
            .generate(&ctx, &node())
            .await
            .unwrap();
        assert_eq!(out.document.body, "## Architecture\nSee main.rs");
        assert_eq!(out.document.topic_id, "t1");
        assert_eq!(out.document.title, "Architecture");
        assert_eq!(out.files_read, vec!["main.rs"]);
        assert!(out.document.request_tokens > 0);
    }

    #[tokio::test]
    async fn empty_reply_is_an_error() {
        let mut mock = MockCompletionService::new();
        mock.expect_stream_chat().returning(|_| {
            let chunks: Vec<Result<String, BoxError>> = vec![Ok("<blog>  </blog>".into())];
            Ok(Box::pin(stream::iter(chunks)))
        });
        let ctx = GenerationContext {
            address: String::new(),
            branch: String::new(),
            local_path: std::env::temp_dir(),
            catalogue: String::new(),
            readme: String::new(),
        };
        let err = TopicGenerator::new(Arc::new(mock), "m")
            .generate(&ctx, &node())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Structure(_)));
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
