//! Single-shot generation stages that run before planning: README, commit
//! changelog and project overview.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::contract::{self, max_tokens_for_model, ChatMessage, ChatOptions, ChatRequest, CompletionService};
use crate::error::PipelineError;
use crate::extract::extract_tagged;
use crate::model::{CommitEntry, GenerationContext};
use crate::prompts::{
    self, BLOG_TAG, CHANGELOG_TAG, COMMIT_ANALYZE, GENERATE_README, OVERVIEW, README_TAG,
};
use crate::tools::FileTools;

/// Changelog text and the name of the most recent committer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Changelog {
    pub text: String,
    pub last_committer: String,
}

/// Render commits (oldest first) as the block list the changelog prompt expects.
pub fn render_commits(commits: &[CommitEntry]) -> String {
    let mut out = String::new();
    for commit in commits {
        out.push_str(&format!(
            "Author: {}\n<message>\n{}\n</message>\nTime: {}\n",
            commit.author,
            commit.message.trim_end(),
            commit.time
        ));
    }
    out
}

pub struct DocumentWriter<'a> {
    completion: &'a dyn CompletionService,
    model: String,
}

impl<'a> DocumentWriter<'a> {
    pub fn new(completion: &'a dyn CompletionService, model: impl Into<String>) -> Self {
        Self {
            completion,
            model: model.into(),
        }
    }

    async fn ask(
        &self,
        prompt: String,
        temperature: Option<f32>,
        tools: Option<FileTools>,
        tag: &str,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        let request = ChatRequest {
            messages: vec![ChatMessage::user(prompt)],
            options: ChatOptions {
                model: self.model.clone(),
                temperature,
                max_tokens: Some(max_tokens_for_model(&self.model)),
            },
            tools,
        };
        let raw = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            raw = contract::complete(self.completion, request) => raw.map_err(PipelineError::completion)?,
        };
        Ok(extract_tagged(&raw, tag).trim().to_string())
    }

    /// README for a repository that has none, written with the file tools granted.
    pub async fn generate_readme(
        &self,
        ctx: &GenerationContext,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        let prompt = prompts::render(
            GENERATE_README,
            &[
                ("catalogue", ctx.catalogue.as_str()),
                ("git_repository", ctx.address.as_str()),
                ("branch", ctx.branch.as_str()),
            ],
        );
        let tools = FileTools::new(ctx.local_path.clone());
        let readme = self.ask(prompt, Some(0.5), Some(tools), README_TAG, cancel).await?;
        info!(address = %ctx.address, bytes = readme.len(), "[DOCS] Generated README");
        Ok(readme)
    }

    /// Changelog from commits ordered oldest to newest. An empty history yields
    /// an empty changelog without calling the model.
    pub async fn generate_changelog(
        &self,
        ctx: &GenerationContext,
        commits: &[CommitEntry],
        cancel: &CancellationToken,
    ) -> Result<Changelog, PipelineError> {
        let Some(latest) = commits.last() else {
            warn!(address = %ctx.address, "[DOCS] No commits, skipping changelog");
            return Ok(Changelog {
                text: String::new(),
                last_committer: String::new(),
            });
        };
        let prompt = prompts::render(
            COMMIT_ANALYZE,
            &[
                ("readme", ctx.readme.as_str()),
                ("git_repository", ctx.address.as_str()),
                ("commit_message", render_commits(commits).as_str()),
                ("branch", ctx.branch.as_str()),
            ],
        );
        let text = self.ask(prompt, None, None, CHANGELOG_TAG, cancel).await?;
        info!(
            address = %ctx.address,
            commits = commits.len(),
            "[DOCS] Generated changelog"
        );
        Ok(Changelog {
            text,
            last_committer: latest.author.clone(),
        })
    }

    pub async fn generate_overview(
        &self,
        ctx: &GenerationContext,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        let prompt = prompts::render(
            OVERVIEW,
            &[
                ("catalogue", ctx.catalogue.as_str()),
                ("git_repository", ctx.address.as_str()),
                ("branch", ctx.branch.as_str()),
                ("readme", ctx.readme.as_str()),
            ],
        );
        let tools = FileTools::new(ctx.local_path.clone());
        let overview = self.ask(prompt, None, Some(tools), BLOG_TAG, cancel).await?;
        info!(address = %ctx.address, "[DOCS] Generated project overview");
        Ok(overview)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::MockCompletionService;
    use crate::error::BoxError;
    use futures::stream;
    use std::path::PathBuf;

    fn ctx() -> GenerationContext {
        GenerationContext {
            address: "https://example.com/acme/tool.git".into(),
            branch: "main".into(),
            local_path: PathBuf::from("/tmp/acme/tool"),
            catalogue: "src/main.rs\n".into(),
            readme: "# Tool".into(),
        }
    }

    fn commit(author: &str, message: &str) -> CommitEntry {
        CommitEntry {
            author: author.into(),
            message: message.into(),
            time: "2024-01-01 10:00:00".into(),
        }
    }

    fn answering(text: &'static str) -> MockCompletionService {
        let mut mock = MockCompletionService::new();
        mock.expect_stream_chat().returning(move |_| {
            let chunks: Vec<Result<String, BoxError>> = vec![Ok(text.to_string())];
            Ok(Box::pin(stream::iter(chunks)))
        });
        mock
    }

    #[test]
    fn commits_render_in_given_order() {
        let out = render_commits(&[commit("ann", "first\n"), commit("bob", "second")]);
        let first = out.find("first").unwrap();
        let second = out.find("second").unwrap();
        assert!(first < second);
        assert!(out.starts_with("Author: ann\n<message>\nfirst\n</message>\n"));
    }

    #[tokio::test]
    async fn changelog_records_most_recent_committer() {
        let mock = answering("<changelog>\n- Added things\n</changelog>");
        let log = DocumentWriter::new(&mock, "gpt-4o")
            .generate_changelog(
                &ctx(),
                &[commit("ann", "old"), commit("bob", "new")],
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(log.text, "- Added things");
        assert_eq!(log.last_committer, "bob");
    }

    #[tokio::test]
    async fn empty_history_skips_the_model() {
        let mock = MockCompletionService::new();
        let log = DocumentWriter::new(&mock, "gpt-4o")
            .generate_changelog(&ctx(), &[], &CancellationToken::new())
            .await
            .unwrap();
        assert!(log.text.is_empty());
    }

    #[tokio::test]
    async fn readme_uses_tools_and_extracts_tag() {
        let mut mock = MockCompletionService::new();
        mock.expect_stream_chat()
            .withf(|req| req.tools.is_some() && req.options.temperature == Some(0.5))
            .returning(|_| {
                let chunks: Vec<Result<String, BoxError>> =
                    vec![Ok("Sure! <readme># Tool\nDoes things</readme>".into())];
                Ok(Box::pin(stream::iter(chunks)))
            });
        let readme = DocumentWriter::new(&mock, "gpt-4o")
            .generate_readme(&ctx(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(readme, "# Tool\nDoes things");
    }

    #[tokio::test]
    async fn cancelled_token_aborts_the_call() {
        let mock = answering("<blog>never</blog>");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = DocumentWriter::new(&mock, "gpt-4o")
            .generate_overview(&ctx(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }
}
