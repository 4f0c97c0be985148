use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use repowiki_core::catalogue::build_catalogue;
use repowiki_core::contract::DocumentStore;
use repowiki_core::git::GitCli;
use repowiki_core::model::JobStatus;
use repowiki_core::pipeline::{Pipeline, RunReport};
use repowiki_core::queue::JobQueue;
use repowiki_core::service::{DocumentationService, SubmitOutcome};
use repowiki_core::store::InMemoryStore;

use crate::export::export_job;
use crate::llm_client::{OpenAiClient, CONNECT_TIMEOUT};
use crate::load_config::load_config;

/// CLI for repowiki: generate documentation for git repositories.
#[derive(Parser)]
#[clap(
    name = "repowiki",
    version,
    about = "Generate hierarchical markdown documentation for git repositories with an LLM"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate documentation for one or more repositories and export it as markdown
    Generate {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Repository address to document; may be given several times
        #[clap(long = "repo", required = true)]
        repos: Vec<String>,
    },
    /// Print the file listing the planner would see for a local checkout
    Catalogue {
        /// Repository root
        #[clap(long)]
        path: PathBuf,
    },
}

fn print_report(report: &RunReport) {
    match report.status {
        JobStatus::Completed => println!(
            "  {} completed: {}/{} topics generated, {} dropped, {} diagrams repaired",
            report.address,
            report.topics_generated,
            report.topics_planned,
            report.topics_dropped,
            report.mermaid_repaired
        ),
        _ => println!(
            "  {} failed: {}",
            report.address,
            report.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

async fn generate(config: PathBuf, repos: Vec<String>) -> Result<()> {
    let config = load_config(config)?;
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    let store = Arc::new(InMemoryStore::new());
    let dyn_store: Arc<dyn DocumentStore> = store.clone();
    let client = OpenAiClient::with_timeouts(
        config.llm.endpoint.clone(),
        config.llm.api_key.clone(),
        CONNECT_TIMEOUT,
        config.llm.read_timeout,
    )
    .map_err(|e| anyhow::anyhow!("Failed to create completion client: {e}"))?;
    let queue = Arc::new(JobQueue::new(config.pipeline.queue_capacity, cancel.clone()));
    let pipeline = Pipeline::new(
        dyn_store.clone(),
        Arc::new(GitCli::new(config.pipeline.repositories_dir.clone())),
        Arc::new(client),
        queue.clone(),
        config.pipeline.clone(),
    );
    let service = DocumentationService::new(dyn_store.clone(), queue);

    pipeline.recover().await?;
    for repo in &repos {
        match service.submit(repo, config.git_credentials.clone()).await? {
            SubmitOutcome::Accepted { job_id } => println!("Queued {repo} as job {job_id}"),
            SubmitOutcome::Rejected { existing_job_id, status } => {
                println!("Skipped {repo}: job {existing_job_id} is {status:?}")
            }
        }
    }

    println!("Generation starting...");
    let reports = pipeline.drain(&cancel).await;
    println!("Generation finished.\nReport:");
    for report in &reports {
        print_report(report);
        if report.status == JobStatus::Completed {
            let path = export_job(dyn_store.as_ref(), &report.job_id, &config.output_dir).await?;
            println!("  exported to {}", path.display());
        }
    }

    let failed = reports
        .iter()
        .filter(|r| r.status != JobStatus::Completed)
        .count();
    if cancel.is_cancelled() {
        anyhow::bail!("Generation cancelled");
    }
    if failed > 0 {
        anyhow::bail!("{failed} of {} repositories failed", reports.len());
    }
    Ok(())
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Generate { config, repos } => {
            let result = generate(config, repos).await;
            if let Err(e) = &result {
                eprintln!("[ERROR] Generation failed: {e}");
            }
            result
        }
        Commands::Catalogue { path } => {
            let listing = tokio::task::spawn_blocking(move || build_catalogue(&path)).await??;
            print!("{listing}");
            Ok(())
        }
    }
}
