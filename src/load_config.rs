use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;
use tracing::{error, info, warn};

use repowiki_core::config::PipelineConfig;
use repowiki_core::model::Credentials;

use crate::llm_client::DEFAULT_READ_TIMEOUT;

pub const ENV_API_KEY: &str = "CHAT_API_KEY";
pub const ENV_GIT_USERNAME: &str = "GIT_USERNAME";
pub const ENV_GIT_PASSWORD: &str = "GIT_PASSWORD";

#[derive(Deserialize)]
struct StaticConfig {
    llm: LlmSection,
    #[serde(default)]
    pipeline: PipelineSection,
}

#[derive(Deserialize)]
struct LlmSection {
    endpoint: String,
    #[serde(default)]
    chat_model: Option<String>,
    #[serde(default)]
    analysis_model: Option<String>,
    #[serde(default = "default_read_timeout_secs")]
    read_timeout_secs: u64,
}

fn default_read_timeout_secs() -> u64 {
    DEFAULT_READ_TIMEOUT.as_secs()
}

#[derive(Deserialize)]
struct PipelineSection {
    #[serde(default = "default_output_dir")]
    output_dir: PathBuf,
    #[serde(flatten)]
    settings: PipelineConfig,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            settings: PipelineConfig::default(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("wiki")
}

/// Connection settings of the completion endpoint.
#[derive(Clone)]
pub struct LlmConfig {
    pub endpoint: String,
    pub api_key: String,
    /// Longest wait for the next chunk of a completion response.
    pub read_timeout: Duration,
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"***")
            .field("read_timeout", &self.read_timeout)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub pipeline: PipelineConfig,
    /// Markdown export root.
    pub output_dir: PathBuf,
    pub git_credentials: Option<Credentials>,
}

/// Loads the YAML config file (no secrets) and merges secrets and overrides from the environment.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!("Failed to read config file {:?}: {}", path_ref, e));
        }
    };

    let static_conf: StaticConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    let api_key = match std::env::var(ENV_API_KEY) {
        Ok(key) if !key.trim().is_empty() => {
            info!("{ENV_API_KEY} found in env");
            key
        }
        _ => {
            error!("{ENV_API_KEY} environment variable not set");
            anyhow::bail!("{ENV_API_KEY} environment variable not set");
        }
    };

    let git_credentials = match (std::env::var(ENV_GIT_USERNAME), std::env::var(ENV_GIT_PASSWORD)) {
        (Ok(username), Ok(password)) if !username.is_empty() => {
            info!(username = %username, "Git credentials found in env");
            Some(Credentials { username, password })
        }
        (Ok(_), Err(_)) => {
            warn!("{ENV_GIT_USERNAME} set without {ENV_GIT_PASSWORD}; cloning anonymously");
            None
        }
        _ => None,
    };

    let mut pipeline = static_conf.pipeline.settings;
    if let Some(model) = static_conf.llm.chat_model {
        pipeline.chat_model = model;
    }
    if let Some(model) = static_conf.llm.analysis_model {
        pipeline.analysis_model = model;
    }
    let pipeline = pipeline.with_env_overrides();
    pipeline.trace_loaded();

    info!(
        endpoint = %static_conf.llm.endpoint,
        output_dir = %static_conf.pipeline.output_dir.display(),
        "Config loaded and merged successfully"
    );

    Ok(AppConfig {
        llm: LlmConfig {
            endpoint: static_conf.llm.endpoint,
            api_key,
            read_timeout: Duration::from_secs(static_conf.llm.read_timeout_secs.max(1)),
        },
        pipeline,
        output_dir: static_conf.pipeline.output_dir,
        git_credentials,
    })
}
