use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::fanout::DEFAULT_CONCURRENCY;
use crate::queue::DEFAULT_CAPACITY;

pub const ENV_CONCURRENCY: &str = "TASK_MAX_SIZE_PER_USER";
pub const ENV_REPAIR_MERMAID: &str = "REPAIR_MERMAID";

/// Runtime settings of the pipeline worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Checkouts are placed at `<repositories_dir>/<organization>/<repository>`.
    pub repositories_dir: PathBuf,
    /// Model used for README, changelog, overview, topics and mermaid repair.
    pub chat_model: String,
    /// Model used for catalogue planning.
    pub analysis_model: String,
    /// Topics generated at once.
    pub concurrency: usize,
    pub repair_mermaid: bool,
    /// Commits fed to the changelog.
    pub commit_limit: usize,
    pub queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            repositories_dir: PathBuf::from("repositories"),
            chat_model: "gpt-4.1".to_string(),
            analysis_model: "gpt-4.1".to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            repair_mermaid: false,
            commit_limit: 20,
            queue_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl PipelineConfig {
    /// Apply `TASK_MAX_SIZE_PER_USER` and `REPAIR_MERMAID` from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Same as [`with_env_overrides`](Self::with_env_overrides) with an explicit lookup.
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup(ENV_CONCURRENCY) {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => self.concurrency = n,
                _ => warn!(var = ENV_CONCURRENCY, value = %raw, "Ignoring invalid concurrency override"),
            }
        }
        if let Some(raw) = lookup(ENV_REPAIR_MERMAID) {
            self.repair_mermaid = raw.trim() == "1";
        }
        self
    }

    pub fn trace_loaded(&self) {
        info!(
            repositories_dir = %self.repositories_dir.display(),
            chat_model = %self.chat_model,
            analysis_model = %self.analysis_model,
            concurrency = self.concurrency,
            repair_mermaid = self.repair_mermaid,
            "Loaded PipelineConfig"
        );
        debug!(?self, "PipelineConfig loaded (full debug)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn overrides_apply_only_when_valid() {
        let env: HashMap<&str, &str> =
            HashMap::from([(ENV_CONCURRENCY, "12"), (ENV_REPAIR_MERMAID, "1")]);
        let cfg = PipelineConfig::default()
            .with_overrides_from(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.concurrency, 12);
        assert!(cfg.repair_mermaid);

        let env: HashMap<&str, &str> =
            HashMap::from([(ENV_CONCURRENCY, "zero"), (ENV_REPAIR_MERMAID, "true")]);
        let cfg = PipelineConfig::default()
            .with_overrides_from(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.concurrency, DEFAULT_CONCURRENCY);
        assert!(!cfg.repair_mermaid);
    }

    #[test]
    fn yaml_fields_default_individually() {
        let cfg: PipelineConfig = serde_json::from_str(r#"{"concurrency": 2}"#).unwrap();
        assert_eq!(cfg.concurrency, 2);
        assert_eq!(cfg.commit_limit, 20);
        assert_eq!(cfg.queue_capacity, DEFAULT_CAPACITY);
    }
}
