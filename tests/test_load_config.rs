use std::env;
use std::fs::write;
use std::path::PathBuf;
use std::time::Duration;

use serial_test::serial;
use tempfile::NamedTempFile;

use repowiki::load_config::load_config;

fn config_file(yaml: &str) -> NamedTempFile {
    let file = NamedTempFile::new().expect("temp file");
    write(file.path(), yaml).unwrap();
    file
}

fn clear_env() {
    for key in [
        "CHAT_API_KEY",
        "GIT_USERNAME",
        "GIT_PASSWORD",
        "TASK_MAX_SIZE_PER_USER",
        "REPAIR_MERMAID",
    ] {
        env::remove_var(key);
    }
}

/// A static config plus the API key from the environment yields a full AppConfig.
#[tokio::test]
#[serial]
async fn test_load_config_success_merges_env() {
    clear_env();
    let file = config_file(
        r#"
llm:
  endpoint: https://llm.example.com/v1
  chat_model: gpt-4o
  analysis_model: o3-mini
  read_timeout_secs: 30
pipeline:
  output_dir: ./tmp/wiki
  repositories_dir: ./tmp/repos
  concurrency: 3
  commit_limit: 10
"#,
    );
    env::set_var("CHAT_API_KEY", "top-secret-test-key");
    env::set_var("GIT_USERNAME", "ann");
    env::set_var("GIT_PASSWORD", "hunter2");

    let config = load_config(file.path()).expect("Config should load");

    assert_eq!(config.llm.endpoint, "https://llm.example.com/v1");
    assert_eq!(config.llm.api_key, "top-secret-test-key");
    assert_eq!(config.llm.read_timeout, Duration::from_secs(30));
    assert_eq!(config.output_dir, PathBuf::from("./tmp/wiki"));
    assert_eq!(config.pipeline.repositories_dir, PathBuf::from("./tmp/repos"));
    assert_eq!(config.pipeline.chat_model, "gpt-4o");
    assert_eq!(config.pipeline.analysis_model, "o3-mini");
    assert_eq!(config.pipeline.concurrency, 3);
    assert_eq!(config.pipeline.commit_limit, 10);
    assert!(!config.pipeline.repair_mermaid);
    let creds = config.git_credentials.expect("credentials from env");
    assert_eq!(creds.username, "ann");
    assert!(!format!("{creds:?}").contains("hunter2"));
    assert!(!format!("{:?}", config.llm).contains("top-secret"));
    clear_env();
}

/// Env overrides win over the file and the pipeline section is optional.
#[tokio::test]
#[serial]
async fn test_load_config_env_overrides_and_defaults() {
    clear_env();
    let file = config_file("llm:\n  endpoint: http://localhost:8080/v1\n");
    env::set_var("CHAT_API_KEY", "key");
    env::set_var("TASK_MAX_SIZE_PER_USER", "8");
    env::set_var("REPAIR_MERMAID", "1");

    let config = load_config(file.path()).expect("Config should load");

    assert_eq!(config.output_dir, PathBuf::from("wiki"));
    assert_eq!(config.llm.read_timeout, Duration::from_secs(120));
    assert_eq!(config.pipeline.concurrency, 8);
    assert!(config.pipeline.repair_mermaid);
    assert_eq!(config.pipeline.chat_model, "gpt-4.1");
    assert!(config.git_credentials.is_none());
    clear_env();
}

#[tokio::test]
#[serial]
async fn test_load_config_errors_on_missing_api_key() {
    clear_env();
    let file = config_file("llm:\n  endpoint: http://localhost:8080/v1\n");

    let msg = load_config(file.path()).unwrap_err().to_string();
    assert!(msg.contains("CHAT_API_KEY"), "Must error for missing env var, got: {msg}");
}

#[tokio::test]
#[serial]
async fn test_load_config_errors_for_invalid_file() {
    clear_env();
    env::set_var("CHAT_API_KEY", "present");
    let file = config_file("not-yaml: [:::");

    let msg = load_config(file.path()).unwrap_err().to_string();
    assert!(
        msg.contains("parse") || msg.contains("YAML"),
        "Parse error expected, got: {msg}"
    );
    clear_env();
}
