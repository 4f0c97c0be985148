use std::fs::{create_dir_all, write};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::{tempdir, NamedTempFile};

#[test]
fn catalogue_lists_source_files_without_readme_or_hidden_entries() {
    let repo = tempdir().unwrap();
    create_dir_all(repo.path().join("src")).unwrap();
    create_dir_all(repo.path().join(".git")).unwrap();
    write(repo.path().join("src/main.rs"), "fn main() {}").unwrap();
    write(repo.path().join("README.md"), "# hi").unwrap();
    write(repo.path().join("logo.png"), [0u8; 4]).unwrap();
    write(repo.path().join(".git/HEAD"), "ref").unwrap();

    let mut cmd = Command::cargo_bin("repowiki").expect("Binary exists");
    cmd.arg("catalogue").arg("--path").arg(repo.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("src/main.rs"))
        .stdout(predicate::str::contains("README").not())
        .stdout(predicate::str::contains("logo.png").not())
        .stdout(predicate::str::contains("HEAD").not());
}

#[test]
fn generate_requires_a_repository() {
    let mut cmd = Command::cargo_bin("repowiki").expect("Binary exists");
    cmd.arg("generate").arg("--config").arg("config.yaml");
    cmd.assert().failure();
}

#[test]
fn generate_fails_without_api_key() {
    let config = NamedTempFile::new().expect("Creating temp config file failed");
    write(config.path(), "llm:\n  endpoint: http://127.0.0.1:9/v1\n").unwrap();

    let mut cmd = Command::cargo_bin("repowiki").expect("Binary exists");
    cmd.arg("generate")
        .arg("--config")
        .arg(config.path())
        .arg("--repo")
        .arg("https://example.com/acme/tool.git")
        .env_remove("CHAT_API_KEY");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("CHAT_API_KEY"));
}
