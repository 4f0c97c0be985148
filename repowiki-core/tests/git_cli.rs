use std::path::Path;
use std::process::Command;

use tempfile::tempdir;

use repowiki_core::contract::{GitClient, PullRequest};
use repowiki_core::git::GitCli;
use repowiki_core::model::Credentials;

fn git_available() -> bool {
    Command::new("git").arg("--version").output().is_ok()
}

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(["-c", "user.name=Ann", "-c", "user.email=ann@example.com"])
        .arg("-C")
        .arg(dir)
        .args(args)
        .status()
        .expect("git should run");
    assert!(status.success(), "git {args:?} failed");
}

fn commit_file(dir: &Path, name: &str, contents: &str, message: &str) {
    std::fs::write(dir.join(name), contents).unwrap();
    git(dir, &["add", name]);
    git(dir, &["commit", "-q", "-m", message]);
}

#[tokio::test]
async fn clones_then_refreshes_a_local_origin() {
    if !git_available() {
        eprintln!("git not installed, skipping");
        return;
    }
    let origin_root = tempdir().unwrap();
    let origin = origin_root.path().join("acme").join("tool");
    std::fs::create_dir_all(&origin).unwrap();
    git(&origin, &["init", "-q", "-b", "main"]);
    commit_file(&origin, "README.md", "# Tool\n", "initial commit");
    commit_file(&origin, "main.rs", "fn main() {}\n", "add entry point");

    let checkouts = tempdir().unwrap();
    let client = GitCli::new(checkouts.path());
    let address = format!("file://{}", origin.display());
    let request = PullRequest {
        address: address.clone(),
        credentials: None,
        branch: None,
    };

    let snapshot = client.pull(request.clone()).await.unwrap();
    assert_eq!(snapshot.organization, "acme");
    assert_eq!(snapshot.repository_name, "tool");
    assert_eq!(snapshot.branch, "main");
    assert_eq!(snapshot.commit_author, "Ann");
    assert_eq!(snapshot.commit_message, "add entry point");
    assert_eq!(snapshot.local_path, checkouts.path().join("acme").join("tool"));
    assert!(snapshot.local_path.join("main.rs").exists());

    let log = client.commit_log(snapshot.local_path.clone(), 20).await.unwrap();
    let messages: Vec<&str> = log.iter().map(|c| c.message.as_str()).collect();
    assert_eq!(messages, vec!["initial commit", "add entry point"]);
    assert!(log.iter().all(|c| c.author == "Ann"));

    let limited = client.commit_log(snapshot.local_path.clone(), 1).await.unwrap();
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].message, "add entry point");

    commit_file(&origin, "lib.rs", "pub fn f() {}\n", "add library");
    let refreshed = client.pull(request).await.unwrap();
    assert_ne!(refreshed.commit_sha, snapshot.commit_sha);
    assert_eq!(refreshed.commit_message, "add library");
    assert!(refreshed.local_path.join("lib.rs").exists());
}

#[tokio::test]
async fn unknown_origin_is_an_error() {
    if !git_available() {
        return;
    }
    let checkouts = tempdir().unwrap();
    let missing = tempdir().unwrap();
    let client = GitCli::new(checkouts.path());
    let result = client
        .pull(PullRequest {
            address: format!("file://{}/acme/missing", missing.path().display()),
            credentials: None,
            branch: None,
        })
        .await;
    assert!(result.is_err());
}

fn git_output(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .expect("git should run");
    assert!(output.status.success(), "git {args:?} failed");
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

#[tokio::test]
async fn credentials_are_not_left_in_the_checkout_config() {
    if !git_available() {
        return;
    }
    let origin_root = tempdir().unwrap();
    let origin = origin_root.path().join("acme").join("private");
    std::fs::create_dir_all(&origin).unwrap();
    git(&origin, &["init", "-q", "-b", "main"]);
    commit_file(&origin, "main.rs", "fn main() {}\n", "initial commit");

    let checkouts = tempdir().unwrap();
    let client = GitCli::new(checkouts.path());
    let address = format!("file://{}", origin.display());
    let request = PullRequest {
        address: address.clone(),
        credentials: Some(Credentials {
            username: "bot".into(),
            password: "s3cret-token".into(),
        }),
        branch: Some("main".into()),
    };

    let snapshot = client.pull(request.clone()).await.unwrap();
    assert_eq!(
        git_output(&snapshot.local_path, &["config", "--get", "remote.origin.url"]),
        address
    );
    let config = std::fs::read_to_string(snapshot.local_path.join(".git/config")).unwrap();
    assert!(!config.contains("s3cret-token"));

    commit_file(&origin, "lib.rs", "pub fn f() {}\n", "add library");
    let refreshed = client.pull(request).await.unwrap();
    assert_eq!(refreshed.commit_message, "add library");
    assert_eq!(
        git_output(&refreshed.local_path, &["config", "--get", "remote.origin.url"]),
        address
    );
}
