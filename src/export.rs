//! Writes a completed job's documentation to disk as markdown.
//!
//! Layout under `<output_dir>/<organization>/<repository>/`:
//! `index.md` (table of contents), `overview.md`, `changelog.md`, and one file
//! per generated topic at `topics/<parent-slug>/<slug>.md`. Sibling slugs that
//! collide get a numeric suffix. Topics whose generation was dropped are listed
//! in the index without a link.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{error, info};

use repowiki_core::contract::{DocumentStore, JobOutputs};
use repowiki_core::model::{GeneratedDocument, RepositoryJob, TopicNode};

const TOPICS_DIR: &str = "topics";

/// Filesystem-safe form of a topic slug. Falls back to `fallback` when nothing is left.
pub fn safe_slug(slug: &str, fallback: &str) -> String {
    let cleaned: String = slug
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('-').to_string();
    if cleaned.is_empty() {
        fallback.to_string()
    } else {
        cleaned
    }
}

fn dir_name(value: &str) -> &str {
    if value.is_empty() {
        "unknown"
    } else {
        value
    }
}

/// Slug of every topic, made unique among its siblings with a `-2`, `-3`, ... suffix.
fn sibling_slugs(topics: &[TopicNode]) -> HashMap<&str, String> {
    let mut ordered: Vec<&TopicNode> = topics.iter().collect();
    ordered.sort_by(|a, b| (&a.parent_id, a.order).cmp(&(&b.parent_id, b.order)));

    let mut taken: HashSet<(Option<&str>, String)> = HashSet::new();
    let mut slugs = HashMap::new();
    for topic in ordered {
        let base = safe_slug(&topic.url_slug, &topic.id);
        let parent = topic.parent_id.as_deref();
        let mut slug = base.clone();
        let mut n = 2;
        while !taken.insert((parent, slug.clone())) {
            slug = format!("{base}-{n}");
            n += 1;
        }
        slugs.insert(topic.id.as_str(), slug);
    }
    slugs
}

/// Relative markdown path of every topic, keyed by topic id.
fn topic_paths(topics: &[TopicNode]) -> HashMap<String, PathBuf> {
    let by_id: HashMap<&str, &TopicNode> = topics.iter().map(|t| (t.id.as_str(), t)).collect();
    let slugs = sibling_slugs(topics);
    let mut paths = HashMap::new();
    for topic in topics {
        let Some(own) = slugs.get(topic.id.as_str()) else { continue };
        let mut segments = vec![own.clone()];
        let mut parent = topic.parent_id.as_deref();
        while let Some(id) = parent {
            let (Some(node), Some(slug)) = (by_id.get(id), slugs.get(id)) else { break };
            segments.push(slug.clone());
            parent = node.parent_id.as_deref();
        }
        segments.push(TOPICS_DIR.to_string());
        segments.reverse();
        let mut path: PathBuf = segments.iter().collect();
        path.set_extension("md");
        paths.insert(topic.id.clone(), path);
    }
    paths
}

/// The table of contents, nested by parent and ordered by sibling order.
fn render_index(
    job: &RepositoryJob,
    outputs: &JobOutputs,
    paths: &HashMap<String, PathBuf>,
    documents: &HashMap<&str, &GeneratedDocument>,
) -> String {
    let mut out = format!("# {}\n\n", dir_name(&job.name));
    out.push_str(&format!(
        "Source: {} (branch {}, commit {})\n\n",
        job.address, job.branch, job.version
    ));
    if outputs.overview.is_some() {
        out.push_str("- [Overview](overview.md)\n");
    }
    if outputs.commit_summary.is_some() {
        out.push_str("- [Changelog](changelog.md)\n");
    }
    out.push_str("\n## Contents\n\n");

    fn walk(
        out: &mut String,
        topics: &[TopicNode],
        parent: Option<&str>,
        depth: usize,
        paths: &HashMap<String, PathBuf>,
        documents: &HashMap<&str, &GeneratedDocument>,
    ) {
        let mut children: Vec<&TopicNode> = topics
            .iter()
            .filter(|t| t.parent_id.as_deref() == parent)
            .collect();
        children.sort_by_key(|t| t.order);
        for topic in children {
            let indent = "  ".repeat(depth);
            match (documents.contains_key(topic.id.as_str()), paths.get(&topic.id)) {
                (true, Some(path)) => out.push_str(&format!(
                    "{indent}- [{}]({})\n",
                    topic.name,
                    path.to_string_lossy().replace('\\', "/")
                )),
                _ => out.push_str(&format!("{indent}- {} (not generated)\n", topic.name)),
            }
            walk(out, topics, Some(topic.id.as_str()), depth + 1, paths, documents);
        }
    }
    walk(&mut out, &outputs.set.topics, None, 0, paths, documents);
    out
}

async fn write(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            error!(error = ?e, path = %parent.display(), "Failed to create export directory");
            e
        })?;
    }
    tokio::fs::write(path, contents)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Export one job. Returns the directory the files were written to.
pub async fn export_job(
    store: &dyn DocumentStore,
    job_id: &str,
    output_dir: &Path,
) -> Result<PathBuf> {
    let job = store
        .get_job(job_id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load job {job_id}: {e}"))?
        .with_context(|| format!("Job {job_id} not found"))?;
    let outputs = store
        .load_outputs(job_id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load outputs of job {job_id}: {e}"))?;

    let root = output_dir
        .join(dir_name(&job.organization))
        .join(dir_name(&job.name));
    if tokio::fs::try_exists(&root).await.unwrap_or(false) {
        tokio::fs::remove_dir_all(&root)
            .await
            .with_context(|| format!("Failed to clear {}", root.display()))?;
    }

    let paths = topic_paths(&outputs.set.topics);
    let documents: HashMap<&str, &GeneratedDocument> = outputs
        .set
        .documents
        .iter()
        .map(|d| (d.topic_id.as_str(), d))
        .collect();

    write(&root.join("index.md"), &render_index(&job, &outputs, &paths, &documents)).await?;
    if let Some(overview) = &outputs.overview {
        write(&root.join("overview.md"), &overview.body).await?;
    }
    if let Some(summary) = &outputs.commit_summary {
        let body = format!(
            "# Changelog\n\nLast committer: {}\n\n{}\n",
            summary.last_committer, summary.changelog
        );
        write(&root.join("changelog.md"), &body).await?;
    }
    for (topic_id, doc) in &documents {
        if let Some(path) = paths.get(*topic_id) {
            write(&root.join(path), &doc.body).await?;
        }
    }

    info!(
        job_id = %job_id,
        path = %root.display(),
        documents = documents.len(),
        "[EXPORT] Wrote documentation"
    );
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use repowiki_core::model::{
        CommitSummary, DocumentRecord, DocumentSet, ProjectOverview, RepositorySnapshot,
    };
    use repowiki_core::store::InMemoryStore;
    use std::fs;
    use tempfile::tempdir;

    fn topic(id: &str, parent: Option<&str>, name: &str, slug: &str, order: usize) -> TopicNode {
        TopicNode {
            id: id.into(),
            job_id: "job".into(),
            document_id: "doc".into(),
            parent_id: parent.map(str::to_string),
            name: name.into(),
            url_slug: slug.into(),
            prompt: String::new(),
            order,
        }
    }

    fn document(topic_id: &str, body: &str) -> GeneratedDocument {
        GeneratedDocument {
            id: format!("d-{topic_id}"),
            topic_id: topic_id.into(),
            title: topic_id.into(),
            body: body.into(),
            request_tokens: 0,
            response_tokens: 0,
            elapsed_ms: 0,
        }
    }

    #[test]
    fn slugs_are_made_filesystem_safe() {
        assert_eq!(safe_slug("Getting Started", "x"), "getting-started");
        assert_eq!(safe_slug("../etc/passwd", "x"), "etc-passwd");
        assert_eq!(safe_slug("  ", "t1"), "t1");
    }

    async fn seed_job(
        store: &InMemoryStore,
        topics: Vec<TopicNode>,
        documents: Vec<GeneratedDocument>,
    ) -> String {
        let job = RepositoryJob::new("https://h/acme/tool.git", None);
        let job_id = job.id.clone();
        store.replace_job(job).await.unwrap();
        store
            .record_snapshot(
                &job_id,
                RepositorySnapshot {
                    local_path: "/tmp/acme/tool".into(),
                    organization: "acme".into(),
                    repository_name: "tool".into(),
                    branch: "main".into(),
                    commit_sha: "abc".into(),
                    commit_time: String::new(),
                    commit_author: String::new(),
                    commit_message: String::new(),
                },
            )
            .await
            .unwrap();
        store
            .replace_document(DocumentRecord {
                id: "doc".into(),
                job_id: job_id.clone(),
                local_path: "/tmp/acme/tool".into(),
            })
            .await
            .unwrap();
        store
            .insert_overview(ProjectOverview {
                id: "o".into(),
                document_id: "doc".into(),
                body: "Overview body".into(),
            })
            .await
            .unwrap();
        store
            .insert_commit_summary(CommitSummary {
                id: "c".into(),
                job_id: job_id.clone(),
                changelog: "- first".into(),
                last_committer: "bob".into(),
            })
            .await
            .unwrap();
        store
            .persist_document_set(
                &job_id,
                DocumentSet {
                    topics,
                    documents,
                    attributions: Vec::new(),
                },
            )
            .await
            .unwrap();
        job_id
    }

    #[tokio::test]
    async fn exports_tree_overview_and_changelog() {
        let store = InMemoryStore::new();
        let job_id = seed_job(
            &store,
            vec![
                topic("t1", None, "Getting Started", "getting-started", 0),
                topic("t2", Some("t1"), "Install", "install", 0),
                topic("t3", None, "Internals", "internals", 1),
            ],
            vec![document("t1", "# Getting Started"), document("t2", "# Install")],
        )
        .await;

        let out = tempdir().unwrap();
        let root = export_job(&store, &job_id, out.path()).await.unwrap();
        assert_eq!(root, out.path().join("acme").join("tool"));

        let index = fs::read_to_string(root.join("index.md")).unwrap();
        assert!(index.contains("- [Getting Started](topics/getting-started.md)"));
        assert!(index.contains("  - [Install](topics/getting-started/install.md)"));
        assert!(index.contains("- Internals (not generated)"));
        assert!(index.contains("[Overview](overview.md)"));

        assert_eq!(
            fs::read_to_string(root.join("topics/getting-started/install.md")).unwrap(),
            "# Install"
        );
        assert!(!root.join("topics/internals.md").exists());
        assert_eq!(fs::read_to_string(root.join("overview.md")).unwrap(), "Overview body");
        let changelog = fs::read_to_string(root.join("changelog.md")).unwrap();
        assert!(changelog.contains("Last committer: bob"));
        assert!(changelog.contains("- first"));
    }

    #[tokio::test]
    async fn topics_named_like_generated_files_do_not_replace_them() {
        let store = InMemoryStore::new();
        let job_id = seed_job(
            &store,
            vec![
                topic("t1", None, "Overview", "overview", 0),
                topic("t2", None, "Index", "index", 1),
                topic("t3", None, "Changelog", "changelog", 2),
            ],
            vec![
                document("t1", "overview topic"),
                document("t2", "index topic"),
                document("t3", "changelog topic"),
            ],
        )
        .await;

        let out = tempdir().unwrap();
        let root = export_job(&store, &job_id, out.path()).await.unwrap();
        assert_eq!(fs::read_to_string(root.join("overview.md")).unwrap(), "Overview body");
        assert!(fs::read_to_string(root.join("index.md")).unwrap().starts_with("# tool"));
        assert!(fs::read_to_string(root.join("changelog.md"))
            .unwrap()
            .contains("Last committer: bob"));
        assert_eq!(
            fs::read_to_string(root.join("topics/overview.md")).unwrap(),
            "overview topic"
        );
        assert_eq!(fs::read_to_string(root.join("topics/index.md")).unwrap(), "index topic");
    }

    #[tokio::test]
    async fn duplicate_sibling_slugs_get_a_suffix() {
        let store = InMemoryStore::new();
        let job_id = seed_job(
            &store,
            vec![
                topic("t1", None, "Setup", "setup", 0),
                topic("t2", None, "Set up", "Setup", 1),
                topic("t3", None, "Setup again", "setup", 2),
                topic("t4", Some("t2"), "Docker", "docker", 0),
            ],
            vec![
                document("t1", "first"),
                document("t2", "second"),
                document("t3", "third"),
                document("t4", "nested"),
            ],
        )
        .await;

        let out = tempdir().unwrap();
        let root = export_job(&store, &job_id, out.path()).await.unwrap();
        assert_eq!(fs::read_to_string(root.join("topics/setup.md")).unwrap(), "first");
        assert_eq!(fs::read_to_string(root.join("topics/setup-2.md")).unwrap(), "second");
        assert_eq!(fs::read_to_string(root.join("topics/setup-3.md")).unwrap(), "third");
        assert_eq!(
            fs::read_to_string(root.join("topics/setup-2/docker.md")).unwrap(),
            "nested"
        );
        let index = fs::read_to_string(root.join("index.md")).unwrap();
        assert!(index.contains("- [Set up](topics/setup-2.md)"));
        assert!(index.contains("  - [Docker](topics/setup-2/docker.md)"));
    }
}
