//! Repository scanner producing the path listing the planner works from.
//!
//! The scan is a pure function of the checkout on disk. It walks the tree with
//! `ignore::WalkBuilder`, skips hidden entries, honours every `.gitignore` in
//! the checkout (a `.git` directory is not required) and drops files that are
//! binary, media, office documents, stylesheets or at least 1 MiB in size.

use std::fs;
use std::io;
use std::path::Path;

use ignore::WalkBuilder;
use tracing::{debug, info, warn};

use crate::tools::MAX_FILE_BYTES;

const SKIPPED_EXTENSIONS: &[&str] = &[
    // images
    "png", "jpg", "jpeg", "gif", "bmp", "webp", "ico", "svg",
    // binaries
    "exe", "dll", "so", "class", "o", "a",
    // archives
    "zip", "tar", "gz", "bz2", "xz",
    // audio and video
    "mp3", "wav", "flac", "aac", "ogg", "mp4", "avi", "mkv", "mov", "wmv",
    // documents
    "pdf", "doc", "docx", "ppt", "pptx", "xls", "xlsx", "csv",
    // markup and styles
    "css", "scss", "less", "html", "htm",
];

const README_NAMES: &[&str] = &["README.md", "README.txt", "README"];

fn has_skipped_extension(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => SKIPPED_EXTENSIONS
            .iter()
            .any(|s| s.eq_ignore_ascii_case(ext)),
        None => false,
    }
}

/// All admitted files under `root`, as sorted `/`-separated relative paths.
pub fn scan(root: &Path) -> io::Result<Vec<String>> {
    if !fs::metadata(root)?.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a directory", root.display()),
        ));
    }

    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(true)
        .git_ignore(true)
        .git_global(false)
        .git_exclude(false)
        .parents(false)
        .require_git(false);
    builder.filter_entry(|entry| {
        entry.file_type().is_some_and(|ft| ft.is_dir()) || !has_skipped_extension(entry.path())
    });

    let mut out = Vec::new();
    for result in builder.build() {
        let entry = match result {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        match entry.metadata() {
            Ok(meta) if meta.len() >= MAX_FILE_BYTES => {
                debug!(path = %entry.path().display(), bytes = meta.len(), "Skipping large file");
                continue;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "Skipping file without metadata");
                continue;
            }
        }
        if let Ok(rel) = entry.path().strip_prefix(root) {
            let rel: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            out.push(rel.join("/"));
        }
    }
    out.sort();
    debug!(root = %root.display(), files = out.len(), "Scanned repository");
    Ok(out)
}

fn is_root_readme(path: &str) -> bool {
    README_NAMES.iter().any(|r| r.eq_ignore_ascii_case(path))
}

/// Newline-delimited listing with the root README entries left out.
pub fn render_listing(paths: &[String]) -> String {
    let mut listing = String::new();
    for path in paths.iter().filter(|p| !is_root_readme(p)) {
        listing.push_str(path);
        listing.push('\n');
    }
    listing
}

/// Scan `root` and render the listing handed to the planner.
pub fn build_catalogue(root: &Path) -> io::Result<String> {
    let paths = scan(root)?;
    let listing = render_listing(&paths);
    info!(
        root = %root.display(),
        entries = listing.lines().count(),
        "[CATALOGUE] Built repository listing"
    );
    Ok(listing)
}

/// Contents of the first README found (`README.md`, `README.txt`, `README`).
/// An empty README counts as missing.
pub async fn read_readme(root: &Path) -> io::Result<Option<String>> {
    for name in README_NAMES {
        let path = root.join(name);
        if tokio::fs::try_exists(&path).await? {
            let content = tokio::fs::read_to_string(&path).await?;
            if content.trim().is_empty() {
                return Ok(None);
            }
            return Ok(Some(content));
        }
    }
    Ok(None)
}
