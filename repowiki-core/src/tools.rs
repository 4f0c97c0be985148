//! File-reading capability granted to the model during generation.
//!
//! A [`FileTools`] is created fresh for every generation attempt and carries
//! its own [`ReadLog`]. The completion client dispatches tool calls to
//! [`FileTools::invoke`]; once the call finishes, the caller collects the log
//! to build the attribution rows. Failures (missing file, too large, path
//! outside the repository) are returned to the model as text, never as errors.

use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

/// Files at or above this size are refused.
pub const MAX_FILE_BYTES: u64 = 1024 * 1024;

/// Paths successfully read during one attempt, in first-read order.
#[derive(Debug, Clone, Default)]
pub struct ReadLog {
    inner: Arc<Mutex<Vec<String>>>,
}

impl ReadLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, path: &str) {
        if let Ok(mut paths) = self.inner.lock() {
            if !paths.iter().any(|p| p == path) {
                paths.push(path.to_string());
            }
        }
    }

    pub fn paths(&self) -> Vec<String> {
        self.inner.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.paths().is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct FileTools {
    root: PathBuf,
    log: ReadLog,
}

#[derive(Deserialize)]
struct ReadFileArgs {
    path: String,
}

#[derive(Deserialize)]
struct ReadFilesArgs {
    paths: Vec<String>,
}

#[derive(Deserialize)]
struct ReadFileLinesArgs {
    path: String,
    start_line: usize,
    end_line: usize,
}

impl FileTools {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            log: ReadLog::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Handle onto this capability's read log.
    pub fn log(&self) -> ReadLog {
        self.log.clone()
    }

    /// OpenAI-style function definitions for the three tools.
    pub fn definitions() -> Value {
        json!([
            {
                "type": "function",
                "function": {
                    "name": "read_file",
                    "description": "Read the full contents of one file in the repository. Paths are relative to the repository root.",
                    "parameters": {
                        "type": "object",
                        "properties": { "path": { "type": "string" } },
                        "required": ["path"]
                    }
                }
            },
            {
                "type": "function",
                "function": {
                    "name": "read_files",
                    "description": "Read several files at once. Returns a JSON object mapping each path to its contents or an error message.",
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "paths": { "type": "array", "items": { "type": "string" } }
                        },
                        "required": ["paths"]
                    }
                }
            },
            {
                "type": "function",
                "function": {
                    "name": "read_file_lines",
                    "description": "Read an inclusive, 1-based range of lines from a file.",
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "path": { "type": "string" },
                            "start_line": { "type": "integer", "minimum": 1 },
                            "end_line": { "type": "integer", "minimum": 1 }
                        },
                        "required": ["path", "start_line", "end_line"]
                    }
                }
            }
        ])
    }

    /// Dispatch a tool call by name with its JSON-encoded arguments.
    pub async fn invoke(&self, name: &str, arguments: &str) -> String {
        debug!(tool = name, "Tool call");
        match name {
            "read_file" => match serde_json::from_str::<ReadFileArgs>(arguments) {
                Ok(args) => self.read_file(&args.path).await,
                Err(e) => format!("Invalid arguments for read_file: {e}"),
            },
            "read_files" => match serde_json::from_str::<ReadFilesArgs>(arguments) {
                Ok(args) => self.read_files(&args.paths).await,
                Err(e) => format!("Invalid arguments for read_files: {e}"),
            },
            "read_file_lines" => match serde_json::from_str::<ReadFileLinesArgs>(arguments) {
                Ok(args) => {
                    self.read_file_lines(&args.path, args.start_line, args.end_line)
                        .await
                }
                Err(e) => format!("Invalid arguments for read_file_lines: {e}"),
            },
            other => format!("Unknown tool: {other}"),
        }
    }

    pub async fn read_file(&self, path: &str) -> String {
        match self.load(path).await {
            Ok(content) => {
                self.log.record(&normalise(path));
                content
            }
            Err(message) => message,
        }
    }

    pub async fn read_files(&self, paths: &[String]) -> String {
        let mut out = serde_json::Map::new();
        for path in paths {
            let content = self.read_file(path).await;
            out.insert(path.clone(), Value::String(content));
        }
        Value::Object(out).to_string()
    }

    /// Lines `start..=end`, 1-based. An end past the last line is clamped.
    pub async fn read_file_lines(&self, path: &str, start: usize, end: usize) -> String {
        if start == 0 || end < start {
            return format!("Invalid line range {start}-{end} for {path}");
        }
        let content = match self.load(path).await {
            Ok(c) => c,
            Err(message) => return message,
        };
        let selected: Vec<&str> = content
            .lines()
            .skip(start - 1)
            .take(end - start + 1)
            .collect();
        self.log.record(&normalise(path));
        selected.join("\n")
    }

    async fn load(&self, path: &str) -> Result<String, String> {
        let full = self.resolve(path)?;
        let meta = match tokio::fs::metadata(&full).await {
            Ok(m) if m.is_file() => m,
            _ => return Err(format!("File not found: {path}")),
        };
        if meta.len() >= MAX_FILE_BYTES {
            return Err(format!(
                "File too large: {path} ({} bytes, limit {MAX_FILE_BYTES})",
                meta.len()
            ));
        }
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) => Err(format!("Failed to read {path}: {e}")),
        }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, String> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(format!("Path escapes the repository: {path}"));
        }
        Ok(self.root.join(relative))
    }
}

fn normalise(path: &str) -> String {
    path.trim_start_matches('/')
        .trim_start_matches("./")
        .replace('\\', "/")
}
