//! Optional post-pass that repairs broken mermaid diagrams in generated documents.
//!
//! Validation is structural only: the diagram must open with a known diagram
//! type and its quotes and brackets must balance. Anything that fails is sent
//! to the model for a fix and the corrected block is spliced back in place.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::contract::{self, ChatMessage, ChatOptions, ChatRequest, CompletionService};
use crate::model::GeneratedDocument;
use crate::prompts::{self, REPAIR_MERMAID};

const DIAGRAM_TYPES: &[&str] = &[
    "graph",
    "flowchart",
    "sequenceDiagram",
    "classDiagram",
    "classDiagram-v2",
    "stateDiagram",
    "stateDiagram-v2",
    "erDiagram",
    "journey",
    "gantt",
    "pie",
    "quadrantChart",
    "requirementDiagram",
    "gitGraph",
    "C4Context",
    "C4Container",
    "C4Component",
    "C4Dynamic",
    "C4Deployment",
    "mindmap",
    "timeline",
    "zenuml",
    "sankey-beta",
    "xychart-beta",
    "block-beta",
    "packet-beta",
    "architecture-beta",
    "kanban",
];

fn block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```mermaid\s*([\s\S]*?)```").expect("static mermaid pattern"))
}

fn fence_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^```(?:mermaid)?\s*").expect("static fence pattern"))
}

fn fence_suffix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s*```$").expect("static fence pattern"))
}

/// A fenced mermaid block: its byte range in the document, the full fenced
/// text and the trimmed diagram source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MermaidBlock {
    pub range: Range<usize>,
    pub fenced: String,
    pub source: String,
}

pub fn find_blocks(markdown: &str) -> Vec<MermaidBlock> {
    block_regex()
        .captures_iter(markdown)
        .filter_map(|c| {
            let whole = c.get(0)?;
            let source = c.get(1)?.as_str().trim().to_string();
            Some(MermaidBlock {
                range: whole.range(),
                fenced: whole.as_str().to_string(),
                source,
            })
        })
        .collect()
}

/// Structural check of a diagram source. Returns the first problem found.
///
/// Every diagram must open with a known type and keep its string literals on one
/// line. Flowcharts additionally must balance their node brackets; other diagram
/// types use brackets as operators (`||--o{`, `<<interface>>`) and are not checked.
pub fn validate(source: &str) -> Result<(), String> {
    let header = source
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with("%%"))
        .ok_or_else(|| "empty diagram".to_string())?;
    let kind = header.split_whitespace().next().unwrap_or_default();
    if !DIAGRAM_TYPES.contains(&kind) {
        return Err(format!("unknown diagram type '{kind}'"));
    }
    let flow = matches!(kind, "graph" | "flowchart");

    for (n, line) in source.lines().enumerate() {
        let line = line.trim();
        if line.starts_with("%%") {
            continue;
        }
        check_line(line, flow).map_err(|e| format!("line {}: {e}", n + 1))?;
    }
    Ok(())
}

fn check_line(line: &str, check_brackets: bool) -> Result<(), String> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_quote = false;
    let mut prev: Option<char> = None;
    for c in line.chars() {
        if c == '"' {
            in_quote = !in_quote;
        } else if !in_quote && check_brackets {
            match c {
                '(' => stack.push(')'),
                '[' => stack.push(']'),
                '{' => stack.push('}'),
                // asymmetric node: id>label]
                '>' if prev.is_some_and(|p| p.is_alphanumeric() || p == '_') => stack.push(']'),
                ')' | ']' | '}' => {
                    if stack.pop() != Some(c) {
                        return Err(format!("unbalanced '{c}'"));
                    }
                }
                _ => {}
            }
        }
        prev = Some(c);
    }
    if in_quote {
        return Err("unterminated string".into());
    }
    if let Some(open) = stack.last() {
        return Err(format!("missing '{open}'"));
    }
    Ok(())
}

/// Strip any code fence the model wrapped its fix in.
pub fn strip_fences(reply: &str) -> String {
    let trimmed = reply.trim();
    let without_prefix = fence_prefix().replace(trimmed, "");
    fence_suffix().replace(&without_prefix, "").trim().to_string()
}

pub struct MermaidRepairer<'a> {
    completion: &'a dyn CompletionService,
    model: String,
}

impl<'a> MermaidRepairer<'a> {
    pub fn new(completion: &'a dyn CompletionService, model: impl Into<String>) -> Self {
        Self {
            completion,
            model: model.into(),
        }
    }

    async fn fix(&self, source: &str, cancel: &CancellationToken) -> Result<Option<String>, String> {
        let request = ChatRequest {
            messages: vec![ChatMessage::user(prompts::render(
                REPAIR_MERMAID,
                &[("mermaidContent", source)],
            ))],
            options: ChatOptions {
                model: self.model.clone(),
                temperature: Some(0.0),
                max_tokens: None,
            },
            tools: None,
        };
        let reply = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err("cancelled".into()),
            reply = contract::complete(self.completion, request) => reply.map_err(|e| e.to_string())?,
        };
        let fixed = strip_fences(&reply);
        Ok((!fixed.is_empty()).then_some(fixed))
    }

    /// Repair every invalid block of one document. Returns the new text and how
    /// many blocks were replaced. Failed repairs leave the block as it was.
    /// Identical broken diagrams share one repair.
    pub async fn repair_markdown(&self, markdown: &str, cancel: &CancellationToken) -> (String, usize) {
        let mut fixes: HashMap<String, Option<String>> = HashMap::new();
        let mut splices: Vec<(Range<usize>, String)> = Vec::new();
        for block in find_blocks(markdown) {
            if block.source.is_empty() {
                continue;
            }
            if let Some(known) = fixes.get(&block.source) {
                if let Some(replacement) = known {
                    splices.push((block.range, replacement.clone()));
                }
                continue;
            }
            let problem = match validate(&block.source) {
                Ok(()) => continue,
                Err(p) => p,
            };
            debug!(problem = %problem, "[MERMAID] Invalid diagram");
            let replacement = match self.fix(&block.source, cancel).await {
                Ok(Some(fixed)) => Some(format!("```mermaid\n{fixed}\n```")),
                Ok(None) => {
                    error!("[MERMAID] Empty repair reply, keeping original block");
                    None
                }
                Err(e) => {
                    error!(error = %e, "[MERMAID] Repair failed, keeping original block");
                    if cancel.is_cancelled() {
                        break;
                    }
                    None
                }
            };
            if let Some(r) = &replacement {
                splices.push((block.range, r.clone()));
            }
            fixes.insert(block.source, replacement);
        }

        let repaired = splices.len();
        let mut out = String::with_capacity(markdown.len());
        let mut cursor = 0;
        for (range, replacement) in splices {
            out.push_str(&markdown[cursor..range.start]);
            out.push_str(&replacement);
            cursor = range.end;
        }
        out.push_str(&markdown[cursor..]);
        (out, repaired)
    }

    /// Repair all documents in place. Returns the number of blocks replaced.
    pub async fn repair_all(
        &self,
        documents: &mut [GeneratedDocument],
        cancel: &CancellationToken,
    ) -> usize {
        let mut total = 0;
        for doc in documents.iter_mut() {
            if cancel.is_cancelled() {
                break;
            }
            let (body, repaired) = self.repair_markdown(&doc.body, cancel).await;
            if repaired > 0 {
                info!(title = %doc.title, blocks = repaired, "[MERMAID] Repaired diagrams");
                doc.body = body;
            }
            total += repaired;
        }
        total
    }
}
