//! Prompt templates for every generation stage.
//!
//! Templates use `{{$name}}` placeholders filled by [`render`]. Each template
//! asks the model to wrap its answer in a stage-specific tag, which
//! [`crate::extract::extract_tagged`] later strips.

use std::sync::OnceLock;

use regex::{Captures, Regex};

pub const README_TAG: &str = "readme";
pub const CHANGELOG_TAG: &str = "changelog";
pub const BLOG_TAG: &str = "blog";
pub const STRUCTURE_TAG: &str = "documentation_structure";

pub const GENERATE_README: &str = r#"You are documenting the repository {{$git_repository}} (branch {{$branch}}).
It has no README. Use the file tools to open the files that matter and write a README in Markdown:
what the project does, how it is structured, how to build and run it.

Repository files:
<catalogue>
{{$catalogue}}
</catalogue>

Wrap the finished README in <readme></readme>."#;

pub const COMMIT_ANALYZE: &str = r#"Repository: {{$git_repository}} (branch {{$branch}})

<readme>
{{$readme}}
</readme>

Recent commits, oldest first:
<commits>
{{$commit_message}}
</commits>

Summarise these commits as a changelog for users of the project. Group related changes,
name notable features and fixes, and skip merge noise. Wrap the changelog in <changelog></changelog>."#;

pub const OVERVIEW: &str = r#"Write a project overview for {{$git_repository}} (branch {{$branch}}).
Explain the purpose, the main components and how they fit together. Use the file tools to verify
claims against the code and include a mermaid diagram of the architecture where it helps.

<readme>
{{$readme}}
</readme>

<catalogue>
{{$catalogue}}
</catalogue>

Wrap the overview in <blog></blog>."#;

pub const ANALYZE_CATALOGUE: &str = r#"Plan the documentation of a software repository as a tree of sections.

<readme>
{{$readme}}
</readme>

<catalogue>
{{$catalogue}}
</catalogue>

Return JSON of the form
{"items":[{"name":"Getting Started","title":"getting-started","prompt":"what this section must cover","children":[ ...same shape... ]}]}
`title` is a short URL slug. `children` may be empty or omitted. Order sections the way a reader should
follow them. Wrap the JSON in <documentation_structure></documentation_structure>."#;

pub const GENERATE_TOPIC: &str = r#"You are writing one section of the documentation for {{$git_repository}} (branch {{$branch}}).

Section title: {{$title}}
Section brief: {{$prompt}}

<readme>
{{$readme}}
</readme>

<catalogue>
{{$catalogue}}
</catalogue>

Read the relevant source files with the file tools before writing. Write the section in Markdown,
cite files by their repository path and use mermaid diagrams where they clarify structure or flow.
Wrap the section in <blog></blog>."#;

pub const REPAIR_MERMAID: &str = r#"The following mermaid diagram has syntax errors. Fix them without changing what the diagram shows.
Reply with the corrected diagram source only.

{{$mermaidContent}}"#;

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\$(\w+)\}\}").expect("static placeholder pattern"))
}

/// Substitute each `{{$key}}` in `template` with its value in a single pass, so
/// placeholders inside substituted values stay literal. Unknown placeholders
/// stay as they are.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    placeholder()
        .replace_all(template, |caps: &Captures| {
            let key = &caps[1];
            match vars.iter().find(|(k, _)| *k == key) {
                Some((_, value)) => (*value).to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
