//! Plain-text XMindMark outline handling.
//!
//! An outline is one root line followed by `- ` bullet lines, nested by
//! indentation. Everything here is pure string manipulation and never
//! calls a model.

use tracing::warn;

use crate::adapters::Renderer;
use crate::domain::{RenderFormat, RenderedArtifact, Stage};
use crate::error::WorkflowError;

/// One level of nesting
pub const INDENT: &str = "  ";

/// Longest keyword accepted on a single node
pub const MAX_KEYWORD_CHARS: usize = 100;

/// Structural problems in a generated outline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutlineIssue {
    Empty,
    TooShort { lines: usize },
    NoMainBranches,
    KeywordTooLong { keyword: String },
}

impl std::fmt::Display for OutlineIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutlineIssue::Empty => write!(f, "outline is empty"),
            OutlineIssue::TooShort { lines } => {
                write!(f, "outline has {} line(s), needs a title and content", lines)
            }
            OutlineIssue::NoMainBranches => write!(f, "no main branch starts with '- '"),
            OutlineIssue::KeywordTooLong { keyword } => write!(f, "keyword too long: {}...", keyword),
        }
    }
}

/// Remove incidental code fences around model output.
///
/// Text without fence lines is only trimmed. A matched pair of fences, or
/// an opening fence on the first line, yields the fenced body. A lone fence
/// anywhere else is dropped and the rest of the text kept.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let lines: Vec<&str> = trimmed.lines().collect();
    let fences: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| line.trim_start().starts_with("```"))
        .map(|(index, _)| index)
        .collect();

    let body: Vec<&str> = match fences.as_slice() {
        [] => return trimmed.to_string(),
        [open, close, ..] => lines[open + 1..*close].to_vec(),
        [0] => lines[1..].to_vec(),
        [stray] => lines
            .iter()
            .enumerate()
            .filter(|(index, _)| index != stray)
            .map(|(_, line)| *line)
            .collect(),
    };

    body.join("\n").trim_matches('\n').trim_end().to_string()
}

/// Check an outline's structure
pub fn validate_outline(outline: &str) -> Vec<OutlineIssue> {
    let content = outline.trim();
    if content.is_empty() {
        return vec![OutlineIssue::Empty];
    }

    let mut issues = Vec::new();
    let lines: Vec<&str> = content.lines().collect();
    if lines.len() < 2 {
        issues.push(OutlineIssue::TooShort { lines: lines.len() });
    }

    if !lines.iter().skip(1).any(|line| line.starts_with("- ")) {
        issues.push(OutlineIssue::NoMainBranches);
    }

    for line in &lines {
        let keyword = line.trim().trim_start_matches(['-', ' ', '\t']);
        if keyword.chars().count() > MAX_KEYWORD_CHARS {
            issues.push(OutlineIssue::KeywordTooLong {
                keyword: keyword.chars().take(50).collect(),
            });
        }
    }

    issues
}

/// Whether the outline has a root and at least one bullet
pub fn has_hierarchy(outline: &str) -> bool {
    let content = outline.trim();
    !content.is_empty()
        && content
            .lines()
            .skip(1)
            .any(|line| line.trim_start().starts_with("- "))
}

/// Deterministic merge: each outline's first line becomes a top-level
/// bullet under `title`, every later line moves one level deeper.
pub fn structural_merge(title: &str, outlines: &[String]) -> String {
    let mut merged = vec![title.trim().to_string()];

    for outline in outlines {
        let mut lines = outline.lines().filter(|line| !line.trim().is_empty());
        let Some(first) = lines.next() else {
            continue;
        };

        let first = first.trim();
        let first = first.strip_prefix("- ").unwrap_or(first);
        merged.push(format!("- {}", first));

        for line in lines {
            merged.push(format!("{}{}", INDENT, line.trim_end()));
        }
    }

    merged.join("\n")
}

/// Validate and render an outline. Failures only affect this conversion.
pub async fn render_outline(
    renderer: &dyn Renderer,
    outline: &str,
    format: RenderFormat,
) -> Result<RenderedArtifact, WorkflowError> {
    if !has_hierarchy(outline) {
        return Err(WorkflowError::Render {
            stage: Stage::Rendering,
            cause: "outline is empty or has no '- ' hierarchy marker".to_string(),
        });
    }

    renderer.render(outline, format).await.map_err(|e| {
        warn!(renderer = renderer.name(), error = %e, "Render failed");
        WorkflowError::Render {
            stage: Stage::Rendering,
            cause: format!("{:#}", e),
        }
    })
}
