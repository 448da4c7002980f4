//! Prompt construction.
//!
//! Every model call in the workflow is described by an `OutlineRequest`.
//! The request decides the instruction text; the caller's conversation
//! history is attached verbatim as prior chat turns.

use crate::adapters::{Prompt, PromptKind};
use crate::domain::ChatTurn;

const OUTLINE_FORMAT: &str = "\
Output format (XMindMark):
- The first line is the central topic, with no prefix.
- Every other line is a node starting with \"- \".
- Child nodes are indented two spaces deeper than their parent.
- Nodes are keywords or short phrases, never full sentences.
- Use at most 4-5 levels of depth.
- Return only the outline, with no explanation and no code fences.";

/// A model call, described by what it should produce
#[derive(Debug, Clone, Copy)]
pub enum OutlineRequest<'a> {
    /// Outline of a document (or one chunk of it)
    Document { text: &'a str, requirement: &'a str },

    /// Outline of an audio transcript
    Transcript { text: &'a str, requirement: &'a str },

    /// Outline from the requirement alone
    NoDocument { requirement: &'a str },

    /// Outline from web search results
    WithSearch { context: &'a str, requirement: &'a str },

    /// Short title for a whole document
    GlobalTitle { text: &'a str, requirement: &'a str },

    /// Partition a document into a list of sections
    Split { text: &'a str, requirement: &'a str },

    /// Reconcile per-chunk outlines under one title
    Merge {
        chunks_block: &'a str,
        global_title: &'a str,
        requirement: &'a str,
    },

    /// Apply an edit to an outline
    Edit { outline: &'a str, edit_request: &'a str },

    /// Apply an edit using web search results
    EditWithSearch {
        outline: &'a str,
        edit_request: &'a str,
        context: &'a str,
    },
}

impl OutlineRequest<'_> {
    pub fn kind(&self) -> PromptKind {
        match self {
            OutlineRequest::Document { .. } => PromptKind::Outline,
            OutlineRequest::Transcript { .. } => PromptKind::OutlineFromAudio,
            OutlineRequest::NoDocument { .. } => PromptKind::OutlineWithoutDocument,
            OutlineRequest::WithSearch { .. } => PromptKind::OutlineWithSearch,
            OutlineRequest::GlobalTitle { .. } => PromptKind::GlobalTitle,
            OutlineRequest::Split { .. } => PromptKind::SplitDocument,
            OutlineRequest::Merge { .. } => PromptKind::MergeOutlines,
            OutlineRequest::Edit { .. } => PromptKind::Edit,
            OutlineRequest::EditWithSearch { .. } => PromptKind::EditWithSearch,
        }
    }

    /// Build the prompt, attaching `history` unchanged
    pub fn build(&self, history: &[ChatTurn]) -> Prompt {
        Prompt {
            kind: self.kind(),
            body: self.body(),
            history: history.to_vec(),
        }
    }

    fn body(&self) -> String {
        match *self {
            OutlineRequest::Document { text, requirement } => format!(
                "Create a mind map outline of the document below.\n\n\
                 User requirement: {requirement}\n\n\
                 Document:\n{text}\n\n{OUTLINE_FORMAT}"
            ),
            OutlineRequest::Transcript { text, requirement } => format!(
                "Create a mind map outline of the audio transcript below. \
                 The transcript comes from speech recognition and may contain \
                 filler words and recognition errors; ignore them.\n\n\
                 User requirement: {requirement}\n\n\
                 Transcript:\n{text}\n\n{OUTLINE_FORMAT}"
            ),
            OutlineRequest::NoDocument { requirement } => format!(
                "Create a mind map outline from your own knowledge. \
                 There is no source document.\n\n\
                 User requirement: {requirement}\n\n{OUTLINE_FORMAT}"
            ),
            OutlineRequest::WithSearch { context, requirement } => format!(
                "Create a mind map outline using the web search results below \
                 as the source of facts.\n\n\
                 User requirement: {requirement}\n\n\
                 Search results:\n{context}\n\n{OUTLINE_FORMAT}"
            ),
            OutlineRequest::GlobalTitle { text, requirement } => format!(
                "Write a short title (under 10 words) for the whole document \
                 below. Return only the title on a single line, with no quotes \
                 and no prefix.\n\n\
                 User requirement: {requirement}\n\n\
                 Document:\n{text}"
            ),
            OutlineRequest::Split { text, requirement } => format!(
                "Split the document below into logically coherent sections, \
                 keeping the original order and wording. Every part of the \
                 document must belong to exactly one section.\n\n\
                 User requirement: {requirement}\n\n\
                 Return only a JSON array of strings, one string per section, \
                 for example: [\"first section text\", \"second section text\"]\n\n\
                 Document:\n{text}"
            ),
            OutlineRequest::Merge {
                chunks_block,
                global_title,
                requirement,
            } => format!(
                "The outlines below were generated from consecutive parts of \
                 one document. Merge them into a single coherent mind map \
                 outline:\n\
                 - Use \"{global_title}\" as the central topic.\n\
                 - Reorganize related branches together and remove duplicates.\n\
                 - Rebalance the hierarchy so depth is even, capped at 4-5 levels.\n\n\
                 User requirement: {requirement}\n\n\
                 Partial outlines:\n{chunks_block}\n\n{OUTLINE_FORMAT}"
            ),
            OutlineRequest::Edit {
                outline,
                edit_request,
            } => format!(
                "Edit the mind map outline below according to the request. \
                 Keep everything the request does not mention unchanged.\n\n\
                 Edit request: {edit_request}\n\n\
                 Current outline:\n{outline}\n\n{OUTLINE_FORMAT}"
            ),
            OutlineRequest::EditWithSearch {
                outline,
                edit_request,
                context,
            } => format!(
                "Edit the mind map outline below according to the request, \
                 using the web search results as the source of new facts. \
                 Keep everything the request does not mention unchanged.\n\n\
                 Search results:\n{context}\n\n\
                 Edit request: {edit_request}\n\n\
                 Current outline:\n{outline}\n\n{OUTLINE_FORMAT}"
            ),
        }
    }
}

/// Label each chunk outline with its 1-based position
pub fn chunks_block(outlines: &[String]) -> String {
    outlines
        .iter()
        .enumerate()
        .map(|(i, outline)| format!("--- CHUNK {} ---\n{}\n", i + 1, outline.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Search query: the last `window` history turns, then the request.
/// History beyond the window is left out of the query only; model calls
/// still receive all of it.
pub fn search_query(request: &str, history: &[ChatTurn], window: usize) -> String {
    if history.is_empty() || window == 0 {
        return request.to_string();
    }

    let start = history.len().saturating_sub(window);
    let context = history[start..]
        .iter()
        .map(|turn| format!("{}: {}", turn.role, turn.content))
        .collect::<Vec<_>>()
        .join("\n");

    format!("{}\nCurrent request: {}", context, request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_attached_verbatim() {
        let history = vec![
            ChatTurn::user("first"),
            ChatTurn::assistant("second"),
            ChatTurn::user("first"),
        ];
        let prompt = OutlineRequest::Document {
            text: "doc",
            requirement: "req",
        }
        .build(&history);

        assert_eq!(prompt.kind, PromptKind::Outline);
        assert_eq!(prompt.history, history);
        assert!(prompt.body.contains("doc"));
        assert!(prompt.body.contains("req"));
    }

    #[test]
    fn test_merge_prompt_names_title_and_chunks() {
        let block = chunks_block(&["A\n- a".to_string(), "B\n- b".to_string()]);
        assert!(block.contains("--- CHUNK 1 ---\nA\n- a"));
        assert!(block.contains("--- CHUNK 2 ---\nB\n- b"));

        let prompt = OutlineRequest::Merge {
            chunks_block: &block,
            global_title: "Big Title",
            requirement: "req",
        }
        .build(&[]);
        assert_eq!(prompt.kind, PromptKind::MergeOutlines);
        assert!(prompt.body.contains("\"Big Title\""));
        assert!(prompt.body.contains("--- CHUNK 2 ---"));
    }

    #[test]
    fn test_search_query_windows_history() {
        let history: Vec<ChatTurn> = (0..7).map(|i| ChatTurn::user(format!("m{}", i))).collect();
        let query = search_query("rust async", &history, 5);

        assert!(!query.contains("m0"));
        assert!(!query.contains("m1"));
        assert!(query.starts_with("user: m2\n"));
        assert!(query.ends_with("Current request: rust async"));
    }

    #[test]
    fn test_search_query_without_history() {
        assert_eq!(search_query("rust async", &[], 5), "rust async");
        assert_eq!(
            search_query("rust async", &[ChatTurn::user("x")], 0),
            "rust async"
        );
    }
}
