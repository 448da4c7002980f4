//! Chunk heuristic: decide whether a document needs splitting, and split it.
//!
//! The split itself is done by the model, which is asked for a list of
//! strings. Its answer is parsed with a strict literal-list parser: a JSON
//! array of strings, or a bracketed list of single- or double-quoted string
//! literals. Anything else is rejected.

use std::iter::Peekable;
use std::str::CharIndices;

use thiserror::Error;
use tracing::{info, instrument};

use crate::domain::{ChatTurn, Stage};
use crate::error::WorkflowError;

use super::generator::OutlineGenerator;
use super::outline::strip_code_fences;
use super::prompts::OutlineRequest;

/// Pure length threshold, measured in characters
pub fn decide_split(text: &str, threshold: usize) -> bool {
    text.chars().count() > threshold
}

/// Ask the model to partition `text` into ordered chunks
#[instrument(skip_all, fields(chars = text.len()))]
pub async fn split_document(
    generator: &OutlineGenerator,
    text: &str,
    requirement: &str,
    history: &[ChatTurn],
) -> Result<Vec<String>, WorkflowError> {
    let response = generator
        .generate(&OutlineRequest::Split { text, requirement }, history)
        .await
        .map_err(|f| WorkflowError::generation(Stage::Splitting, f))?;

    let chunks = parse_chunk_list(&response).map_err(|e| WorkflowError::SplitParse {
        stage: Stage::Splitting,
        cause: e.to_string(),
    })?;

    info!(chunks = chunks.len(), "Document split");
    Ok(chunks)
}

/// Why a chunk list response was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListParseError {
    #[error("expected '[' at the start of the list")]
    MissingOpenBracket,

    #[error("unexpected '{found}' at offset {offset}")]
    Unexpected { found: char, offset: usize },

    #[error("unterminated string literal starting at offset {0}")]
    UnterminatedString(usize),

    #[error("invalid escape sequence in string starting at offset {0}")]
    InvalidEscape(usize),

    #[error("unexpected end of input")]
    UnexpectedEnd,

    #[error("unexpected content after the closing ']'")]
    TrailingContent,

    #[error("list contains no non-empty chunks")]
    NoChunks,
}

/// Parse a model's chunk list. Blank elements are dropped; an empty result
/// is an error.
pub fn parse_chunk_list(response: &str) -> Result<Vec<String>, ListParseError> {
    let body = strip_code_fences(response);

    let items = match serde_json::from_str::<Vec<String>>(&body) {
        Ok(items) => items,
        Err(_) => parse_list_literal(&body)?,
    };

    let chunks: Vec<String> = items
        .into_iter()
        .filter(|chunk| !chunk.trim().is_empty())
        .collect();

    if chunks.is_empty() {
        return Err(ListParseError::NoChunks);
    }
    Ok(chunks)
}

type Chars<'a> = Peekable<CharIndices<'a>>;

/// `[ 'a', "b", ]` with optional trailing comma
fn parse_list_literal(text: &str) -> Result<Vec<String>, ListParseError> {
    let mut chars = text.char_indices().peekable();

    skip_whitespace(&mut chars);
    match chars.next() {
        Some((_, '[')) => {}
        _ => return Err(ListParseError::MissingOpenBracket),
    }

    let mut items = Vec::new();
    loop {
        skip_whitespace(&mut chars);
        match chars.next() {
            Some((_, ']')) => break,
            Some((offset, quote @ ('\'' | '"'))) => {
                items.push(read_string(&mut chars, quote, offset)?);

                skip_whitespace(&mut chars);
                match chars.next() {
                    Some((_, ',')) => continue,
                    Some((_, ']')) => break,
                    Some((offset, found)) => {
                        return Err(ListParseError::Unexpected { found, offset })
                    }
                    None => return Err(ListParseError::UnexpectedEnd),
                }
            }
            Some((offset, found)) => return Err(ListParseError::Unexpected { found, offset }),
            None => return Err(ListParseError::UnexpectedEnd),
        }
    }

    skip_whitespace(&mut chars);
    if chars.next().is_some() {
        return Err(ListParseError::TrailingContent);
    }
    Ok(items)
}

fn skip_whitespace(chars: &mut Chars<'_>) {
    while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
}

/// Read a string body up to the closing `quote`
fn read_string(chars: &mut Chars<'_>, quote: char, start: usize) -> Result<String, ListParseError> {
    let mut out = String::new();

    while let Some((_, c)) = chars.next() {
        if c == quote {
            return Ok(out);
        }
        if c != '\\' {
            out.push(c);
            continue;
        }

        let Some((_, escaped)) = chars.next() else {
            break;
        };
        match escaped {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            '\\' | '\'' | '"' => out.push(escaped),
            // Line continuation
            '\n' => {}
            'u' => {
                let hex: String = (0..4).filter_map(|_| chars.next().map(|(_, c)| c)).collect();
                let decoded = u32::from_str_radix(&hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or(ListParseError::InvalidEscape(start))?;
                out.push(decoded);
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }

    Err(ListParseError::UnterminatedString(start))
}
