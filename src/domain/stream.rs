//! Caller-facing streaming contract.
//!
//! A streamed response is a sequence of `Fragment`s, at most one `Error`,
//! and always a final `End`.

use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::error::{GenerationFailure, WorkflowError};

use super::job::Stage;

/// Lazy, finite, non-restartable model output
pub type FragmentStream = BoxStream<'static, Result<String, GenerationFailure>>;

/// Stream of caller-facing events
pub type EventStream = BoxStream<'static, StreamEvent>;

/// One item of a streamed response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum StreamEvent {
    Fragment { text: String },
    Error { kind: String, message: String },
    End,
}

impl StreamEvent {
    pub fn fragment(text: impl Into<String>) -> Self {
        Self::Fragment { text: text.into() }
    }

    pub fn from_error(error: &WorkflowError) -> Self {
        Self::Error {
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}

/// Wrap model fragments into caller events. The first failure becomes an
/// `Error` event and ends the fragments; `End` always follows.
pub fn into_events(fragments: FragmentStream, stage: Stage) -> EventStream {
    let body = fragments
        .scan(false, move |failed, item| {
            if *failed {
                return futures::future::ready(None);
            }
            let event = match item {
                Ok(text) => StreamEvent::Fragment { text },
                Err(failure) => {
                    *failed = true;
                    StreamEvent::from_error(&WorkflowError::generation(stage, failure))
                }
            };
            futures::future::ready(Some(event))
        });

    body.chain(stream::once(async { StreamEvent::End })).boxed()
}

/// A stream holding only an error and the end marker
pub fn error_events(error: &WorkflowError) -> EventStream {
    stream::iter(vec![StreamEvent::from_error(error), StreamEvent::End]).boxed()
}

/// A stream holding one complete outline and the end marker
pub fn complete_events(outline: String) -> EventStream {
    stream::iter(vec![StreamEvent::fragment(outline), StreamEvent::End]).boxed()
}

/// Drain an event stream into the concatenated text, or the streamed error
pub async fn collect_events(mut events: EventStream) -> Result<String, (String, String)> {
    let mut text = String::new();
    while let Some(event) = events.next().await {
        match event {
            StreamEvent::Fragment { text: fragment } => text.push_str(&fragment),
            StreamEvent::Error { kind, message } => return Err((kind, message)),
            StreamEvent::End => break,
        }
    }
    Ok(text)
}
