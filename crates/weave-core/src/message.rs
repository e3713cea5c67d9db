//! `CoreMessage` is a role-tagged variant, avoiding dynamic role-string
//! compares scattered across the pipeline, and matching exactly over
//! every part shape the wire format supports. Serializing/deserializing
//! is a straight `serde_json` round trip through the same type, so
//! `deserialize(serialize(m)) == m` holds structurally rather than by
//! separate encoder/decoder logic that could drift apart.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::storage::models::{MessageDoc, MessageStatus, NewMessage, Step};

/// One part of a user or assistant message's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContentPart {
    Text { text: String },
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        args: Value,
    },
    Reasoning { text: String },
    Source {
        id: String,
        url: String,
        title: Option<String>,
    },
    File {
        mime_type: String,
        /// Base64-encoded file payload.
        data: String,
    },
}

/// A single `tool-result` entry in a `tool` message's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultPart {
    pub tool_call_id: String,
    pub tool_name: String,
    pub result: Value,
}

/// Either a plain string or a list of parts — the two shapes `user` and
/// `assistant` content can take on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    pub fn as_text(&self) -> Option<String> {
        match self {
            MessageContent::Text(t) => Some(t.clone()),
            MessageContent::Parts(parts) => {
                let texts: Vec<&str> = parts
                    .iter()
                    .filter_map(|p| match p {
                        ContentPart::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect();
                if texts.is_empty() {
                    None
                } else {
                    Some(texts.join("\n"))
                }
            }
        }
    }

    fn tool_call_ids(&self) -> Vec<&str> {
        match self {
            MessageContent::Text(_) => Vec::new(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::ToolCall { tool_call_id, .. } => Some(tool_call_id.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }
}

/// Role-tagged `CoreMessage`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum CoreMessage {
    System { content: String },
    User { content: MessageContent },
    Assistant { content: MessageContent },
    Tool { content: Vec<ToolResultPart> },
}

impl CoreMessage {
    pub fn user(text: impl Into<String>) -> Self {
        CoreMessage::User {
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        CoreMessage::System {
            content: text.into(),
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        CoreMessage::Assistant {
            content: MessageContent::Text(text.into()),
        }
    }

    /// Tool-call ids this message announces (non-empty only for an
    /// assistant message carrying `tool-call` parts).
    pub fn announced_tool_call_ids(&self) -> Vec<&str> {
        match self {
            CoreMessage::Assistant { content } => content.tool_call_ids(),
            _ => Vec::new(),
        }
    }

    /// Tool-result ids a `tool` message carries.
    pub fn tool_result_ids(&self) -> Vec<&str> {
        match self {
            CoreMessage::Tool { content } => {
                content.iter().map(|p| p.tool_call_id.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}

/// `tool` is true iff the message's role is `tool` *or* the assistant
/// message contains any tool-call content.
pub fn is_tool_bearing(message: &CoreMessage) -> bool {
    match message {
        CoreMessage::Tool { .. } => true,
        CoreMessage::Assistant { content } => !content.tool_call_ids().is_empty(),
        _ => false,
    }
}

/// Extract the text content of a message, or `None` for a tool message /
/// a message with no text parts (used by embedding extraction).
pub fn extract_text(message: &CoreMessage) -> Option<String> {
    match message {
        CoreMessage::System { content } => Some(content.clone()),
        CoreMessage::User { content } | CoreMessage::Assistant { content } => content.as_text(),
        CoreMessage::Tool { .. } => None,
    }
}

/// Serialize a `CoreMessage` to its wire form. Because `CoreMessage`
/// derives `Serialize`/`Deserialize` directly, this is a lossless
/// `serde_json::to_value` — no separate encoder to drift out of sync with
/// the type.
pub fn serialize_message(message: &CoreMessage) -> Value {
    serde_json::to_value(message).expect("CoreMessage serialization is infallible")
}

/// Deserialize a wire-form message back into a `CoreMessage`.
pub fn deserialize_message(wire: &Value) -> Result<CoreMessage> {
    serde_json::from_value(wire.clone())
        .map_err(|e| Error::InvalidArgument(format!("malformed message: {e}")))
}

/// `promptOrMessagesToCoreMessages`. Fails with
/// `InvalidArgument` if both `prompt` and `messages` are supplied; returns
/// `[]` if neither (the caller must supply `promptMessageId` in that case).
/// `system`, when present, is folded into the front of the returned list
/// only when the caller asks for it via `fold_system`.
pub fn prompt_or_messages_to_core_messages(
    prompt: Option<&str>,
    messages: Option<&[CoreMessage]>,
    system: Option<&str>,
    fold_system: bool,
) -> Result<Vec<CoreMessage>> {
    if prompt.is_some() && messages.is_some() {
        return Err(Error::InvalidArgument(
            "cannot supply both `prompt` and `messages`".into(),
        ));
    }

    let mut result = match (prompt, messages) {
        (Some(p), None) => vec![CoreMessage::user(p)],
        (None, Some(m)) => m.to_vec(),
        (None, None) => Vec::new(),
        (Some(_), Some(_)) => unreachable!("handled above"),
    };

    if fold_system {
        if let Some(sys) = system {
            result.insert(0, CoreMessage::system(sys));
        }
    }

    Ok(result)
}

/// Serialize a completed step's metadata for the `steps` storage record.
pub fn serialize_step(step: &Step) -> Value {
    serde_json::to_value(step).expect("Step serialization is infallible")
}

/// Emit exactly the *new* messages a step produced (never the prompt that
/// preceded it), attributing `provider`/`model` so persistence can record
/// them on each resulting `MessageDoc`.
pub fn serialize_new_messages_in_step(step: &Step, provider: &str, model: &str) -> Vec<NewMessage> {
    step.messages
        .iter()
        .map(|m| {
            let mut nm = NewMessage::from_core(m.clone());
            nm.agent_name = Some(format!("{provider}/{model}"));
            nm
        })
        .collect()
}

/// A non-streaming object-generation result, i.e. `generateObject`'s
/// return value before it's wrapped in a synthesized step.
#[derive(Debug, Clone)]
pub struct ObjectResult {
    pub object: Value,
    pub raw_text: Option<String>,
    pub usage: Option<crate::storage::models::Usage>,
}

/// Synthesize a fake "step" from a non-streaming object generation so
/// persistence can handle it uniformly alongside text-generation steps.
/// The synthesized step carries `finish_reason: "stop"`, no `logprobs`,
/// and `synthesized: true` so downstream consumers can tell it was
/// fabricated rather than provider-emitted. See DESIGN.md.
pub fn serialize_object_result(result: &ObjectResult, provider: &str, model: &str) -> Step {
    let text = result
        .raw_text
        .clone()
        .unwrap_or_else(|| result.object.to_string());
    let message = CoreMessage::assistant_text(text.clone());
    let _ = (provider, model); // attribution is applied by the caller via serialize_new_messages_in_step
    Step {
        text: Some(text),
        reasoning: None,
        messages: vec![message],
        finish_reason: "stop".to_string(),
        usage: result.usage,
        logprobs: None,
        synthesized: true,
    }
}

/// A single part of a collapsed UI assistant message, produced by
/// `to_ui_messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UiPart {
    Text { text: String },
    Reasoning { text: String },
    Source { id: String, url: String },
    File { mime_type: String, data: String },
    StepStart,
    ToolInvocation {
        tool_call_id: String,
        tool_name: String,
        args: Value,
        state: ToolInvocationState,
        result: Option<Value>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolInvocationState {
    Call,
    Result,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiMessage {
    pub role: &'static str,
    pub parts: Vec<UiPart>,
}

/// Collapse a run of consecutive assistant/tool docs into UI messages.
/// Runs of `system`/`user` docs each become their own
/// single-part UI message; consecutive `assistant`/`tool` docs collapse
/// into one UI assistant message whose tool invocations transition from
/// `call` to `result` state as the matching tool doc is encountered.
pub fn to_ui_messages(docs: &[MessageDoc]) -> Vec<UiMessage> {
    let mut out: Vec<UiMessage> = Vec::new();
    let mut current: Option<UiMessage> = None;

    let flush = |current: &mut Option<UiMessage>, out: &mut Vec<UiMessage>| {
        if let Some(msg) = current.take() {
            out.push(msg);
        }
    };

    for doc in docs {
        match &doc.message {
            CoreMessage::System { content } => {
                flush(&mut current, &mut out);
                out.push(UiMessage {
                    role: "system",
                    parts: vec![UiPart::Text {
                        text: content.clone(),
                    }],
                });
            }
            CoreMessage::User { content } => {
                flush(&mut current, &mut out);
                out.push(UiMessage {
                    role: "user",
                    parts: user_parts(content),
                });
            }
            CoreMessage::Assistant { content } => {
                let msg = current.get_or_insert_with(|| UiMessage {
                    role: "assistant",
                    parts: vec![UiPart::StepStart],
                });
                if let Some(reasoning) = &doc.reasoning {
                    msg.parts.push(UiPart::Reasoning {
                        text: reasoning.clone(),
                    });
                }
                append_assistant_parts(msg, content);
            }
            CoreMessage::Tool { content } => {
                let msg = current.get_or_insert_with(|| UiMessage {
                    role: "assistant",
                    parts: vec![UiPart::StepStart],
                });
                for result_part in content {
                    apply_tool_result(msg, result_part);
                }
            }
        }
    }
    flush(&mut current, &mut out);
    out
}

fn user_parts(content: &MessageContent) -> Vec<UiPart> {
    match content {
        MessageContent::Text(t) => vec![UiPart::Text { text: t.clone() }],
        MessageContent::Parts(parts) => parts.iter().filter_map(content_part_to_ui).collect(),
    }
}

fn append_assistant_parts(msg: &mut UiMessage, content: &MessageContent) {
    match content {
        MessageContent::Text(t) => msg.parts.push(UiPart::Text { text: t.clone() }),
        MessageContent::Parts(parts) => {
            for part in parts {
                match part {
                    ContentPart::ToolCall {
                        tool_call_id,
                        tool_name,
                        args,
                    } => msg.parts.push(UiPart::ToolInvocation {
                        tool_call_id: tool_call_id.clone(),
                        tool_name: tool_name.clone(),
                        args: args.clone(),
                        state: ToolInvocationState::Call,
                        result: None,
                    }),
                    other => {
                        if let Some(ui) = content_part_to_ui(other) {
                            msg.parts.push(ui);
                        }
                    }
                }
            }
        }
    }
}

fn content_part_to_ui(part: &ContentPart) -> Option<UiPart> {
    match part {
        ContentPart::Text { text } => Some(UiPart::Text { text: text.clone() }),
        ContentPart::Reasoning { text } => Some(UiPart::Reasoning { text: text.clone() }),
        ContentPart::Source { id, url, .. } => Some(UiPart::Source {
            id: id.clone(),
            url: url.clone(),
        }),
        ContentPart::File { mime_type, data } => Some(UiPart::File {
            mime_type: mime_type.clone(),
            data: data.clone(),
        }),
        ContentPart::ToolCall { .. } => None,
    }
}

/// A tool result with no preceding call produces a warning and is still
/// appended in `result` state.
fn apply_tool_result(msg: &mut UiMessage, result_part: &ToolResultPart) {
    let existing = msg.parts.iter_mut().find(|p| {
        matches!(p, UiPart::ToolInvocation { tool_call_id, .. } if tool_call_id == &result_part.tool_call_id)
    });
    match existing {
        Some(UiPart::ToolInvocation { state, result, .. }) => {
            *state = ToolInvocationState::Result;
            *result = Some(result_part.result.clone());
        }
        _ => {
            tracing::warn!(
                tool_call_id = %result_part.tool_call_id,
                "tool result with no preceding call"
            );
            msg.parts.push(UiPart::ToolInvocation {
                tool_call_id: result_part.tool_call_id.clone(),
                tool_name: result_part.tool_name.clone(),
                args: Value::Null,
                state: ToolInvocationState::Result,
                result: Some(result_part.result.clone()),
            });
        }
    }
}

/// Filter used by the tests below and shared with `context.rs`'s orphan
/// drop (kept here since it is purely a `MessageStatus` predicate, not a
/// storage concern).
pub fn is_success(doc: &MessageDoc) -> bool {
    doc.status == MessageStatus::Success
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(m: CoreMessage) {
        let wire = serialize_message(&m);
        let back = deserialize_message(&wire).unwrap();
        assert_eq!(m, back);
    }

    #[test]
    fn round_trip_all_shapes() {
        roundtrip(CoreMessage::system("be nice"));
        roundtrip(CoreMessage::user("hello"));
        roundtrip(CoreMessage::assistant_text("hi there"));
        roundtrip(CoreMessage::Assistant {
            content: MessageContent::Parts(vec![
                ContentPart::Text {
                    text: "let me check".into(),
                },
                ContentPart::ToolCall {
                    tool_call_id: "call_1".into(),
                    tool_name: "search".into(),
                    args: serde_json::json!({"q": "rust"}),
                },
                ContentPart::Reasoning {
                    text: "thinking...".into(),
                },
                ContentPart::Source {
                    id: "s1".into(),
                    url: "https://example.com".into(),
                    title: Some("Example".into()),
                },
                ContentPart::File {
                    mime_type: "image/png".into(),
                    data: "aGVsbG8=".into(),
                },
            ]),
        });
        roundtrip(CoreMessage::Tool {
            content: vec![ToolResultPart {
                tool_call_id: "call_1".into(),
                tool_name: "search".into(),
                result: serde_json::json!({"hits": 3}),
            }],
        });
    }

    #[test]
    fn prompt_and_messages_conflict() {
        let err = prompt_or_messages_to_core_messages(
            Some("hi"),
            Some(&[CoreMessage::user("hi")]),
            None,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn neither_prompt_nor_messages_is_empty() {
        let msgs = prompt_or_messages_to_core_messages(None, None, None, false).unwrap();
        assert!(msgs.is_empty());
    }

    #[test]
    fn tool_bearing_detection() {
        assert!(!is_tool_bearing(&CoreMessage::user("hi")));
        assert!(is_tool_bearing(&CoreMessage::Tool {
            content: vec![ToolResultPart {
                tool_call_id: "c1".into(),
                tool_name: "t".into(),
                result: Value::Null
            }]
        }));
        assert!(is_tool_bearing(&CoreMessage::Assistant {
            content: MessageContent::Parts(vec![ContentPart::ToolCall {
                tool_call_id: "c1".into(),
                tool_name: "t".into(),
                args: Value::Null
            }])
        }));
    }
}
