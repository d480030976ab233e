//! Inbound frame classification and outbound event records.
//!
//! Inbound frames are decoded just far enough to route them: the `type`
//! tag, an optional `subtype`, and whether the frame is an acknowledgment
//! (`reply_to`). Handlers decode the rest themselves.

use serde::{Deserialize, Deserializer, Serialize};

use crate::model::User;

/// Message subtypes that edit or delete earlier content.
const SUPPRESSED_SUBTYPES: &[&str] = &["message_changed", "message_deleted"];

/// Inbound event types the processor acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A chat message.
    Message,
    /// An error reported by the service.
    Error,
    /// The stream is established.
    Hello,
    /// A team member's profile changed.
    UserChange,
    /// Anything else; ignored.
    Unknown,
}

impl EventKind {
    /// Map a raw `type` tag to its kind.
    pub fn from_type(tag: &str) -> Self {
        match tag {
            "message" => Self::Message,
            "error" => Self::Error,
            "hello" => Self::Hello,
            "user_change" => Self::UserChange,
            _ => Self::Unknown,
        }
    }
}

/// Routing fields common to every inbound frame.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Envelope {
    /// The `type` tag, absent on acknowledgments.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Message subtype.
    #[serde(default)]
    pub subtype: Option<String>,
    /// Present (even if null) on acknowledgments of sent events.
    #[serde(default, deserialize_with = "present")]
    pub reply_to: Option<serde_json::Value>,
    /// Acknowledgment status.
    #[serde(default)]
    pub ok: Option<bool>,
}

/// Treat a present field as `Some`, even when its value is `null`.
fn present<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<serde_json::Value>, D::Error> {
    serde_json::Value::deserialize(deserializer).map(Some)
}

/// What the processor should do with a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Acknowledgment of a sent event; consumed without reaching a handler.
    Ack {
        /// The acknowledged event id, when numeric.
        reply_to: Option<u64>,
        /// Whether the service accepted the event.
        ok: bool,
    },
    /// An edit or delete of earlier content.
    Suppressed,
    /// A frame without a `type` tag.
    Untyped,
    /// Route to the handler for this kind.
    Event(EventKind),
}

impl Envelope {
    /// Classify the frame.
    pub fn dispatch(&self) -> Dispatch {
        if let Some(reply_to) = &self.reply_to {
            return Dispatch::Ack {
                reply_to: reply_to.as_u64(),
                ok: self.ok.unwrap_or(true),
            };
        }

        let Some(tag) = self.kind.as_deref() else {
            return Dispatch::Untyped;
        };

        let kind = EventKind::from_type(tag);
        if kind == EventKind::Message
            && self
                .subtype
                .as_deref()
                .is_some_and(|s| SUPPRESSED_SUBTYPES.contains(&s))
        {
            return Dispatch::Suppressed;
        }

        Dispatch::Event(kind)
    }
}

/// A `user_change` event.
#[derive(Debug, Clone, Deserialize)]
pub struct UserChangeEvent {
    /// The full updated record.
    pub user: User,
}

/// An `error` event.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ErrorEvent {
    /// Error details.
    pub error: ErrorDetail,
}

/// Body of an [`ErrorEvent`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ErrorDetail {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    pub msg: String,
}

/// An event sent to the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundEvent<'a> {
    /// Sequence id, echoed back as `reply_to`.
    pub id: u64,
    /// Event type tag.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Target channel id.
    pub channel: &'a str,
    /// Message text.
    pub text: &'a str,
}

impl<'a> OutboundEvent<'a> {
    /// A `message` event.
    pub fn message(id: u64, channel: &'a str, text: &'a str) -> Self {
        Self {
            id,
            kind: "message",
            channel,
            text,
        }
    }
}
