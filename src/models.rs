use std::fmt;

use bytes::Bytes;
use serde::{Serialize, Deserialize};
use serde_json::{Map, Value};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversationId(pub i64);

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(pub i64);

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// Message ids are only unique inside one chat, so cached artifacts are keyed by both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageKey {
    pub chat: ConversationId,
    pub message: MessageId,
}

/// One uploaded size variant of an image.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PhotoRef {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
}

impl PhotoRef {
    fn area(&self) -> u64 { self.width as u64 * self.height as u64 }
}

/// A message carrying a photo in every size the transport produced.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PhotoMessage {
    pub message_id: MessageId,
    pub sizes: Vec<PhotoRef>,
}

impl PhotoMessage {
    /// Highest-resolution variant; `None` only when the transport sent no sizes.
    pub fn largest(&self) -> Option<&PhotoRef> {
        self.sizes.iter().max_by_key(|p| p.area())
    }
}

/// What the user asked the photo to become.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StyleSignal {
    /// Picked from the built-in style list.
    Named(String),
    /// Typed or transcribed instruction.
    FreeText(String),
    /// Label of a previous render, re-sent through "Try again".
    RepeatLast(String),
}

impl StyleSignal {
    pub fn as_str(&self) -> &str {
        match self {
            StyleSignal::Named(s) | StyleSignal::FreeText(s) | StyleSignal::RepeatLast(s) => s,
        }
    }
}

/// Structured description of an image. Field order is significant: prompt
/// assembly walks string values in the order they were produced.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(transparent)]
pub struct FeatureMeta(pub Map<String, Value>);

impl FeatureMeta {
    pub const PRESERVED_FLAGS: [&'static str; 3] = ["sketch", "interior", "face"];

    /// Loose truthiness: models sometimes answer `"true"` or `1` instead of `true`.
    pub fn flag(&self, key: &str) -> bool {
        match self.0.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("true"),
            Some(Value::Number(n)) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
            _ => false,
        }
    }

    #[cfg(test)]
    pub fn text(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.0.insert(key.to_string(), value);
    }

    /// Every string value in field order; booleans and other types are skipped.
    pub fn string_values(&self) -> impl Iterator<Item = &str> {
        self.0.values().filter_map(Value::as_str)
    }

    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(&self.0).unwrap_or_default()
    }
}

/// Feature meta after restyling, with the prompt built from it.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedMeta {
    pub meta: FeatureMeta,
    pub prompt: String,
}

#[derive(Debug, Clone)]
pub struct RenderResult {
    pub image: Bytes,
    pub label: String,
}

/// Callback payloads of the two inline buttons the bot shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    Random,
    RepaintAgain,
}

impl ButtonAction {
    pub fn callback_data(self) -> &'static str {
        match self {
            ButtonAction::Random => "random",
            ButtonAction::RepaintAgain => "repaint",
        }
    }

    pub fn from_callback_data(data: &str) -> Option<Self> {
        match data {
            "random" => Some(ButtonAction::Random),
            "repaint" => Some(ButtonAction::RepaintAgain),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineButton {
    pub text: String,
    pub action: ButtonAction,
}

impl InlineButton {
    pub fn new(text: &str, action: ButtonAction) -> Self {
        Self { text: text.to_string(), action }
    }
}

/// Inbound events after transport-specific parsing.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    PhotoUploaded {
        chat: ConversationId,
        photo: PhotoMessage,
    },
    Text {
        chat: ConversationId,
        message_id: MessageId,
        text: String,
        reply_to_photo: Option<PhotoMessage>,
    },
    Voice {
        chat: ConversationId,
        message_id: MessageId,
        file_id: String,
        reply_to_photo: Option<PhotoMessage>,
    },
    ButtonPressed {
        chat: ConversationId,
        action: ButtonAction,
        /// Caption of the message the button is attached to.
        caption: Option<String>,
        reply_to_photo: Option<PhotoMessage>,
    },
}
