//! Narrow interfaces to everything that lives across the network.
//!
//! The orchestrator only sees these traits; `backend` and `telegram` hold the
//! HTTP implementations and tests plug in in-memory fakes.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::RepaintError;
use crate::models::{ConversationId, InlineButton, MessageId};
use crate::render::RenderRequest;

#[async_trait]
pub trait Captioner: Send + Sync {
    /// Free-text description of an image.
    async fn caption(&self, image: Bytes) -> Result<String, RepaintError>;
}

#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Raw completion text for an instruction. May be empty; callers decide what that means.
    async fn complete(&self, prompt: &str) -> Result<String, RepaintError>;
}

#[async_trait]
pub trait Renderer: Send + Sync {
    /// Runs an image-to-image render and returns the encoded image.
    async fn render(&self, request: &RenderRequest) -> Result<Bytes, RepaintError>;
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: Bytes) -> Result<String, RepaintError>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendOptions {
    pub reply_to: Option<MessageId>,
    pub markdown: bool,
    pub buttons: Vec<InlineButton>,
}

impl SendOptions {
    pub fn reply_to(message: MessageId) -> Self {
        Self { reply_to: Some(message), ..Self::default() }
    }
}

/// Outbound half of the chat transport.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_text(&self, chat: ConversationId, text: &str, options: SendOptions) -> Result<MessageId, RepaintError>;

    async fn send_photo(&self, chat: ConversationId, image: Bytes, caption: &str, options: SendOptions) -> Result<MessageId, RepaintError>;

    async fn edit_text(&self, chat: ConversationId, message: MessageId, text: &str) -> Result<(), RepaintError>;

    async fn delete_message(&self, chat: ConversationId, message: MessageId) -> Result<(), RepaintError>;

    /// Downloads the binary content behind a transport file reference.
    async fn fetch_file(&self, file_id: &str) -> Result<Bytes, RepaintError>;
}
