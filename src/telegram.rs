//! Telegram Bot API transport: outbound calls plus webhook update parsing.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info};

use crate::collaborators::{ChatTransport, SendOptions};
use crate::config::Config;
use crate::error::RepaintError;
use crate::models::{ButtonAction, ConversationId, InboundEvent, InlineButton, MessageId, PhotoMessage, PhotoRef};

const API_BASE: &str = "https://api.telegram.org";

// --- Update types (only the fields the bot reads) ---

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TgMessage>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
pub struct TgMessage {
    pub message_id: i64,
    pub chat: TgChat,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub photo: Option<Vec<PhotoSize>>,
    #[serde(default)]
    pub voice: Option<Voice>,
    #[serde(default)]
    pub reply_to_message: Option<Box<TgMessage>>,
}

#[derive(Debug, Deserialize)]
pub struct TgChat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Deserialize)]
pub struct Voice {
    pub file_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub message: Option<TgMessage>,
}

impl TgMessage {
    fn photo_message(&self) -> Option<PhotoMessage> {
        let sizes = self.photo.as_ref().filter(|p| !p.is_empty())?;
        Some(PhotoMessage {
            message_id: MessageId(self.message_id),
            sizes: sizes
                .iter()
                .map(|p| PhotoRef { file_id: p.file_id.clone(), width: p.width, height: p.height })
                .collect(),
        })
    }

    fn replied_photo(&self) -> Option<PhotoMessage> {
        self.reply_to_message.as_deref().and_then(TgMessage::photo_message)
    }
}

impl Update {
    /// Converts a raw update into the event the orchestrator handles, if any.
    /// Photos win over voice, voice over text, matching what the user sent.
    pub fn into_event(self) -> Option<InboundEvent> {
        if let Some(query) = self.callback_query {
            let action = query.data.as_deref().and_then(ButtonAction::from_callback_data)?;
            let message = query.message?;
            return Some(InboundEvent::ButtonPressed {
                chat: ConversationId(message.chat.id),
                action,
                reply_to_photo: message.replied_photo(),
                caption: message.caption,
            });
        }

        let message = self.message?;
        let chat = ConversationId(message.chat.id);
        if let Some(photo) = message.photo_message() {
            return Some(InboundEvent::PhotoUploaded { chat, photo });
        }
        let reply_to_photo = message.replied_photo();
        if let Some(voice) = message.voice {
            return Some(InboundEvent::Voice { chat, message_id: MessageId(message.message_id), file_id: voice.file_id, reply_to_photo });
        }
        let text = message.text.filter(|t| !t.trim().is_empty())?;
        Some(InboundEvent::Text { chat, message_id: MessageId(message.message_id), text, reply_to_photo })
    }
}

// --- Outbound ---

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    #[serde(default = "Option::default")]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct FileInfo {
    #[serde(default)]
    file_path: Option<String>,
}

#[derive(Debug, Serialize)]
struct KeyboardButton<'a> {
    text: &'a str,
    callback_data: &'static str,
}

fn reply_markup(buttons: &[InlineButton]) -> Option<Value> {
    if buttons.is_empty() {
        return None;
    }
    let rows: Vec<Vec<KeyboardButton>> = buttons
        .iter()
        .map(|b| vec![KeyboardButton { text: &b.text, callback_data: b.action.callback_data() }])
        .collect();
    Some(json!({ "inline_keyboard": rows }))
}

pub struct TelegramTransport {
    client: Client,
    token: String,
}

impl TelegramTransport {
    pub fn new(cfg: &Config) -> Self {
        let client = Client::builder()
            .timeout(cfg.timeouts.transport)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, token: cfg.telegram_token.clone() }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{API_BASE}/bot{}/{method}", self.token)
    }

    async fn read_envelope<T: DeserializeOwned>(method: &str, response: reqwest::Response) -> Result<Option<T>, RepaintError> {
        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| RepaintError::Transport(format!("{method}: {e}")))?;
        if !envelope.ok {
            let reason = envelope.description.unwrap_or_else(|| "unknown error".into());
            error!("❌ Telegram {} failed: {}", method, reason);
            return Err(RepaintError::Transport(format!("{method}: {reason}")));
        }
        Ok(envelope.result)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: &Value) -> Result<Option<T>, RepaintError> {
        let response = self
            .client
            .post(self.method_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| RepaintError::Transport(format!("{method}: {e}")))?;
        Self::read_envelope(method, response).await
    }

    pub async fn answer_callback_query(&self, query_id: &str) -> Result<(), RepaintError> {
        self.call::<Value>("answerCallbackQuery", &json!({ "callback_query_id": query_id })).await?;
        Ok(())
    }

    pub async fn set_webhook(&self, url: &str, secret: Option<&str>) -> Result<(), RepaintError> {
        let mut body = json!({ "url": url, "allowed_updates": ["message", "callback_query"] });
        if let Some(secret) = secret {
            body["secret_token"] = json!(secret);
        }
        self.call::<Value>("setWebhook", &body).await?;
        info!("🔗 Webhook registered at {}", url);
        Ok(())
    }
}

fn message_body(chat: ConversationId, options: &SendOptions) -> Value {
    let mut body = json!({ "chat_id": chat.0 });
    if let Some(reply_to) = options.reply_to {
        body["reply_to_message_id"] = json!(reply_to.0);
    }
    if options.markdown {
        body["parse_mode"] = json!("Markdown");
    }
    if let Some(markup) = reply_markup(&options.buttons) {
        body["reply_markup"] = markup;
    }
    body
}

fn sent_id(method: &str, sent: Option<SentMessage>) -> Result<MessageId, RepaintError> {
    sent.map(|m| MessageId(m.message_id))
        .ok_or_else(|| RepaintError::Transport(format!("{method}: no message in response")))
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_text(&self, chat: ConversationId, text: &str, options: SendOptions) -> Result<MessageId, RepaintError> {
        let mut body = message_body(chat, &options);
        body["text"] = json!(text);
        sent_id("sendMessage", self.call("sendMessage", &body).await?)
    }

    async fn send_photo(&self, chat: ConversationId, image: Bytes, caption: &str, options: SendOptions) -> Result<MessageId, RepaintError> {
        let mut form = Form::new()
            .text("chat_id", chat.0.to_string())
            .text("caption", caption.to_string())
            .part("photo", Part::stream(image).file_name("repaint.png"));
        if let Some(reply_to) = options.reply_to {
            form = form.text("reply_to_message_id", reply_to.0.to_string());
        }
        if let Some(markup) = reply_markup(&options.buttons) {
            form = form.text("reply_markup", markup.to_string());
        }

        let response = self
            .client
            .post(self.method_url("sendPhoto"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| RepaintError::Transport(format!("sendPhoto: {e}")))?;
        sent_id("sendPhoto", Self::read_envelope("sendPhoto", response).await?)
    }

    async fn edit_text(&self, chat: ConversationId, message: MessageId, text: &str) -> Result<(), RepaintError> {
        let body = json!({ "chat_id": chat.0, "message_id": message.0, "text": text });
        self.call::<Value>("editMessageText", &body).await?;
        Ok(())
    }

    async fn delete_message(&self, chat: ConversationId, message: MessageId) -> Result<(), RepaintError> {
        let body = json!({ "chat_id": chat.0, "message_id": message.0 });
        self.call::<Value>("deleteMessage", &body).await?;
        Ok(())
    }

    async fn fetch_file(&self, file_id: &str) -> Result<Bytes, RepaintError> {
        let info: Option<FileInfo> = self.call("getFile", &json!({ "file_id": file_id })).await?;
        let path = info
            .and_then(|f| f.file_path)
            .ok_or_else(|| RepaintError::Transport(format!("getFile: no path for {file_id}")))?;

        let url = format!("{API_BASE}/file/bot{}/{path}", self.token);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| RepaintError::Transport(format!("file download: {e}")))?;
        response.bytes().await.map_err(|e| RepaintError::Transport(format!("file download: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn update(value: Value) -> Update {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn photo_message_becomes_upload() {
        let event = update(json!({
            "update_id": 1,
            "message": {
                "message_id": 10, "chat": {"id": 5}, "caption": "hi",
                "photo": [
                    {"file_id": "a", "width": 90, "height": 90},
                    {"file_id": "b", "width": 800, "height": 600}
                ]
            }
        }))
        .into_event();
        match event {
            Some(InboundEvent::PhotoUploaded { chat, photo }) => {
                assert_eq!(chat, ConversationId(5));
                assert_eq!(photo.message_id, MessageId(10));
                assert_eq!(photo.largest().unwrap().file_id, "b");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn text_reply_carries_photo() {
        let event = update(json!({
            "update_id": 2,
            "message": {
                "message_id": 11, "chat": {"id": 5}, "text": "Abstract",
                "reply_to_message": {
                    "message_id": 10, "chat": {"id": 5},
                    "photo": [{"file_id": "b", "width": 800, "height": 600}]
                }
            }
        }))
        .into_event();
        match event {
            Some(InboundEvent::Text { text, reply_to_photo, .. }) => {
                assert_eq!(text, "Abstract");
                assert_eq!(reply_to_photo.unwrap().message_id, MessageId(10));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn voice_message_becomes_voice_event() {
        let event = update(json!({
            "update_id": 3,
            "message": {"message_id": 12, "chat": {"id": 5}, "voice": {"file_id": "v1"}}
        }))
        .into_event();
        assert!(matches!(event, Some(InboundEvent::Voice { file_id, reply_to_photo: None, .. }) if file_id == "v1"));
    }

    #[test]
    fn repaint_button_keeps_caption_and_source_photo() {
        let event = update(json!({
            "update_id": 4,
            "callback_query": {
                "id": "q1", "data": "repaint",
                "message": {
                    "message_id": 20, "chat": {"id": 5}, "caption": "Fashion",
                    "photo": [{"file_id": "r", "width": 512, "height": 512}],
                    "reply_to_message": {
                        "message_id": 10, "chat": {"id": 5},
                        "photo": [{"file_id": "b", "width": 800, "height": 600}]
                    }
                }
            }
        }))
        .into_event();
        match event {
            Some(InboundEvent::ButtonPressed { action, caption, reply_to_photo, .. }) => {
                assert_eq!(action, ButtonAction::RepaintAgain);
                assert_eq!(caption.as_deref(), Some("Fashion"));
                assert_eq!(reply_to_photo.unwrap().message_id, MessageId(10));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_or_empty_updates_are_skipped() {
        assert!(update(json!({"update_id": 5})).into_event().is_none());
        assert!(update(json!({"update_id": 6, "callback_query": {"id": "q", "data": "nope"}})).into_event().is_none());
        assert!(update(json!({"update_id": 7, "message": {"message_id": 1, "chat": {"id": 1}, "text": "  "}})).into_event().is_none());
    }

    #[test]
    fn send_options_shape_request_body() {
        let options = SendOptions {
            reply_to: Some(MessageId(3)),
            markdown: true,
            buttons: vec![InlineButton::new("Randomly", ButtonAction::Random)],
        };
        let body = message_body(ConversationId(9), &options);
        assert_eq!(
            body,
            json!({
                "chat_id": 9,
                "reply_to_message_id": 3,
                "parse_mode": "Markdown",
                "reply_markup": {"inline_keyboard": [[{"text": "Randomly", "callback_data": "random"}]]}
            })
        );
        assert_eq!(message_body(ConversationId(9), &SendOptions::default()), json!({"chat_id": 9}));
    }
}
