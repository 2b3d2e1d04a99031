use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Client};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::collaborators::{Captioner, ChatCompletion, Renderer, Transcriber};
use crate::config::{Config, Timeouts};
use crate::error::RepaintError;
use crate::render::RenderRequest;

const ERROR_MARKER: &str = "<error>";
const OCTET_STREAM: &str = "binary/octet-stream";

/// Shortens long payloads for log lines.
fn preview(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...[{} chars]", &text[..cut], text.chars().count()),
        None => text.to_string(),
    }
}

/// Removes every error marker the interrogator embeds in its caption.
fn clean_caption(raw: &str) -> String {
    raw.replace(ERROR_MARKER, "").trim().to_string()
}

/// HTTP client for the AI backend: interrogation, chat, ControlNet and Whisper
/// all live under one base URL.
pub struct BackendClient {
    client: Client,
    base_url: String,
    chat_max_tokens: u32,
    transcribe_language: String,
    timeouts: Timeouts,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    text: Option<String>,
}

impl BackendClient {
    pub fn new(cfg: &Config) -> Self {
        Self {
            client: Client::new(),
            base_url: cfg.api_url.clone(),
            chat_max_tokens: cfg.chat_max_tokens,
            transcribe_language: cfg.transcribe_language.clone(),
            timeouts: cfg.timeouts.clone(),
        }
    }

    async fn post_binary(&self, service: &'static str, path: &str, body: Bytes, timeout: Duration) -> Result<String, RepaintError> {
        let url = format!("{}{}", self.base_url, path);
        info!("🔗 Posting {} bytes to {}", body.len(), url);

        let response = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, OCTET_STREAM)
            .timeout(timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| RepaintError::from_http(service, e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| RepaintError::from_http(service, e))?;
        if !status.is_success() {
            error!("❌ {} error response: status={} body={}", service, status, preview(&text, 500));
            return Err(RepaintError::unavailable(service, format!("status {status}")));
        }
        Ok(text)
    }
}

#[async_trait]
impl Captioner for BackendClient {
    async fn caption(&self, image: Bytes) -> Result<String, RepaintError> {
        let raw = self.post_binary("captioner", "/sd/interrogate", image, self.timeouts.caption).await?;
        let caption = clean_caption(&raw);
        if caption.is_empty() {
            return Err(RepaintError::unavailable("captioner", "cannot generate prompt"));
        }
        info!("📝 Caption: {}", caption);
        Ok(caption)
    }
}

#[async_trait]
impl Transcriber for BackendClient {
    async fn transcribe(&self, audio: Bytes) -> Result<String, RepaintError> {
        let path = format!("/whisper/transcribe?language={}", self.transcribe_language);
        let text = self.post_binary("transcriber", &path, audio, self.timeouts.transcribe).await?;
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(RepaintError::unavailable("transcriber", "empty transcript"));
        }
        Ok(text)
    }
}

#[async_trait]
impl ChatCompletion for BackendClient {
    async fn complete(&self, prompt: &str) -> Result<String, RepaintError> {
        let url = format!("{}/chatgpt/chat", self.base_url);
        let body = json!({
            "prompt": prompt,
            "options": { "max_tokens": self.chat_max_tokens }
        });
        info!("💬 Chat request: {}", preview(prompt, 120));

        let response = self
            .client
            .post(&url)
            .timeout(self.timeouts.chat)
            .json(&body)
            .send()
            .await
            .map_err(|e| RepaintError::from_http("chat service", e))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            error!("❌ Chat error response: status={} body={}", status, preview(&error_body, 500));
            return Err(RepaintError::unavailable("chat service", format!("status {status}")));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| RepaintError::from_http("chat service", e))?;
        let text = parsed.text.unwrap_or_default();
        info!("💬 Chat response: {}", preview(&text, 300));
        Ok(text)
    }
}

#[async_trait]
impl Renderer for BackendClient {
    async fn render(&self, request: &RenderRequest) -> Result<Bytes, RepaintError> {
        let url = format!("{}/sd/controlnet/txt2img", self.base_url);
        let response = self
            .client
            .post(&url)
            .timeout(self.timeouts.render)
            .json(request)
            .send()
            .await
            .map_err(|e| RepaintError::RenderService(if e.is_timeout() { "request timed out".into() } else { e.to_string() }))?;

        let status = response.status();
        let is_json = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("application/json"))
            .unwrap_or(false);

        if !status.is_success() || is_json {
            let error_body = response.text().await.unwrap_or_default();
            error!("❌ Render error response: status={} body={}", status, preview(&error_body, 500));
            return Err(RepaintError::RenderService(format!("renderer answered {status} without an image")));
        }

        let image = response.bytes().await.map_err(|e| RepaintError::RenderService(e.to_string()))?;
        info!("🖼️ Received {} bytes from renderer", image.len());
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caption_markers_are_stripped() {
        assert_eq!(clean_caption("<error>a cat on a sofa<error>"), "a cat on a sofa");
        assert_eq!(clean_caption("  <error> "), "");
        assert_eq!(clean_caption("plain"), "plain");
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("ééééé", 2), "éé...[5 chars]");
    }

    #[test]
    fn chat_response_tolerates_missing_text() {
        let parsed: ChatResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.text.is_none());
        let parsed: ChatResponse = serde_json::from_str(r#"{"text": "{\"a\": 1}"}"#).unwrap();
        assert_eq!(parsed.text.as_deref(), Some("{\"a\": 1}"));
    }
}
