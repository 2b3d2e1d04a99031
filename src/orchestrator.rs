//! Repaint pipeline and inbound event routing.
//!
//! A repaint walks `Idle → PhotoResolved → CaptionReady → MetaReady →
//! StyleApplied → Rendering` and ends in `Delivered` or `Failed`, or
//! short-circuits `Idle → NoPhoto` when there is nothing to repaint. The
//! transient "working" message is deleted on every path that created it.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::chooser::Chooser;
use crate::collaborators::{Captioner, ChatCompletion, ChatTransport, Renderer, SendOptions, Transcriber};
use crate::error::RepaintError;
use crate::meta;
use crate::models::{
    ButtonAction, ConversationId, FeatureMeta, InboundEvent, InlineButton, MessageId, MessageKey, PhotoMessage,
    RenderResult, StyleSignal,
};
use crate::render::{self, ModelTable};
use crate::store::{ArtifactCache, SessionStore};

pub const NO_PHOTO_TEXT: &str = "Send me an image and I will repaint it! 🎨";
pub const ASK_STYLE_TEXT: &str = "How do you want to repaint this image?\n\n_Note that you can type or send a voice on any language._";
pub const SECOND_STAGE_TEXT: &str = "Repainting... Please wait a bit...";
pub const FAILURE_TEXT: &str = "Sorry, I cannot repaint this photo.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepaintStage {
    Idle,
    NoPhoto,
    PhotoResolved,
    CaptionReady,
    MetaReady,
    StyleApplied,
    Rendering,
    Delivered,
    Failed,
}

impl RepaintStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, RepaintStage::NoPhoto | RepaintStage::Delivered | RepaintStage::Failed)
    }

    /// Legal transitions. Any non-terminal stage after photo resolution may fail.
    pub fn can_advance_to(self, next: RepaintStage) -> bool {
        use RepaintStage::*;
        match (self, next) {
            (Idle, NoPhoto) | (Idle, PhotoResolved) => true,
            (PhotoResolved, CaptionReady)
            | (CaptionReady, MetaReady)
            | (MetaReady, StyleApplied)
            | (StyleApplied, Rendering)
            | (Rendering, Delivered) => true,
            (from, Failed) => from != Idle && !from.is_terminal(),
            _ => false,
        }
    }
}

#[derive(Debug)]
pub enum RepaintOutcome {
    NoPhoto,
    Delivered(RenderResult),
    Failed(RepaintError),
}

/// Tracks the stage of one repaint run.
struct RepaintRun {
    stage: RepaintStage,
}

impl RepaintRun {
    fn new() -> Self {
        Self { stage: RepaintStage::Idle }
    }

    fn advance(&mut self, next: RepaintStage) {
        debug_assert!(self.stage.can_advance_to(next), "illegal repaint transition {:?} -> {:?}", self.stage, next);
        debug!(from = ?self.stage, to = ?next, "repaint stage");
        self.stage = next;
    }
}

/// External services the orchestrator talks to.
pub struct Collaborators {
    pub transport: Arc<dyn ChatTransport>,
    pub captioner: Arc<dyn Captioner>,
    pub chat: Arc<dyn ChatCompletion>,
    pub renderer: Arc<dyn Renderer>,
    pub transcriber: Arc<dyn Transcriber>,
}

pub struct RepaintOrchestrator {
    transport: Arc<dyn ChatTransport>,
    captioner: Arc<dyn Captioner>,
    chat: Arc<dyn ChatCompletion>,
    renderer: Arc<dyn Renderer>,
    transcriber: Arc<dyn Transcriber>,
    artifacts: ArtifactCache,
    sessions: SessionStore,
    chooser: Chooser,
    models: ModelTable,
}

impl RepaintOrchestrator {
    pub fn new(collaborators: Collaborators, models: ModelTable, chooser: Chooser) -> Self {
        let Collaborators { transport, captioner, chat, renderer, transcriber } = collaborators;
        Self {
            transport,
            captioner,
            chat,
            renderer,
            transcriber,
            artifacts: ArtifactCache::default(),
            sessions: SessionStore::default(),
            chooser,
            models,
        }
    }

    #[cfg(test)]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    #[cfg(test)]
    pub fn artifacts(&self) -> &ArtifactCache {
        &self.artifacts
    }

    /// Routes one inbound event. Errors are reported to the user, never returned.
    pub async fn handle_event(&self, event: InboundEvent) {
        match event {
            InboundEvent::PhotoUploaded { chat, photo } => self.on_photo(chat, photo).await,
            InboundEvent::Text { chat, message_id, text, reply_to_photo } => {
                debug!(%chat, message = %message_id, "text style instruction");
                self.repaint(chat, reply_to_photo, StyleSignal::FreeText(text)).await;
            }
            InboundEvent::Voice { chat, message_id, file_id, reply_to_photo } => {
                self.on_voice(chat, message_id, &file_id, reply_to_photo).await;
            }
            InboundEvent::ButtonPressed { chat, action: ButtonAction::Random, reply_to_photo, .. } => {
                let style = self.chooser.style();
                info!(%chat, style, "🎲 Random style picked");
                self.repaint(chat, reply_to_photo, StyleSignal::Named(style.to_string())).await;
            }
            InboundEvent::ButtonPressed { chat, action: ButtonAction::RepaintAgain, caption, reply_to_photo } => {
                match caption.filter(|c| !c.trim().is_empty()) {
                    Some(label) => {
                        self.repaint(chat, reply_to_photo, StyleSignal::RepeatLast(label)).await;
                    }
                    None => warn!(%chat, "⚠️ Repaint-again pressed on a message without a style label"),
                }
            }
        }
    }

    async fn on_photo(&self, chat: ConversationId, photo: PhotoMessage) {
        let message_id = photo.message_id;
        if let Some(largest) = photo.largest() {
            self.artifacts.store_photo(MessageKey { chat, message: message_id }, largest.clone());
        }
        self.sessions.record(chat, photo);
        info!(%chat, message = %message_id, "📷 Photo recorded as active");

        let options = SendOptions {
            reply_to: Some(message_id),
            markdown: true,
            buttons: vec![InlineButton::new("Randomly", ButtonAction::Random)],
        };
        if let Err(e) = self.transport.send_text(chat, ASK_STYLE_TEXT, options).await {
            error!(%chat, "❌ Failed to ask for a style: {}", e);
        }
    }

    async fn on_voice(&self, chat: ConversationId, message_id: MessageId, file_id: &str, reply_to_photo: Option<PhotoMessage>) {
        let transcript = async {
            let audio = self.transport.fetch_file(file_id).await?;
            let text = self.transcriber.transcribe(audio).await?;
            let text = text.trim().to_string();
            if text.is_empty() {
                return Err(RepaintError::unavailable("transcriber", "empty transcript"));
            }
            Ok(text)
        }
        .await;

        match transcript {
            Ok(text) => {
                info!(%chat, "🎙️ Transcribed voice note: {}", text);
                if let Err(e) = self.transport.send_text(chat, &text, SendOptions::reply_to(message_id)).await {
                    warn!(%chat, "⚠️ Failed to echo transcript: {}", e);
                }
                self.repaint(chat, reply_to_photo, StyleSignal::FreeText(text)).await;
            }
            Err(e) => {
                error!(%chat, "❌ Voice transcription failed: {}", e);
                self.send_failure(chat, &e).await;
            }
        }
    }

    /// Resolves the photo and runs the full pipeline for one style signal.
    pub async fn repaint(&self, chat: ConversationId, candidate: Option<PhotoMessage>, style: StyleSignal) -> RepaintOutcome {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("repaint", %run_id, %chat);
        self.repaint_inner(chat, candidate, style).instrument(span).await
    }

    async fn repaint_inner(&self, chat: ConversationId, candidate: Option<PhotoMessage>, style: StyleSignal) -> RepaintOutcome {
        let mut run = RepaintRun::new();

        let Some(photo_message) = self.sessions.resolve(chat, candidate) else {
            run.advance(RepaintStage::NoPhoto);
            info!("🖼️ No photo to repaint, sending guidance");
            if let Err(e) = self.transport.send_text(chat, NO_PHOTO_TEXT, SendOptions::default()).await {
                warn!("⚠️ Failed to send guidance: {}", e);
            }
            return RepaintOutcome::NoPhoto;
        };
        self.sessions.record(chat, photo_message.clone());
        run.advance(RepaintStage::PhotoResolved);

        let ack = match self.transport.send_text(chat, self.chooser.working_message(), SendOptions::default()).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("⚠️ Failed to send working message: {}", e);
                None
            }
        };

        let result = self.run_pipeline(&mut run, chat, &photo_message, ack, style.as_str()).await;

        let outcome = match result {
            Ok(image) => {
                let label = style.as_str().to_string();
                let options = SendOptions {
                    reply_to: Some(photo_message.message_id),
                    markdown: false,
                    buttons: vec![InlineButton::new("Try again", ButtonAction::RepaintAgain)],
                };
                match self.transport.send_photo(chat, image.clone(), &label, options).await {
                    Ok(_) => {
                        run.advance(RepaintStage::Delivered);
                        info!(style = %label, "✅ Repaint delivered");
                        RepaintOutcome::Delivered(RenderResult { image, label })
                    }
                    Err(e) => self.fail(&mut run, chat, e).await,
                }
            }
            Err(e) => self.fail(&mut run, chat, e).await,
        };

        if let Some(ack) = ack {
            if let Err(e) = self.transport.delete_message(chat, ack).await {
                warn!("⚠️ Failed to delete working message {}: {}", ack, e);
            }
        }
        outcome
    }

    async fn fail(&self, run: &mut RepaintRun, chat: ConversationId, error: RepaintError) -> RepaintOutcome {
        run.advance(RepaintStage::Failed);
        error!("❌ Repaint failed: {}", error);
        self.send_failure(chat, &error).await;
        RepaintOutcome::Failed(error)
    }

    async fn send_failure(&self, chat: ConversationId, error: &RepaintError) {
        let text = format!("{FAILURE_TEXT}\n{error}");
        if let Err(e) = self.transport.send_text(chat, &text, SendOptions::default()).await {
            error!(%chat, "❌ Failed to report failure to user: {}", e);
        }
    }

    async fn run_pipeline(
        &self,
        run: &mut RepaintRun,
        chat: ConversationId,
        photo_message: &PhotoMessage,
        ack: Option<MessageId>,
        style: &str,
    ) -> Result<Bytes, RepaintError> {
        let key = MessageKey { chat, message: photo_message.message_id };
        let photo = photo_message
            .largest()
            .cloned()
            .ok_or_else(|| RepaintError::Transport("photo message carries no image".into()))?;
        self.artifacts.store_photo(key, photo.clone());
        let image = self.transport.fetch_file(&photo.file_id).await?;

        let caption = self.caption_for(key, image.clone()).await?;
        run.advance(RepaintStage::CaptionReady);

        let original = self.meta_for(key, &caption).await?;
        info!("🧾 Meta for [{}]: {}", caption, original.to_pretty_json());
        run.advance(RepaintStage::MetaReady);

        let transformed = meta::transform_meta(self.chat.as_ref(), &original, style).await?;
        run.advance(RepaintStage::StyleApplied);

        if let Some(ack) = ack {
            if let Err(e) = self.transport.edit_text(chat, ack, SECOND_STAGE_TEXT).await {
                warn!("⚠️ Failed to update working message: {}", e);
            }
        }

        run.advance(RepaintStage::Rendering);
        render::dispatch(self.renderer.as_ref(), &self.models, &image, &transformed, photo.width, photo.height).await
    }

    async fn caption_for(&self, key: MessageKey, image: Bytes) -> Result<String, RepaintError> {
        if let Some(caption) = self.artifacts.caption(&key) {
            debug!(message = %key.message, "caption cache hit");
            return Ok(caption);
        }
        let caption = self.captioner.caption(image).await?;
        self.artifacts.store_caption(key, caption.clone());
        debug!(cached = self.artifacts.len(), "caption stored");
        Ok(caption)
    }

    async fn meta_for(&self, key: MessageKey, caption: &str) -> Result<FeatureMeta, RepaintError> {
        if let Some(meta) = self.artifacts.meta(&key) {
            debug!(message = %key.message, "meta cache hit");
            return Ok(meta);
        }
        let meta = meta::extract_meta(self.chat.as_ref(), caption).await?;
        self.artifacts.store_meta(key, meta.clone());
        Ok(meta)
    }
}
