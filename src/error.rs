use thiserror::Error;

/// Everything that can stop a repaint after the photo has been resolved.
///
/// The `Display` text is shown to the user verbatim after the apology line,
/// so keep messages short and free of internals.
#[derive(Debug, Error)]
pub enum RepaintError {
    #[error("{service} is unavailable: {detail}")]
    CollaboratorUnavailable { service: &'static str, detail: String },
    #[error("cannot read image features, {0}")]
    MetaExtract(String),
    #[error("cannot restyle image features, {0}")]
    MetaTransform(String),
    #[error("render failed: {0}")]
    RenderService(String),
    #[error("chat transport error: {0}")]
    Transport(String),
}

impl RepaintError {
    pub fn unavailable(service: &'static str, detail: impl Into<String>) -> Self {
        Self::CollaboratorUnavailable { service, detail: detail.into() }
    }

    /// Maps a reqwest failure onto the collaborator class, keeping timeouts readable.
    pub fn from_http(service: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::unavailable(service, "request timed out")
        } else {
            Self::unavailable(service, err.to_string())
        }
    }
}
