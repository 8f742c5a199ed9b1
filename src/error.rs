use thiserror::Error;

#[derive(Debug, Error)]
pub enum MangaError {
    #[error("Please enter some chapter text first.")]
    EmptyChapter,

    #[error("The AI returned an invalid storyboard format.")]
    InvalidStoryboard(#[source] serde_json::Error),

    #[error("The AI returned an invalid character design format.")]
    InvalidCharacterDesigns(#[source] serde_json::Error),

    #[error("The AI returned an invalid narration format.")]
    InvalidNarration(#[source] serde_json::Error),

    #[error("Image generation failed: The AI did not return an image.")]
    NoImage,

    #[error("Image generation was blocked by the provider ({reason}).")]
    ContentBlocked { reason: String },

    #[error("{service} API error: HTTP {status}: {body}")]
    Http {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service} request failed")]
    Transport {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} response was malformed: {detail}")]
    MalformedResponse {
        service: &'static str,
        detail: String,
    },

    #[error("No video URL in image-to-video response")]
    MissingVideoUrl,

    #[error("{0}")]
    InvalidApiKey(String),

    #[error("{0} is not configured")]
    MissingCredential(&'static str),

    #[error("cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: &'static str,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl MangaError {
    // Content blocks are not here: they take the fallback-prompt path.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MangaError::NoImage
                | MangaError::Http { .. }
                | MangaError::Transport { .. }
                | MangaError::MalformedResponse { .. }
        )
    }
}

pub type Result<T, E = MangaError> = std::result::Result<T, E>;
