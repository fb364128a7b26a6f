use super::types::Platform;
use thiserror::Error;

/// Failure taxonomy for a single extraction attempt and for the request as
/// a whole.
#[derive(Debug, Clone, Error)]
pub enum ExtractError {
    /// The request itself cannot be formed (bad URL, no video id). Never
    /// retried against other instances of the same backend.
    #[error("Invalid request: {0}")]
    RequestShape(String),

    /// Network error, timeout or non-2xx without an error payload.
    #[error("{backend}: transport failure: {message}")]
    Transport {
        backend: &'static str,
        message: String,
    },

    /// The backend answered with an explicit error payload.
    #[error("{backend}: {message}")]
    BackendRejected {
        backend: &'static str,
        message: String,
    },

    /// 2xx answer that carried nothing usable.
    #[error("{backend}: no usable data: {message}")]
    NoUsableData {
        backend: &'static str,
        message: String,
    },

    #[error("All extraction methods failed for {platform}. Primary: {primary}. Fallback: {fallback}")]
    AllBackendsFailed {
        platform: Platform,
        primary: Box<ExtractError>,
        fallback: Box<ExtractError>,
    },
}

impl ExtractError {
    pub fn transport(backend: &'static str, message: impl Into<String>) -> Self {
        Self::Transport {
            backend,
            message: message.into(),
        }
    }

    pub fn rejected(backend: &'static str, message: impl Into<String>) -> Self {
        Self::BackendRejected {
            backend,
            message: message.into(),
        }
    }

    pub fn no_data(backend: &'static str, message: impl Into<String>) -> Self {
        Self::NoUsableData {
            backend,
            message: message.into(),
        }
    }

    /// Whether another instance or backend may still succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::RequestShape(_) | Self::AllBackendsFailed { .. }
        )
    }

    /// Rank used when several instances failed and only one message can be
    /// reported: explicit rejections beat empty answers beat transport noise.
    pub(crate) fn specificity(&self) -> u8 {
        match self {
            Self::RequestShape(_) => 4,
            Self::BackendRejected { .. } => 3,
            Self::NoUsableData { .. } => 2,
            Self::Transport { .. } => 1,
            Self::AllBackendsFailed { .. } => 0,
        }
    }

    /// Friendly message for the HTTP boundary.
    pub fn user_message(&self) -> String {
        match self {
            Self::RequestShape(message) => message.clone(),
            Self::AllBackendsFailed { .. } => {
                let text = self.to_string().to_lowercase();
                if text.contains("private") {
                    "This video is private and cannot be downloaded".to_string()
                } else if text.contains("unavailable") || text.contains("deleted") {
                    "This video is unavailable or has been deleted".to_string()
                } else if text.contains("age-restricted")
                    || text.contains("age restricted")
                    || text.contains("confirm your age")
                {
                    "Age-restricted videos are not supported".to_string()
                } else {
                    "Unable to download from this platform. Please try a different URL."
                        .to_string()
                }
            }
            other => format!("Failed to extract video: {other}"),
        }
    }
}

/// Keep whichever of two failures is more useful to report.
pub(crate) fn most_specific(current: Option<ExtractError>, next: ExtractError) -> ExtractError {
    match current {
        Some(current) if current.specificity() > next.specificity() => current,
        _ => next,
    }
}
