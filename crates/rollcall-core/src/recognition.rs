//! Boundary with the remote recognition backend.
//!
//! The backend is opaque: it takes one encoded image and answers with a
//! [`RecognitionResponse`]. Everything that is not a confident match is a
//! failed attempt, whatever the reason.

use crate::types::{RecognitionOutcome, RecognitionResponse, ResponseStatus, SubjectKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.85;
pub const DEFAULT_MAX_RETRY: u32 = 5;

#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("backend returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Client for the remote recognizer.
#[async_trait]
pub trait RecognitionClient: Send + Sync {
    async fn recognize(
        &self,
        image: &[u8],
        subject: Option<SubjectKind>,
    ) -> Result<RecognitionResponse, RecognitionError>;
}

/// Per-episode recognition policy, supplied by the settings collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionSettings {
    /// Minimum match confidence accepted as a success.
    pub confidence_threshold: f32,
    /// Total remote calls allowed per capture episode.
    pub max_retry: u32,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            max_retry: DEFAULT_MAX_RETRY,
        }
    }
}

impl RecognitionSettings {
    /// Clamp out-of-range values into something the state machine can run.
    pub fn validated(self) -> Self {
        let confidence_threshold = if self.confidence_threshold.is_finite() {
            self.confidence_threshold.clamp(0.0, 1.0)
        } else {
            DEFAULT_CONFIDENCE_THRESHOLD
        };
        Self {
            confidence_threshold,
            max_retry: self.max_retry.max(1),
        }
    }
}

/// Source of [`RecognitionSettings`]; read at the start of every episode.
pub trait SettingsProvider: Send {
    fn load(&self) -> RecognitionSettings;
}

impl SettingsProvider for RecognitionSettings {
    fn load(&self) -> RecognitionSettings {
        *self
    }
}

/// Why an attempt did not count as a match.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    /// Backend answered success but without a match.
    NoMatch,
    LowConfidence { confidence: f32, threshold: f32 },
    Backend {
        status: ResponseStatus,
        message: Option<String>,
    },
    /// The call never produced a response.
    Transport(String),
    /// The frame could not be captured or encoded.
    Capture(String),
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::NoMatch => write!(f, "no match"),
            Rejection::LowConfidence {
                confidence,
                threshold,
            } => write!(f, "confidence {confidence:.3} below {threshold:.3}"),
            Rejection::Backend { status, message } => match message {
                Some(m) => write!(f, "backend {status:?}: {m}"),
                None => write!(f, "backend {status:?}"),
            },
            Rejection::Transport(e) => write!(f, "transport: {e}"),
            Rejection::Capture(e) => write!(f, "capture: {e}"),
        }
    }
}

/// Result of one attempt as seen by the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accepted(RecognitionOutcome),
    Rejected(Rejection),
}

impl Verdict {
    /// Fold a transport-level result into a verdict.
    pub fn from_result(
        result: Result<RecognitionResponse, RecognitionError>,
        confidence_threshold: f32,
    ) -> Self {
        match result {
            Ok(response) => classify(response, confidence_threshold),
            Err(e) => Verdict::Rejected(Rejection::Transport(e.to_string())),
        }
    }
}

/// Decide whether a backend response is an accepted match.
pub fn classify(response: RecognitionResponse, confidence_threshold: f32) -> Verdict {
    if response.status != ResponseStatus::Success {
        return Verdict::Rejected(Rejection::Backend {
            status: response.status,
            message: response.message,
        });
    }

    let Some(confidence) = response.matched.as_ref().map(|m| m.confidence) else {
        return Verdict::Rejected(Rejection::NoMatch);
    };

    if confidence < confidence_threshold {
        return Verdict::Rejected(Rejection::LowConfidence {
            confidence,
            threshold: confidence_threshold,
        });
    }

    Verdict::Accepted(RecognitionOutcome::from_response(response))
}
