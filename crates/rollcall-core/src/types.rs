use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status reported by the recognition backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Retry,
    Error,
}

/// Kind of person the kiosk expects, passed to the backend as a hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    Student,
    Staff,
}

impl std::str::FromStr for SubjectKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(Self::Student),
            "staff" | "teacher" => Ok(Self::Staff),
            other => Err(format!("unknown subject kind: {other}")),
        }
    }
}

/// The person the backend believes is in the frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchInfo {
    pub person_id: String,
    pub name: String,
    /// Match confidence in [0, 1].
    pub confidence: f32,
    /// Backend-specific fields (class, roll number, photo URL, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Attendance entry the backend wrote for a successful match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Raw response body from one recognition call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResponse {
    pub status: ResponseStatus,
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub matched: Option<MatchInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attendance: Option<AttendanceRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Immutable record of one completed recognition call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionOutcome {
    pub status: ResponseStatus,
    #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
    pub matched: Option<MatchInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attendance: Option<AttendanceRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl RecognitionOutcome {
    pub fn from_response(response: RecognitionResponse) -> Self {
        Self {
            status: response.status,
            matched: response.matched,
            attendance: response.attendance,
            message: response.message,
            received_at: Utc::now(),
        }
    }

    pub fn confidence(&self) -> Option<f32> {
        self.matched.as_ref().map(|m| m.confidence)
    }
}
