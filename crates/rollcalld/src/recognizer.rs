//! HTTP client for the remote recognition backend.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rollcall_core::{RecognitionClient, RecognitionError, RecognitionResponse, SubjectKind};
use serde::Serialize;
use std::time::Duration;

const RECOGNIZE_PATH: &str = "attendance/recognize";
const ERROR_BODY_LIMIT: usize = 512;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecognizeRequest {
    /// JPEG as a `data:` URL.
    image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    subject_type: Option<SubjectKind>,
}

impl RecognizeRequest {
    fn new(jpeg: &[u8], subject: Option<SubjectKind>) -> Self {
        Self {
            image: format!("data:image/jpeg;base64,{}", BASE64.encode(jpeg)),
            subject_type: subject,
        }
    }
}

pub struct HttpRecognizer {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpRecognizer {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RecognitionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("rollcalld/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RecognitionError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint_url(base_url),
            token,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn endpoint_url(base_url: &str) -> String {
    format!("{}/{RECOGNIZE_PATH}", base_url.trim_end_matches('/'))
}

#[async_trait]
impl RecognitionClient for HttpRecognizer {
    async fn recognize(
        &self,
        image: &[u8],
        subject: Option<SubjectKind>,
    ) -> Result<RecognitionResponse, RecognitionError> {
        let body = RecognizeRequest::new(image, subject);
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        tracing::debug!(endpoint = %self.endpoint, bytes = image.len(), "submitting frame");

        let response = request
            .send()
            .await
            .map_err(|e| RecognitionError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            body.truncate(ERROR_BODY_LIMIT);
            return Err(RecognitionError::Http {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<RecognitionResponse>()
            .await
            .map_err(|e| RecognitionError::Malformed(e.to_string()))
    }
}
