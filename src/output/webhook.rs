// webhook.rs - POSTs analysis lifecycle events to the frontend.
//
// Lifecycle payloads are retried (any failure counts) with 0.5s doubling
// backoff. Streaming chunks are sent once with a short timeout so a slow
// endpoint cannot build a backlog behind the model.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use super::{OutputError, ResultSink};
use crate::ai::{AnalysisResult, FragmentKind, FragmentSink, StreamFragment};
use crate::retry::{retry_with_backoff, RetryPolicy};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const CHUNK_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WebhookPayload<'a> {
    Processing {
        timestamp: DateTime<Utc>,
        #[serde(skip_serializing_if = "Option::is_none")]
        streaming: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message_id: Option<&'a str>,
    },
    Answer {
        answer: Option<&'a str>,
        timestamp: DateTime<Utc>,
        model: &'a str,
        elapsed_seconds: Option<f64>,
        tokens_used: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<&'a str>,
    },
    StreamingChunk {
        content: &'a str,
        content_type: FragmentKind,
        message_id: &'a str,
        timestamp: DateTime<Utc>,
    },
    StreamingComplete {
        answer: Option<&'a str>,
        timestamp: DateTime<Utc>,
        model: &'a str,
        elapsed_seconds: Option<f64>,
        tokens_used: Option<u64>,
        message_id: Option<&'a str>,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<&'a str>,
    },
}

impl WebhookPayload<'_> {
    fn description(&self) -> &'static str {
        match self {
            WebhookPayload::Processing { .. } => "processing status",
            WebhookPayload::Answer { .. } => "answer",
            WebhookPayload::StreamingChunk { .. } => "streaming chunk",
            WebhookPayload::StreamingComplete { .. } => "streaming completion",
        }
    }
}

/// Buffered-mode webhook: one `processing` and one `answer` per analysis.
pub struct WebhookOutput {
    url: String,
    client: Client,
    policy: RetryPolicy,
}

impl WebhookOutput {
    pub fn new(url: &str) -> Result<Self, OutputError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        log::info!("WebhookOutput initialized with URL: {}", url);
        Ok(Self {
            url: url.to_string(),
            client,
            policy: RetryPolicy::new(MAX_RETRIES, INITIAL_BACKOFF),
        })
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn post(&self, payload: &WebhookPayload<'_>, timeout: Option<Duration>) -> Result<(), OutputError> {
        let mut request = self.client.post(&self.url).json(payload);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(OutputError::Status {
            status: status.as_u16(),
            body,
        })
    }

    /// Deliver with retry; every failure is treated as retryable.
    async fn send_with_retry(&self, payload: &WebhookPayload<'_>) -> Result<(), OutputError> {
        let description = payload.description();
        retry_with_backoff(&self.policy, description, || self.post(payload, None), |_| true).await?;
        log::info!("{} delivered", description);
        Ok(())
    }
}

#[async_trait]
impl ResultSink for WebhookOutput {
    async fn send_processing(&self) -> Result<(), OutputError> {
        self.send_with_retry(&WebhookPayload::Processing {
            timestamp: Utc::now(),
            streaming: None,
            message_id: None,
        })
        .await
    }

    async fn send(
        &self,
        result: &AnalysisResult,
        _screenshot_path: Option<&Path>,
    ) -> Result<(), OutputError> {
        self.send_with_retry(&WebhookPayload::Answer {
            answer: result.answer.as_deref(),
            timestamp: result.timestamp,
            model: &result.model,
            elapsed_seconds: result.elapsed_seconds,
            tokens_used: result.tokens_used,
            error: result.error.as_deref(),
        })
        .await
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}

/// Streaming-mode webhook. All events of one analysis share a message id,
/// allocated on `processing` (or the first chunk) and reset after completion.
pub struct StreamingWebhookOutput {
    inner: WebhookOutput,
    message_id: Mutex<Option<String>>,
}

impl StreamingWebhookOutput {
    pub fn new(url: &str) -> Result<Self, OutputError> {
        Ok(Self {
            inner: WebhookOutput::new(url)?,
            message_id: Mutex::new(None),
        })
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.inner = self.inner.with_retry_policy(policy);
        self
    }

    /// The current message id, allocating one if none is active.
    fn current_message_id(&self) -> String {
        let mut guard = match self.message_id.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard
            .get_or_insert_with(|| {
                let id = uuid::Uuid::new_v4().to_string();
                log::debug!("Generated message_id: {}", id);
                id
            })
            .clone()
    }

    fn take_message_id(&self) -> Option<String> {
        match self.message_id.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

#[async_trait]
impl ResultSink for StreamingWebhookOutput {
    async fn send_processing(&self) -> Result<(), OutputError> {
        let message_id = self.current_message_id();
        self.inner
            .send_with_retry(&WebhookPayload::Processing {
                timestamp: Utc::now(),
                streaming: Some(true),
                message_id: Some(message_id.as_str()),
            })
            .await
    }

    async fn send(
        &self,
        result: &AnalysisResult,
        _screenshot_path: Option<&Path>,
    ) -> Result<(), OutputError> {
        let message_id = self.take_message_id();
        self.inner
            .send_with_retry(&WebhookPayload::StreamingComplete {
                answer: result.answer.as_deref(),
                timestamp: result.timestamp,
                model: &result.model,
                elapsed_seconds: result.elapsed_seconds,
                tokens_used: result.tokens_used,
                message_id: message_id.as_deref(),
                success: result.success,
                error: result.error.as_deref(),
            })
            .await
    }

    fn fragment_sink(&self) -> Option<&dyn FragmentSink> {
        Some(self)
    }

    fn name(&self) -> &'static str {
        "streaming-webhook"
    }
}

#[async_trait]
impl FragmentSink for StreamingWebhookOutput {
    async fn send_streaming_chunk(&self, fragment: &StreamFragment) {
        let message_id = self.current_message_id();
        let payload = WebhookPayload::StreamingChunk {
            content: &fragment.content,
            content_type: fragment.kind,
            message_id: &message_id,
            timestamp: Utc::now(),
        };
        match self.inner.post(&payload, Some(CHUNK_TIMEOUT)).await {
            Ok(()) => log::debug!(
                "[Webhook Streaming] Chunk sent: {} chars, type: {}",
                fragment.content.len(),
                fragment.kind.as_str()
            ),
            Err(e) => log::warn!("Failed to send streaming chunk: {}", e),
        }
    }
}
