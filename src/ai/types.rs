use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The single normalized result every adapter produces.
///
/// `success` is true exactly when `answer` holds non-empty text and `error`
/// is absent. Build values through [`AnalysisResult::success`] and
/// [`AnalysisResult::failure`] so the two sides cannot drift apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub success: bool,
    pub answer: Option<String>,
    pub model: String,
    pub timestamp: DateTime<Utc>,
    pub elapsed_seconds: Option<f64>,
    pub tokens_used: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnalysisResult {
    /// A successful result. An answer that is blank after trimming is turned
    /// into a `MissingContent` failure instead.
    pub fn success(
        model: impl Into<String>,
        answer: impl Into<String>,
        elapsed_seconds: f64,
        tokens_used: Option<u64>,
    ) -> Self {
        let model = model.into();
        let answer = answer.into();
        let answer = answer.trim();
        if answer.is_empty() {
            return Self::failure(model, AiError::MissingContent.to_string(), Some(elapsed_seconds));
        }
        Self {
            success: true,
            answer: Some(answer.to_string()),
            model,
            timestamp: Utc::now(),
            elapsed_seconds: Some(elapsed_seconds),
            tokens_used,
            error: None,
        }
    }

    pub fn failure(
        model: impl Into<String>,
        error: impl Into<String>,
        elapsed_seconds: Option<f64>,
    ) -> Self {
        Self {
            success: false,
            answer: None,
            model: model.into(),
            timestamp: Utc::now(),
            elapsed_seconds,
            tokens_used: None,
            error: Some(error.into()),
        }
    }
}

/// Semantic kind of a streamed fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FragmentKind {
    Reasoning,
    Answer,
    Searching,
    Error,
}

impl FragmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FragmentKind::Reasoning => "reasoning",
            FragmentKind::Answer => "answer",
            FragmentKind::Searching => "searching",
            FragmentKind::Error => "error",
        }
    }
}

/// One unit handed to the sink while a call is streaming. `content` is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFragment {
    pub content: String,
    pub kind: FragmentKind,
}

impl StreamFragment {
    pub fn new(kind: FragmentKind, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind,
        }
    }
}

/// An image already serialized for transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
}

impl EncodedImage {
    pub fn to_base64(&self) -> String {
        use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
        BASE64.encode(&self.bytes)
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }
}

/// Everything one vendor call needs. Built fresh per call and dropped afterwards.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub images: Vec<EncodedImage>,
    pub prompt: String,
    /// Extra instruction appended for multi-image batches.
    pub instruction: Option<String>,
}

impl ProviderRequest {
    /// The prompt text with the batch instruction appended, if any.
    pub fn full_prompt(&self) -> String {
        match &self.instruction {
            Some(extra) => format!("{}\n\n{}", self.prompt, extra),
            None => self.prompt.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    OpenAi,
    Gemini,
}

impl std::fmt::Display for Vendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Vendor::OpenAi => write!(f, "openai"),
            Vendor::Gemini => write!(f, "gemini"),
        }
    }
}

/// Request/response shape family within a vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiStyle {
    ChatCompletions,
    Responses,
    GenerateContent,
}

impl ApiStyle {
    /// OpenAI models from the gpt-5 family speak the Responses API; everything
    /// older stays on Chat Completions.
    pub fn for_openai_model(model: &str) -> Self {
        if model.to_ascii_lowercase().starts_with("gpt-5") {
            ApiStyle::Responses
        } else {
            ApiStyle::ChatCompletions
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Delivery {
    Buffered,
    Streaming,
}

/// Key of the adapter dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Route {
    pub vendor: Vendor,
    pub api: ApiStyle,
    pub delivery: Delivery,
}

/// Error type for AI operations
#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("Connection failed: {0}")]
    ConnectionError(String),
    #[error("Request timeout: {0}")]
    Timeout(String),
    #[error("Rate limited: {0}")]
    RateLimited(String),
    #[error("Server error (HTTP {status}): {body}")]
    ServerError { status: u16, body: String },
    #[error("Authentication failed: {0}")]
    AuthError(String),
    #[error("Request rejected (HTTP {status}): {body}")]
    RequestRejected { status: u16, body: String },
    #[error("No usable answer content in vendor response")]
    MissingContent,
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    /// The vendor reported an error inside the stream. The aggregator has
    /// already forwarded it to the sink.
    #[error("Stream error: {0}")]
    StreamError(String),
    #[error("Image encoding failed: {0}")]
    Encoding(String),
    #[error("No adapter registered for {0}")]
    NoRoute(String),
}

impl AiError {
    /// True when the sink has already seen this failure as an error fragment.
    pub fn already_reported(&self) -> bool {
        matches!(self, AiError::StreamError(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_trims_and_keeps_invariant() {
        let r = AnalysisResult::success("gpt-4o", "  {\"a\":1}\n", 1.5, Some(42));
        assert!(r.success);
        assert_eq!(r.answer.as_deref(), Some("{\"a\":1}"));
        assert!(r.error.is_none());
        assert_eq!(r.tokens_used, Some(42));
    }

    #[test]
    fn blank_success_becomes_missing_content_failure() {
        let r = AnalysisResult::success("gpt-4o", " \n ", 0.2, Some(3));
        assert!(!r.success);
        assert!(r.answer.is_none());
        assert!(r.error.unwrap().contains("No usable answer"));
    }

    #[test]
    fn failure_has_error_and_no_answer() {
        let r = AnalysisResult::failure("gemini-3-pro-preview", "boom", None);
        assert!(!r.success);
        assert!(r.answer.is_none());
        assert_eq!(r.error.as_deref(), Some("boom"));
    }

    #[test]
    fn api_style_follows_model_family() {
        assert_eq!(ApiStyle::for_openai_model("gpt-5.2"), ApiStyle::Responses);
        assert_eq!(ApiStyle::for_openai_model("GPT-5-mini"), ApiStyle::Responses);
        assert_eq!(ApiStyle::for_openai_model("gpt-4o"), ApiStyle::ChatCompletions);
        assert_eq!(ApiStyle::for_openai_model("o3"), ApiStyle::ChatCompletions);
    }

    #[test]
    fn data_url_carries_mime_type() {
        let img = EncodedImage {
            bytes: vec![1, 2, 3],
            mime_type: "image/png",
        };
        assert_eq!(img.data_url(), "data:image/png;base64,AQID");
    }

    #[test]
    fn batch_instruction_is_appended() {
        let req = ProviderRequest {
            images: vec![],
            prompt: "Analyze.".into(),
            instruction: Some("Two parts.".into()),
        };
        assert_eq!(req.full_prompt(), "Analyze.\n\nTwo parts.");
    }

    #[test]
    fn fragment_kind_serializes_lowercase() {
        let f = StreamFragment::new(FragmentKind::Reasoning, "thinking");
        let json = serde_json::to_string(&f).unwrap();
        assert!(json.contains("\"reasoning\""));
    }
}
