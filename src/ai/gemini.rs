use regex::Regex;
use serde_json::{json, Value};
use std::sync::LazyLock;

use super::adapter::{BufferedReply, VendorProtocol};
use super::aggregator::StreamEvent;
use super::transport::Headers;
use super::{AiError, ApiStyle, Delivery, FragmentKind, ProviderRequest, Vendor};
use crate::settings::GeminiSettings;

/// Finish reasons that mean the candidate was withheld.
const BLOCKING_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "RECITATION",
    "BLOCKLIST",
    "PROHIBITED_CONTENT",
    "SPII",
];

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```(?:json)?\s*([\s\S]*?)\s*```").expect("code fence pattern is valid")
});

/// Google Gemini `generateContent`, with search grounding and JSON output.
pub struct Gemini {
    base_url: String,
    api_key: String,
    model: String,
    thinking_level: String,
    google_search: bool,
    show_reasoning: bool,
}

impl Gemini {
    pub fn new(settings: &GeminiSettings, show_reasoning: bool) -> Self {
        Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            thinking_level: settings.thinking_level.clone(),
            google_search: settings.google_search,
            show_reasoning,
        }
    }
}

/// Concatenated text of the first candidate, split into (thoughts, answer).
fn candidate_text(body: &Value) -> (String, String) {
    let mut thoughts = String::new();
    let mut answer = String::new();
    let parts = body
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array);
    for part in parts.into_iter().flatten() {
        let Some(text) = part.get("text").and_then(Value::as_str) else {
            continue;
        };
        if part.get("thought").and_then(Value::as_bool).unwrap_or(false) {
            thoughts.push_str(text);
        } else {
            answer.push_str(text);
        }
    }
    (thoughts, answer)
}

fn total_tokens(body: &Value) -> Option<u64> {
    body.pointer("/usageMetadata/totalTokenCount")
        .and_then(Value::as_u64)
}

/// Recover a JSON object from text that was supposed to be pure JSON.
///
/// Strips a Markdown code fence first; if the result still does not start
/// with `{`, falls back to the first balanced top-level `{...}` span.
pub fn clean_json_response(text: &str) -> String {
    let mut cleaned = text.trim().to_string();

    if let Some(inner) = CODE_FENCE.captures(&cleaned).and_then(|c| c.get(1)) {
        cleaned = inner.as_str().trim().to_string();
    }

    if !cleaned.starts_with('{') {
        if let Some(span) = first_json_object(&cleaned) {
            cleaned = span.trim().to_string();
        }
    }
    cleaned
}

/// First balanced `{...}` span, ignoring braces inside JSON strings.
fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

impl VendorProtocol for Gemini {
    fn vendor(&self) -> Vendor {
        Vendor::Gemini
    }

    fn api(&self) -> ApiStyle {
        ApiStyle::GenerateContent
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self, delivery: Delivery) -> String {
        match delivery {
            Delivery::Buffered => format!("{}/models/{}:generateContent", self.base_url, self.model),
            Delivery::Streaming => format!(
                "{}/models/{}:streamGenerateContent?alt=sse",
                self.base_url, self.model
            ),
        }
    }

    fn headers(&self) -> Headers {
        vec![("x-goog-api-key".into(), self.api_key.clone())]
    }

    fn request_body(&self, request: &ProviderRequest, delivery: Delivery) -> Value {
        let mut parts = vec![json!({ "text": request.full_prompt() })];
        parts.extend(request.images.iter().map(|image| {
            json!({
                "inline_data": {
                    "mime_type": image.mime_type,
                    "data": image.to_base64()
                }
            })
        }));

        let include_thoughts = delivery == Delivery::Streaming && self.show_reasoning;
        let mut body = json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "thinkingConfig": {
                    "thinkingLevel": self.thinking_level,
                    "includeThoughts": include_thoughts
                }
            }
        });
        if self.google_search {
            body["tools"] = json!([{ "google_search": {} }]);
        }
        body
    }

    fn probe_body(&self, _delivery: Delivery) -> Value {
        json!({ "contents": [{ "role": "user", "parts": [{ "text": "Test" }] }] })
    }

    fn parse_reply(&self, body: &Value) -> Result<BufferedReply, AiError> {
        if let Some(reason) = body
            .pointer("/promptFeedback/blockReason")
            .and_then(Value::as_str)
        {
            return Err(AiError::InvalidResponse(format!("prompt blocked: {reason}")));
        }
        if body.get("candidates").and_then(Value::as_array).is_none() {
            return Err(AiError::InvalidResponse("response has no candidates".into()));
        }

        let (_, answer) = candidate_text(body);
        let mut answer = answer.trim().to_string();
        if answer.is_empty() {
            return Err(AiError::MissingContent);
        }
        if !answer.starts_with('{') {
            answer = clean_json_response(&answer);
            log::debug!("Applied fallback JSON cleaning");
        }

        Ok(BufferedReply {
            answer,
            tokens_used: total_tokens(body),
        })
    }

    fn parse_event(&self, event: &Value) -> Vec<StreamEvent> {
        if let Some(message) = event.pointer("/error/message").and_then(Value::as_str) {
            return vec![StreamEvent::Fragment(FragmentKind::Error, message.to_string())];
        }

        let mut events = Vec::new();

        let queries: Vec<&str> = event
            .pointer("/candidates/0/groundingMetadata/webSearchQueries")
            .and_then(Value::as_array)
            .map(|qs| qs.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        if !queries.is_empty() {
            events.push(StreamEvent::Fragment(
                FragmentKind::Searching,
                format!("web search: {}", queries.join(", ")),
            ));
        }

        let parts = event
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array);
        for part in parts.into_iter().flatten() {
            let Some(text) = part.get("text").and_then(Value::as_str) else {
                continue;
            };
            let kind = if part.get("thought").and_then(Value::as_bool).unwrap_or(false) {
                FragmentKind::Reasoning
            } else {
                FragmentKind::Answer
            };
            events.push(StreamEvent::Fragment(kind, text.to_string()));
        }

        if let Some(total) = total_tokens(event) {
            events.push(StreamEvent::Usage(total));
        }

        if let Some(reason) = event
            .pointer("/candidates/0/finishReason")
            .and_then(Value::as_str)
        {
            if BLOCKING_FINISH_REASONS.contains(&reason) {
                events.push(StreamEvent::Fragment(
                    FragmentKind::Error,
                    format!("response blocked: {reason}"),
                ));
            }
        }
        events
    }
}
