use serde_json::{json, Value};

use super::adapter::{BufferedReply, VendorProtocol};
use super::aggregator::StreamEvent;
use super::transport::Headers;
use super::{AiError, ApiStyle, Delivery, FragmentKind, ProviderRequest, Vendor};
use crate::settings::OpenAiSettings;

/// OpenAI Chat Completions API, used for models before the gpt-5 family.
pub struct OpenAiChat {
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiChat {
    pub fn new(settings: &OpenAiSettings) -> Self {
        Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        }
    }
}

fn with_stream_flags(mut body: Value, delivery: Delivery) -> Value {
    if delivery == Delivery::Streaming {
        body["stream"] = json!(true);
        body["stream_options"] = json!({ "include_usage": true });
    }
    body
}

impl VendorProtocol for OpenAiChat {
    fn vendor(&self) -> Vendor {
        Vendor::OpenAi
    }

    fn api(&self) -> ApiStyle {
        ApiStyle::ChatCompletions
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self, _delivery: Delivery) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn headers(&self) -> Headers {
        vec![("Authorization".into(), format!("Bearer {}", self.api_key))]
    }

    fn request_body(&self, request: &ProviderRequest, delivery: Delivery) -> Value {
        let mut content = vec![json!({ "type": "text", "text": request.full_prompt() })];
        content.extend(request.images.iter().map(|image| {
            json!({
                "type": "image_url",
                "image_url": { "url": image.data_url(), "detail": "high" }
            })
        }));

        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": content }],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature
        });
        with_stream_flags(body, delivery)
    }

    fn probe_body(&self, delivery: Delivery) -> Value {
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": "Test" }],
            "max_tokens": 5
        });
        with_stream_flags(body, delivery)
    }

    fn parse_reply(&self, body: &Value) -> Result<BufferedReply, AiError> {
        let message = body
            .pointer("/choices/0/message")
            .ok_or_else(|| AiError::InvalidResponse("response has no choices".into()))?;

        if let Some(refusal) = message.get("refusal").and_then(Value::as_str) {
            log::warn!("Model refused: {}", refusal);
            return Err(AiError::MissingContent);
        }

        let answer = message
            .get("content")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .ok_or(AiError::MissingContent)?;

        Ok(BufferedReply {
            answer: answer.to_string(),
            tokens_used: body.pointer("/usage/total_tokens").and_then(Value::as_u64),
        })
    }

    fn parse_event(&self, event: &Value) -> Vec<StreamEvent> {
        if let Some(message) = event.pointer("/error/message").and_then(Value::as_str) {
            return vec![StreamEvent::Fragment(FragmentKind::Error, message.to_string())];
        }

        let mut events = Vec::new();
        if let Some(text) = event
            .pointer("/choices/0/delta/content")
            .and_then(Value::as_str)
        {
            events.push(StreamEvent::Fragment(FragmentKind::Answer, text.to_string()));
        }
        // With include_usage the last chunk has empty choices and the totals.
        if let Some(total) = event.pointer("/usage/total_tokens").and_then(Value::as_u64) {
            events.push(StreamEvent::Usage(total));
        }
        events
    }
}
