use serde_json::{json, Value};

use super::adapter::{BufferedReply, VendorProtocol};
use super::aggregator::StreamEvent;
use super::transport::Headers;
use super::{AiError, ApiStyle, Delivery, FragmentKind, ProviderRequest, Vendor};
use crate::settings::OpenAiSettings;

/// OpenAI Responses API (gpt-5 family).
pub struct OpenAiResponses {
    base_url: String,
    api_key: String,
    model: String,
    reasoning: Value,
    tools: Vec<Value>,
    include: Vec<String>,
    store: bool,
}

impl OpenAiResponses {
    pub fn new(settings: &OpenAiSettings) -> Self {
        let mut reasoning = json!({ "effort": settings.reasoning.effort });
        if let Some(summary) = &settings.reasoning.summary {
            reasoning["summary"] = json!(summary);
        }
        Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            reasoning,
            tools: settings.tools.clone(),
            include: settings.include.clone(),
            store: settings.store,
        }
    }

    fn body_with_content(&self, content: Vec<Value>, delivery: Delivery) -> Value {
        let mut body = json!({
            "model": self.model,
            "input": [
                {
                    "type": "message",
                    "role": "user",
                    "content": content
                }
            ],
            "text": {
                "format": { "type": "text" },
                "verbosity": "low"
            },
            "reasoning": self.reasoning,
            "store": self.store
        });

        if !self.tools.is_empty() {
            body["tools"] = json!(self.tools);
        }
        if !self.include.is_empty() {
            body["include"] = json!(self.include);
        }
        if delivery == Delivery::Streaming {
            body["stream"] = json!(true);
        }
        body
    }
}

impl VendorProtocol for OpenAiResponses {
    fn vendor(&self) -> Vendor {
        Vendor::OpenAi
    }

    fn api(&self) -> ApiStyle {
        ApiStyle::Responses
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self, _delivery: Delivery) -> String {
        format!("{}/responses", self.base_url)
    }

    fn headers(&self) -> Headers {
        vec![("Authorization".into(), format!("Bearer {}", self.api_key))]
    }

    fn request_body(&self, request: &ProviderRequest, delivery: Delivery) -> Value {
        let mut content = vec![json!({ "type": "input_text", "text": request.full_prompt() })];
        content.extend(request.images.iter().map(|image| {
            json!({ "type": "input_image", "image_url": image.data_url() })
        }));
        self.body_with_content(content, delivery)
    }

    fn probe_body(&self, delivery: Delivery) -> Value {
        self.body_with_content(vec![json!({ "type": "input_text", "text": "Test" })], delivery)
    }

    fn parse_reply(&self, body: &Value) -> Result<BufferedReply, AiError> {
        if let Some(message) = body.pointer("/error/message").and_then(Value::as_str) {
            return Err(AiError::InvalidResponse(message.to_string()));
        }
        let output = body
            .get("output")
            .and_then(Value::as_array)
            .ok_or_else(|| AiError::InvalidResponse("response has no output array".into()))?;

        // Reasoning items come first; the answer lives in the "message" item.
        let answer = output
            .iter()
            .filter(|item| item.get("type").and_then(Value::as_str) == Some("message"))
            .filter_map(|item| item.get("content").and_then(Value::as_array))
            .flat_map(|content| content.iter())
            .find_map(|part| part.get("text").and_then(Value::as_str))
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .ok_or(AiError::MissingContent)?;

        Ok(BufferedReply {
            answer: answer.to_string(),
            tokens_used: body.pointer("/usage/total_tokens").and_then(Value::as_u64),
        })
    }

    fn parse_event(&self, event: &Value) -> Vec<StreamEvent> {
        let event_type = event.get("type").and_then(Value::as_str).unwrap_or("");
        let delta = || {
            event
                .get("delta")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string()
        };

        match event_type {
            "response.output_text.delta" => {
                vec![StreamEvent::Fragment(FragmentKind::Answer, delta())]
            }
            "response.reasoning_summary_text.delta" | "response.reasoning_text.delta" => {
                vec![StreamEvent::Fragment(FragmentKind::Reasoning, delta())]
            }
            "response.web_search_call.searching" => vec![StreamEvent::Fragment(
                FragmentKind::Searching,
                "web search started".into(),
            )],
            "response.web_search_call.completed" => vec![StreamEvent::Fragment(
                FragmentKind::Searching,
                "web search completed".into(),
            )],
            "response.completed" => {
                let mut events = Vec::new();
                if let Some(total) = event
                    .pointer("/response/usage/total_tokens")
                    .and_then(Value::as_u64)
                {
                    events.push(StreamEvent::Usage(total));
                }
                events.push(StreamEvent::Done);
                events
            }
            "response.failed" => {
                let message = event
                    .pointer("/response/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("response failed");
                vec![StreamEvent::Fragment(FragmentKind::Error, message.to_string())]
            }
            "response.incomplete" => {
                let reason = event
                    .pointer("/response/incomplete_details/reason")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                vec![StreamEvent::Fragment(
                    FragmentKind::Error,
                    format!("response incomplete: {reason}"),
                )]
            }
            "error" => {
                let message = event
                    .get("message")
                    .or_else(|| event.pointer("/error/message"))
                    .and_then(Value::as_str)
                    .unwrap_or("stream error");
                vec![StreamEvent::Fragment(FragmentKind::Error, message.to_string())]
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::EncodedImage;

    fn protocol() -> OpenAiResponses {
        let mut settings = OpenAiSettings::default();
        settings.api_key = "sk-test".into();
        settings.tools = vec![json!({ "type": "web_search" })];
        OpenAiResponses::new(&settings)
    }

    fn request(images: usize) -> ProviderRequest {
        ProviderRequest {
            images: (0..images)
                .map(|_| EncodedImage {
                    bytes: vec![0xff],
                    mime_type: "image/png",
                })
                .collect(),
            prompt: "Analyze.".into(),
            instruction: None,
        }
    }

    #[test]
    fn test_request_body_structure() {
        let body = protocol().request_body(&request(1), Delivery::Buffered);

        assert_eq!(body["model"], "gpt-5.2");
        assert_eq!(body["text"]["verbosity"], "low");
        assert_eq!(body["reasoning"]["effort"], "high");
        assert_eq!(body["reasoning"]["summary"], "auto");
        assert_eq!(body["store"], json!(false));
        assert_eq!(body["tools"][0]["type"], "web_search");
        assert!(body.get("include").is_none());
        assert!(body.get("stream").is_none());

        let input = body["input"].as_array().unwrap();
        assert_eq!(input.len(), 1);
        assert_eq!(input[0]["type"], "message");
        assert_eq!(input[0]["role"], "user");

        let content = input[0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 2);
        assert_eq!(content[0]["type"], "input_text");
        assert_eq!(content[0]["text"], "Analyze.");
        assert_eq!(content[1]["type"], "input_image");
        assert_eq!(content[1]["image_url"], "data:image/png;base64,/w==");
    }

    #[test]
    fn streaming_body_sets_stream_flag() {
        let body = protocol().request_body(&request(2), Delivery::Streaming);
        assert_eq!(body["stream"], json!(true));
        assert_eq!(body["input"][0]["content"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn endpoint_and_auth() {
        let p = protocol();
        assert_eq!(p.endpoint(Delivery::Buffered), "https://api.openai.com/v1/responses");
        assert_eq!(p.headers()[0].1, "Bearer sk-test");
    }

    #[test]
    fn parse_reply_finds_message_after_reasoning() {
        let body = json!({
            "output": [
                { "type": "reasoning", "summary": [] },
                { "type": "message", "content": [{ "type": "output_text", "text": "  {\"answer\":\"B\"}\n" }] }
            ],
            "usage": { "total_tokens": 321 }
        });
        let reply = protocol().parse_reply(&body).unwrap();
        assert_eq!(reply.answer, "{\"answer\":\"B\"}");
        assert_eq!(reply.tokens_used, Some(321));
    }

    #[test]
    fn parse_reply_without_message_is_missing_content() {
        let body = json!({ "output": [{ "type": "reasoning", "summary": [] }] });
        assert!(matches!(
            protocol().parse_reply(&body),
            Err(AiError::MissingContent)
        ));
    }

    #[test]
    fn parse_reply_without_output_is_protocol_error() {
        assert!(matches!(
            protocol().parse_reply(&json!({ "id": "resp_1" })),
            Err(AiError::InvalidResponse(_))
        ));
    }

    #[test]
    fn classifies_stream_events() {
        let p = protocol();
        assert_eq!(
            p.parse_event(&json!({ "type": "response.output_text.delta", "delta": "Hi" })),
            vec![StreamEvent::Fragment(FragmentKind::Answer, "Hi".into())]
        );
        assert_eq!(
            p.parse_event(&json!({ "type": "response.reasoning_summary_text.delta", "delta": "think" })),
            vec![StreamEvent::Fragment(FragmentKind::Reasoning, "think".into())]
        );
        assert_eq!(
            p.parse_event(&json!({ "type": "response.web_search_call.searching" })),
            vec![StreamEvent::Fragment(FragmentKind::Searching, "web search started".into())]
        );
        assert_eq!(
            p.parse_event(&json!({
                "type": "response.completed",
                "response": { "usage": { "total_tokens": 9 } }
            })),
            vec![StreamEvent::Usage(9), StreamEvent::Done]
        );
        assert!(p
            .parse_event(&json!({ "type": "response.output_item.added", "item": {} }))
            .is_empty());
    }

    #[test]
    fn failed_response_is_error_fragment() {
        let events = protocol().parse_event(&json!({
            "type": "response.failed",
            "response": { "error": { "message": "server overloaded" } }
        }));
        assert_eq!(
            events,
            vec![StreamEvent::Fragment(FragmentKind::Error, "server overloaded".into())]
        );
    }
}
