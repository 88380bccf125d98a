use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use super::AiError;

/// Header name/value pairs attached to a vendor request.
pub type Headers = Vec<(String, String)>;

/// The HTTP seam every adapter talks through. Production uses
/// [`ReqwestTransport`]; tests swap in canned fakes.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// POST a JSON body and parse the whole JSON response.
    async fn post_json(&self, url: &str, headers: &Headers, body: &Value) -> Result<Value, AiError>;

    /// POST a JSON body and iterate the server-sent events of the response.
    async fn post_event_stream(
        &self,
        url: &str,
        headers: &Headers,
        body: &Value,
    ) -> Result<Box<dyn EventStream>, AiError>;
}

/// Pull-based iterator over the JSON payloads of a streamed response.
#[async_trait]
pub trait EventStream: Send {
    /// Get the next event. Returns None when the stream is complete.
    async fn next_event(&mut self) -> Option<Result<Value, AiError>>;
}

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// `timeout` bounds each request, including reading a streamed body.
    pub fn new(timeout: Duration) -> Result<Self, AiError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| AiError::ConnectionError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    async fn send(&self, url: &str, headers: &Headers, body: &Value) -> Result<reqwest::Response, AiError> {
        let mut req = self
            .client
            .post(url)
            .header("Content-Type", "application/json");
        for (name, value) in headers {
            req = req.header(name.as_str(), value.as_str());
        }

        let response = req.json(body).send().await.map_err(map_reqwest_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let error_body = response
            .text()
            .await
            .unwrap_or_else(|_| "failed to read error body".into());
        Err(status_error(status.as_u16(), error_body))
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post_json(&self, url: &str, headers: &Headers, body: &Value) -> Result<Value, AiError> {
        let response = self.send(url, headers, body).await?;
        let text = response.text().await.map_err(map_reqwest_error)?;
        serde_json::from_str(&text)
            .map_err(|e| AiError::InvalidResponse(format!("response is not JSON: {e}")))
    }

    async fn post_event_stream(
        &self,
        url: &str,
        headers: &Headers,
        body: &Value,
    ) -> Result<Box<dyn EventStream>, AiError> {
        let response = self.send(url, headers, body).await?;
        Ok(Box::new(SseEventStream::new(response)))
    }
}

/// Map a non-2xx status to the error variant callers reason about.
pub(crate) fn status_error(status: u16, body: String) -> AiError {
    match status {
        401 | 403 => AiError::AuthError(body),
        429 => AiError::RateLimited(body),
        500..=599 => AiError::ServerError { status, body },
        _ => AiError::RequestRejected { status, body },
    }
}

fn map_reqwest_error(e: reqwest::Error) -> AiError {
    if e.is_timeout() {
        AiError::Timeout(e.to_string())
    } else if e.is_decode() {
        AiError::InvalidResponse(e.to_string())
    } else {
        AiError::ConnectionError(e.to_string())
    }
}

/// What a single SSE `data:` payload means.
#[derive(Debug)]
enum SseData {
    Event(Value),
    Done,
    Error(AiError),
}

fn parse_sse_data(data: &str) -> SseData {
    let trimmed = data.trim();
    if trimmed == "[DONE]" {
        return SseData::Done;
    }
    match serde_json::from_str(trimmed) {
        Ok(v) => SseData::Event(v),
        Err(e) => SseData::Error(AiError::InvalidResponse(format!(
            "Invalid JSON in SSE: {}",
            e
        ))),
    }
}

/// Extract the payload of a `data:` line; other SSE fields are ignored.
fn data_field(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("data:")?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

/// Streaming SSE reader over a reqwest response body.
///
/// Bytes are buffered raw and split on `\n` before decoding, so multi-byte
/// characters cut across network chunks survive intact.
pub struct SseEventStream {
    buffer: Vec<u8>,
    done: bool,
    response: Option<reqwest::Response>,
}

impl SseEventStream {
    fn new(response: reqwest::Response) -> Self {
        Self {
            buffer: Vec::new(),
            done: false,
            response: Some(response),
        }
    }

    /// Pop the next complete line out of the buffer.
    fn take_line(&mut self) -> Option<String> {
        let pos = self.buffer.iter().position(|b| *b == b'\n')?;
        let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
        Some(line.trim_end_matches('\r').to_string())
    }

    fn handle_line(&mut self, line: &str) -> Option<Result<Value, AiError>> {
        let data = data_field(line)?;
        match parse_sse_data(data) {
            SseData::Event(v) => Some(Ok(v)),
            SseData::Done => {
                self.done = true;
                self.response = None;
                None
            }
            SseData::Error(e) => Some(Err(e)),
        }
    }
}

#[async_trait]
impl EventStream for SseEventStream {
    async fn next_event(&mut self) -> Option<Result<Value, AiError>> {
        loop {
            if self.done {
                return None;
            }

            if let Some(line) = self.take_line() {
                if line.is_empty() {
                    continue;
                }
                if let Some(item) = self.handle_line(&line) {
                    return Some(item);
                }
                continue;
            }

            let response = match self.response.as_mut() {
                Some(r) => r,
                None => {
                    self.done = true;
                    return None;
                }
            };

            match response.chunk().await {
                Ok(Some(bytes)) => self.buffer.extend_from_slice(&bytes),
                Ok(None) => {
                    // Body ended; a final line may lack its newline.
                    self.response = None;
                    let rest = String::from_utf8_lossy(&std::mem::take(&mut self.buffer))
                        .trim()
                        .to_string();
                    self.done = true;
                    if rest.is_empty() {
                        return None;
                    }
                    return self.handle_line(&rest);
                }
                Err(e) => {
                    self.done = true;
                    self.response = None;
                    return Some(Err(map_reqwest_error(e)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sse_data_done() {
        assert!(matches!(parse_sse_data("[DONE]"), SseData::Done));
        assert!(matches!(parse_sse_data(" [DONE] "), SseData::Done));
    }

    #[test]
    fn parse_sse_data_event() {
        match parse_sse_data(r#"{"type":"response.output_text.delta","delta":"Hi"}"#) {
            SseData::Event(v) => assert_eq!(v["delta"], "Hi"),
            other => panic!("expected Event, got {:?}", other),
        }
    }

    #[test]
    fn parse_sse_data_invalid_json() {
        assert!(matches!(parse_sse_data("not valid json{{{"), SseData::Error(_)));
    }

    #[test]
    fn data_field_accepts_both_spacings() {
        assert_eq!(data_field("data: {}"), Some("{}"));
        assert_eq!(data_field("data:{}"), Some("{}"));
        assert_eq!(data_field("event: response.created"), None);
        assert_eq!(data_field(": keep-alive"), None);
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(status_error(401, "x".into()), AiError::AuthError(_)));
        assert!(matches!(status_error(403, "x".into()), AiError::AuthError(_)));
        assert!(matches!(status_error(429, "x".into()), AiError::RateLimited(_)));
        assert!(matches!(
            status_error(503, "x".into()),
            AiError::ServerError { status: 503, .. }
        ));
        assert!(matches!(
            status_error(400, "x".into()),
            AiError::RequestRejected { status: 400, .. }
        ));
    }
}
