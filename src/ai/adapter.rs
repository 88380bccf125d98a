use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

use super::aggregator::{StreamAggregator, StreamEvent};
use super::sink::{DiscardSink, FragmentSink};
use super::transport::{Headers, HttpTransport};
use super::{
    AiError, AnalysisAdapter, AnalysisResult, ApiStyle, Delivery, FragmentKind, ProviderRequest,
    Vendor,
};

/// Answer text pulled out of a buffered vendor response.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedReply {
    pub answer: String,
    pub tokens_used: Option<u64>,
}

/// Everything that differs between vendor APIs: URLs, auth, body shapes and
/// how responses and stream events are read. Pure; no I/O.
pub trait VendorProtocol: Send + Sync {
    fn vendor(&self) -> Vendor;
    fn api(&self) -> ApiStyle;
    fn model(&self) -> &str;
    fn endpoint(&self, delivery: Delivery) -> String;
    fn headers(&self) -> Headers;
    fn request_body(&self, request: &ProviderRequest, delivery: Delivery) -> Value;
    /// Cheapest request of the same shape, used by connection tests.
    fn probe_body(&self, delivery: Delivery) -> Value;
    /// Extract the answer from a complete response. An answer that is missing
    /// or blank is [`AiError::MissingContent`].
    fn parse_reply(&self, body: &Value) -> Result<BufferedReply, AiError>;
    /// Classify one streamed payload. Unknown payloads yield no events.
    fn parse_event(&self, event: &Value) -> Vec<StreamEvent>;
}

fn describe(protocol: &dyn VendorProtocol, delivery: Delivery) -> String {
    format!(
        "{}/{:?}/{:?} ({})",
        protocol.vendor(),
        protocol.api(),
        delivery,
        protocol.model()
    )
}

/// One blocking request, whole response parsed at once.
pub struct BufferedAdapter {
    protocol: Arc<dyn VendorProtocol>,
    transport: Arc<dyn HttpTransport>,
}

impl BufferedAdapter {
    pub fn new(protocol: Arc<dyn VendorProtocol>, transport: Arc<dyn HttpTransport>) -> Self {
        Self { protocol, transport }
    }
}

#[async_trait]
impl AnalysisAdapter for BufferedAdapter {
    async fn analyze(
        &self,
        request: &ProviderRequest,
        _sink: Option<&dyn FragmentSink>,
    ) -> Result<AnalysisResult, AiError> {
        let started = Instant::now();
        let url = self.protocol.endpoint(Delivery::Buffered);
        let body = self.protocol.request_body(request, Delivery::Buffered);

        let response = self
            .transport
            .post_json(&url, &self.protocol.headers(), &body)
            .await?;

        let reply = match self.protocol.parse_reply(&response) {
            Ok(reply) => reply,
            Err(e) => {
                log::error!("Error extracting answer: {}", e);
                log::debug!("Response structure: {}", response);
                return Err(e);
            }
        };

        let elapsed = started.elapsed().as_secs_f64();
        log::info!(
            "Analysis complete in {:.2}s - tokens used: {:?}",
            elapsed,
            reply.tokens_used
        );
        Ok(AnalysisResult::success(
            self.protocol.model(),
            reply.answer,
            elapsed,
            reply.tokens_used,
        ))
    }

    async fn test_connection(&self) -> Result<(), AiError> {
        let url = self.protocol.endpoint(Delivery::Buffered);
        let body = self.protocol.probe_body(Delivery::Buffered);
        self.transport
            .post_json(&url, &self.protocol.headers(), &body)
            .await?;
        Ok(())
    }

    fn model(&self) -> &str {
        self.protocol.model()
    }

    fn name(&self) -> String {
        describe(self.protocol.as_ref(), Delivery::Buffered)
    }
}

/// Incremental delivery: every event is classified and pushed through a
/// [`StreamAggregator`] as it arrives.
pub struct StreamingAdapter {
    protocol: Arc<dyn VendorProtocol>,
    transport: Arc<dyn HttpTransport>,
    show_reasoning: bool,
}

impl StreamingAdapter {
    pub fn new(
        protocol: Arc<dyn VendorProtocol>,
        transport: Arc<dyn HttpTransport>,
        show_reasoning: bool,
    ) -> Self {
        Self {
            protocol,
            transport,
            show_reasoning,
        }
    }
}

#[async_trait]
impl AnalysisAdapter for StreamingAdapter {
    async fn analyze(
        &self,
        request: &ProviderRequest,
        sink: Option<&dyn FragmentSink>,
    ) -> Result<AnalysisResult, AiError> {
        let started = Instant::now();
        let sink: &dyn FragmentSink = sink.unwrap_or(&DiscardSink);
        let url = self.protocol.endpoint(Delivery::Streaming);
        let body = self.protocol.request_body(request, Delivery::Streaming);

        let mut stream = self
            .transport
            .post_event_stream(&url, &self.protocol.headers(), &body)
            .await?;

        let mut aggregator = StreamAggregator::new(sink, self.show_reasoning);
        let mut events = 0usize;
        while let Some(payload) = stream.next_event().await {
            let payload = payload?;
            events += 1;
            for event in self.protocol.parse_event(&payload) {
                aggregator.push(event).await?;
            }
            if aggregator.is_closed() {
                break;
            }
        }

        let first_content = aggregator.time_to_first_content();
        let mut result = aggregator.finish(self.protocol.model())?;
        let elapsed = started.elapsed().as_secs_f64();
        result.elapsed_seconds = Some(elapsed);
        log::info!(
            "Streaming analysis complete in {:.2}s ({} events, first content after {:?}) - tokens used: {:?}",
            elapsed,
            events,
            first_content.map(|d| d.as_secs_f64()),
            result.tokens_used
        );
        Ok(result)
    }

    async fn test_connection(&self) -> Result<(), AiError> {
        let url = self.protocol.endpoint(Delivery::Streaming);
        let body = self.protocol.probe_body(Delivery::Streaming);
        let mut stream = self
            .transport
            .post_event_stream(&url, &self.protocol.headers(), &body)
            .await?;
        while let Some(payload) = stream.next_event().await {
            for event in self.protocol.parse_event(&payload?) {
                match event {
                    StreamEvent::Fragment(FragmentKind::Error, message) => {
                        return Err(AiError::StreamError(message));
                    }
                    StreamEvent::Done => return Ok(()),
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn model(&self) -> &str {
        self.protocol.model()
    }

    fn name(&self) -> String {
        describe(self.protocol.as_ref(), Delivery::Streaming)
    }
}
