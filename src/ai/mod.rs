use async_trait::async_trait;

pub mod adapter;
pub mod aggregator;
pub mod gemini;
pub mod openai_chat;
pub mod openai_responses;
pub mod prompt;
pub mod service;
pub mod sink;
pub mod transport;
pub mod types;
pub use service::AnalysisService;
pub use sink::FragmentSink;
pub use types::*;

/// One (vendor, API style, delivery) combination that can analyze a batch of
/// encoded images. Each adapter owns its protocol and transport handles.
#[async_trait]
pub trait AnalysisAdapter: Send + Sync {
    /// Send the request and return the final result. Streaming adapters
    /// forward fragments to `sink` while the response arrives.
    async fn analyze(
        &self,
        request: &ProviderRequest,
        sink: Option<&dyn FragmentSink>,
    ) -> Result<AnalysisResult, AiError>;

    /// Cheapest request that proves credentials and endpoint work.
    async fn test_connection(&self) -> Result<(), AiError>;

    fn model(&self) -> &str;

    /// Provider name for logging/display
    fn name(&self) -> String;
}
