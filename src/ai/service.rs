// service.rs - Picks one adapter per call and owns the failure boundary.
//
// Adapters are looked up in a dispatch table keyed by (vendor, API style,
// delivery). Every error an adapter raises is turned into a failed
// AnalysisResult here; nothing escapes `analyze_*`.

use std::collections::HashMap;
use std::sync::Arc;

use image::DynamicImage;

use super::adapter::{BufferedAdapter, StreamingAdapter, VendorProtocol};
use super::gemini::Gemini;
use super::openai_chat::OpenAiChat;
use super::openai_responses::OpenAiResponses;
use super::prompt::batch_instruction;
use super::sink::FragmentSink;
use super::transport::HttpTransport;
use super::{
    AiError, AnalysisAdapter, AnalysisResult, ApiStyle, Delivery, FragmentKind, ProviderRequest,
    Route, StreamFragment, Vendor,
};
use crate::codec::ImageCodec;
use crate::retry::{retry_transient, RetryPolicy};
use crate::settings::Settings;

pub struct AnalysisService {
    routes: HashMap<Route, Arc<dyn AnalysisAdapter>>,
    vendor: Vendor,
    api: ApiStyle,
    model: String,
    streaming: bool,
    codec: ImageCodec,
    prompt: String,
    retry: RetryPolicy,
}

impl AnalysisService {
    /// Service with an empty dispatch table. Routes are added with
    /// [`AnalysisService::with_adapter`].
    pub fn new(settings: &Settings) -> Self {
        let vendor = settings.ai.provider;
        let api = match vendor {
            Vendor::OpenAi => ApiStyle::for_openai_model(&settings.openai.model),
            Vendor::Gemini => ApiStyle::GenerateContent,
        };
        Self {
            routes: HashMap::new(),
            vendor,
            api,
            model: settings.active_model().to_string(),
            streaming: settings.streaming.enabled,
            codec: ImageCodec::from_settings(&settings.image),
            prompt: settings.prompt().to_string(),
            retry: RetryPolicy::from_settings(&settings.retry),
        }
    }

    /// Register every route for each vendor that has a credential configured.
    pub fn from_settings(settings: &Settings, transport: Arc<dyn HttpTransport>) -> Self {
        let show_reasoning = settings.streaming.show_reasoning;
        let mut protocols: Vec<Arc<dyn VendorProtocol>> = Vec::new();
        if !settings.openai.api_key.trim().is_empty() {
            protocols.push(Arc::new(OpenAiChat::new(&settings.openai)));
            protocols.push(Arc::new(OpenAiResponses::new(&settings.openai)));
        }
        if !settings.gemini.api_key.trim().is_empty() {
            protocols.push(Arc::new(Gemini::new(&settings.gemini, show_reasoning)));
        }

        let mut service = Self::new(settings);
        for protocol in protocols {
            let buffered = BufferedAdapter::new(Arc::clone(&protocol), Arc::clone(&transport));
            let streaming =
                StreamingAdapter::new(Arc::clone(&protocol), Arc::clone(&transport), show_reasoning);
            let (vendor, api) = (protocol.vendor(), protocol.api());
            service = service
                .with_adapter(
                    Route { vendor, api, delivery: Delivery::Buffered },
                    Arc::new(buffered),
                )
                .with_adapter(
                    Route { vendor, api, delivery: Delivery::Streaming },
                    Arc::new(streaming),
                );
        }
        log::info!(
            "Analysis service ready: {} routes, active model {}",
            service.routes.len(),
            service.model
        );
        service
    }

    pub fn with_adapter(mut self, route: Route, adapter: Arc<dyn AnalysisAdapter>) -> Self {
        self.routes.insert(route, adapter);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// The route a call takes. Streaming needs both the flag and a listener.
    pub fn route(&self, has_sink: bool) -> Route {
        let delivery = if self.streaming && has_sink {
            Delivery::Streaming
        } else {
            Delivery::Buffered
        };
        Route {
            vendor: self.vendor,
            api: self.api,
            delivery,
        }
    }

    fn adapter(&self, route: Route) -> Result<&Arc<dyn AnalysisAdapter>, AiError> {
        self.routes
            .get(&route)
            .ok_or_else(|| AiError::NoRoute(format!("{:?}", route)))
    }

    pub async fn analyze_single(
        &self,
        image: &DynamicImage,
        sink: Option<&dyn FragmentSink>,
    ) -> AnalysisResult {
        self.analyze_multi(std::slice::from_ref(image), sink).await
    }

    /// Analyze frames that together show one question.
    pub async fn analyze_multi(
        &self,
        images: &[DynamicImage],
        sink: Option<&dyn FragmentSink>,
    ) -> AnalysisResult {
        if images.is_empty() {
            return AnalysisResult::failure(&self.model, "no images to analyze", None);
        }

        let route = self.route(sink.is_some());
        log::info!("Analyzing {} image(s) via {:?}", images.len(), route);

        match self.run(route, images, sink).await {
            Ok(result) => result,
            Err(e) => {
                log::error!("Analysis failed: {}", e);
                let message = e.to_string();
                if route.delivery == Delivery::Streaming && !e.already_reported() {
                    if let Some(sink) = sink {
                        sink.send_streaming_chunk(&StreamFragment::new(
                            FragmentKind::Error,
                            message.clone(),
                        ))
                        .await;
                    }
                }
                AnalysisResult::failure(&self.model, message, None)
            }
        }
    }

    async fn run(
        &self,
        route: Route,
        images: &[DynamicImage],
        sink: Option<&dyn FragmentSink>,
    ) -> Result<AnalysisResult, AiError> {
        let adapter = self.adapter(route)?;
        let request = self.build_request(images)?;
        adapter.analyze(&request, sink).await
    }

    fn build_request(&self, images: &[DynamicImage]) -> Result<ProviderRequest, AiError> {
        let encoded = images
            .iter()
            .map(|image| self.codec.encode(image))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AiError::Encoding(e.to_string()))?;
        let instruction = (encoded.len() > 1).then(|| batch_instruction(encoded.len()));
        Ok(ProviderRequest {
            images: encoded,
            prompt: self.prompt.clone(),
            instruction,
        })
    }

    /// Probe the route analysis would use, retrying transient failures.
    /// Never raises; failures are logged and reported as `false`.
    pub async fn test_connection(&self) -> bool {
        let route = self.route(true);
        let adapter = match self.adapter(route) {
            Ok(adapter) => adapter,
            Err(e) => {
                log::error!("Connection test failed: {}", e);
                return false;
            }
        };

        let adapter: &dyn AnalysisAdapter = adapter.as_ref();
        log::info!("Testing connection to {}", adapter.name());
        match retry_transient(&self.retry, "connection test", move || adapter.test_connection()).await {
            Ok(()) => {
                log::info!("Connection to {} OK", adapter.name());
                true
            }
            Err(e) => {
                log::error!("Connection test failed: {}", e);
                false
            }
        }
    }
}
