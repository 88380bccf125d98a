// output/mod.rs - Where finished analyses go.
//
// One strategy is picked at startup from the output mode and streaming flag.
// Delivery failures are logged here and never reach the pipeline.

use async_trait::async_trait;
use std::path::Path;

use crate::ai::{AnalysisResult, FragmentSink};
use crate::settings::{OutputMode, Settings};

pub mod console;
pub mod history;
pub mod webhook;

pub use console::ConsoleOutput;
pub use history::HistoryLog;
pub use webhook::{StreamingWebhookOutput, WebhookOutput};

#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("webhook returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("history write failed for {path}: {source}")]
    History {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("output misconfigured: {0}")]
    Config(String),
}

/// Receives the lifecycle of one analysis: a processing notice, then the result.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn send_processing(&self) -> Result<(), OutputError>;

    async fn send(
        &self,
        result: &AnalysisResult,
        screenshot_path: Option<&Path>,
    ) -> Result<(), OutputError>;

    /// Listener for streamed fragments, if this output can show them.
    fn fragment_sink(&self) -> Option<&dyn FragmentSink> {
        None
    }

    fn name(&self) -> &'static str;
}

pub struct OutputHandler {
    strategy: Box<dyn ResultSink>,
    history: Option<HistoryLog>,
}

impl OutputHandler {
    pub fn new(strategy: Box<dyn ResultSink>, history: Option<HistoryLog>) -> Self {
        Self { strategy, history }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, OutputError> {
        let streaming = settings.streaming.enabled;
        let strategy: Box<dyn ResultSink> = match settings.output.mode {
            OutputMode::Console => Box::new(ConsoleOutput::new(streaming)),
            OutputMode::Webhook => {
                let url = settings
                    .output
                    .webhook_url
                    .as_deref()
                    .ok_or_else(|| OutputError::Config("webhook_url is not set".into()))?;
                if streaming {
                    Box::new(StreamingWebhookOutput::new(url)?)
                } else {
                    Box::new(WebhookOutput::new(url)?)
                }
            }
        };
        let history = settings
            .logging
            .save_history
            .then(|| HistoryLog::in_dir(&settings.logging.directory));

        log::info!(
            "OutputHandler initialized with mode: {:?}, streaming_enabled: {}, strategy: {}",
            settings.output.mode,
            streaming,
            strategy.name()
        );
        Ok(Self::new(strategy, history))
    }

    pub async fn send_processing(&self) {
        if let Err(e) = self.strategy.send_processing().await {
            log::error!("Error sending processing status: {}", e);
        }
    }

    pub fn fragment_sink(&self) -> Option<&dyn FragmentSink> {
        self.strategy.fragment_sink()
    }

    /// Deliver the result, then append it to the history file if enabled.
    pub async fn handle_result(&self, result: &AnalysisResult, screenshot_path: Option<&Path>) {
        if let Err(e) = self.strategy.send(result, screenshot_path).await {
            log::error!("Error handling result: {}", e);
        }
        if let Some(history) = &self.history {
            if let Err(e) = history.append(result, screenshot_path) {
                log::error!("Failed to save to history: {}", e);
            }
        }
    }
}
