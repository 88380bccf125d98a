// aggregator.rs - Classified stream events in, sink fragments + one final answer out.
//
// One aggregator lives for exactly one in-flight call. Answer text is trimmed
// at the forwarding boundary: leading whitespace before the first visible
// character is dropped and trailing whitespace is held back until more text
// follows it. Joining every forwarded answer fragment therefore reproduces the
// final (trimmed) answer byte for byte.

use std::time::{Duration, Instant};

use super::sink::FragmentSink;
use super::{AiError, AnalysisResult, FragmentKind, StreamFragment};

/// A vendor event after classification by its protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Fragment(FragmentKind, String),
    /// Total tokens reported so far; the last value wins.
    Usage(u64),
    /// The vendor signalled the end of the response.
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Closed,
}

pub struct StreamAggregator<'a> {
    sink: &'a dyn FragmentSink,
    show_reasoning: bool,
    state: State,
    answer: Vec<String>,
    pending_whitespace: String,
    tokens_used: Option<u64>,
    started: Instant,
    first_content: Option<Duration>,
}

impl<'a> StreamAggregator<'a> {
    pub fn new(sink: &'a dyn FragmentSink, show_reasoning: bool) -> Self {
        Self {
            sink,
            show_reasoning,
            state: State::Open,
            answer: Vec::new(),
            pending_whitespace: String::new(),
            tokens_used: None,
            started: Instant::now(),
            first_content: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    /// Time from construction to the first reasoning or answer text.
    pub fn time_to_first_content(&self) -> Option<Duration> {
        self.first_content
    }

    /// Feed one classified event. An error fragment is forwarded and then
    /// fails the call with [`AiError::StreamError`].
    pub async fn push(&mut self, event: StreamEvent) -> Result<(), AiError> {
        if self.is_closed() {
            log::warn!("Event after stream close ignored: {:?}", event);
            return Ok(());
        }
        match event {
            StreamEvent::Fragment(kind, text) => self.push_fragment(kind, text).await,
            StreamEvent::Usage(total) => {
                self.tokens_used = Some(total);
                Ok(())
            }
            StreamEvent::Done => {
                self.state = State::Closed;
                Ok(())
            }
        }
    }

    async fn push_fragment(&mut self, kind: FragmentKind, text: String) -> Result<(), AiError> {
        match kind {
            FragmentKind::Reasoning => {
                if text.is_empty() {
                    return Ok(());
                }
                self.mark_first_content();
                if self.show_reasoning {
                    self.forward(kind, text).await;
                }
                Ok(())
            }
            FragmentKind::Answer => {
                if text.is_empty() {
                    return Ok(());
                }
                self.mark_first_content();
                self.accept_answer(&text).await;
                Ok(())
            }
            FragmentKind::Searching => {
                let status = if text.is_empty() { "searching".to_string() } else { text };
                self.forward(kind, status).await;
                Ok(())
            }
            FragmentKind::Error => {
                let message = if text.is_empty() {
                    "vendor reported an unspecified stream error".to_string()
                } else {
                    text
                };
                self.forward(kind, message.clone()).await;
                self.state = State::Closed;
                Err(AiError::StreamError(message))
            }
        }
    }

    async fn accept_answer(&mut self, text: &str) {
        let mut combined = std::mem::take(&mut self.pending_whitespace);
        combined.push_str(text);
        if self.answer.is_empty() {
            combined = combined.trim_start().to_string();
        }
        let visible = combined.trim_end().len();
        self.pending_whitespace = combined.split_off(visible);
        if combined.is_empty() {
            return;
        }
        self.answer.push(combined.clone());
        self.forward(FragmentKind::Answer, combined).await;
    }

    async fn forward(&self, kind: FragmentKind, content: String) {
        self.sink
            .send_streaming_chunk(&StreamFragment::new(kind, content))
            .await;
    }

    fn mark_first_content(&mut self) {
        if self.first_content.is_none() {
            let ttfc = self.started.elapsed();
            log::info!("First streamed content after {:.2}s", ttfc.as_secs_f64());
            self.first_content = Some(ttfc);
        }
    }

    /// Close the stream and build the terminal result.
    pub fn finish(mut self, model: &str) -> Result<AnalysisResult, AiError> {
        self.state = State::Closed;
        let answer = self.answer.concat();
        if answer.is_empty() {
            return Err(AiError::MissingContent);
        }
        let elapsed = self.started.elapsed().as_secs_f64();
        Ok(AnalysisResult::success(model, answer, elapsed, self.tokens_used))
    }
}
