use async_trait::async_trait;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use super::{OutputError, ResultSink};
use crate::ai::{AnalysisResult, FragmentKind, FragmentSink, StreamFragment};

const SEPARATOR_WIDTH: usize = 70;

/// Prints results to stdout. Used in development.
pub struct ConsoleOutput {
    streaming: bool,
    last_kind: Mutex<Option<FragmentKind>>,
}

impl ConsoleOutput {
    pub fn new(streaming: bool) -> Self {
        Self {
            streaming,
            last_kind: Mutex::new(None),
        }
    }
}

/// The framed block printed for a finished analysis.
pub fn render_result(result: &AnalysisResult, screenshot_path: Option<&Path>) -> String {
    let separator = "=".repeat(SEPARATOR_WIDTH);
    let mut out = format!(
        "\n{separator}\n[{}] EXAM ANSWER\n{separator}\n",
        result.timestamp.to_rfc3339()
    );

    match (&result.answer, result.success) {
        (Some(answer), true) => {
            out.push_str(&format!("\n{answer}\n\n"));
            out.push_str(&format!("Model: {}\n", result.model));
            if let Some(elapsed) = result.elapsed_seconds {
                out.push_str(&format!("Time: {elapsed:.2}s\n"));
            }
            if let Some(tokens) = result.tokens_used {
                out.push_str(&format!("Tokens: {tokens}\n"));
            }
            if let Some(path) = screenshot_path {
                out.push_str(&format!("Screenshot: {}\n", path.display()));
            }
        }
        _ => {
            let error = result.error.as_deref().unwrap_or("Unknown error");
            out.push_str(&format!("\nERROR: {error}\n\n"));
        }
    }
    out.push_str(&separator);
    out.push('\n');
    out
}

#[async_trait]
impl ResultSink for ConsoleOutput {
    async fn send_processing(&self) -> Result<(), OutputError> {
        println!("\nProcessing screenshot with AI...");
        if let Ok(mut last) = self.last_kind.lock() {
            *last = None;
        }
        Ok(())
    }

    async fn send(
        &self,
        result: &AnalysisResult,
        screenshot_path: Option<&Path>,
    ) -> Result<(), OutputError> {
        println!("{}", render_result(result, screenshot_path));
        Ok(())
    }

    fn fragment_sink(&self) -> Option<&dyn FragmentSink> {
        if self.streaming {
            Some(self)
        } else {
            None
        }
    }

    fn name(&self) -> &'static str {
        "console"
    }
}

/// Print one fragment, with a section header when the kind changes.
fn write_fragment<W: Write>(
    out: &mut W,
    previous: Option<FragmentKind>,
    fragment: &StreamFragment,
) -> std::io::Result<()> {
    let written = match fragment.kind {
        FragmentKind::Searching => writeln!(out, "\n[{}]", fragment.content),
        FragmentKind::Error => writeln!(out, "\nERROR: {}", fragment.content),
        kind if previous != Some(kind) => write!(out, "\n--- {} ---\n", kind.as_str())
            .and_then(|_| write!(out, "{}", fragment.content)),
        _ => write!(out, "{}", fragment.content),
    };
    written.and_then(|_| out.flush())
}

#[async_trait]
impl FragmentSink for ConsoleOutput {
    async fn send_streaming_chunk(&self, fragment: &StreamFragment) {
        let previous = self
            .last_kind
            .lock()
            .map(|mut last| last.replace(fragment.kind))
            .unwrap_or(None);

        let mut stdout = std::io::stdout().lock();
        let result = write_fragment(&mut stdout, previous, fragment);
        if let Err(e) = result {
            log::warn!("Failed to print streaming chunk: {}", e);
        }
    }
}
