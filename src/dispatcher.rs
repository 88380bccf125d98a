// dispatcher.rs - Turns command lines on stdin into pipeline actions.
//
// One trigger is handled to completion before the next line is read.
// Capture failures fail only the trigger that caused them.

use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::capture::{CaptureError, CapturedFrame, ScreenCapture};
use crate::settings::TriggerSettings;
use crate::stream_manager::StreamManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerAction {
    /// Capture and analyze immediately.
    Analyze,
    /// Capture into the batch queue.
    Enqueue,
    /// Analyze the queued frames together.
    Send,
    Clear,
    Quit,
}

/// Where frames come from. The screen in production.
pub trait FrameSource: Send + Sync {
    /// Blocking; the dispatcher runs it off the async runtime threads.
    fn grab(&self) -> Result<CapturedFrame, CaptureError>;
}

impl FrameSource for ScreenCapture {
    fn grab(&self) -> Result<CapturedFrame, CaptureError> {
        self.capture()
    }
}

/// Command word → action lookup built from the trigger settings.
#[derive(Debug, Clone)]
pub struct TriggerMap {
    words: Vec<(String, TriggerAction)>,
}

impl TriggerMap {
    pub fn from_settings(settings: &TriggerSettings) -> Self {
        let words = [
            (&settings.analyze, TriggerAction::Analyze),
            (&settings.enqueue, TriggerAction::Enqueue),
            (&settings.send, TriggerAction::Send),
            (&settings.clear, TriggerAction::Clear),
            (&settings.quit, TriggerAction::Quit),
        ]
        .into_iter()
        .map(|(word, action)| (word.trim().to_lowercase(), action))
        .collect();
        Self { words }
    }

    /// First action whose word matches the trimmed, case-folded line.
    pub fn parse(&self, line: &str) -> Option<TriggerAction> {
        let line = line.trim().to_lowercase();
        self.words
            .iter()
            .find(|(word, _)| *word == line)
            .map(|(_, action)| *action)
    }

    pub fn help(&self) -> String {
        self.words
            .iter()
            .map(|(word, action)| {
                let key = if word.is_empty() { "<Enter>" } else { word.as_str() };
                format!("  {:<8} {:?}", key, action)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

enum Input {
    Line(Option<String>),
    Global(Option<TriggerAction>),
    Interrupted,
}

/// Never resolves without a listener.
async fn next_global(global: &mut Option<UnboundedReceiver<TriggerAction>>) -> Option<TriggerAction> {
    match global {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

pub struct Dispatcher {
    manager: Arc<StreamManager>,
    source: Arc<dyn FrameSource>,
    triggers: TriggerMap,
}

impl Dispatcher {
    pub fn new(manager: Arc<StreamManager>, source: Arc<dyn FrameSource>, triggers: TriggerMap) -> Self {
        Self {
            manager,
            source,
            triggers,
        }
    }

    /// Read commands until quit, end of input, or Ctrl-C. Actions from the
    /// global listener, when one is running, are handled between lines.
    pub async fn run<R>(
        &self,
        input: R,
        mut global: Option<UnboundedReceiver<TriggerAction>>,
    ) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        println!("Ready. Commands:\n{}", self.triggers.help());
        let mut lines = input.lines();
        loop {
            let next = tokio::select! {
                line = lines.next_line() => Input::Line(line?),
                action = next_global(&mut global) => Input::Global(action),
                _ = tokio::signal::ctrl_c() => Input::Interrupted,
            };
            match next {
                Input::Line(None) => {
                    log::info!("Input closed, shutting down");
                    break;
                }
                Input::Line(Some(line)) => match self.triggers.parse(&line) {
                    Some(TriggerAction::Quit) => break,
                    Some(action) => self.dispatch(action).await,
                    None => log::warn!("Unknown command: {:?}", line.trim()),
                },
                Input::Global(Some(TriggerAction::Quit)) => break,
                Input::Global(Some(action)) => self.dispatch(action).await,
                Input::Global(None) => {
                    log::warn!("Global trigger listener stopped");
                    global = None;
                }
                Input::Interrupted => {
                    log::info!("Interrupted, shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    pub async fn dispatch(&self, action: TriggerAction) {
        log::info!("Trigger activated: {:?}", action);
        match action {
            TriggerAction::Analyze => {
                if let Some(frame) = self.grab().await {
                    self.manager.handle_screenshot(frame).await;
                }
            }
            TriggerAction::Enqueue => {
                if let Some(frame) = self.grab().await {
                    self.manager.enqueue(frame);
                }
            }
            TriggerAction::Send => {
                self.manager.send_queue().await;
            }
            TriggerAction::Clear => {
                self.manager.clear_queue();
            }
            TriggerAction::Quit => {}
        }
    }

    async fn grab(&self) -> Option<CapturedFrame> {
        let source = Arc::clone(&self.source);
        match tokio::task::spawn_blocking(move || source.grab()).await {
            Ok(Ok(frame)) => Some(frame),
            Ok(Err(e)) => {
                log::error!("Failed to capture screenshot: {}", e);
                None
            }
            Err(e) => {
                log::error!("Capture task failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::AnalysisService;
    use crate::output::{ConsoleOutput, OutputHandler};
    use crate::settings::Settings;
    use image::{DynamicImage, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeSource {
        grabs: AtomicUsize,
        fail: bool,
    }

    impl FrameSource for FakeSource {
        fn grab(&self) -> Result<CapturedFrame, CaptureError> {
            self.grabs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CaptureError::NoMonitor);
            }
            Ok(CapturedFrame::new(DynamicImage::ImageRgb8(RgbImage::new(2, 2)), None))
        }
    }

    fn dispatcher(fail: bool) -> (Dispatcher, Arc<StreamManager>, Arc<FakeSource>) {
        let settings = Settings::default();
        let manager = Arc::new(StreamManager::new(
            AnalysisService::new(&settings),
            OutputHandler::new(Box::new(ConsoleOutput::new(false)), None),
        ));
        let source = Arc::new(FakeSource {
            grabs: AtomicUsize::new(0),
            fail,
        });
        let d = Dispatcher::new(
            Arc::clone(&manager),
            source.clone(),
            TriggerMap::from_settings(&settings.trigger),
        );
        (d, manager, source)
    }

    #[test]
    fn parses_default_words() {
        let map = TriggerMap::from_settings(&TriggerSettings::default());
        assert_eq!(map.parse(""), Some(TriggerAction::Analyze));
        assert_eq!(map.parse("  \n"), Some(TriggerAction::Analyze));
        assert_eq!(map.parse("Q"), Some(TriggerAction::Enqueue));
        assert_eq!(map.parse("s"), Some(TriggerAction::Send));
        assert_eq!(map.parse("c"), Some(TriggerAction::Clear));
        assert_eq!(map.parse("x"), Some(TriggerAction::Quit));
        assert_eq!(map.parse("hello"), None);
    }

    #[test]
    fn custom_words_are_honored() {
        let settings = TriggerSettings {
            analyze: "go".into(),
            ..TriggerSettings::default()
        };
        let map = TriggerMap::from_settings(&settings);
        assert_eq!(map.parse("go"), Some(TriggerAction::Analyze));
        assert_eq!(map.parse(""), None);
        assert!(map.help().contains("go"));
    }

    #[tokio::test]
    async fn enqueue_then_clear_via_commands() {
        let (d, manager, source) = dispatcher(false);
        let input: &[u8] = b"q\nq\nc\nq\nx\nq\n";
        d.run(input, None).await.unwrap();
        // Stops at "x": the last enqueue is never read.
        assert_eq!(source.grabs.load(Ordering::SeqCst), 3);
        assert_eq!(manager.queue_len(), 1);
    }

    #[tokio::test]
    async fn capture_failure_only_fails_that_trigger() {
        let (d, manager, source) = dispatcher(true);
        d.dispatch(TriggerAction::Enqueue).await;
        d.dispatch(TriggerAction::Analyze).await;
        assert_eq!(source.grabs.load(Ordering::SeqCst), 2);
        assert_eq!(manager.queue_len(), 0);
    }

    #[tokio::test]
    async fn global_actions_reach_the_manager() {
        use tokio::io::AsyncWriteExt;

        let (d, manager, source) = dispatcher(false);
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tx.send(TriggerAction::Enqueue).unwrap();
        tx.send(TriggerAction::Enqueue).unwrap();

        let (mut writer, reader) = tokio::io::duplex(64);
        let watcher = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                while manager.queue_len() < 2 {
                    tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                }
                writer.write_all(b"x\n").await.unwrap();
            })
        };

        d.run(tokio::io::BufReader::new(reader), Some(rx)).await.unwrap();
        watcher.await.unwrap();

        assert_eq!(source.grabs.load(Ordering::SeqCst), 2);
        assert_eq!(manager.queue_len(), 2);
        drop(tx);
    }

    #[tokio::test]
    async fn closed_listener_falls_back_to_stdin() {
        let (d, manager, _source) = dispatcher(false);
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<TriggerAction>();
        drop(tx);
        let input: &[u8] = b"q\nx\n";
        d.run(input, Some(rx)).await.unwrap();
        assert_eq!(manager.queue_len(), 1);
    }
}
