pub mod ai;
pub mod capture;
pub mod codec;
pub mod dispatcher;
pub mod hotkey;
pub mod logging;
pub mod output;
pub mod retry;
pub mod settings;
pub mod stream_manager;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ai::transport::ReqwestTransport;
use ai::AnalysisService;
use capture::{CapturedFrame, ScreenCapture};
use dispatcher::{Dispatcher, TriggerMap};
use hotkey::GlobalTrigger;
use output::OutputHandler;
use settings::Settings;
use stream_manager::StreamManager;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Ai(#[from] ai::AiError),
    #[error(transparent)]
    Output(#[from] output::OutputError),
    #[error(transparent)]
    Capture(#[from] capture::CaptureError),
    #[error(transparent)]
    Trigger(#[from] hotkey::HotkeyError),
    #[error("cannot reach the AI provider; check credentials and network")]
    ConnectionFailed,
    #[error("no image files given")]
    NoImages,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Wire the production pipeline from validated settings.
pub fn build_manager(settings: &Settings) -> Result<StreamManager, AppError> {
    let transport = Arc::new(ReqwestTransport::new(Duration::from_secs(
        settings.request.timeout_secs,
    ))?);
    let service = AnalysisService::from_settings(settings, transport);
    let output = OutputHandler::from_settings(settings)?;
    Ok(StreamManager::new(service, output))
}

/// Connection test, then the trigger loop (global hotkey plus stdin) until quit.
pub async fn run(settings: &Settings) -> Result<(), AppError> {
    let global = GlobalTrigger::from_settings(&settings.trigger)?;
    let manager = Arc::new(build_manager(settings)?);
    if !manager.test_connection().await {
        return Err(AppError::ConnectionFailed);
    }

    let source = Arc::new(ScreenCapture::from_settings(&settings.screenshot));
    let dispatcher = Dispatcher::new(
        manager,
        source,
        TriggerMap::from_settings(&settings.trigger),
    );
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    dispatcher.run(stdin, global.spawn()).await?;
    log::info!("Stopped");
    Ok(())
}

/// Analyze image files from disk as one question.
pub async fn analyze_files(settings: &Settings, files: &[PathBuf]) -> Result<bool, AppError> {
    if files.is_empty() {
        return Err(AppError::NoImages);
    }
    let manager = build_manager(settings)?;
    let frames = files
        .iter()
        .map(|path| CapturedFrame::from_file(path))
        .collect::<Result<Vec<_>, _>>()?;

    let result = if frames.len() == 1 {
        let frame = frames.into_iter().next().ok_or(AppError::NoImages)?;
        manager.handle_screenshot(frame).await
    } else {
        for frame in frames {
            manager.enqueue(frame);
        }
        manager.send_queue().await.ok_or(AppError::NoImages)?
    };
    Ok(result.success)
}

/// Connection test only.
pub async fn check(settings: &Settings) -> Result<(), AppError> {
    let manager = build_manager(settings)?;
    if manager.test_connection().await {
        Ok(())
    } else {
        Err(AppError::ConnectionFailed)
    }
}
