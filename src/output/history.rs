use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::OutputError;
use crate::ai::AnalysisResult;

pub const HISTORY_FILE: &str = "history.jsonl";

#[derive(Serialize)]
struct HistoryEntry<'a> {
    #[serde(flatten)]
    result: &'a AnalysisResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    screenshot_path: Option<&'a Path>,
}

/// Append-only JSONL record of every analysis.
#[derive(Debug, Clone)]
pub struct HistoryLog {
    path: PathBuf,
}

impl HistoryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(HISTORY_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, result: &AnalysisResult, screenshot_path: Option<&Path>) -> Result<(), OutputError> {
        let line = serde_json::to_string(&HistoryEntry {
            result,
            screenshot_path,
        })?;
        let io_err = |source| OutputError::History {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        writeln!(file, "{}", line).map_err(io_err)?;
        log::debug!("Result saved to history: {}", self.path.display());
        Ok(())
    }
}
