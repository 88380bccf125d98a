use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::ai::prompt::EXAM_ANALYSIS_PROMPT;
use crate::ai::Vendor;

/// Config file looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "snapsolve.toml";
/// Credentials file in the working directory.
pub const DOTENV_FILE: &str = ".env";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{env_var} is not set (required for the {vendor} provider)")]
    MissingCredential { vendor: Vendor, env_var: &'static str },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Replaces the built-in exam analysis prompt when set.
    pub system_prompt: Option<String>,
    pub ai: AiSettings,
    pub openai: OpenAiSettings,
    pub gemini: GeminiSettings,
    pub streaming: StreamingSettings,
    pub image: ImageSettings,
    pub screenshot: ScreenshotSettings,
    pub logging: LoggingSettings,
    pub output: OutputSettings,
    pub request: RequestSettings,
    pub retry: RetrySettings,
    pub trigger: TriggerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiSettings {
    pub provider: Vendor,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            provider: Vendor::OpenAi,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiSettings {
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub reasoning: ReasoningSettings,
    /// Passed through verbatim to the Responses API, e.g. `{ type = "web_search" }`.
    pub tools: Vec<serde_json::Value>,
    pub store: bool,
    pub include: Vec<String>,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            model: "gpt-5.2".into(),
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".into(),
            max_tokens: 4000,
            temperature: 0.3,
            reasoning: ReasoningSettings::default(),
            tools: Vec::new(),
            store: false,
            include: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningSettings {
    pub effort: String,
    pub summary: Option<String>,
}

impl Default for ReasoningSettings {
    fn default() -> Self {
        Self {
            effort: "high".into(),
            summary: Some("auto".into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiSettings {
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub base_url: String,
    pub thinking_level: String,
    pub google_search: bool,
}

impl Default for GeminiSettings {
    fn default() -> Self {
        Self {
            model: "gemini-3-pro-preview".into(),
            api_key: String::new(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".into(),
            thinking_level: "high".into(),
            google_search: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    pub enabled: bool,
    pub show_reasoning: bool,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            show_reasoning: true,
        }
    }
}

/// Raster formats the codec can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    #[serde(alias = "jpg")]
    Jpeg,
    Webp,
}

impl ImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Webp => "webp",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Webp => "image/webp",
        }
    }

    pub fn supports_alpha(&self) -> bool {
        matches!(self, ImageFormat::Png)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSettings {
    pub format: ImageFormat,
    /// JPEG quality (1-100). WebP output is lossless and ignores it.
    pub quality: u8,
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            format: ImageFormat::Png,
            quality: 90,
            max_width: None,
            max_height: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenshotSettings {
    pub save_screenshots: bool,
    pub directory: PathBuf,
    pub format: ImageFormat,
}

impl Default for ScreenshotSettings {
    fn default() -> Self {
        Self {
            save_screenshots: false,
            directory: PathBuf::from("screenshots"),
            format: ImageFormat::Png,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub save_to_file: bool,
    pub directory: PathBuf,
    pub save_history: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            save_to_file: false,
            directory: PathBuf::from("logs"),
            save_history: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    #[default]
    #[serde(alias = "dev")]
    Console,
    Webhook,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub mode: OutputMode,
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestSettings {
    pub timeout_secs: u64,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self { timeout_secs: 120 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

/// Command words the stdin trigger loop reacts to. An empty word means a bare Enter.
///
/// `key` and `middle_button` drive the global listener, which works while
/// another window has focus. An empty `key` disables the keyboard hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerSettings {
    pub analyze: String,
    pub enqueue: String,
    pub send: String,
    pub clear: String,
    pub quit: String,
    /// A single character (`\`) or a key name (`f12`, `space`, `pause`).
    pub key: String,
    pub middle_button: bool,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            analyze: String::new(),
            enqueue: "q".into(),
            send: "s".into(),
            clear: "c".into(),
            quit: "x".into(),
            key: "\\".into(),
            middle_button: false,
        }
    }
}

impl Settings {
    /// Load, apply environment overrides, and validate.
    ///
    /// An explicit `path` must exist. Without one, `snapsolve.toml` in the
    /// working directory is used if present, otherwise the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut settings = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    log::debug!("No {} found, using defaults", DEFAULT_CONFIG_FILE);
                    Self::default()
                }
            }
        };
        // Process environment wins over the dotenv file, as with `dotenvy::dotenv()`.
        let dotenv = read_env_file(Path::new(DOTENV_FILE));
        settings.apply_env(|key| std::env::var(key).ok().or_else(|| dotenv.get(key).cloned()));
        settings.validate()?;
        Ok(settings)
    }

    fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let content = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(content)?)
    }

    /// Overlay credentials and output routing from the environment.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty("OPENAI_API_KEY") {
            self.openai.api_key = key;
        }
        if let Some(key) = non_empty("GEMINI_API_KEY") {
            self.gemini.api_key = key;
        }
        if let Some(mode) = non_empty("APP_MODE") {
            self.output.mode = match mode.to_lowercase().as_str() {
                "dev" | "console" => OutputMode::Console,
                "webhook" => OutputMode::Webhook,
                other => {
                    log::warn!("Unknown APP_MODE '{}', defaulting to console", other);
                    OutputMode::Console
                }
            };
        }
        if let Some(url) = non_empty("WEBHOOK_URL") {
            self.output.webhook_url = Some(url);
        }
    }

    /// Startup gate. Everything here is fatal before any network activity.
    pub fn validate(&self) -> Result<(), SettingsError> {
        match self.ai.provider {
            Vendor::OpenAi if self.openai.api_key.trim().is_empty() => {
                return Err(SettingsError::MissingCredential {
                    vendor: Vendor::OpenAi,
                    env_var: "OPENAI_API_KEY",
                });
            }
            Vendor::Gemini if self.gemini.api_key.trim().is_empty() => {
                return Err(SettingsError::MissingCredential {
                    vendor: Vendor::Gemini,
                    env_var: "GEMINI_API_KEY",
                });
            }
            _ => {}
        }

        if self.active_model().trim().is_empty() {
            return Err(SettingsError::Invalid("model name is empty".into()));
        }
        if !(1..=100).contains(&self.image.quality) {
            return Err(SettingsError::Invalid(format!(
                "image.quality must be within 1..=100, got {}",
                self.image.quality
            )));
        }
        if self.image.max_width == Some(0) || self.image.max_height == Some(0) {
            return Err(SettingsError::Invalid(
                "image.max_width/max_height must be positive".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(SettingsError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.request.timeout_secs == 0 {
            return Err(SettingsError::Invalid("request.timeout_secs must be positive".into()));
        }
        if self.output.mode == OutputMode::Webhook
            && self.output.webhook_url.as_deref().map_or(true, |u| u.trim().is_empty())
        {
            return Err(SettingsError::Invalid(
                "webhook output selected but WEBHOOK_URL is not set".into(),
            ));
        }
        Ok(())
    }

    /// Model identifier of the selected provider.
    pub fn active_model(&self) -> &str {
        match self.ai.provider {
            Vendor::OpenAi => &self.openai.model,
            Vendor::Gemini => &self.gemini.model,
        }
    }

    pub fn prompt(&self) -> &str {
        self.system_prompt
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(EXAM_ANALYSIS_PROMPT)
    }

    /// Create the screenshot and log directories this configuration writes to.
    pub fn ensure_dirs(&self) -> Result<(), SettingsError> {
        let mut dirs = vec![&self.logging.directory];
        if self.screenshot.save_screenshots {
            dirs.push(&self.screenshot.directory);
        }
        for dir in dirs {
            fs::create_dir_all(dir).map_err(|source| SettingsError::Io {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

/// Variables declared in a dotenv file. A missing file yields none; an
/// unreadable one is logged and skipped.
pub fn read_env_file(path: &Path) -> HashMap<String, String> {
    match dotenvy::from_path_iter(path) {
        Ok(iter) => {
            log::debug!("Loading environment from {}", path.display());
            iter.filter_map(|item| match item {
                Ok(pair) => Some(pair),
                Err(e) => {
                    log::warn!("Skipping malformed line in {}: {}", path.display(), e);
                    None
                }
            })
            .collect()
        }
        Err(e) if e.not_found() => HashMap::new(),
        Err(e) => {
            log::warn!("Cannot read {}: {}", path.display(), e);
            HashMap::new()
        }
    }
}

impl std::fmt::Display for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "provider={}, model={}, streaming={}, output={:?}",
            self.ai.provider,
            self.active_model(),
            self.streaming.enabled,
            self.output.mode
        )
    }
}
