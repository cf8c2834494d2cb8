//! TOML configuration with profile support
//!
//! Every section falls back to its defaults when absent, so an empty file is
//! a valid configuration. Named profiles replace whole sections.

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use snipocr_imaging::PreprocessConfig;
use snipocr_ocr::{
    ChatBackend, ChatConfig, LocalBackend, LocalConfig, RecognitionBackend, RecognitionOptions,
    RemoteBackend, RemoteConfig,
};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::scheduler::DEFAULT_QUIET_PERIOD;
use crate::session::SessionSettings;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub preprocess: PreprocessConfig,

    #[serde(default)]
    pub recognition: RecognitionConfig,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub local: LocalConfig,

    #[serde(default)]
    pub chat: ChatConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Named profiles that can override base config
    #[serde(default)]
    pub profiles: HashMap<String, ProfileConfig>,
}

/// Which backend answers recognition requests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Remote,
    Local,
    Chat,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [BackendKind::Remote, BackendKind::Local, BackendKind::Chat];
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Remote => "remote",
            BackendKind::Local => "local",
            BackendKind::Chat => "chat",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecognitionConfig {
    #[serde(default)]
    pub backend: BackendKind,

    #[serde(flatten)]
    pub options: RecognitionOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Quiet period before an automatic run, in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

/// Profile for overriding settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub preprocess: Option<PreprocessConfig>,
    pub recognition: Option<RecognitionConfig>,
    pub remote: Option<RemoteConfig>,
    pub local: Option<LocalConfig>,
    pub chat: Option<ChatConfig>,
    pub scheduler: Option<SchedulerConfig>,
}

fn default_debounce_ms() -> u64 {
    DEFAULT_QUIET_PERIOD.as_millis() as u64
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl AppConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        let config: AppConfig =
            toml::from_str(&content).context("failed to parse config TOML")?;
        config
            .preprocess
            .validate()
            .context("invalid [preprocess] section")?;
        Ok(config)
    }

    /// Explicit path, else the default path when it exists, else defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// `<config dir>/snipocr/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("snipocr").join("config.toml"))
    }

    /// Apply a named profile, merging settings
    ///
    /// Profile settings override base configuration values.
    pub fn apply_profile(mut self, profile_name: &str) -> Result<Self> {
        let profile = self
            .profiles
            .get(profile_name)
            .with_context(|| format!("profile '{}' not found", profile_name))?
            .clone();

        if let Some(preprocess) = profile.preprocess {
            preprocess
                .validate()
                .with_context(|| format!("invalid preprocess settings in profile '{}'", profile_name))?;
            self.preprocess = preprocess;
        }
        if let Some(recognition) = profile.recognition {
            self.recognition = recognition;
        }
        if let Some(remote) = profile.remote {
            self.remote = remote;
        }
        if let Some(local) = profile.local {
            self.local = local;
        }
        if let Some(chat) = profile.chat {
            self.chat = chat;
        }
        if let Some(scheduler) = profile.scheduler {
            self.scheduler = scheduler;
        }

        Ok(self)
    }

    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.scheduler.debounce_ms)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            preprocess: self.preprocess,
            options: self.recognition.options.clone(),
            quiet_period: self.quiet_period(),
        }
    }

    /// Construct the backend of the given kind from its section
    pub fn build_backend(&self, kind: BackendKind) -> Result<Box<dyn RecognitionBackend>> {
        let backend: Box<dyn RecognitionBackend> = match kind {
            BackendKind::Remote => Box::new(
                RemoteBackend::new(self.remote.clone()).context("remote backend unavailable")?,
            ),
            BackendKind::Local => Box::new(LocalBackend::new(self.local.clone())),
            BackendKind::Chat => Box::new(
                ChatBackend::new(self.chat.clone()).context("chat backend unavailable")?,
            ),
        };
        Ok(backend)
    }
}
