//! Configuration management for the murmur daemon.
//!
//! Every user preference the app persists lives here: selected model and
//! language, decoding knobs, feature toggles and compute placement. The file
//! is TOML under the XDG config directory; a missing file yields defaults,
//! an unparseable one is a startup error.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration struct for the daemon.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model: ModelConfig,
    pub decoding: DecodingConfig,
    pub features: FeatureConfig,
    pub compute: ComputeConfig,
    pub logging: LoggingConfig,
}

/// Model selection and acquisition settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Selected model variant, e.g. "base", "small.en", "large-v3-turbo".
    pub variant: String,
    /// Hugging Face repository the GGML weights are fetched from, or a
    /// full mirror base URL.
    pub repo: String,
    /// Source language code, or "auto" for detection.
    pub language: String,
    /// Decoding task.
    pub task: TaskKind,
}

/// Transcribe in the source language, or translate to English.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    #[default]
    Transcribe,
    Translate,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Transcribe => "transcribe",
            TaskKind::Translate => "translate",
        }
    }

    /// Parse from the wire representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "transcribe" => Some(TaskKind::Transcribe),
            "translate" => Some(TaskKind::Translate),
            _ => None,
        }
    }
}

/// Decoding knobs forwarded to the runtime and the reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodingConfig {
    /// Initial sampling temperature.
    pub temperature: f32,
    /// Maximum temperature-fallback retries per window.
    pub fallback_count: u32,
    /// Maximum decoded tokens per window.
    pub sample_length: u32,
    /// Token window over which the repetition ratio is computed.
    pub compression_check_window: usize,
    /// Repetition ratio above which decoding of a window stops early.
    pub compression_ratio_threshold: f32,
    /// Average log-probability below which decoding of a window stops early.
    pub logprob_threshold: f32,
    /// RMS energy below which live audio is treated as silence.
    pub silence_threshold: f32,
    /// Token agreements required before eager-mode text is kept.
    pub token_confirmations: u32,
    /// Decoder worker threads.
    pub worker_count: u32,
    /// Seconds between live re-transcription passes.
    pub realtime_interval: f32,
    /// Trailing segments kept unconfirmed during live transcription.
    pub segments_before_confirmation: usize,
}

impl Default for DecodingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            fallback_count: 5,
            sample_length: 224,
            compression_check_window: 60,
            compression_ratio_threshold: 2.4,
            logprob_threshold: -1.0,
            silence_threshold: 0.3,
            token_confirmations: 2,
            worker_count: 4,
            realtime_interval: 1.0,
            segments_before_confirmation: 2,
        }
    }
}

/// Feature toggles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Include segment timestamps in formatted transcripts.
    pub timestamps: bool,
    /// Prefill the decoder prompt with task/language tokens.
    pub prompt_prefill: bool,
    /// Reuse the decoder KV cache across windows.
    pub cache_prefill: bool,
    /// Keep special tokens in decoded text.
    pub special_characters: bool,
    /// Eager token-level decoding in live mode.
    pub eager_decoding: bool,
    /// Publish the raw decoder preview alongside segments.
    pub decoder_preview: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            timestamps: true,
            prompt_prefill: true,
            cache_prefill: true,
            special_characters: false,
            eager_decoding: false,
            decoder_preview: true,
        }
    }
}

/// Compute placement hint for one model component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ComputeUnits {
    Cpu,
    Gpu,
    #[default]
    NeuralEngine,
}

/// Placement of the audio encoder and text decoder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeConfig {
    pub encoder: ComputeUnits,
    pub decoder: ComputeUnits,
}

impl ComputeConfig {
    /// Whether any component wants a non-CPU backend.
    pub fn wants_gpu(&self) -> bool {
        self.encoder != ComputeUnits::Cpu || self.decoder != ComputeUnits::Cpu
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub level: LogLevel,
}

/// Log verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Convert to a tracing filter directive string for the daemon crate.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "murmur_daemon=error",
            LogLevel::Warn => "murmur_daemon=warn",
            LogLevel::Info => "murmur_daemon=info",
            LogLevel::Debug => "murmur_daemon=debug",
            LogLevel::Trace => "murmur_daemon=trace",
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            variant: "base".to_string(),
            repo: "ggerganov/whisper.cpp".to_string(),
            language: "auto".to_string(),
            task: TaskKind::default(),
        }
    }
}

impl Config {
    /// Returns the default config directory path.
    /// `~/.config/murmur/`
    pub fn config_dir() -> Result<PathBuf> {
        murmur_common::dirs::config_dir()
    }

    /// Returns the default config file path.
    /// `~/.config/murmur/config.toml`
    pub fn config_path() -> Result<PathBuf> {
        Self::config_dir().map(|p| p.join("config.toml"))
    }

    /// Returns the default models directory path.
    /// `~/.local/share/murmur/models/`
    pub fn models_dir() -> Result<PathBuf> {
        murmur_common::dirs::models_dir()
    }

    /// Load configuration from the default path.
    /// Returns defaults if the file doesn't exist.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    /// Returns defaults if the file doesn't exist.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file as TOML")
    }

    /// Save configuration to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        self.save_to(&path)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
