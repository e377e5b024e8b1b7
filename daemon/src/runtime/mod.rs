//! Speech-runtime boundary.
//!
//! Everything murmur knows about speech recognition goes through the
//! [`SpeechRuntime`] trait: prewarm, weight loading, and transcription with
//! a per-step decode callback. The daemon implements no recognition itself.

use crate::config::{Config, TaskKind};
use crate::error::EngineError;

mod whisper;

pub use whisper::WhisperRuntime;

/// Sorted language codes the decoder accepts, plus "auto" for detection.
pub const LANGUAGES: &[&str] = &[
    "auto", "ar", "cs", "da", "de", "el", "en", "es", "fi", "fr", "he", "hi", "hu", "id", "it",
    "ja", "ko", "nl", "no", "pl", "pt", "ro", "ru", "sk", "sv", "th", "tr", "uk", "vi", "zh",
];

/// Whether a language code is accepted by [`DecodeOptions`].
pub fn is_supported_language(code: &str) -> bool {
    LANGUAGES.iter().any(|l| l.eq_ignore_ascii_case(code))
}

/// A decoded span of audio.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Start time in seconds.
    pub start: f32,
    /// End time in seconds.
    pub end: f32,
    pub text: String,
}

/// One partial-decoding progress event.
#[derive(Debug, Clone)]
pub struct DecodeEvent {
    /// Audio window this event belongs to.
    pub window_id: usize,
    /// Partial text decoded so far for this window.
    pub text: String,
    /// Token ids decoded so far for this window.
    pub tokens: Vec<i32>,
    /// Average log-probability of the decoded tokens.
    pub avg_logprob: f32,
    /// Running temperature-fallback count across the run.
    pub fallbacks: u32,
}

/// Answer a decode callback returns to the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeControl {
    /// Keep decoding.
    Continue,
    /// Stop decoding the current window early, keep its text.
    Stop,
    /// Abandon the run.
    Abort,
}

/// Decoding options for one transcription run.
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// Language code, or `None` for auto-detection.
    pub language: Option<String>,
    pub task: TaskKind,
    pub temperature: f32,
    /// Maximum temperature-fallback retries per window.
    pub fallback_count: u32,
    /// Maximum decoded tokens per window.
    pub sample_length: u32,
    /// Decoder worker threads.
    pub worker_count: u32,
    /// Token window over which the repetition ratio is computed.
    pub compression_check_window: usize,
    /// Repetition ratio above which a window is retried at higher temperature.
    pub compression_ratio_threshold: f32,
    /// Average log-probability below which a window is retried.
    pub logprob_threshold: f32,
    /// Emit token-level timestamps.
    pub timestamps: bool,
    /// Keep special tokens in decoded text.
    pub special_characters: bool,
    /// Prefill the decoder prompt with task/language tokens.
    pub prompt_prefill: bool,
    /// Reuse the decoder KV cache across windows.
    pub cache_prefill: bool,
    /// Seconds of audio to skip before decoding starts.
    pub seek_offset: f32,
}

impl DecodeOptions {
    /// Snapshot decoding options from the daemon configuration.
    pub fn from_config(config: &Config) -> Self {
        let language = if config.model.language.eq_ignore_ascii_case("auto") {
            None
        } else {
            Some(config.model.language.clone())
        };
        Self {
            language,
            task: config.model.task,
            temperature: config.decoding.temperature,
            fallback_count: config.decoding.fallback_count,
            sample_length: config.decoding.sample_length,
            worker_count: config.decoding.worker_count,
            compression_check_window: config.decoding.compression_check_window,
            compression_ratio_threshold: config.decoding.compression_ratio_threshold,
            logprob_threshold: config.decoding.logprob_threshold,
            timestamps: config.features.timestamps,
            special_characters: config.features.special_characters,
            prompt_prefill: config.features.prompt_prefill,
            cache_prefill: config.features.cache_prefill,
            seek_offset: 0.0,
        }
    }
}

/// Callback invoked on every partial-decoding step.
pub type DecodeCallback<'a> = &'a mut dyn FnMut(DecodeEvent) -> DecodeControl;

/// An on-device speech recognizer.
///
/// The lifecycle is: construct (may fail with `Init`), [`prewarm`]
/// (device specialization, may fail with `Prewarm`), [`load`] (weights into
/// memory, may fail with `Load`), then any number of [`transcribe`] calls.
///
/// [`prewarm`]: SpeechRuntime::prewarm
/// [`load`]: SpeechRuntime::load
/// [`transcribe`]: SpeechRuntime::transcribe
pub trait SpeechRuntime: Send {
    /// One-time device-specific specialization. Slow; the only observable
    /// signal is this call returning or failing.
    fn prewarm(&mut self) -> Result<(), EngineError>;

    /// Load model weights. Requires a successful [`SpeechRuntime::prewarm`].
    fn load(&mut self) -> Result<(), EngineError>;

    /// Transcribe 16 kHz mono samples.
    ///
    /// `on_event` is invoked after every decoding step with the partial
    /// state of the current window; its return value may stop the window
    /// early or abandon the run. On abort the segments decoded so far are
    /// returned.
    fn transcribe(
        &mut self,
        samples: &[f32],
        options: &DecodeOptions,
        on_event: DecodeCallback<'_>,
    ) -> Result<Vec<Segment>, EngineError>;
}
