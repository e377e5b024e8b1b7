//! Whisper transcription backend.
//!
//! Drives whisper.cpp via whisper-rs one 30-second window at a time, with
//! temperature-fallback retries when a window decodes badly (high repetition
//! ratio or low average log-probability). Each attempt surfaces a
//! [`DecodeEvent`] to the caller.

use super::{DecodeCallback, DecodeControl, DecodeEvent, DecodeOptions, Segment, SpeechRuntime};
use crate::audio::TARGET_SAMPLE_RATE;
use crate::config::TaskKind;
use crate::error::EngineError;
use crate::reconcile::compression_ratio;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, WhisperState,
};

/// Seconds of audio per decoding window.
const WINDOW_SECONDS: usize = 30;

/// Temperature added per fallback retry.
const FALLBACK_TEMPERATURE_STEP: f32 = 0.2;

/// Whisper speech recognizer.
///
/// The WhisperContext is leaked intentionally once created - the model stays
/// resident for the process lifetime, which avoids self-referential struct
/// patterns while letting the state be reused across transcriptions.
pub struct WhisperRuntime {
    model_path: PathBuf,
    use_gpu: bool,
    ctx: Option<&'static WhisperContext>,
    state: Option<WhisperState>,
}

impl WhisperRuntime {
    /// Create a runtime for a downloaded model file.
    ///
    /// Construction only validates the weights file; the expensive work
    /// happens in [`SpeechRuntime::prewarm`] and [`SpeechRuntime::load`].
    pub fn new(model_path: impl AsRef<Path>, use_gpu: bool) -> Result<Self, EngineError> {
        let model_path = model_path.as_ref().to_path_buf();
        if !model_path.is_file() {
            return Err(EngineError::Init(format!(
                "model weights not found at {}",
                model_path.display()
            )));
        }
        Ok(Self {
            model_path,
            use_gpu,
            ctx: None,
            state: None,
        })
    }

    fn decode_window(
        state: &mut WhisperState,
        window: &[f32],
        window_offset: f32,
        options: &DecodeOptions,
        temperature: f32,
        initial_prompt: Option<&str>,
    ) -> Result<WindowResult, EngineError> {
        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });

        match &options.language {
            Some(lang) => params.set_language(Some(lang)),
            None => params.set_language(None),
        }
        params.set_translate(options.task == TaskKind::Translate);
        params.set_n_threads(options.worker_count.max(1) as i32);
        params.set_temperature(temperature);
        // Fallback escalation is driven here, not inside whisper.cpp
        params.set_temperature_inc(0.0);
        params.set_n_max_text_ctx(options.sample_length as i32);
        params.set_token_timestamps(options.timestamps);
        params.set_no_context(!options.cache_prefill);
        if let Some(prompt) = initial_prompt.filter(|_| options.prompt_prefill) {
            params.set_initial_prompt(prompt);
        }

        params.set_print_special(options.special_characters);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        state
            .full(params, window)
            .map_err(|e| EngineError::Transcribe(format!("decoder failed: {e}")))?;

        let mut result = WindowResult::default();
        let mut logprob_sum = 0.0f32;

        for i in 0..state.full_n_segments() {
            let Some(segment) = state.get_segment(i) else {
                continue;
            };
            let text = segment
                .to_str_lossy()
                .map_err(|e| EngineError::Transcribe(format!("segment text: {e}")))?
                .into_owned();

            for t in 0..segment.n_tokens() {
                if let Some(token) = segment.get_token(t) {
                    let data = token.token_data();
                    result.tokens.push(data.id);
                    logprob_sum += data.plog;
                }
            }

            // Timestamps are centiseconds relative to the window start
            result.segments.push(Segment {
                start: window_offset + segment.start_timestamp() as f32 / 100.0,
                end: window_offset + segment.end_timestamp() as f32 / 100.0,
                text,
            });
        }

        result.avg_logprob = if result.tokens.is_empty() {
            0.0
        } else {
            logprob_sum / result.tokens.len() as f32
        };
        Ok(result)
    }
}

#[derive(Default)]
struct WindowResult {
    segments: Vec<Segment>,
    tokens: Vec<i32>,
    avg_logprob: f32,
}

impl WindowResult {
    fn text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.trim())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Whether this window should be retried at a higher temperature.
    fn needs_fallback(&self, options: &DecodeOptions) -> bool {
        if self.tokens.is_empty() {
            return false;
        }
        let window = options.compression_check_window.min(self.tokens.len());
        let recent = &self.tokens[self.tokens.len() - window..];
        compression_ratio(recent) > options.compression_ratio_threshold
            || self.avg_logprob < options.logprob_threshold
    }
}

impl SpeechRuntime for WhisperRuntime {
    fn prewarm(&mut self) -> Result<(), EngineError> {
        if self.ctx.is_some() {
            return Ok(());
        }

        info!(
            path = %self.model_path.display(),
            gpu = self.use_gpu,
            "Specializing Whisper model"
        );

        let path_str = self
            .model_path
            .to_str()
            .ok_or_else(|| EngineError::Prewarm("model path is not valid UTF-8".to_string()))?;

        let mut ctx_params = WhisperContextParameters::default();
        ctx_params.use_gpu(self.use_gpu);

        let ctx = WhisperContext::new_with_params(path_str, ctx_params)
            .map_err(|e| EngineError::Prewarm(e.to_string()))?;

        self.ctx = Some(Box::leak(Box::new(ctx)));
        info!("Whisper model specialized");
        Ok(())
    }

    fn load(&mut self) -> Result<(), EngineError> {
        let ctx = self
            .ctx
            .ok_or_else(|| EngineError::Load("prewarm has not completed".to_string()))?;

        let state = ctx
            .create_state()
            .map_err(|e| EngineError::Load(e.to_string()))?;
        self.state = Some(state);
        info!("Whisper decoder state ready");
        Ok(())
    }

    fn transcribe(
        &mut self,
        samples: &[f32],
        options: &DecodeOptions,
        on_event: DecodeCallback<'_>,
    ) -> Result<Vec<Segment>, EngineError> {
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| EngineError::Transcribe("model is not loaded".to_string()))?;

        let skip = (options.seek_offset * TARGET_SAMPLE_RATE as f32) as usize;
        if skip >= samples.len() {
            return Ok(Vec::new());
        }
        let samples = &samples[skip..];

        let window_len = WINDOW_SECONDS * TARGET_SAMPLE_RATE as usize;
        let mut results: Vec<Segment> = Vec::new();
        let mut fallbacks: u32 = 0;
        let mut previous_text: Option<String> = None;

        for (window_id, window) in samples.chunks(window_len).enumerate() {
            let window_offset =
                options.seek_offset + (window_id * WINDOW_SECONDS) as f32;
            let mut temperature = options.temperature;
            let mut attempt: u32 = 0;

            let accepted = loop {
                let result = Self::decode_window(
                    state,
                    window,
                    window_offset,
                    options,
                    temperature,
                    previous_text.as_deref(),
                )?;

                let control = on_event(DecodeEvent {
                    window_id,
                    text: result.text(),
                    tokens: result.tokens.clone(),
                    avg_logprob: result.avg_logprob,
                    fallbacks,
                });

                match control {
                    DecodeControl::Abort => {
                        debug!(window = window_id, "Transcription aborted");
                        return Ok(results);
                    }
                    DecodeControl::Stop => break result,
                    DecodeControl::Continue => {}
                }

                if result.needs_fallback(options) && attempt < options.fallback_count {
                    attempt += 1;
                    fallbacks += 1;
                    temperature += FALLBACK_TEMPERATURE_STEP;
                    debug!(
                        window = window_id,
                        attempt = attempt,
                        temperature = temperature,
                        "Window decoded badly, retrying at higher temperature"
                    );
                    continue;
                }

                break result;
            };

            previous_text = Some(accepted.text());
            results.extend(accepted.segments);
        }

        debug!(segments = results.len(), fallbacks = fallbacks, "Decode complete");
        Ok(results)
    }
}
