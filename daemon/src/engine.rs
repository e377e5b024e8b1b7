//! Transcription engine.
//!
//! Owns the loaded speech runtime and drives the two transcription modes:
//! one-shot file transcription and the live microphone loop. All transcript
//! state flows through a [`TranscriptReconciler`] owned by the active run;
//! decode callbacks arrive on the decoding thread and are serialized through
//! it before anything observable is published.

use crate::audio::{self, AudioCapture, AudioResampler, TARGET_SAMPLE_RATE};
use crate::config::Config;
use crate::error::EngineError;
use crate::reconcile::{EarlyStopPolicy, TranscriptReconciler};
use crate::runtime::{DecodeControl, DecodeEvent, DecodeOptions, Segment, SpeechRuntime};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Events published while a transcription run is active.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// Updated segment pools and decoder preview.
    Transcript {
        confirmed: Vec<Segment>,
        unconfirmed: Vec<Segment>,
        preview: String,
    },
    /// The run completed; final segments and performance counters.
    Finished {
        segments: Vec<Segment>,
        timings: RunTimings,
    },
}

/// Performance counters surfaced in the UI after a run.
#[derive(Debug, Clone, Default)]
pub struct RunTimings {
    pub audio_seconds: f64,
    pub inference_seconds: f64,
    /// Processing time per second of audio.
    pub real_time_factor: f64,
    /// Seconds of audio processed per wall-clock second.
    pub speed_factor: f64,
    pub tokens_per_second: f64,
    pub first_token_latency: f64,
}

impl RunTimings {
    fn from_run(audio_seconds: f64, inference_seconds: f64, tokens: usize, first: f64) -> Self {
        let safe_audio = audio_seconds.max(f64::EPSILON);
        let safe_inference = inference_seconds.max(f64::EPSILON);
        Self {
            audio_seconds,
            inference_seconds,
            real_time_factor: inference_seconds / safe_audio,
            speed_factor: audio_seconds / safe_inference,
            tokens_per_second: tokens as f64 / safe_inference,
            first_token_latency: first,
        }
    }
}

struct LoadedRuntime {
    variant: String,
    runtime: Box<dyn SpeechRuntime>,
}

/// Decode statistics gathered from callback events.
#[derive(Default)]
struct RunStats {
    first_event_at: Option<f64>,
    /// Final token count per window (fallback retries overwrite).
    window_tokens: BTreeMap<usize, usize>,
}

impl RunStats {
    fn record(&mut self, event: &DecodeEvent, elapsed: f64) {
        self.first_event_at.get_or_insert(elapsed);
        self.window_tokens.insert(event.window_id, event.tokens.len());
    }

    fn total_tokens(&self) -> usize {
        self.window_tokens.values().sum()
    }
}

/// Transcription engine. One engine exists per daemon; the controller takes
/// it out of its slot for the duration of a run.
pub struct Engine {
    runtime: Option<LoadedRuntime>,
}

impl Engine {
    pub fn new() -> Self {
        Self { runtime: None }
    }

    /// Install a freshly loaded runtime, replacing any previous one.
    pub fn install_runtime(&mut self, variant: impl Into<String>, runtime: Box<dyn SpeechRuntime>) {
        self.runtime = Some(LoadedRuntime {
            variant: variant.into(),
            runtime,
        });
    }

    /// Drop the loaded runtime (called when a new load starts).
    pub fn clear_runtime(&mut self) {
        self.runtime = None;
    }

    pub fn loaded_variant(&self) -> Option<&str> {
        self.runtime.as_ref().map(|r| r.variant.as_str())
    }

    pub fn is_loaded(&self) -> bool {
        self.runtime.is_some()
    }

    /// Transcribe an audio file in one run.
    ///
    /// Blocking; the controller runs this on a blocking task. `on_event` is
    /// called with transcript updates as decoding progresses and once with
    /// [`RunEvent::Finished`] on success. Cancellation stops the decode loop
    /// without rolling back anything already published.
    pub fn transcribe_file(
        &mut self,
        config: &Config,
        path: &Path,
        cancel: &CancellationToken,
        on_event: &(dyn Fn(RunEvent) + Send + Sync),
    ) -> Result<(), EngineError> {
        let loaded = self
            .runtime
            .as_mut()
            .ok_or_else(|| EngineError::Transcribe("no model loaded".to_string()))?;

        info!(path = %path.display(), model = %loaded.variant, "Transcribing file");

        let decode_start = Instant::now();
        let buffer = audio::load_audio_file(path)?;
        let samples = audio::resample_for_decode(&buffer)
            .map_err(|e| EngineError::Transcribe(format!("resampling failed: {e}")))?;
        let audio_seconds = samples.len() as f64 / TARGET_SAMPLE_RATE as f64;
        debug!(
            seconds = audio_seconds,
            load_ms = decode_start.elapsed().as_millis() as u64,
            "Audio ready"
        );

        let options = DecodeOptions::from_config(config);
        let policy = EarlyStopPolicy::from_config(&config.decoding);
        let preview_enabled = config.features.decoder_preview;
        let reconciler = Mutex::new(TranscriptReconciler::new(policy, false));
        let stats = Mutex::new(RunStats::default());

        let inference_start = Instant::now();
        let mut on_decode = |event: DecodeEvent| -> DecodeControl {
            if cancel.is_cancelled() {
                return DecodeControl::Abort;
            }
            let mut rec = reconciler.lock().expect("reconciler lock");
            let control = rec.observe(&event);
            stats
                .lock()
                .expect("stats lock")
                .record(&event, inference_start.elapsed().as_secs_f64());
            on_event(RunEvent::Transcript {
                confirmed: rec.confirmed().to_vec(),
                unconfirmed: rec.unconfirmed().to_vec(),
                preview: if preview_enabled {
                    rec.preview()
                } else {
                    String::new()
                },
            });
            control
        };

        let segments = loaded.runtime.transcribe(&samples, &options, &mut on_decode)?;
        let inference_seconds = inference_start.elapsed().as_secs_f64();

        if cancel.is_cancelled() {
            info!("Transcription cancelled");
            return Ok(());
        }

        let mut rec = reconciler.into_inner().expect("reconciler lock");
        rec.set_unconfirmed(segments);
        rec.finalize();
        let final_segments = rec.confirmed().to_vec();

        let stats = stats.into_inner().expect("stats lock");
        let timings = RunTimings::from_run(
            audio_seconds,
            inference_seconds,
            stats.total_tokens(),
            stats.first_event_at.unwrap_or(0.0),
        );
        info!(
            segments = final_segments.len(),
            rtf = timings.real_time_factor,
            "Transcription complete"
        );

        on_event(RunEvent::Finished {
            segments: final_segments,
            timings,
        });
        Ok(())
    }

    /// Live microphone transcription loop.
    ///
    /// Captures audio, re-transcribes the rolling unconfirmed buffer on a
    /// fixed interval, and confirms all but the trailing few segments once
    /// enough accumulate, advancing the buffer past confirmed audio. Runs
    /// until `cancel` fires; on exit remaining segments are finalized.
    pub async fn run_stream(
        &mut self,
        config: &Config,
        cancel: CancellationToken,
        on_event: &(dyn Fn(RunEvent) + Send + Sync),
    ) -> Result<(), EngineError> {
        let loaded = self
            .runtime
            .as_mut()
            .ok_or_else(|| EngineError::Transcribe("no model loaded".to_string()))?;

        let capture = AudioCapture::start()
            .map_err(|e| EngineError::Transcribe(format!("audio capture failed: {e}")))?;
        let mut resampler = AudioResampler::new(capture.sample_rate(), TARGET_SAMPLE_RATE, 1024)
            .map_err(|e| EngineError::Transcribe(format!("resampler failed: {e}")))?;

        let options = DecodeOptions::from_config(config);
        let policy = EarlyStopPolicy::from_config(&config.decoding);
        let preview_enabled = config.features.decoder_preview;
        let keep_unconfirmed = config.decoding.segments_before_confirmation.max(1);
        let interval = Duration::from_secs_f32(config.decoding.realtime_interval.max(0.1));
        // Eager mode holds confirmation until the prefix decodes identically
        // across this many passes
        let eager = config.features.eager_decoding;
        let confirmations_needed = config.decoding.token_confirmations.max(1);
        let mut agreement: Option<(String, u32)> = None;

        let mut reconciler = TranscriptReconciler::new(policy, true);
        // Device-rate samples awaiting a full resampler chunk
        let mut pending: Vec<f32> = Vec::new();
        // 16 kHz rolling buffer of not-yet-confirmed audio
        let mut rolling: Vec<f32> = Vec::new();
        // Audio time already confirmed and dropped from the rolling buffer
        let mut confirmed_offset: f32 = 0.0;

        let stream_start = Instant::now();
        let mut inference_total = Duration::ZERO;
        let mut last_pass = Instant::now();

        info!(model = %loaded.variant, "Live transcription started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(Duration::from_millis(10)) => {}
            }

            if let Some(samples) = capture.try_recv() {
                pending.extend(samples);
                let chunk = resampler.chunk_size();
                let whole = (pending.len() / chunk) * chunk;
                if whole > 0 {
                    let drained: Vec<f32> = pending.drain(..whole).collect();
                    match resampler.process(&drained) {
                        Ok(resampled) => rolling.extend(resampled),
                        Err(e) => warn!(error = %e, "Resampling error, dropping chunk"),
                    }
                }
            }

            if last_pass.elapsed() < interval || rolling.len() < TARGET_SAMPLE_RATE as usize {
                continue;
            }
            last_pass = Instant::now();

            // Silence gate over the most recent second of audio
            let recent = &rolling[rolling.len() - TARGET_SAMPLE_RATE as usize..];
            if audio::relative_energy(recent) < config.decoding.silence_threshold {
                continue;
            }

            let pass_start = Instant::now();
            let mut on_decode = |event: DecodeEvent| -> DecodeControl {
                if cancel.is_cancelled() {
                    return DecodeControl::Abort;
                }
                reconciler.observe(&event)
            };
            let result = loaded.runtime.transcribe(&rolling, &options, &mut on_decode);
            inference_total += pass_start.elapsed();

            match result {
                Ok(segments) => {
                    let mut segments: Vec<Segment> = segments
                        .into_iter()
                        .map(|s| Segment {
                            start: s.start + confirmed_offset,
                            end: s.end + confirmed_offset,
                            text: s.text,
                        })
                        .collect();

                    if segments.len() > keep_unconfirmed {
                        let mut rest = segments.split_off(segments.len() - keep_unconfirmed);
                        // `segments` is now the candidate confirmed prefix
                        let settled = if eager {
                            let fingerprint = segments
                                .iter()
                                .map(|s| s.text.as_str())
                                .collect::<Vec<_>>()
                                .join("\n");
                            match &mut agreement {
                                Some((seen, streak)) if *seen == fingerprint => {
                                    *streak += 1;
                                    *streak >= confirmations_needed
                                }
                                _ => {
                                    agreement = Some((fingerprint, 1));
                                    confirmations_needed <= 1
                                }
                            }
                        } else {
                            true
                        };

                        if settled {
                            let consumed = segments
                                .last()
                                .map(|s| s.end - confirmed_offset)
                                .unwrap_or(0.0)
                                .max(0.0);
                            let consumed_samples = ((consumed * TARGET_SAMPLE_RATE as f32)
                                as usize)
                                .min(rolling.len());
                            rolling.drain(..consumed_samples);
                            confirmed_offset +=
                                consumed_samples as f32 / TARGET_SAMPLE_RATE as f32;

                            reconciler.confirm_segments(segments);
                            reconciler.set_unconfirmed(rest);
                            agreement = None;
                        } else {
                            // Not yet stable: everything stays unconfirmed
                            let mut all = segments;
                            all.append(&mut rest);
                            reconciler.set_unconfirmed(all);
                        }
                    } else {
                        reconciler.set_unconfirmed(segments);
                    }

                    on_event(RunEvent::Transcript {
                        confirmed: reconciler.confirmed().to_vec(),
                        unconfirmed: reconciler.unconfirmed().to_vec(),
                        preview: if preview_enabled {
                            reconciler.preview()
                        } else {
                            String::new()
                        },
                    });
                }
                // Caught per pass; the loop keeps listening
                Err(e) => error!(error = %e, "Live transcription pass failed"),
            }
        }

        capture.stop();
        reconciler.finalize();

        let audio_seconds =
            confirmed_offset as f64 + rolling.len() as f64 / TARGET_SAMPLE_RATE as f64;
        debug!(
            captured_secs = stream_start.elapsed().as_secs_f64(),
            "Capture session ended"
        );
        let timings = RunTimings::from_run(audio_seconds, inference_total.as_secs_f64(), 0, 0.0);

        on_event(RunEvent::Transcript {
            confirmed: reconciler.confirmed().to_vec(),
            unconfirmed: Vec::new(),
            preview: String::new(),
        });
        on_event(RunEvent::Finished {
            segments: reconciler.confirmed().to_vec(),
            timings,
        });

        info!("Live transcription stopped");
        Ok(())
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "engine_test.rs"]
mod tests;
