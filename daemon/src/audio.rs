//! Audio input for the murmur daemon.
//!
//! Two sources feed the engine: microphone capture (live mode) and decoded
//! audio files (drop/CLI mode). Both end up as 16 kHz mono f32 buffers.

use crate::error::EngineError;
use anyhow::{Context, Result};
use audioadapter_buffers::direct::SequentialSliceOfVecs;
use rubato::audioadapter::Adapter;
use rubato::{Fft, FixedSync, Resampler};
use std::path::Path;
use std::sync::mpsc;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

/// Sample rate the speech runtime expects.
pub const TARGET_SAMPLE_RATE: u32 = 16000;

/// Mono f32 samples at a known sample rate.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Duration of the buffer in seconds.
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }

    /// Root-mean-square energy, used by the live-mode silence gate.
    pub fn rms_energy(&self) -> f32 {
        rms_energy(&self.samples)
    }
}

/// Root-mean-square energy of a sample span.
pub fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Energy mapped onto [0, 1] for thresholding: -60 dBFS and below is 0,
/// full scale is 1. Speech typically lands well above 0.3.
pub fn relative_energy(samples: &[f32]) -> f32 {
    let rms = rms_energy(samples).max(1e-10);
    let db = 20.0 * rms.log10();
    ((db + 60.0) / 60.0).clamp(0.0, 1.0)
}

/// Fold multi-channel interleaved samples to mono by averaging all channels.
pub fn to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }

    let channels = channels as usize;
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Resampler for converting audio between sample rates.
pub struct AudioResampler {
    resampler: Fft<f32>,
    chunk_size_in: usize,
}

impl AudioResampler {
    /// Create a resampler processing `chunk_size` input samples at a time.
    pub fn new(input_rate: u32, output_rate: u32, chunk_size: usize) -> Result<Self> {
        let resampler = Fft::new(
            input_rate as usize,
            output_rate as usize,
            chunk_size,
            1, // sub_chunks
            1, // channels
            FixedSync::Input,
        )
        .context("Failed to create resampler")?;

        Ok(Self {
            resampler,
            chunk_size_in: chunk_size,
        })
    }

    /// Resample audio data. Only complete input chunks are consumed.
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        if input.is_empty() {
            return Ok(Vec::new());
        }

        let mut output = Vec::new();
        for chunk in input.chunks_exact(self.chunk_size_in) {
            let input_vecs = vec![chunk.to_vec()];
            let input_adapter =
                SequentialSliceOfVecs::new(&input_vecs, 1, chunk.len()).expect("valid input");
            let resampled = self
                .resampler
                .process(&input_adapter, 0, None)
                .context("Resampling failed")?;

            for frame_idx in 0..resampled.frames() {
                output.push(resampled.read_sample(0, frame_idx).unwrap_or(0.0));
            }
        }

        Ok(output)
    }

    /// Required input chunk size.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size_in
    }
}

/// Convert a buffer to the 16 kHz mono format the runtime expects.
///
/// The tail is zero-padded to a full resampler chunk, so output duration can
/// exceed the input by up to one chunk of silence.
pub fn resample_for_decode(buffer: &AudioBuffer) -> Result<Vec<f32>> {
    if buffer.sample_rate == TARGET_SAMPLE_RATE {
        return Ok(buffer.samples.clone());
    }

    let mut resampler = AudioResampler::new(buffer.sample_rate, TARGET_SAMPLE_RATE, 1024)?;
    let chunk = resampler.chunk_size();
    let mut padded = buffer.samples.clone();
    padded.resize(padded.len().div_ceil(chunk) * chunk, 0.0);
    resampler.process(&padded)
}

/// Decode an audio file into a mono buffer at its native sample rate.
///
/// Supports the formats symphonia is built with (wav, flac, mp3).
pub fn load_audio_file(path: impl AsRef<Path>) -> Result<AudioBuffer, EngineError> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|e| EngineError::file_access(path, e))?;
    let source = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| EngineError::Transcribe(format!("unrecognized audio format: {e}")))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| EngineError::Transcribe("file has no audio track".to_string()))?;
    let track_id = track.id;
    let channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(1);
    let sample_rate = track
        .codec_params
        .sample_rate
        .unwrap_or(TARGET_SAMPLE_RATE);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| EngineError::Transcribe(format!("no decoder for audio track: {e}")))?;

    let mut interleaved: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                return Err(EngineError::Transcribe(format!("audio read failed: {e}")));
            }
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // Skip over malformed packets, keep the rest of the file
            Err(SymphoniaError::DecodeError(e)) => {
                debug!(error = %e, "Skipping undecodable packet");
                continue;
            }
            Err(e) => {
                return Err(EngineError::Transcribe(format!("audio decode failed: {e}")));
            }
        };

        let buf = sample_buf
            .get_or_insert_with(|| SampleBuffer::new(decoded.capacity() as u64, *decoded.spec()));
        buf.copy_interleaved_ref(decoded);
        interleaved.extend_from_slice(buf.samples());
    }

    if interleaved.is_empty() {
        return Err(EngineError::Transcribe(
            "file contains no decodable audio".to_string(),
        ));
    }

    debug!(
        path = %path.display(),
        samples = interleaved.len(),
        channels = channels,
        sample_rate = sample_rate,
        "Decoded audio file"
    );

    Ok(AudioBuffer::new(to_mono(&interleaved, channels), sample_rate))
}

/// Microphone capture handle.
///
/// The cpal stream is not Send, so it lives on a dedicated thread; this
/// handle receives mono samples over a channel and can move freely between
/// tasks. Dropping the handle stops the capture thread.
pub struct AudioCapture {
    receiver: mpsc::Receiver<Vec<f32>>,
    sample_rate: u32,
    stop_tx: mpsc::Sender<()>,
}

impl AudioCapture {
    /// Start capturing from the default input device.
    pub fn start() -> Result<Self> {
        let (init_tx, init_rx) = mpsc::channel();
        let (sample_tx, sample_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel();

        std::thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || capture_thread(init_tx, sample_tx, stop_rx))
            .context("Failed to spawn capture thread")?;

        let sample_rate = init_rx
            .recv()
            .context("Capture thread exited before reporting a device")??;

        Ok(Self {
            receiver: sample_rx,
            sample_rate,
            stop_tx,
        })
    }

    /// Native sample rate of the input device.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Drain available audio (non-blocking) as mono samples at the device's
    /// native sample rate.
    pub fn try_recv(&self) -> Option<Vec<f32>> {
        let mut all_samples = Vec::new();

        while let Ok(samples) = self.receiver.try_recv() {
            all_samples.extend(samples);
        }

        if all_samples.is_empty() {
            return None;
        }

        Some(all_samples)
    }

    /// Stop the audio stream.
    pub fn stop(self) {
        let _ = self.stop_tx.send(());
    }
}

/// Owns the cpal stream for the lifetime of a capture session. Samples are
/// folded to mono in the device callback and forwarded to the handle.
fn capture_thread(
    init_tx: mpsc::Sender<Result<u32>>,
    sample_tx: mpsc::Sender<Vec<f32>>,
    stop_rx: mpsc::Receiver<()>,
) {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    let build = || -> Result<(cpal::Stream, u32)> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .context("No input device available")?;

        let config = device
            .default_input_config()
            .context("Failed to get default input config")?;

        let sample_rate = config.sample_rate();
        let channels = config.channels();

        let err_fn = |err| tracing::warn!(error = %err, "Audio stream error");

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => device.build_input_stream(
                &config.into(),
                move |data: &[f32], _| {
                    let _ = sample_tx.send(to_mono(data, channels));
                },
                err_fn,
                None,
            ),
            cpal::SampleFormat::I16 => device.build_input_stream(
                &config.into(),
                move |data: &[i16], _| {
                    let samples: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                    let _ = sample_tx.send(to_mono(&samples, channels));
                },
                err_fn,
                None,
            ),
            cpal::SampleFormat::U16 => device.build_input_stream(
                &config.into(),
                move |data: &[u16], _| {
                    let samples: Vec<f32> = data
                        .iter()
                        .map(|&s| (s as f32 - 32768.0) / 32768.0)
                        .collect();
                    let _ = sample_tx.send(to_mono(&samples, channels));
                },
                err_fn,
                None,
            ),
            format => anyhow::bail!("Unsupported sample format: {:?}", format),
        }
        .context("Failed to build input stream")?;

        stream.play().context("Failed to start audio stream")?;
        Ok((stream, sample_rate))
    };

    match build() {
        Ok((stream, sample_rate)) => {
            let _ = init_tx.send(Ok(sample_rate));
            // Park until the handle stops or is dropped
            let _ = stop_rx.recv();
            let _ = stream.pause();
        }
        Err(e) => {
            let _ = init_tx.send(Err(e));
        }
    }
}

#[cfg(test)]
#[path = "audio_test.rs"]
mod tests;
