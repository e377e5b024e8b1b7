use super::*;

#[test]
fn test_buffer_duration() {
    let buffer = AudioBuffer::new(vec![0.0; 32000], 16000);
    assert!((buffer.duration_secs() - 2.0).abs() < f32::EPSILON);

    let empty = AudioBuffer::new(Vec::new(), 0);
    assert_eq!(empty.duration_secs(), 0.0);
}

#[test]
fn test_rms_energy() {
    assert_eq!(rms_energy(&[]), 0.0);
    assert_eq!(rms_energy(&[0.0; 100]), 0.0);

    // Constant amplitude: RMS equals the amplitude
    let loud = vec![0.5; 100];
    assert!((rms_energy(&loud) - 0.5).abs() < 1e-6);

    // Louder signal has higher energy
    let quiet = vec![0.01; 100];
    assert!(rms_energy(&loud) > rms_energy(&quiet));
}

#[test]
fn test_relative_energy_bounds() {
    // Silence pins to 0
    assert_eq!(relative_energy(&[0.0; 160]), 0.0);
    // Full-scale signal pins to 1
    assert!((relative_energy(&[1.0; 160]) - 1.0).abs() < 1e-6);
    // Speech-level amplitude sits comfortably above the default gate
    assert!(relative_energy(&[0.1; 160]) > 0.3);
    // Faint noise stays below it
    assert!(relative_energy(&[0.001; 160]) < 0.3);
}

#[test]
fn test_to_mono_passthrough() {
    let samples = vec![0.1, 0.2, 0.3];
    assert_eq!(to_mono(&samples, 1), samples);
}

#[test]
fn test_to_mono_averages_stereo() {
    let stereo = vec![1.0, 0.0, 0.5, 0.5, -1.0, 1.0];
    let mono = to_mono(&stereo, 2);
    assert_eq!(mono, vec![0.5, 0.5, 0.0]);
}

#[test]
fn test_to_mono_four_channels() {
    let quad = vec![1.0, 1.0, 0.0, 0.0];
    let mono = to_mono(&quad, 4);
    assert_eq!(mono, vec![0.5]);
}

#[test]
fn test_resampler_downsamples() {
    let mut resampler = AudioResampler::new(48000, 16000, 1024).unwrap();
    let input = vec![0.0f32; 1024 * 3];
    let output = resampler.process(&input).unwrap();

    // 48k -> 16k is a 3:1 reduction
    let expected = input.len() / 3;
    let tolerance = expected / 10;
    assert!(
        output.len().abs_diff(expected) <= tolerance,
        "expected ~{expected} samples, got {}",
        output.len()
    );
}

#[test]
fn test_resampler_ignores_partial_chunk() {
    let mut resampler = AudioResampler::new(48000, 16000, 1024).unwrap();
    let output = resampler.process(&vec![0.0f32; 100]).unwrap();
    assert!(output.is_empty());
}

#[test]
fn test_resample_for_decode_identity_at_target_rate() {
    let buffer = AudioBuffer::new(vec![0.25; 1600], TARGET_SAMPLE_RATE);
    let samples = resample_for_decode(&buffer).unwrap();
    assert_eq!(samples, buffer.samples);
}

#[test]
fn test_resample_for_decode_converts_rate() {
    let buffer = AudioBuffer::new(vec![0.0; 44_100], 44_100);
    let samples = resample_for_decode(&buffer).unwrap();

    // One second of audio stays roughly one second at 16kHz
    let expected = TARGET_SAMPLE_RATE as usize;
    assert!(samples.len().abs_diff(expected) < expected / 5);
}

#[test]
fn test_load_audio_file_wav() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tone.wav");

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 22_050,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for i in 0..22_050u32 {
        let t = i as f32 / 22_050.0;
        let value = (t * 440.0 * std::f32::consts::TAU).sin();
        let sample = (value * i16::MAX as f32 * 0.5) as i16;
        writer.write_sample(sample).unwrap();
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();

    let buffer = load_audio_file(&path).unwrap();
    assert_eq!(buffer.sample_rate, 22_050);
    // Stereo folded to mono: one second of samples
    assert_eq!(buffer.samples.len(), 22_050);
    assert!(buffer.rms_energy() > 0.1);
}

#[test]
fn test_load_audio_file_missing_is_file_access_error() {
    let err = load_audio_file("/nonexistent/audio.wav").unwrap_err();
    assert!(matches!(err, EngineError::FileAccess { .. }));
}

#[test]
fn test_load_audio_file_garbage_is_transcribe_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("noise.wav");
    std::fs::write(&path, b"this is not audio data at all").unwrap();

    let err = load_audio_file(&path).unwrap_err();
    assert!(matches!(err, EngineError::Transcribe(_)));
}
