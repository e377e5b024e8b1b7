use super::*;
use crate::runtime::DecodeCallback;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// Write one second of 16 kHz tone so file loading has something real.
fn write_wav(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("clip.wav");
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for i in 0..16_000u32 {
        let t = i as f32 / 16_000.0;
        let value = (t * 220.0 * std::f32::consts::TAU).sin();
        writer.write_sample((value * 12_000.0) as i16).unwrap();
    }
    writer.finalize().unwrap();
    path
}

/// Runtime that replays scripted events and returns scripted segments.
struct ScriptedRuntime {
    events: Vec<DecodeEvent>,
    segments: Vec<Segment>,
    controls_seen: Arc<std::sync::Mutex<Vec<DecodeControl>>>,
}

impl ScriptedRuntime {
    fn new(events: Vec<DecodeEvent>, segments: Vec<Segment>) -> Self {
        Self {
            events,
            segments,
            controls_seen: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }
}

impl SpeechRuntime for ScriptedRuntime {
    fn prewarm(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    fn load(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    fn transcribe(
        &mut self,
        _samples: &[f32],
        _options: &DecodeOptions,
        on_event: DecodeCallback<'_>,
    ) -> Result<Vec<Segment>, EngineError> {
        for event in &self.events {
            let control = on_event(event.clone());
            self.controls_seen.lock().unwrap().push(control);
            if control == DecodeControl::Abort {
                return Ok(Vec::new());
            }
        }
        Ok(self.segments.clone())
    }
}

struct FailingRuntime;

impl SpeechRuntime for FailingRuntime {
    fn prewarm(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    fn load(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    fn transcribe(
        &mut self,
        _samples: &[f32],
        _options: &DecodeOptions,
        _on_event: DecodeCallback<'_>,
    ) -> Result<Vec<Segment>, EngineError> {
        Err(EngineError::Transcribe("decoder exploded".to_string()))
    }
}

fn event(window_id: usize, text: &str) -> DecodeEvent {
    DecodeEvent {
        window_id,
        text: text.to_string(),
        tokens: vec![1, 2, 3],
        avg_logprob: -0.1,
        fallbacks: 0,
    }
}

fn segment(start: f32, end: f32, text: &str) -> Segment {
    Segment {
        start,
        end,
        text: text.to_string(),
    }
}

fn collect_events() -> (
    Arc<std::sync::Mutex<Vec<RunEvent>>>,
    impl Fn(RunEvent) + Send + Sync,
) {
    let seen: Arc<std::sync::Mutex<Vec<RunEvent>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink_seen = seen.clone();
    (seen, move |e| sink_seen.lock().unwrap().push(e))
}

#[test]
fn test_transcribe_file_without_model_is_transcribe_error() {
    let mut engine = Engine::new();
    let (_seen, sink) = collect_events();

    let err = engine
        .transcribe_file(
            &Config::default(),
            Path::new("/tmp/whatever.wav"),
            &CancellationToken::new(),
            &sink,
        )
        .unwrap_err();

    assert!(matches!(err, EngineError::Transcribe(_)));
}

#[test]
fn test_transcribe_file_publishes_previews_and_finalizes() {
    let dir = TempDir::new().unwrap();
    let path = write_wav(&dir);

    let runtime = ScriptedRuntime::new(
        vec![event(0, "Hello"), event(0, "Hello world"), event(1, "Again")],
        vec![segment(0.0, 0.5, "Hello world"), segment(0.5, 1.0, "Again")],
    );
    let mut engine = Engine::new();
    engine.install_runtime("tiny", Box::new(runtime));
    assert!(engine.is_loaded());
    assert_eq!(engine.loaded_variant(), Some("tiny"));

    let (seen, sink) = collect_events();
    engine
        .transcribe_file(
            &Config::default(),
            &path,
            &CancellationToken::new(),
            &sink,
        )
        .unwrap();

    let seen = seen.lock().unwrap();

    // One transcript update per decode event, then a finish
    let transcripts: Vec<_> = seen
        .iter()
        .filter(|e| matches!(e, RunEvent::Transcript { .. }))
        .collect();
    assert_eq!(transcripts.len(), 3);

    // Preview reflects the reconciler: refined window 0, then window 1
    if let RunEvent::Transcript { preview, .. } = transcripts[2] {
        assert_eq!(preview, "Hello world\nAgain");
    }

    // The run finishes with all segments confirmed
    match seen.last().unwrap() {
        RunEvent::Finished { segments, timings } => {
            assert_eq!(segments.len(), 2);
            assert_eq!(segments[0].text, "Hello world");
            assert!((timings.audio_seconds - 1.0).abs() < 0.05);
            assert!(timings.inference_seconds >= 0.0);
            assert!(timings.tokens_per_second > 0.0);
        }
        other => panic!("expected Finished, got {other:?}"),
    }
}

#[test]
fn test_decoder_preview_can_be_disabled() {
    let dir = TempDir::new().unwrap();
    let path = write_wav(&dir);

    let runtime = ScriptedRuntime::new(vec![event(0, "Hello")], vec![]);
    let mut engine = Engine::new();
    engine.install_runtime("tiny", Box::new(runtime));

    let mut config = Config::default();
    config.features.decoder_preview = false;

    let (seen, sink) = collect_events();
    engine
        .transcribe_file(&config, &path, &CancellationToken::new(), &sink)
        .unwrap();

    let seen = seen.lock().unwrap();
    if let RunEvent::Transcript { preview, .. } = &seen[0] {
        assert!(preview.is_empty());
    }
}

#[test]
fn test_cancelled_run_aborts_decode_and_skips_finish() {
    let dir = TempDir::new().unwrap();
    let path = write_wav(&dir);

    let runtime = ScriptedRuntime::new(
        vec![event(0, "Hello"), event(0, "Hello world")],
        vec![segment(0.0, 1.0, "Hello world")],
    );
    let controls = runtime.controls_seen.clone();
    let mut engine = Engine::new();
    engine.install_runtime("tiny", Box::new(runtime));

    let cancel = CancellationToken::new();
    cancel.cancel();

    let (seen, sink) = collect_events();
    engine
        .transcribe_file(&Config::default(), &path, &cancel, &sink)
        .unwrap();

    // The first callback answered Abort and nothing was published
    assert_eq!(controls.lock().unwrap().as_slice(), &[DecodeControl::Abort]);
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn test_early_stop_signal_reaches_runtime() {
    let dir = TempDir::new().unwrap();
    let path = write_wav(&dir);

    // Degenerate window: repetitive tokens past the check window
    let mut bad = event(0, "la la la la");
    bad.tokens = vec![9; 80];

    let runtime = ScriptedRuntime::new(vec![bad, event(1, "fine")], vec![]);
    let controls = runtime.controls_seen.clone();
    let mut engine = Engine::new();
    engine.install_runtime("tiny", Box::new(runtime));

    let (_seen, sink) = collect_events();
    engine
        .transcribe_file(
            &Config::default(),
            &path,
            &CancellationToken::new(),
            &sink,
        )
        .unwrap();

    let controls = controls.lock().unwrap();
    assert_eq!(controls[0], DecodeControl::Stop);
    assert_eq!(controls[1], DecodeControl::Continue);
}

#[test]
fn test_runtime_failure_propagates() {
    let dir = TempDir::new().unwrap();
    let path = write_wav(&dir);

    let mut engine = Engine::new();
    engine.install_runtime("tiny", Box::new(FailingRuntime));

    let (seen, sink) = collect_events();
    let err = engine
        .transcribe_file(
            &Config::default(),
            &path,
            &CancellationToken::new(),
            &sink,
        )
        .unwrap_err();

    assert!(matches!(err, EngineError::Transcribe(_)));
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn test_missing_audio_file_is_file_access_error() {
    let mut engine = Engine::new();
    engine.install_runtime("tiny", Box::new(ScriptedRuntime::new(vec![], vec![])));

    let (_seen, sink) = collect_events();
    let err = engine
        .transcribe_file(
            &Config::default(),
            Path::new("/nonexistent/audio.wav"),
            &CancellationToken::new(),
            &sink,
        )
        .unwrap_err();

    assert!(matches!(err, EngineError::FileAccess { .. }));
}

#[test]
fn test_clear_runtime() {
    let mut engine = Engine::new();
    engine.install_runtime("tiny", Box::new(ScriptedRuntime::new(vec![], vec![])));
    engine.clear_runtime();
    assert!(!engine.is_loaded());
    assert_eq!(engine.loaded_variant(), None);
}

/// Counting runtime for exercising install/replace semantics.
struct CountingRuntime(Arc<AtomicUsize>);

impl Drop for CountingRuntime {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl SpeechRuntime for CountingRuntime {
    fn prewarm(&mut self) -> Result<(), EngineError> {
        Ok(())
    }
    fn load(&mut self) -> Result<(), EngineError> {
        Ok(())
    }
    fn transcribe(
        &mut self,
        _samples: &[f32],
        _options: &DecodeOptions,
        _on_event: DecodeCallback<'_>,
    ) -> Result<Vec<Segment>, EngineError> {
        Ok(Vec::new())
    }
}

#[test]
fn test_install_replaces_previous_runtime() {
    let drops = Arc::new(AtomicUsize::new(0));
    let mut engine = Engine::new();

    engine.install_runtime("tiny", Box::new(CountingRuntime(drops.clone())));
    engine.install_runtime("base", Box::new(CountingRuntime(drops.clone())));

    assert_eq!(drops.load(Ordering::SeqCst), 1);
    assert_eq!(engine.loaded_variant(), Some("base"));
}
