use super::*;
use crate::runtime::{DecodeCallback, DecodeOptions, SpeechRuntime};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

struct FakeRuntime {
    /// Blocking delay inside transcribe, to keep a run active.
    transcribe_delay: Duration,
}

impl SpeechRuntime for FakeRuntime {
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
        std::thread::sleep(self.transcribe_delay);
        Ok(vec![Segment {
            start: 0.0,
            end: 1.0,
            text: "done".to_string(),
        }])
    }
}

struct FakeFactory {
    prewarm_delay: Duration,
    transcribe_delay: Duration,
}

impl FakeFactory {
    fn instant() -> Arc<Self> {
        Arc::new(Self {
            prewarm_delay: Duration::ZERO,
            transcribe_delay: Duration::ZERO,
        })
    }
}

impl RuntimeFactory for FakeFactory {
    fn create(&self, _weights: &Path) -> Result<Box<dyn SpeechRuntime>, EngineError> {
        if !self.prewarm_delay.is_zero() {
            std::thread::sleep(self.prewarm_delay);
        }
        Ok(Box::new(FakeRuntime {
            transcribe_delay: self.transcribe_delay,
        }))
    }
}

struct Harness {
    controller: Arc<Controller>,
    shutdown_rx: oneshot::Receiver<()>,
    _temp: TempDir,
}

fn harness_with(factory: Arc<dyn RuntimeFactory>, variants: &[&str]) -> Harness {
    let temp = TempDir::new().unwrap();
    let models = temp.path().join("models");
    std::fs::create_dir_all(&models).unwrap();
    for variant in variants {
        std::fs::write(models.join(format!("ggml-{variant}.bin")), b"weights").unwrap();
    }

    let mut config = Config::default();
    config.model.variant = variants.first().unwrap_or(&"base").to_string();

    let manager = ModelManager::with_dir(&models, "ggerganov/whisper.cpp");
    let (event_tx, _) = broadcast::channel(256);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let controller = Arc::new(Controller::new(
        config,
        temp.path().join("config.toml"),
        manager,
        factory,
        event_tx,
        shutdown_tx,
    ));
    Harness {
        controller,
        shutdown_rx,
        _temp: temp,
    }
}

fn harness() -> Harness {
    harness_with(FakeFactory::instant(), &["alpha", "beta"])
}

async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

fn write_wav(dir: &Path) -> PathBuf {
    let path = dir.join("clip.wav");
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for _ in 0..16_000 {
        writer.write_sample(1000i16).unwrap();
    }
    writer.finalize().unwrap();
    path
}

#[tokio::test]
async fn test_initial_state() {
    let h = harness();
    assert_eq!(h.controller.activity(), Activity::Idle);
    assert_eq!(h.controller.model_phase(), ModelPhase::Unloaded);

    let status = h.controller.status().await;
    assert_eq!(status.model, "alpha");
    assert_eq!(status.language, "auto");
    assert_eq!(status.task, "transcribe");
}

#[tokio::test]
async fn test_load_model_reaches_loaded() {
    let h = harness();
    let controller = h.controller.clone();

    controller.load_model(None, false).await;
    let c = controller.clone();
    wait_until("model loaded", move || {
        c.model_phase() == ModelPhase::Loaded
    })
    .await;
}

#[tokio::test]
async fn test_load_model_broadcasts_progress_and_state() {
    let h = harness();
    let controller = h.controller.clone();
    let mut rx = controller.event_sender().subscribe();

    controller.load_model(None, false).await;
    let c = controller.clone();
    wait_until("model loaded", move || {
        c.model_phase() == ModelPhase::Loaded
    })
    .await;

    let mut saw_loaded_state = false;
    let mut saw_progress = false;
    while let Ok(event) = rx.try_recv() {
        match event.event {
            Some(proto::event::Event::StateChange(sc)) => {
                if sc.model_phase == i32::from(proto::ModelPhase::Loaded) {
                    saw_loaded_state = true;
                }
            }
            Some(proto::event::Event::LoadProgress(p)) => {
                assert_eq!(p.model, "alpha");
                saw_progress = true;
            }
            _ => {}
        }
    }
    assert!(saw_loaded_state);
    assert!(saw_progress);
}

#[tokio::test]
async fn test_load_model_switches_selection_and_persists() {
    let h = harness();
    let controller = h.controller.clone();

    controller.load_model(Some("beta".to_string()), false).await;
    let c = controller.clone();
    wait_until("model loaded", move || {
        c.model_phase() == ModelPhase::Loaded
    })
    .await;

    let status = controller.status().await;
    assert_eq!(status.model, "beta");

    // Selection was written to the config file
    let saved = Config::load_from(h._temp.path().join("config.toml")).unwrap();
    assert_eq!(saved.model.variant, "beta");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_load_supersedes_first() {
    let slow = Arc::new(FakeFactory {
        prewarm_delay: Duration::from_millis(300),
        transcribe_delay: Duration::ZERO,
    });
    let h = harness_with(slow, &["alpha", "beta"]);
    let controller = h.controller.clone();

    controller.load_model(Some("alpha".to_string()), false).await;
    controller.load_model(Some("beta".to_string()), false).await;

    let c = controller.clone();
    wait_until("model loaded", move || {
        c.model_phase() == ModelPhase::Loaded
    })
    .await;

    let status = controller.status().await;
    assert_eq!(status.model, "beta");
}

#[tokio::test]
async fn test_load_failure_resets_and_broadcasts_error() {
    // Selected model is not cached and the mirror port is closed
    let temp = TempDir::new().unwrap();
    let models = temp.path().join("models");
    std::fs::create_dir_all(&models).unwrap();

    let mut config = Config::default();
    config.model.variant = "tiny".to_string();
    config.model.repo = "http://127.0.0.1:9".to_string();

    let manager = ModelManager::with_dir(&models, "http://127.0.0.1:9");
    let (event_tx, mut rx) = broadcast::channel(256);
    let (shutdown_tx, _shutdown_rx) = oneshot::channel();
    let controller = Arc::new(Controller::new(
        config,
        temp.path().join("config.toml"),
        manager,
        FakeFactory::instant(),
        event_tx,
        shutdown_tx,
    ));

    controller.load_model(None, false).await;

    let mut saw_error = false;
    for _ in 0..500 {
        match tokio::time::timeout(Duration::from_millis(20), rx.recv()).await {
            Ok(Ok(event)) => {
                if matches!(event.event, Some(proto::event::Event::Error(_))) {
                    saw_error = true;
                    break;
                }
            }
            Ok(Err(_)) => break,
            Err(_) => {}
        }
    }
    assert!(saw_error);
    assert_eq!(controller.model_phase(), ModelPhase::Unloaded);
}

#[tokio::test]
async fn test_transcribe_without_model_is_rejected() {
    let h = harness();
    let err = h
        .controller
        .transcribe_file(PathBuf::from("/tmp/x.wav"))
        .await
        .unwrap_err();
    assert!(err.contains("No model loaded"));
}

#[tokio::test]
async fn test_transcribe_file_runs_to_completion() {
    let h = harness();
    let controller = h.controller.clone();
    let path = write_wav(h._temp.path());

    controller.load_model(None, false).await;
    let c = controller.clone();
    wait_until("model loaded", move || {
        c.model_phase() == ModelPhase::Loaded
    })
    .await;

    let mut rx = controller.event_sender().subscribe();
    controller.transcribe_file(path).await.unwrap();
    assert_eq!(controller.activity(), Activity::Transcribing);

    let c = controller.clone();
    wait_until("run finished", move || c.activity() == Activity::Idle).await;

    let mut saw_finished = false;
    while let Ok(event) = rx.try_recv() {
        if let Some(proto::event::Event::RunFinished(finished)) = event.event {
            assert_eq!(finished.segments.len(), 1);
            assert_eq!(finished.segments[0].text, "done");
            saw_finished = true;
        }
    }
    assert!(saw_finished);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_run_is_rejected_as_busy() {
    let slow = Arc::new(FakeFactory {
        prewarm_delay: Duration::ZERO,
        transcribe_delay: Duration::from_millis(500),
    });
    let h = harness_with(slow, &["alpha"]);
    let controller = h.controller.clone();
    let path = write_wav(h._temp.path());

    controller.load_model(None, false).await;
    let c = controller.clone();
    wait_until("model loaded", move || {
        c.model_phase() == ModelPhase::Loaded
    })
    .await;

    controller.transcribe_file(path.clone()).await.unwrap();

    let err = controller.transcribe_file(path).await.unwrap_err();
    assert!(err.contains("already running"));
    let err = controller.start_streaming().await.unwrap_err();
    assert!(err.contains("already running"));

    controller.cancel_run();
    let c = controller.clone();
    wait_until("run cancelled", move || c.activity() == Activity::Idle).await;
}

#[tokio::test]
async fn test_transcribe_failure_publishes_placeholder() {
    let h = harness();
    let controller = h.controller.clone();

    controller.load_model(None, false).await;
    let c = controller.clone();
    wait_until("model loaded", move || {
        c.model_phase() == ModelPhase::Loaded
    })
    .await;

    let mut rx = controller.event_sender().subscribe();
    // Missing file: the run fails but the daemon stays up
    controller
        .transcribe_file(PathBuf::from("/nonexistent/audio.wav"))
        .await
        .unwrap();

    let c = controller.clone();
    wait_until("run finished", move || c.activity() == Activity::Idle).await;

    let mut saw_placeholder = false;
    let mut saw_error = false;
    while let Ok(event) = rx.try_recv() {
        match event.event {
            Some(proto::event::Event::Transcript(update)) => {
                if update.preview.contains("Could not read") {
                    saw_placeholder = true;
                }
            }
            Some(proto::event::Event::Error(_)) => saw_error = true,
            _ => {}
        }
    }
    assert!(saw_placeholder);
    assert!(saw_error);
}

#[tokio::test]
async fn test_language_selection() {
    let h = harness();

    h.controller.set_language("FR").await.unwrap();
    let (language, available) = h.controller.get_language_info().await;
    assert_eq!(language, "fr");
    assert!(available.contains(&"auto".to_string()));

    let err = h.controller.set_language("tlh").await.unwrap_err();
    assert!(err.contains("Unsupported"));
}

#[tokio::test]
async fn test_task_selection() {
    let h = harness();

    h.controller.set_task("translate").await.unwrap();
    assert_eq!(h.controller.status().await.task, "translate");

    assert!(h.controller.set_task("summarize").await.is_err());
}

#[tokio::test]
async fn test_delete_loaded_model_unloads_it() {
    let h = harness();
    let controller = h.controller.clone();

    controller.load_model(None, false).await;
    let c = controller.clone();
    wait_until("model loaded", move || {
        c.model_phase() == ModelPhase::Loaded
    })
    .await;

    controller.delete_model("alpha").await.unwrap();
    assert_eq!(controller.model_phase(), ModelPhase::Unloaded);

    let (models, _) = controller.list_models().await;
    let alpha = models.iter().find(|m| m.name == "alpha");
    assert!(alpha.is_none() || !alpha.unwrap().local);
}

#[tokio::test]
async fn test_stop_streaming_when_idle_is_rejected() {
    let h = harness();
    assert!(h.controller.stop_streaming().is_err());
}

#[tokio::test]
async fn test_cancel_without_run_is_noop() {
    let h = harness();
    h.controller.cancel_run();
    assert_eq!(h.controller.activity(), Activity::Idle);
}

#[tokio::test]
async fn test_shutdown_signals_server() {
    let h = harness();
    h.controller.shutdown().await;
    assert!(h.shutdown_rx.await.is_ok());
}
