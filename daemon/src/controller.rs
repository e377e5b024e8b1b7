//! Controller: daemon state and coordination.
//!
//! The single application-context object. It owns the configuration, the
//! model manager, the engine (behind an async mutex held for the duration
//! of a run) and the broadcast channel gRPC subscribers fan out from.
//! Model loads are serialized cancel-and-replace: starting a new load
//! cancels and awaits the in-flight one first.

use crate::config::{Config, TaskKind};
use crate::engine::{Engine, RunEvent};
use crate::error::EngineError;
use crate::loader::{self, LoadOutcome, ModelPhase, ProgressSink, RuntimeFactory};
use crate::models::{ModelEntry, ModelManager};
use crate::runtime::{LANGUAGES, Segment, is_supported_language};
use murmur_proto as proto;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Event sender type.
pub type EventSender = broadcast::Sender<proto::Event>;

/// What the daemon is doing with audio right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Idle,
    Transcribing,
    Streaming,
}

impl From<Activity> for proto::Activity {
    fn from(activity: Activity) -> Self {
        match activity {
            Activity::Idle => proto::Activity::Idle,
            Activity::Transcribing => proto::Activity::Transcribing,
            Activity::Streaming => proto::Activity::Streaming,
        }
    }
}

impl From<ModelPhase> for proto::ModelPhase {
    fn from(phase: ModelPhase) -> Self {
        match phase {
            ModelPhase::Unloaded => proto::ModelPhase::Unloaded,
            ModelPhase::Downloading => proto::ModelPhase::Downloading,
            ModelPhase::Downloaded => proto::ModelPhase::Downloaded,
            ModelPhase::Prewarming => proto::ModelPhase::Prewarming,
            ModelPhase::Loading => proto::ModelPhase::Loading,
            ModelPhase::Loaded => proto::ModelPhase::Loaded,
        }
    }
}

fn proto_segment(segment: &Segment) -> proto::Segment {
    proto::Segment {
        start: segment.start,
        end: segment.end,
        text: segment.text.clone(),
    }
}

struct LoadHandle {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

/// Controller for daemon state management.
pub struct Controller {
    config: RwLock<Config>,
    /// Where configuration changes are persisted.
    config_path: PathBuf,
    manager: ModelManager,
    factory: Arc<dyn RuntimeFactory>,
    engine: Arc<Mutex<Engine>>,
    // Std locks: read/written synchronously from decode callbacks and
    // progress sinks, never held across an await
    activity: std::sync::RwLock<Activity>,
    model_phase: std::sync::RwLock<ModelPhase>,
    load_slot: Mutex<Option<LoadHandle>>,
    run_cancel: std::sync::Mutex<Option<CancellationToken>>,
    event_tx: EventSender,
    shutdown_tx: std::sync::Mutex<Option<oneshot::Sender<()>>>,
}

impl Controller {
    /// Create a new controller.
    pub fn new(
        config: Config,
        config_path: PathBuf,
        manager: ModelManager,
        factory: Arc<dyn RuntimeFactory>,
        event_tx: EventSender,
        shutdown_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            config_path,
            manager,
            factory,
            engine: Arc::new(Mutex::new(Engine::new())),
            activity: std::sync::RwLock::new(Activity::Idle),
            model_phase: std::sync::RwLock::new(ModelPhase::Unloaded),
            load_slot: Mutex::new(None),
            run_cancel: std::sync::Mutex::new(None),
            event_tx,
            shutdown_tx: std::sync::Mutex::new(Some(shutdown_tx)),
        }
    }

    /// Get the event sender for creating subscribers.
    pub fn event_sender(&self) -> EventSender {
        self.event_tx.clone()
    }

    /// Current model phase.
    pub fn model_phase(&self) -> ModelPhase {
        *self.model_phase.read().expect("phase lock")
    }

    /// Current activity.
    pub fn activity(&self) -> Activity {
        *self.activity.read().expect("activity lock")
    }

    /// Full status snapshot for GetStatus.
    pub async fn status(&self) -> proto::Status {
        let config = self.config.read().await;
        proto::Status {
            model_phase: proto::ModelPhase::from(self.model_phase()).into(),
            activity: proto::Activity::from(self.activity()).into(),
            model: config.model.variant.clone(),
            language: config.model.language.clone(),
            task: config.model.task.as_str().to_string(),
        }
    }

    fn persist(&self, config: &Config) {
        if let Err(e) = config.save_to(&self.config_path) {
            warn!(error = %e, "Failed to persist configuration");
        }
    }

    fn send_event(&self, event: proto::event::Event) {
        // Ignore send errors (no subscribers)
        let _ = self.event_tx.send(proto::Event { event: Some(event) });
    }

    fn set_activity(&self, activity: Activity) {
        *self.activity.write().expect("activity lock") = activity;
        self.broadcast_state();
    }

    fn set_phase(&self, phase: ModelPhase) -> bool {
        let mut current = self.model_phase.write().expect("phase lock");
        let changed = *current != phase;
        *current = phase;
        changed
    }

    fn broadcast_state(&self) {
        self.send_event(proto::event::Event::StateChange(proto::StateChange {
            model_phase: proto::ModelPhase::from(self.model_phase()).into(),
            activity: proto::Activity::from(self.activity()).into(),
        }));
    }

    fn broadcast_error(&self, message: impl Into<String>) {
        self.send_event(proto::event::Event::Error(proto::DaemonError {
            message: message.into(),
        }));
    }

    fn publish_run_event(&self, event: RunEvent) {
        match event {
            RunEvent::Transcript {
                confirmed,
                unconfirmed,
                preview,
            } => {
                self.send_event(proto::event::Event::Transcript(proto::TranscriptUpdate {
                    confirmed: confirmed.iter().map(proto_segment).collect(),
                    unconfirmed: unconfirmed.iter().map(proto_segment).collect(),
                    preview,
                }));
            }
            RunEvent::Finished { segments, timings } => {
                self.send_event(proto::event::Event::RunFinished(proto::RunFinished {
                    segments: segments.iter().map(proto_segment).collect(),
                    timings: Some(proto::RunTimings {
                        audio_seconds: timings.audio_seconds,
                        inference_seconds: timings.inference_seconds,
                        real_time_factor: timings.real_time_factor,
                        speed_factor: timings.speed_factor,
                        tokens_per_second: timings.tokens_per_second,
                        first_token_latency: timings.first_token_latency,
                    }),
                }));
            }
        }
    }

    // --- Model management -------------------------------------------------

    /// List models (catalog merged with the local cache) plus the selection.
    pub async fn list_models(&self) -> (Vec<ModelEntry>, String) {
        let selected = self.config.read().await.model.variant.clone();
        (self.manager.available_models(), selected)
    }

    /// Start loading a model variant, cancelling any in-flight load first.
    ///
    /// With `variant == None` the configured selection is (re)loaded. The
    /// call returns once the load task is started; completion is observable
    /// through the event stream.
    pub async fn load_model(self: &Arc<Self>, variant: Option<String>, force: bool) {
        let variant = match variant {
            Some(v) => {
                let mut config = self.config.write().await;
                if config.model.variant != v {
                    config.model.variant = v.clone();
                    self.persist(&config);
                }
                v
            }
            None => self.config.read().await.model.variant.clone(),
        };

        // Cancel-and-replace: at most one load in flight
        let mut slot = self.load_slot.lock().await;
        if let Some(previous) = slot.take() {
            info!("Cancelling in-flight model load");
            previous.cancel.cancel();
            let _ = previous.task.await;
        }

        // Drop the old runtime now unless a run still holds the engine; a
        // held engine gets its runtime replaced when this load installs.
        if let Ok(mut engine) = self.engine.try_lock() {
            engine.clear_runtime();
        }
        self.set_phase(ModelPhase::Unloaded);
        self.broadcast_state();

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let controller = self.clone();
        let task = tokio::spawn(async move {
            controller.run_load(variant, force, task_cancel).await;
        });

        *slot = Some(LoadHandle { cancel, task });
    }

    async fn run_load(self: Arc<Self>, variant: String, force: bool, cancel: CancellationToken) {
        let progress_controller = self.clone();
        let progress_variant = variant.clone();
        let sink: ProgressSink = Arc::new(move |phase, fraction| {
            if progress_controller.set_phase(phase) {
                progress_controller.broadcast_state();
            }
            progress_controller.send_event(proto::event::Event::LoadProgress(
                proto::LoadProgress {
                    phase: proto::ModelPhase::from(phase).into(),
                    fraction,
                    model: progress_variant.clone(),
                },
            ));
        });

        let result = loader::load_model(
            &self.manager,
            self.factory.as_ref(),
            &variant,
            force,
            &cancel,
            sink,
        )
        .await;

        match result {
            Ok(LoadOutcome::Loaded(runtime)) => {
                self.engine.lock().await.install_runtime(&variant, runtime);
                // Broadcast after install so subscribers seeing Loaded can
                // immediately start a run
                self.set_phase(ModelPhase::Loaded);
                self.broadcast_state();
            }
            Ok(LoadOutcome::Cancelled) => {
                info!(variant = %variant, "Model load superseded");
            }
            Err(e) => {
                error!(variant = %variant, error = %e, "Model load failed");
                self.set_phase(ModelPhase::Unloaded);
                self.broadcast_state();
                self.broadcast_error(e.to_string());
            }
        }
    }

    /// Load the configured model at startup if it is already cached.
    /// Never downloads on its own.
    pub async fn autoload(self: &Arc<Self>) {
        let selected = self.config.read().await.model.variant.clone();
        if self.manager.scan_local().iter().any(|v| *v == selected) {
            info!(variant = %selected, "Auto-loading cached model");
            self.load_model(None, false).await;
        } else {
            info!(variant = %selected, "Selected model not cached, waiting for load request");
        }
    }

    /// Delete a variant from the local cache. Deleting the loaded model
    /// unloads it first.
    pub async fn delete_model(&self, variant: &str) -> Result<(), String> {
        {
            let mut engine = self.engine.lock().await;
            if engine.loaded_variant() == Some(variant) {
                engine.clear_runtime();
                self.set_phase(ModelPhase::Unloaded);
                self.broadcast_state();
            }
        }
        self.manager
            .delete_model(variant)
            .map_err(|e| e.to_string())
    }

    // --- Language & task --------------------------------------------------

    /// Set the source language. Persisted immediately.
    pub async fn set_language(&self, language: &str) -> Result<(), String> {
        if !is_supported_language(language) {
            return Err(format!("Unsupported language: {language}"));
        }
        let mut config = self.config.write().await;
        config.model.language = language.to_lowercase();
        self.persist(&config);
        Ok(())
    }

    /// Get the active language and the list of available ones.
    pub async fn get_language_info(&self) -> (String, Vec<String>) {
        let language = self.config.read().await.model.language.clone();
        let available = LANGUAGES.iter().map(|l| l.to_string()).collect();
        (language, available)
    }

    /// Set the decoding task ("transcribe" or "translate").
    pub async fn set_task(&self, task: &str) -> Result<(), String> {
        let task = TaskKind::parse(task).ok_or_else(|| format!("Unknown task: {task}"))?;
        let mut config = self.config.write().await;
        config.model.task = task;
        self.persist(&config);
        Ok(())
    }

    // --- Transcription runs -----------------------------------------------

    /// Start transcribing an audio file. Rejected while another run is
    /// active or no model is loaded; progress arrives via the event stream.
    pub async fn transcribe_file(self: &Arc<Self>, path: PathBuf) -> Result<(), String> {
        if self.activity() != Activity::Idle {
            return Err("A transcription is already running".to_string());
        }
        if !self.engine.lock().await.is_loaded() {
            return Err("No model loaded".to_string());
        }

        let cancel = CancellationToken::new();
        *self.run_cancel.lock().expect("run_cancel lock") = Some(cancel.clone());
        self.set_activity(Activity::Transcribing);

        let controller = self.clone();
        tokio::spawn(async move {
            let config = controller.config.read().await.clone();
            let guard = controller.engine.clone().lock_owned().await;
            let event_controller = controller.clone();

            let result = tokio::task::spawn_blocking(move || {
                let mut engine = guard;
                engine.transcribe_file(&config, &path, &cancel, &move |event| {
                    event_controller.publish_run_event(event);
                })
            })
            .await;

            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    // Surfaced as a placeholder transcript, never a crash
                    error!(error = %e, "Transcription failed");
                    controller.publish_run_event(RunEvent::Transcript {
                        confirmed: Vec::new(),
                        unconfirmed: Vec::new(),
                        preview: placeholder_for(&e),
                    });
                    controller.broadcast_error(e.to_string());
                }
                Err(e) => {
                    error!(error = %e, "Transcription task panicked");
                    controller.broadcast_error("Transcription task panicked".to_string());
                }
            }

            controller
                .run_cancel
                .lock()
                .expect("run_cancel lock")
                .take();
            controller.set_activity(Activity::Idle);
        });

        Ok(())
    }

    /// Start the live microphone loop.
    pub async fn start_streaming(self: &Arc<Self>) -> Result<(), String> {
        if self.activity() != Activity::Idle {
            return Err("A transcription is already running".to_string());
        }
        if !self.engine.lock().await.is_loaded() {
            return Err("No model loaded".to_string());
        }

        let cancel = CancellationToken::new();
        *self.run_cancel.lock().expect("run_cancel lock") = Some(cancel.clone());
        self.set_activity(Activity::Streaming);

        let controller = self.clone();
        tokio::spawn(async move {
            let config = controller.config.read().await.clone();
            let mut guard = controller.engine.clone().lock_owned().await;
            let event_controller = controller.clone();

            let result = guard
                .run_stream(&config, cancel, &move |event| {
                    event_controller.publish_run_event(event);
                })
                .await;
            drop(guard);

            if let Err(e) = result {
                error!(error = %e, "Live transcription failed");
                controller.broadcast_error(e.to_string());
            }

            controller
                .run_cancel
                .lock()
                .expect("run_cancel lock")
                .take();
            controller.set_activity(Activity::Idle);
        });

        Ok(())
    }

    /// Stop the live microphone loop.
    pub fn stop_streaming(&self) -> Result<(), String> {
        if self.activity() != Activity::Streaming {
            return Err("Not streaming".to_string());
        }
        self.cancel_run();
        Ok(())
    }

    /// Cancel whatever run is active. Already-confirmed segments stay.
    pub fn cancel_run(&self) {
        if let Some(cancel) = self
            .run_cancel
            .lock()
            .expect("run_cancel lock")
            .take()
        {
            info!("Cancelling active run");
            cancel.cancel();
        }
    }

    /// Shut the daemon down: stop runs and loads, then signal the server.
    pub async fn shutdown(&self) {
        info!("Shutdown requested");
        self.cancel_run();
        if let Some(load) = self.load_slot.lock().await.take() {
            load.cancel.cancel();
            let _ = load.task.await;
        }
        if let Some(tx) = self.shutdown_tx.lock().expect("shutdown lock").take() {
            let _ = tx.send(());
        }
    }
}

/// User-visible stand-in text for a failed run.
fn placeholder_for(error: &EngineError) -> String {
    match error {
        EngineError::FileAccess { path, .. } => {
            format!("Could not read {}", path.display())
        }
        _ => "No transcription available.".to_string(),
    }
}

#[cfg(test)]
#[path = "controller_test.rs"]
mod tests;
