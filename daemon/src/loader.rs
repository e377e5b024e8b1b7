//! Model acquisition and load sequencing.
//!
//! A load walks the phases Unloaded → Downloading → Downloaded → Prewarming
//! → Loading → Loaded, strictly forward. A prewarm failure routes back
//! through a forced redownload exactly once; any other failure (or a second
//! prewarm failure) resets to Unloaded. The prewarm phase has no real
//! progress signal, so displayed progress is simulated (see [`progress`]).

use crate::config::ComputeConfig;
use crate::error::EngineError;
use crate::models::ModelManager;
use crate::progress;
use crate::runtime::{SpeechRuntime, WhisperRuntime};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Lifecycle phase of the selected model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelPhase {
    Unloaded,
    Downloading,
    Downloaded,
    Prewarming,
    Loading,
    Loaded,
}

/// Share of the progress bar the download occupies.
const DOWNLOAD_PROGRESS_RATIO: f32 = 0.7;

/// Displayed progress converges to this while prewarming.
const PREWARM_PROGRESS_TARGET: f32 = 0.9;

/// Upper bound on expected prewarm duration (first load compiles kernels).
const PREWARM_MAX_TIME: Duration = Duration::from_secs(240);

/// Receives (phase, displayed fraction) updates during a load.
pub type ProgressSink = Arc<dyn Fn(ModelPhase, f32) + Send + Sync>;

/// Result of a load that ran to completion or was superseded.
pub enum LoadOutcome {
    Loaded(Box<dyn SpeechRuntime>),
    /// The cancellation token fired; state is left Unloaded and no events
    /// beyond the last phase already reported are emitted.
    Cancelled,
}

/// Creates the speech runtime for a downloaded weights file.
pub trait RuntimeFactory: Send + Sync {
    fn create(&self, weights: &Path) -> Result<Box<dyn SpeechRuntime>, EngineError>;
}

/// Production factory backed by whisper.cpp.
pub struct WhisperFactory {
    pub compute: ComputeConfig,
}

impl RuntimeFactory for WhisperFactory {
    fn create(&self, weights: &Path) -> Result<Box<dyn SpeechRuntime>, EngineError> {
        Ok(Box::new(WhisperRuntime::new(
            weights,
            self.compute.wants_gpu(),
        )?))
    }
}

/// Run the full load sequence for a model variant.
///
/// At most one load may be in flight per engine; callers serialize by
/// cancelling the previous load's token before starting a new one.
pub async fn load_model(
    manager: &ModelManager,
    factory: &dyn RuntimeFactory,
    variant: &str,
    force_redownload: bool,
    cancel: &CancellationToken,
    on_progress: ProgressSink,
) -> Result<LoadOutcome, EngineError> {
    let mut force = force_redownload;
    loop {
        match load_once(manager, factory, variant, force, cancel, on_progress.clone()).await {
            Ok(outcome) => return Ok(outcome),
            Err(EngineError::Prewarm(msg)) if !force => {
                warn!(
                    variant = variant,
                    error = %msg,
                    "Prewarm failed, retrying once with a forced redownload"
                );
                force = true;
            }
            Err(e) => {
                on_progress(ModelPhase::Unloaded, 0.0);
                return Err(e);
            }
        }
    }
}

async fn load_once(
    manager: &ModelManager,
    factory: &dyn RuntimeFactory,
    variant: &str,
    force: bool,
    cancel: &CancellationToken,
    on_progress: ProgressSink,
) -> Result<LoadOutcome, EngineError> {
    info!(variant = variant, force = force, "Loading model");

    // Download (or reuse the cache), scaled to the first part of the bar
    let download_sink = on_progress.clone();
    let ensure = manager.ensure_model(variant, force, move |fraction| {
        download_sink(
            ModelPhase::Downloading,
            fraction as f32 * DOWNLOAD_PROGRESS_RATIO,
        );
    });
    let weights = tokio::select! {
        result = ensure => result?,
        () = cancel.cancelled() => return Ok(LoadOutcome::Cancelled),
    };
    on_progress(ModelPhase::Downloaded, DOWNLOAD_PROGRESS_RATIO);

    let mut runtime = factory.create(&weights)?;
    if cancel.is_cancelled() {
        return Ok(LoadOutcome::Cancelled);
    }

    // Prewarm: no incremental signal, so fake a smooth bar until it returns
    on_progress(ModelPhase::Prewarming, DOWNLOAD_PROGRESS_RATIO);
    let simulator_cancel = CancellationToken::new();
    let simulator = tokio::spawn(progress::simulate(
        DOWNLOAD_PROGRESS_RATIO,
        PREWARM_PROGRESS_TARGET,
        PREWARM_MAX_TIME,
        simulator_cancel.clone(),
        {
            let sink = on_progress.clone();
            move |fraction| sink(ModelPhase::Prewarming, fraction)
        },
    ));

    let (runtime_back, prewarm_result) = tokio::task::spawn_blocking(move || {
        let mut rt = runtime;
        let result = rt.prewarm();
        (rt, result)
    })
    .await
    .map_err(|e| EngineError::Prewarm(format!("prewarm task panicked: {e}")))?;
    runtime = runtime_back;

    simulator_cancel.cancel();
    let _ = simulator.await;

    prewarm_result?;
    if cancel.is_cancelled() {
        return Ok(LoadOutcome::Cancelled);
    }

    // Load weights into the decoder
    on_progress(
        ModelPhase::Loading,
        DOWNLOAD_PROGRESS_RATIO + PREWARM_PROGRESS_TARGET * (1.0 - DOWNLOAD_PROGRESS_RATIO),
    );
    let (runtime, load_result) = tokio::task::spawn_blocking(move || {
        let mut rt = runtime;
        let result = rt.load();
        (rt, result)
    })
    .await
    .map_err(|e| EngineError::Load(format!("load task panicked: {e}")))?;
    load_result?;

    if cancel.is_cancelled() {
        return Ok(LoadOutcome::Cancelled);
    }

    on_progress(ModelPhase::Loaded, 1.0);
    info!(variant = variant, "Model loaded");
    Ok(LoadOutcome::Loaded(runtime))
}

#[cfg(test)]
#[path = "loader_test.rs"]
mod tests;
