//! Error taxonomy for the transcription engine.
//!
//! Each variant maps to one stage of the model/transcription pipeline and
//! carries its own recovery policy (see the loader and controller): Init is
//! terminal, Prewarm gets one forced redownload retry, Transcribe is caught
//! per run and surfaced as a placeholder transcript.

use std::path::PathBuf;

/// Errors produced by the engine and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The speech runtime could not be constructed. Not retried.
    #[error("runtime initialization failed: {0}")]
    Init(String),

    /// A model download failed or produced a corrupt artifact.
    #[error("model download failed: {0}")]
    Download(String),

    /// Device specialization of a downloaded model failed.
    #[error("model prewarm failed: {0}")]
    Prewarm(String),

    /// Loading model weights into the runtime failed.
    #[error("model load failed: {0}")]
    Load(String),

    /// A transcription run failed. Caught per run, never fatal.
    #[error("transcription failed: {0}")]
    Transcribe(String),

    /// Local filesystem access failed (model cache scan, audio file read).
    #[error("cannot access {path}: {source}")]
    FileAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    pub fn file_access(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileAccess {
            path: path.into(),
            source,
        }
    }
}
