use murmur_proto::{Activity, ModelPhase, Status};

/// Application state derived from daemon status and events.
#[derive(Debug, Clone, PartialEq)]
pub enum AppState {
    /// Not connected to the daemon.
    Disconnected,
    /// Connected, no model loaded.
    Unloaded,
    /// A model load is in progress.
    Loading {
        /// Phase label, e.g. "Downloading", "Specializing".
        phase: String,
        /// Displayed completion, 0-100.
        percent: u32,
    },
    /// Model loaded, nothing running.
    Ready,
    /// A file transcription is running.
    Transcribing,
    /// Live microphone transcription is running.
    Listening,
    /// The daemon reported an error.
    Error(String),
}

impl AppState {
    /// Derive from a full status snapshot.
    pub fn from_status(status: &Status) -> Self {
        match Activity::try_from(status.activity).unwrap_or(Activity::Idle) {
            Activity::Transcribing => AppState::Transcribing,
            Activity::Streaming => AppState::Listening,
            Activity::Idle => {
                match ModelPhase::try_from(status.model_phase).unwrap_or(ModelPhase::Unloaded) {
                    ModelPhase::Loaded => AppState::Ready,
                    ModelPhase::Unloaded => AppState::Unloaded,
                    phase => AppState::Loading {
                        phase: phase.label().to_string(),
                        percent: 0,
                    },
                }
            }
        }
    }

    /// Status text shown as a disabled menu item.
    pub fn status_text(&self) -> String {
        match self {
            AppState::Disconnected => "Disconnected".to_string(),
            AppState::Unloaded => "No model loaded".to_string(),
            AppState::Loading { phase, percent } => format!("{phase}... {percent}%"),
            AppState::Ready => "Ready".to_string(),
            AppState::Transcribing => "Transcribing...".to_string(),
            AppState::Listening => "Listening".to_string(),
            AppState::Error(message) => message.clone(),
        }
    }

    /// Whether the listen toggle should be shown.
    pub fn has_toggle(&self) -> bool {
        matches!(self, AppState::Ready | AppState::Listening)
    }

    /// Label for the listen toggle.
    pub fn toggle_label(&self) -> &str {
        match self {
            AppState::Listening => "Stop Listening",
            AppState::Ready => "Start Listening",
            _ => "",
        }
    }

    /// Whether a cancellable run is active.
    pub fn can_cancel(&self) -> bool {
        matches!(self, AppState::Transcribing | AppState::Listening)
    }

    /// Whether switching models is allowed right now.
    pub fn can_switch_model(&self) -> bool {
        !matches!(self, AppState::Disconnected | AppState::Loading { .. })
    }
}

/// One selectable model in the menu.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelChoice {
    pub name: String,
    pub local: bool,
    pub disabled: bool,
}

/// Current selections plus the lists they are drawn from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selections {
    pub model: String,
    pub language: String,
    pub models: Vec<ModelChoice>,
    pub languages: Vec<String>,
}
