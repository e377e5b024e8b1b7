//! Generated gRPC types for the murmur daemon protocol.

tonic::include_proto!("murmur");

impl ModelPhase {
    /// Human-readable phase label for status lines.
    pub fn label(&self) -> &'static str {
        match self {
            ModelPhase::Unloaded => "Unloaded",
            ModelPhase::Downloading => "Downloading",
            ModelPhase::Downloaded => "Downloaded",
            ModelPhase::Prewarming => "Specializing",
            ModelPhase::Loading => "Loading",
            ModelPhase::Loaded => "Loaded",
        }
    }
}
