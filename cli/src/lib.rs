//! Command-line control surface for the murmur daemon.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "murmurctl")]
#[command(about = "Murmur CLI - offline Whisper transcription")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the transcription daemon
    Start,
    /// Stop the transcription daemon
    Stop,
    /// Show daemon status
    Status,
    /// List available models
    Models,
    /// Download (if needed) and load a model
    Load {
        /// Model variant, e.g. "base", "small.en"
        model: String,
        /// Discard any cached copy and download again
        #[arg(long)]
        force: bool,
    },
    /// Delete a model from the local cache
    Delete {
        /// Model variant to delete
        model: String,
    },
    /// Show or set the source language
    Language {
        /// Language code (e.g. "en", "fr") or "auto"; omit to show
        code: Option<String>,
    },
    /// Set the decoding task
    Task {
        /// "transcribe" or "translate"
        task: String,
    },
    /// Transcribe an audio file and print the transcript
    Transcribe {
        /// Path to a wav/flac/mp3 file
        file: PathBuf,
        /// Print segment timestamps
        #[arg(long)]
        timestamps: bool,
    },
    /// Control live microphone transcription
    Stream {
        #[command(subcommand)]
        action: StreamAction,
    },
}

#[derive(Subcommand)]
enum StreamAction {
    /// Start listening and print segments as they confirm
    Start,
    /// Stop listening
    Stop,
}

/// Parse arguments and dispatch.
pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start => commands::start().await,
        Commands::Stop => commands::stop().await,
        Commands::Status => commands::status().await,
        Commands::Models => commands::models().await,
        Commands::Load { model, force } => commands::load(model, force).await,
        Commands::Delete { model } => commands::delete(model).await,
        Commands::Language { code } => commands::language(code).await,
        Commands::Task { task } => commands::task(task).await,
        Commands::Transcribe { file, timestamps } => commands::transcribe(file, timestamps).await,
        Commands::Stream { action } => match action {
            StreamAction::Start => commands::stream_start().await,
            StreamAction::Stop => commands::stream_stop().await,
        },
    }
}
