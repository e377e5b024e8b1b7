//! Command handlers, all speaking gRPC to the daemon.

use anyhow::{Context, Result, bail};
use murmur_proto::event::Event as EventKind;
use murmur_proto::murmur_client::MurmurClient;
use murmur_proto::{
    Activity, Empty, LoadModelRequest, ModelPhase, ModelRef, SetLanguageRequest, SetTaskRequest,
    TranscribeFileRequest,
};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tonic::transport::Channel;

const DAEMON_POLL_INTERVAL: Duration = Duration::from_millis(100);
const DAEMON_POLL_ATTEMPTS: usize = 50;

async fn connect() -> Result<MurmurClient<Channel>> {
    let socket = murmur_common::dirs::socket_path()?;
    murmur_common::client::connect(&socket)
        .await
        .context("Is the daemon running? Try `murmurctl start`")
}

/// Spawn the daemon binary if it is not already running.
pub async fn start() -> Result<()> {
    let socket = murmur_common::dirs::socket_path()?;
    if murmur_common::client::is_daemon_running(&socket).await {
        println!("Daemon is already running");
        return Ok(());
    }

    let daemon_path = std::env::current_exe()?
        .parent()
        .context("No parent directory for current executable")?
        .join("murmurd");
    if !daemon_path.exists() {
        bail!("Daemon binary not found at: {}", daemon_path.display());
    }
    tracing::info!(path = %daemon_path.display(), "Spawning daemon");

    std::process::Command::new(&daemon_path)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .context("Failed to spawn daemon")?;

    for _ in 0..DAEMON_POLL_ATTEMPTS {
        tokio::time::sleep(DAEMON_POLL_INTERVAL).await;
        if murmur_common::client::is_daemon_running(&socket).await {
            println!("Daemon started");
            return Ok(());
        }
    }
    bail!("Daemon failed to start within 5 seconds")
}

pub async fn stop() -> Result<()> {
    let mut client = connect().await?;
    client.shutdown(Empty {}).await?;
    println!("Daemon stopped");
    Ok(())
}

pub async fn status() -> Result<()> {
    let mut client = connect().await?;
    let status = client.get_status(Empty {}).await?.into_inner();

    let phase = ModelPhase::try_from(status.model_phase).unwrap_or(ModelPhase::Unloaded);
    let activity = match Activity::try_from(status.activity).unwrap_or(Activity::Idle) {
        Activity::Idle => "idle",
        Activity::Transcribing => "transcribing",
        Activity::Streaming => "listening",
    };

    println!("model:    {} ({})", status.model, phase.label());
    println!("language: {}", status.language);
    println!("task:     {}", status.task);
    println!("activity: {activity}");
    Ok(())
}

pub async fn models() -> Result<()> {
    let mut client = connect().await?;
    let list = client.list_models(Empty {}).await?.into_inner();

    for model in &list.models {
        let marker = if model.name == list.selected { "*" } else { " " };
        let location = if model.local { "local" } else { "remote" };
        let note = if model.disabled { " (disabled)" } else { "" };
        println!("{marker} {:<16} {location}{note}", model.name);
    }
    Ok(())
}

pub async fn load(model: String, force: bool) -> Result<()> {
    let mut client = connect().await?;
    let mut events = murmur_common::client::subscribe(&mut client).await?;

    client
        .load_model(LoadModelRequest {
            model: model.clone(),
            force_redownload: force,
        })
        .await?;

    // Follow progress until the load settles
    while let Some(event) = events.message().await? {
        match event.event {
            Some(EventKind::LoadProgress(progress)) => {
                let phase = ModelPhase::try_from(progress.phase).unwrap_or(ModelPhase::Unloaded);
                print!(
                    "\r\x1B[K{} {}... {:3.0}%",
                    phase.label(),
                    progress.model,
                    progress.fraction * 100.0
                );
                std::io::stdout().flush().ok();
            }
            Some(EventKind::StateChange(change)) => {
                if change.model_phase == i32::from(ModelPhase::Loaded) {
                    println!("\r\x1B[KLoaded {model}");
                    return Ok(());
                }
            }
            Some(EventKind::Error(error)) => {
                println!();
                bail!("Load failed: {}", error.message);
            }
            _ => {}
        }
    }
    bail!("Event stream ended before the load finished")
}

pub async fn delete(model: String) -> Result<()> {
    let mut client = connect().await?;
    client.delete_model(ModelRef { model: model.clone() }).await?;
    println!("Deleted {model}");
    Ok(())
}

pub async fn language(code: Option<String>) -> Result<()> {
    let mut client = connect().await?;
    match code {
        Some(code) => {
            client.set_language(SetLanguageRequest { language: code.clone() }).await?;
            println!("Language set to {code}");
        }
        None => {
            let info = client.get_language(Empty {}).await?.into_inner();
            println!("language: {}", info.language);
            println!("available: {}", info.available.join(" "));
        }
    }
    Ok(())
}

pub async fn task(task: String) -> Result<()> {
    let mut client = connect().await?;
    client.set_task(SetTaskRequest { task: task.clone() }).await?;
    println!("Task set to {task}");
    Ok(())
}

fn format_segment(segment: &murmur_proto::Segment, timestamps: bool) -> String {
    if timestamps {
        format!(
            "[{:7.2} --> {:7.2}] {}",
            segment.start,
            segment.end,
            segment.text.trim()
        )
    } else {
        segment.text.trim().to_string()
    }
}

pub async fn transcribe(file: PathBuf, timestamps: bool) -> Result<()> {
    let file = std::fs::canonicalize(&file)
        .with_context(|| format!("Cannot resolve {}", file.display()))?;

    let mut client = connect().await?;
    let mut events = murmur_common::client::subscribe(&mut client).await?;

    client
        .transcribe_file(TranscribeFileRequest {
            path: file.to_string_lossy().into_owned(),
        })
        .await?;

    let mut preview_active = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                if preview_active {
                    println!();
                }
                client.cancel_run(Empty {}).await?;
                println!("Cancelled");
                return Ok(());
            }
            message = events.message() => {
                let Some(event) = message? else {
                    bail!("Event stream ended before the run finished");
                };
                match event.event {
                    Some(EventKind::Transcript(update)) => {
                        if !update.preview.is_empty() {
                            let line = update.preview.replace('\n', " | ");
                            print!("\r\x1B[K{line}");
                            std::io::stdout().flush().ok();
                            preview_active = true;
                        }
                    }
                    Some(EventKind::RunFinished(finished)) => {
                        if preview_active {
                            print!("\r\x1B[K");
                        }
                        for segment in &finished.segments {
                            println!("{}", format_segment(segment, timestamps));
                        }
                        if let Some(t) = finished.timings {
                            eprintln!(
                                "{:.1}s audio in {:.1}s ({:.1}x realtime, {:.0} tok/s)",
                                t.audio_seconds,
                                t.inference_seconds,
                                t.speed_factor,
                                t.tokens_per_second
                            );
                        }
                        return Ok(());
                    }
                    Some(EventKind::Error(error)) => {
                        if preview_active {
                            println!();
                        }
                        bail!("Transcription failed: {}", error.message);
                    }
                    _ => {}
                }
            }
        }
    }
}

pub async fn stream_start() -> Result<()> {
    let mut client = connect().await?;
    let mut events = murmur_common::client::subscribe(&mut client).await?;

    client.start_streaming(Empty {}).await?;
    println!("Listening... (Ctrl-C to stop)");

    let mut printed_confirmed = 0usize;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                client.stop_streaming(Empty {}).await?;
                println!("\nStopped");
                return Ok(());
            }
            message = events.message() => {
                let Some(event) = message? else {
                    bail!("Event stream ended unexpectedly");
                };
                match event.event {
                    Some(EventKind::Transcript(update)) => {
                        // Newly confirmed segments scroll; the unconfirmed
                        // tail redraws in place
                        for segment in update.confirmed.iter().skip(printed_confirmed) {
                            println!("\r\x1B[K{}", segment.text.trim());
                        }
                        printed_confirmed = update.confirmed.len();
                        let tail: Vec<&str> = update
                            .unconfirmed
                            .iter()
                            .map(|s| s.text.trim())
                            .collect();
                        print!("\r\x1B[K{}", tail.join(" "));
                        std::io::stdout().flush().ok();
                    }
                    Some(EventKind::RunFinished(_)) => {
                        println!("\nStopped");
                        return Ok(());
                    }
                    Some(EventKind::Error(error)) => {
                        bail!("Streaming failed: {}", error.message);
                    }
                    _ => {}
                }
            }
        }
    }
}

pub async fn stream_stop() -> Result<()> {
    let mut client = connect().await?;
    client.stop_streaming(Empty {}).await?;
    println!("Stopped");
    Ok(())
}
