//! Bridge between the GUI event loop and the daemon connection.
//!
//! The tao event loop is synchronous; all gRPC traffic happens on a tokio
//! runtime on a background thread. Commands flow GUI → runtime through an
//! mpsc channel, state updates flow back as tao user events.

use std::sync::mpsc;
use std::time::Duration;

use murmur_proto::event::Event as EventKind;
use murmur_proto::murmur_client::MurmurClient;
use murmur_proto::{Empty, LoadModelRequest, ModelPhase, SetLanguageRequest};
use tao::event_loop::EventLoopProxy;
use tonic::transport::Channel;

use crate::state::{AppState, ModelChoice, Selections};

/// Events sent from the async runtime to the GUI thread.
#[derive(Debug, Clone)]
pub enum AppEvent {
    StateChanged(AppState),
    SelectionsChanged(Selections),
    ShutdownComplete,
}

/// Commands sent from the GUI thread to the async runtime.
#[derive(Debug)]
pub enum Command {
    ToggleListening,
    CancelRun,
    SelectModel(String),
    SelectLanguage(String),
    Shutdown,
}

/// User events for the tao event loop.
pub enum UserEvent {
    #[allow(dead_code)]
    TrayIcon(tray_icon::TrayIconEvent),
    Menu(tray_icon::menu::MenuEvent),
    App(AppEvent),
}

const RECONNECT_INTERVAL: Duration = Duration::from_secs(2);
const DAEMON_POLL_INTERVAL: Duration = Duration::from_millis(100);
const DAEMON_POLL_ATTEMPTS: usize = 50;

/// Spawn the tokio async runtime on a background thread.
/// Returns a sender for GUI -> async commands.
pub fn spawn_async_runtime(event_proxy: EventLoopProxy<UserEvent>) -> mpsc::Sender<Command> {
    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .expect("failed to create tokio runtime");

        rt.block_on(async_main(event_proxy, cmd_rx));
    });

    cmd_tx
}

async fn async_main(event_proxy: EventLoopProxy<UserEvent>, cmd_rx: mpsc::Receiver<Command>) {
    let socket_path = match murmur_common::dirs::socket_path() {
        Ok(p) => p,
        Err(e) => {
            tracing::error!("Failed to determine socket path: {e}");
            send_state(&event_proxy, AppState::Error(format!("Path error: {e}")));
            return;
        }
    };

    // Spawn daemon if not running
    if !murmur_common::client::is_daemon_running(&socket_path).await {
        if let Err(e) = spawn_daemon() {
            tracing::error!("Failed to spawn daemon: {e}");
            send_state(&event_proxy, AppState::Error(format!("Spawn failed: {e}")));
            return;
        }

        // Wait for daemon to be ready
        let mut connected = false;
        for _ in 0..DAEMON_POLL_ATTEMPTS {
            tokio::time::sleep(DAEMON_POLL_INTERVAL).await;
            if murmur_common::client::is_daemon_running(&socket_path).await {
                connected = true;
                break;
            }
        }
        if !connected {
            send_state(
                &event_proxy,
                AppState::Error("Daemon failed to start".into()),
            );
            return;
        }
    }

    // Main connection loop (reconnects on disconnect)
    loop {
        match run_connected(&socket_path, &event_proxy, &cmd_rx).await {
            ConnectionResult::Shutdown => break,
            ConnectionResult::Disconnected => {
                send_state(&event_proxy, AppState::Disconnected);
                tokio::time::sleep(RECONNECT_INTERVAL).await;
            }
        }
    }
}

enum ConnectionResult {
    Shutdown,
    Disconnected,
}

/// Fetch the model and language lists plus current selections.
async fn fetch_selections(client: &mut MurmurClient<Channel>) -> Option<Selections> {
    let models = client.list_models(Empty {}).await.ok()?.into_inner();
    let language = client.get_language(Empty {}).await.ok()?.into_inner();
    Some(Selections {
        model: models.selected,
        language: language.language,
        models: models
            .models
            .into_iter()
            .map(|m| ModelChoice {
                name: m.name,
                local: m.local,
                disabled: m.disabled,
            })
            .collect(),
        languages: language.available,
    })
}

async fn run_connected(
    socket_path: &std::path::PathBuf,
    event_proxy: &EventLoopProxy<UserEvent>,
    cmd_rx: &mpsc::Receiver<Command>,
) -> ConnectionResult {
    let mut client = match murmur_common::client::connect(socket_path).await {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("Failed to connect: {e}");
            return ConnectionResult::Disconnected;
        }
    };

    // Initial state + selections
    let mut listening = false;
    if let Ok(status) = client.get_status(Empty {}).await {
        let status = status.into_inner();
        let state = AppState::from_status(&status);
        listening = state == AppState::Listening;
        send_state(event_proxy, state);
    }
    if let Some(selections) = fetch_selections(&mut client).await {
        send_app_event(event_proxy, AppEvent::SelectionsChanged(selections));
    }

    // Subscribe to events
    let mut stream = match murmur_common::client::subscribe(&mut client).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("Failed to subscribe: {e}");
            return ConnectionResult::Disconnected;
        }
    };

    // Event + command processing loop
    loop {
        // Check for GUI commands (non-blocking)
        match cmd_rx.try_recv() {
            Ok(Command::Shutdown) => {
                let _ = client.shutdown(Empty {}).await;
                send_app_event(event_proxy, AppEvent::ShutdownComplete);
                return ConnectionResult::Shutdown;
            }
            Ok(Command::ToggleListening) => {
                let result = if listening {
                    client.stop_streaming(Empty {}).await
                } else {
                    client.start_streaming(Empty {}).await
                };
                if let Err(e) = result {
                    tracing::warn!("Toggle listening failed: {e}");
                }
            }
            Ok(Command::CancelRun) => {
                let _ = client.cancel_run(Empty {}).await;
            }
            Ok(Command::SelectModel(model)) => {
                let _ = client
                    .load_model(LoadModelRequest {
                        model,
                        force_redownload: false,
                    })
                    .await;
            }
            Ok(Command::SelectLanguage(language)) => {
                if client
                    .set_language(SetLanguageRequest { language })
                    .await
                    .is_ok()
                    && let Some(selections) = fetch_selections(&mut client).await
                {
                    send_app_event(event_proxy, AppEvent::SelectionsChanged(selections));
                }
            }
            Err(mpsc::TryRecvError::Empty) => {}
            Err(mpsc::TryRecvError::Disconnected) => {
                return ConnectionResult::Shutdown;
            }
        }

        // Check for daemon events (with timeout so we can poll commands)
        match tokio::time::timeout(Duration::from_millis(50), stream.message()).await {
            Ok(Ok(Some(event))) => {
                if let Some(new_state) = process_event(event) {
                    listening = new_state == AppState::Listening;
                    // A finished load changes the local-model set
                    if new_state == AppState::Ready
                        && let Some(selections) = fetch_selections(&mut client).await
                    {
                        send_app_event(event_proxy, AppEvent::SelectionsChanged(selections));
                    }
                    send_state(event_proxy, new_state);
                }
            }
            Ok(Ok(None)) | Ok(Err(_)) => {
                return ConnectionResult::Disconnected;
            }
            Err(_) => {
                // Timeout - continue loop to check commands
            }
        }
    }
}

fn process_event(event: murmur_proto::Event) -> Option<AppState> {
    match event.event? {
        EventKind::StateChange(change) => {
            let status = murmur_proto::Status {
                model_phase: change.model_phase,
                activity: change.activity,
                model: String::new(),
                language: String::new(),
                task: String::new(),
            };
            Some(AppState::from_status(&status))
        }
        EventKind::LoadProgress(progress) => {
            let phase = ModelPhase::try_from(progress.phase).unwrap_or(ModelPhase::Unloaded);
            match phase {
                ModelPhase::Loaded => Some(AppState::Ready),
                ModelPhase::Unloaded => Some(AppState::Unloaded),
                _ => Some(AppState::Loading {
                    phase: phase.label().to_string(),
                    percent: (progress.fraction * 100.0).clamp(0.0, 100.0) as u32,
                }),
            }
        }
        EventKind::Error(error) => Some(AppState::Error(error.message)),
        // Transcript contents are rendered by the CLI, not the tray
        EventKind::Transcript(_) | EventKind::RunFinished(_) => None,
    }
}

fn send_state(proxy: &EventLoopProxy<UserEvent>, state: AppState) {
    send_app_event(proxy, AppEvent::StateChanged(state));
}

fn send_app_event(proxy: &EventLoopProxy<UserEvent>, event: AppEvent) {
    let _ = proxy.send_event(UserEvent::App(event));
}

fn spawn_daemon() -> anyhow::Result<()> {
    let daemon_path = std::env::current_exe()?
        .parent()
        .ok_or_else(|| anyhow::anyhow!("No parent directory"))?
        .join("murmurd");

    if !daemon_path.exists() {
        anyhow::bail!("Daemon binary not found at: {}", daemon_path.display());
    }

    std::process::Command::new(&daemon_path)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()?;

    Ok(())
}
