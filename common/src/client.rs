//! gRPC client for communicating with the murmur daemon.

use std::path::Path;

use anyhow::{Context, Result};
use hyper_util::rt::TokioIo;
use murmur_proto::Event;
use murmur_proto::murmur_client::MurmurClient;
use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;

/// Connect to the daemon via its Unix socket.
pub async fn connect(socket_path: impl AsRef<Path>) -> Result<MurmurClient<Channel>> {
    let socket_path = socket_path.as_ref().to_path_buf();

    let channel = Endpoint::try_from("http://[::]:50051")?
        .connect_with_connector(service_fn(move |_: Uri| {
            let path = socket_path.clone();
            async move {
                let stream = UnixStream::connect(path).await?;
                Ok::<_, std::io::Error>(TokioIo::new(stream))
            }
        }))
        .await
        .context("Failed to connect to daemon")?;

    Ok(MurmurClient::new(channel))
}

/// Subscribe to daemon events.
pub async fn subscribe(client: &mut MurmurClient<Channel>) -> Result<tonic::Streaming<Event>> {
    let response = client
        .subscribe(murmur_proto::Empty {})
        .await
        .context("Failed to subscribe to events")?;
    Ok(response.into_inner())
}

/// Check if the daemon is running by attempting to connect.
pub async fn is_daemon_running(socket_path: impl AsRef<Path>) -> bool {
    let socket_path = socket_path.as_ref();
    if !socket_path.exists() {
        return false;
    }
    connect(socket_path).await.is_ok()
}
