#[tokio::main]
async fn main() -> anyhow::Result<()> {
    murmur_daemon::run().await
}
