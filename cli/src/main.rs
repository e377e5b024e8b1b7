#[tokio::main]
async fn main() -> anyhow::Result<()> {
    murmurctl::run().await
}
