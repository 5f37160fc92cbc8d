#[tokio::main]
async fn main() -> anyhow::Result<()> {
    parley::run().await
}
