#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rtspcast_lib::run().await
}
