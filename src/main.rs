use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    api_sniffer::cli::app::run().await
}
