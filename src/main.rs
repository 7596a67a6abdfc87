// ABOUTME: Binary entrypoint; all behavior lives in the library

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    webpilot::cli::app::run().await
}
