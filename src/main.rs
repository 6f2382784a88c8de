#![warn(clippy::all, clippy::pedantic, clippy::cargo, clippy::nursery)]

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    payment_processor::cli::main().await
}
