use anyhow::Result;
use bittorrent_dl::cli::Cli;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping download");
            on_interrupt.cancel();
        }
    });

    // Parse CLI arguments and run
    let cli = Cli::parse();
    cli.run(cancel).await?;

    Ok(())
}
