use std::io::Write;

use clap::Parser;
use tessera_cli::commands::Session;
use tessera_cli::config::Cli;
use tessera_logging::{TenantContextGuard, TesseraSubscriberBuilder};
use tessera_storage::open_backend;
use tracing::warn;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    let _log_guard = TesseraSubscriberBuilder::new()
        .with_config(config.logging)
        .init()?;
    let _tenant = TenantContextGuard::new(&cli.tenant);

    let backend = open_backend(&config.storage).await?;
    let session = Session::new(backend.clone(), &cli.tenant, cli.resource_type());

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let result = session.run(cli.command, &mut out).await;
    out.flush()?;

    if let Err(e) = backend.shutdown().await {
        warn!(error = %e, "backend shutdown failed");
    }
    result
}
