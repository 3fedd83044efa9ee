use anyhow::Result;
use clap::Parser;
use cryptdav_server::cli::Cli;
use cryptdav_server::config::{self, Config};
use tracing::info;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        if !path.exists() {
            config::generate_default_config(path)?;
            eprintln!(
                "default config written to {}; edit it and start again",
                path.display(),
            );
            if cli.config_only() {
                return Ok(());
            }
        }
    }

    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.resolve_auth();
    config.validate()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(config.log_directive().parse()?)
                .from_env()?,
        )
        .init();

    info!("starting encrypting WebDAV proxy");
    cryptdav_server::run(config).await
}
