use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use rune_batch_minter::config::Config;
use rune_batch_minter::esplora::EsploraClient;
use rune_batch_minter::Minter;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[clap(version)]
pub struct Cli {
    /// path to config file
    #[clap(long, value_parser)]
    config_path: PathBuf,

    /// run a single round and exit
    #[clap(long)]
    once: bool,
}

#[tokio::main]
async fn main() {
    let result = _main().await;
    result.unwrap();
}

async fn _main() -> anyhow::Result<()> {
    // Start logging setup block
    let fmt_layer = tracing_subscriber::fmt::layer();

    let http_filter = tracing_subscriber::filter::Targets::new()
        // connection pool chatter on every request
        .with_target("hyper", tracing::Level::WARN)
        .with_target("reqwest", tracing::Level::WARN)
        .with_default(tracing::Level::INFO);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(http_filter)
        .init();

    let Cli { config_path, once } = Cli::parse();

    tracing::info!("Config file {:?}", config_path);
    let config = Config::load(&config_path)?;

    let signer = config.signer()?;
    let mut settings = config.round_settings(&signer)?;
    if once {
        settings.max_rounds = Some(1);
    }
    tracing::info!(
        address = %signer.address(),
        network = %config.network,
        batch_size = settings.template.batch_size,
        "Minter configured"
    );

    let client = EsploraClient::new(
        config.esplora_url.clone(),
        Duration::from_millis(config.http_timeout_ms),
    )?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, finishing current transaction");
            signal_token.cancel();
        }
    });

    let minter = Minter::new(client.clone(), client.clone(), signer, config.retry_policy());
    let tally = minter
        .run_rounds(&settings, &client, &shutdown)
        .await
        .context("Minting stopped with an error")?;

    tracing::info!("Total {}", tally);
    Ok(())
}
