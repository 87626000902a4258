//! Cord runner
//!
//! Run with:
//! ```bash
//! CORD_TOKEN=... cargo run -p cord-client
//! ```
//!
//! Connects every shard, logs lifecycle events, and answers `!ping` with
//! `pong`. Configuration is loaded from `CORD_*` environment variables or,
//! when `CORD_CONFIG` names a file, from that file.

use anyhow::Context;
use cord_client::{Client, ClientConfig, EventData, EventKind};
use cord_common::try_init_tracing;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Initialize tracing
    if let Err(e) = try_init_tracing() {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    if let Err(e) = run().await {
        error!(error = %e, "Client stopped with an error");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    info!("Starting cord...");

    // CORD_CONFIG may itself come from .env
    let _ = dotenvy::dotenv();

    let config = match std::env::var("CORD_CONFIG") {
        Ok(path) => ClientConfig::load(&path),
        Err(_) => ClientConfig::from_env(),
    }
    .context("failed to load configuration")?;

    info!(
        api_url = %config.client.api_url,
        intents = config.client.intents.bits(),
        shard_count = ?config.client.shard_count,
        "Configuration loaded"
    );

    let client = Client::new(config)?;

    client.on(EventKind::Ready, |event| async move {
        if let EventData::Ready { user, guilds, .. } = &event.data {
            info!(
                shard_id = event.shard_id,
                user = %user.username,
                guilds = guilds.len(),
                "Ready"
            );
        }
        Ok::<(), anyhow::Error>(())
    });

    let replier = client.clone();
    client.on(EventKind::MessageCreate, move |event| {
        let client = replier.clone();
        async move {
            if let EventData::MessageCreate(message) = &event.data {
                if message.content == "!ping" {
                    client.send_message(message.channel_id, "pong").await?;
                }
            }
            Ok::<(), anyhow::Error>(())
        }
    });

    client.start().await?;

    let result = tokio::select! {
        result = client.wait() => result.map_err(anyhow::Error::from),
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            info!("Interrupt received");
            Ok(())
        }
    };

    client.shutdown().await;
    result
}
