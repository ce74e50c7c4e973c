//! Webshop daemon
//!
//! Reads the MongoDB settings from the command line and reports them.

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::FmtSubscriber;
use webshop_mongodb::Connection;
use webshopd::Args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let settings = args.settings();
    println!(
        "Mongo DB settings: [URL: {}, User: {}]",
        settings.url, settings.user
    );
    info!(
        write_ack_min = settings.write_ack_min,
        fsync = settings.fsync,
        "Write concern"
    );

    if args.ping {
        let options = settings
            .client_options()
            .await
            .with_context(|| format!("Invalid MongoDB url {}", settings.url))?;
        let connection = Connection::with_options(options, settings.pool_config())
            .with_context(|| format!("Failed to connect to {}", settings.url))?;
        connection.ping().await.context("Ping failed")?;
        info!("Connected to {}", settings.url);
    }

    println!("Done");
    Ok(())
}
