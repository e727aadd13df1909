mod config;
mod models;
mod tour;

use anyhow::Result;
use clap::Parser;
use cqlkit::Cluster;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "driver-tour")]
#[command(about = "Runs sync, async, callback, batch and object-mapper queries against a CQL cluster")]
struct Args {
    #[arg(short, long, default_value = "config/driver-tour.yaml")]
    config: String,

    /// Overrides cluster.driver (memory, scylla, cassandra)
    #[arg(short, long)]
    driver: Option<String>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = config::load_config(&args.config)?;
    if let Some(driver) = args.driver {
        config.cluster.driver = driver;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "driver_tour={level},cqlkit={level}",
                    level = config.observability.log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if args.print_config {
        println!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    config.cluster.validate()?;
    info!(
        "Starting driver tour: driver={} hosts={:?}",
        config.cluster.driver, config.cluster.hosts
    );

    let cluster = Cluster::from_config(&config.cluster)?;
    let session = cluster.connect(None).await?;

    let outcome = tour::run(&session, &config).await;
    if let Err(e) = &outcome {
        error!("Tour failed: {}", e);
    }

    if config.observability.print_metrics {
        println!("{}", cqlkit::metrics::gather_text());
    }

    session.close().await;
    info!("Session closed");
    outcome
}
