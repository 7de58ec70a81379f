//! Leader binary

use clap::{Parser, Subcommand};
use hatokuse::common::{load_static_members, load_tolerance, parse_duration, ReadOrder};
use hatokuse::{LeaderConfig, LeaderServer};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "hatokuse-leader")]
#[command(about = "hatokuse leader: membership, placement and client front end")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the leader
    Serve {
        /// Bind address for the text client protocol
        #[arg(long, default_value = "0.0.0.0:5000")]
        client_addr: String,

        /// Bind address for member gRPC
        #[arg(long, default_value = "0.0.0.0:5001")]
        grpc_addr: String,

        /// File holding `tolerance=<n>`
        #[arg(long, default_value = "./tolerance.conf")]
        tolerance_file: PathBuf,

        /// Replication factor (overrides the tolerance file)
        #[arg(long)]
        tolerance: Option<usize>,

        /// Static member list (`<id> <host> <port>` per line)
        #[arg(long, default_value = "./members.conf")]
        members_file: PathBuf,

        /// Heartbeat age after which a member is flagged unhealthy
        #[arg(long, default_value = "10s")]
        heartbeat_timeout: String,

        /// Health sweep period
        #[arg(long, default_value = "5s")]
        health_interval: String,

        /// Timeout for each call to a member
        #[arg(long, default_value = "3s")]
        rpc_timeout: String,

        /// Stats log period
        #[arg(long, default_value = "10s")]
        stats_interval: String,

        /// Order in which replicas are tried on GET
        #[arg(long, value_enum, default_value_t = ReadOrder::Shuffled)]
        read_order: ReadOrder,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Serve {
            client_addr,
            grpc_addr,
            tolerance_file,
            tolerance,
            members_file,
            heartbeat_timeout,
            health_interval,
            rpc_timeout,
            stats_interval,
            read_order,
        } => {
            // CLI value wins over the tolerance file
            let tolerance = match tolerance {
                Some(t) => t,
                None => load_tolerance(&tolerance_file)?,
            };

            let config = LeaderConfig {
                client_addr: client_addr.parse()?,
                grpc_addr: grpc_addr.parse()?,
                tolerance,
                static_members: load_static_members(&members_file)?,
                heartbeat_timeout_ms: parse_duration(&heartbeat_timeout)?.as_millis() as u64,
                health_check_interval_ms: parse_duration(&health_interval)?.as_millis() as u64,
                rpc_timeout_ms: parse_duration(&rpc_timeout)?.as_millis() as u64,
                stats_interval_secs: parse_duration(&stats_interval)?.as_secs().max(1),
                read_order,
            };

            let leader = LeaderServer::new(config)?;
            leader.serve().await?;
        }
    }

    Ok(())
}
