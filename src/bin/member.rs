//! Member binary

use clap::{Parser, Subcommand};
use hatokuse::common::parse_duration;
use hatokuse::{IoMode, MemberNodeConfig, MemberServer};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "hatokuse-member")]
#[command(about = "hatokuse member: stores replicated messages on local disk")]
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
    /// Start a member and register it with the leader
    Serve {
        /// Member ID (unique in the cluster)
        #[arg(long)]
        id: String,

        /// Bind address for member gRPC
        #[arg(long, default_value = "0.0.0.0:5002")]
        grpc_addr: String,

        /// Host the leader should use to reach this member
        #[arg(long, default_value = "127.0.0.1")]
        advertise_host: String,

        /// Leader gRPC endpoint
        #[arg(long, default_value = "http://127.0.0.1:5001")]
        leader: String,

        /// Base data directory (messages go to <data>/<id>)
        #[arg(long, default_value = "./data/members")]
        data: PathBuf,

        /// Write strategy
        #[arg(long, value_enum, default_value_t = IoMode::Buffered)]
        io_mode: IoMode,

        /// Heartbeat period
        #[arg(long, default_value = "5s")]
        heartbeat_interval: String,

        /// Timeout for calls to the leader
        #[arg(long, default_value = "3s")]
        rpc_timeout: String,

        /// Stats log period
        #[arg(long, default_value = "10s")]
        stats_interval: String,
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
            id,
            grpc_addr,
            advertise_host,
            leader,
            data,
            io_mode,
            heartbeat_interval,
            rpc_timeout,
            stats_interval,
        } => {
            let config = MemberNodeConfig {
                member_id: id,
                grpc_addr: grpc_addr.parse()?,
                advertise_host,
                leader_addr: leader,
                data_dir: data,
                io_mode,
                heartbeat_interval_ms: parse_duration(&heartbeat_interval)?.as_millis() as u64,
                rpc_timeout_ms: parse_duration(&rpc_timeout)?.as_millis() as u64,
                stats_interval_secs: parse_duration(&stats_interval)?.as_secs().max(1),
            };

            let member = MemberServer::open(config)?;
            member.serve().await?;
        }
    }

    Ok(())
}
