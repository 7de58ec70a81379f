//! CLI client for the leader's text protocol

use anyhow::Context;
use clap::{Parser, Subcommand};
use hatokuse::leader::protocol::{Command, Response};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

#[derive(Parser)]
#[command(name = "hatokuse")]
#[command(about = "hatokuse message store CLI")]
#[command(version)]
struct Cli {
    /// Leader client address
    #[arg(long, default_value = "127.0.0.1:5000")]
    leader: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a message
    Set {
        /// Key
        key: String,

        /// Message body (joined with single spaces)
        #[arg(required = true, num_args = 1..)]
        body: Vec<String>,
    },

    /// Read a message
    Get {
        /// Key
        key: String,
    },

    /// Delete a message
    Del {
        /// Key
        key: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let command = match cli.command {
        Commands::Set { key, body } => Command::Set {
            key,
            body: body.join(" ").into(),
        },
        Commands::Get { key } => Command::Get { key },
        Commands::Del { key } => Command::Del { key },
    };

    let stream = TcpStream::connect(&cli.leader)
        .await
        .with_context(|| format!("connecting to leader at {}", cli.leader))?;
    let (reader, mut writer) = stream.into_split();

    writer
        .write_all(format!("{}\n", command).as_bytes())
        .await?;

    let mut line = String::new();
    BufReader::new(reader).read_line(&mut line).await?;
    if line.is_empty() {
        anyhow::bail!("leader closed the connection without answering");
    }

    match Response::parse(&line)? {
        Response::Ok => println!("OK"),
        Response::Value(body) => println!("{}", String::from_utf8_lossy(&body)),
        Response::Error(reason) => {
            eprintln!("ERROR {}", reason);
            std::process::exit(1);
        }
    }

    Ok(())
}
