//! Leader server
//!
//! Runs the text client listener, the member-facing gRPC service, the health
//! task (heartbeat sweep + recovery probe) and the stats task until shutdown.

use crate::common::{Error, LeaderConfig, Result};
use crate::leader::coordinator::Coordinator;
use crate::leader::grpc::LeaderGrpcService;
use crate::leader::member_client::{GrpcConnector, MemberConnector};
use crate::leader::protocol::{Command, Response};
use crate::leader::registry::MemberRegistry;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::TcpListenerStream;

pub struct LeaderServer {
    config: LeaderConfig,
    registry: Arc<MemberRegistry>,
    coordinator: Arc<Coordinator>,
}

impl LeaderServer {
    /// Leader that reaches members over gRPC.
    pub fn new(config: LeaderConfig) -> Result<Self> {
        let connector = Arc::new(GrpcConnector::new(config.rpc_timeout()));
        Self::with_connector(config, connector)
    }

    pub fn with_connector(config: LeaderConfig, connector: Arc<dyn MemberConnector>) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(MemberRegistry::new(connector, config.heartbeat_timeout()));
        let coordinator = Arc::new(Coordinator::new(
            registry.clone(),
            config.tolerance,
            config.read_order,
        ));
        Ok(Self {
            config,
            registry,
            coordinator,
        })
    }

    pub fn registry(&self) -> &Arc<MemberRegistry> {
        &self.registry
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Bind both listeners and run until Ctrl-C.
    pub async fn serve(self) -> Result<()> {
        let client_listener = TcpListener::bind(self.config.client_addr).await?;
        let grpc_listener = TcpListener::bind(self.config.grpc_addr).await?;
        self.run(client_listener, grpc_listener, shutdown_signal())
            .await
    }

    /// Run on already bound listeners until `shutdown` resolves.
    pub async fn run<F>(
        self,
        client_listener: TcpListener,
        grpc_listener: TcpListener,
        shutdown: F,
    ) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::info!("Starting leader");
        tracing::info!("  Client API: {}", client_listener.local_addr()?);
        tracing::info!("  gRPC API: {}", grpc_listener.local_addr()?);
        tracing::info!("  Tolerance: {}", self.config.tolerance);
        tracing::info!("  Read order: {:?}", self.config.read_order);

        for member in &self.config.static_members {
            if let Err(e) = self.registry.register(&member.id, &member.host, member.port) {
                tracing::warn!("Static member {} not registered: {}", member.id, e);
            }
        }

        let (stop_tx, stop_rx) = watch::channel(false);

        let grpc_server = tonic::transport::Server::builder()
            .add_service(LeaderGrpcService::new(self.registry.clone()).into_server())
            .serve_with_incoming_shutdown(
                TcpListenerStream::new(grpc_listener),
                stopped(stop_rx.clone()),
            );
        let grpc_handle = tokio::spawn(grpc_server);

        let health_handle = tokio::spawn(health_task(
            self.registry.clone(),
            self.config.health_check_interval(),
            stop_rx.clone(),
        ));
        let stats_handle = tokio::spawn(stats_task(
            self.coordinator.clone(),
            self.config.stats_interval(),
            stop_rx.clone(),
        ));

        tracing::info!("✓ Leader ready");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = client_listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!("Client connected: {}", peer);
                        let coordinator = self.coordinator.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_client(stream, coordinator).await {
                                tracing::debug!("Client {} closed with error: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => tracing::error!("Accept failed: {}", e),
                },
                _ = &mut shutdown => break,
            }
        }

        tracing::info!("Shutting down leader");
        let _ = stop_tx.send(true);

        let grpc_result = grpc_handle
            .await
            .map_err(|e| Error::Internal(format!("gRPC task failed: {}", e)))?;
        if let Err(e) = grpc_result {
            tracing::error!("gRPC server error: {}", e);
        }
        let _ = health_handle.await;
        let _ = stats_handle.await;

        Ok(())
    }
}

/// Serve one client connection; each line gets exactly one response line.
pub async fn handle_client(stream: TcpStream, coordinator: Arc<Coordinator>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).split(b'\n');

    while let Some(raw) = lines.next_segment().await? {
        let line = String::from_utf8_lossy(&raw);
        let response = match Command::parse(&line) {
            Ok(None) => continue,
            Ok(Some(command)) => execute(&coordinator, command).await,
            Err(e) => Response::error(&e),
        };
        writer.write_all(format!("{}\n", response).as_bytes()).await?;
    }
    Ok(())
}

/// Run a parsed command against the coordinator.
pub async fn execute(coordinator: &Coordinator, command: Command) -> Response {
    let result = match command {
        Command::Set { key, body } => coordinator.set(&key, body).await.map(|_| Response::Ok),
        Command::Get { key } => coordinator.get(&key).await.map(Response::Value),
        Command::Del { key } => coordinator.delete(&key).await.map(|_| Response::Ok),
    };
    result.unwrap_or_else(|e| Response::error(&e))
}

async fn health_task(registry: Arc<MemberRegistry>, period: Duration, mut stop: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                registry.sweep();
                let recovered = registry.probe_unhealthy().await;
                if !recovered.is_empty() {
                    tracing::info!("Recovered members: {:?}", recovered);
                }
            }
            _ = stop.changed() => break,
        }
    }
}

async fn stats_task(coordinator: Arc<Coordinator>, period: Duration, mut stop: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => log_stats(&coordinator),
            _ = stop.changed() => break,
        }
    }
}

fn log_stats(coordinator: &Coordinator) {
    let stats = coordinator.stats();
    tracing::info!(
        "Stats: {} members ({} active), {} keys placed, tolerance {}",
        stats.members,
        stats.active,
        stats.placements,
        coordinator.tolerance()
    );
    for member in coordinator.registry().snapshot() {
        tracing::info!(
            "  {} {}:{} {} messages={} last_heartbeat={:?} ago",
            member.id,
            member.host,
            member.port,
            member.state,
            member.message_count,
            member.since_heartbeat
        );
    }
}

async fn stopped(mut stop: watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl-C"),
        Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
    }
}
