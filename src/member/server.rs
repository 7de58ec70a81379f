//! Member server
//!
//! Serves the member gRPC API over local storage, registers with the leader,
//! heartbeats with the stored message count and unregisters on shutdown.

use crate::common::{retry_with_backoff, Error, MemberNodeConfig, Result};
use crate::member::grpc::MemberGrpcService;
use crate::member::storage::DiskStorage;
use crate::proto::leader_service_client::LeaderServiceClient;
use crate::proto::*;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Channel, Endpoint};

const REGISTER_ATTEMPTS: usize = 5;
const REGISTER_BACKOFF: Duration = Duration::from_millis(500);

pub struct MemberServer {
    config: MemberNodeConfig,
    storage: Arc<DiskStorage>,
}

impl MemberServer {
    /// Open `<data_dir>/<member_id>` with the configured I/O mode.
    pub fn open(config: MemberNodeConfig) -> Result<Self> {
        let storage = DiskStorage::open(config.storage_dir(), config.io_mode)?;
        Ok(Self {
            config,
            storage: Arc::new(storage),
        })
    }

    pub fn storage(&self) -> &Arc<DiskStorage> {
        &self.storage
    }

    /// Bind the gRPC address and run until Ctrl-C.
    pub async fn serve(self) -> Result<()> {
        let listener = TcpListener::bind(self.config.grpc_addr).await?;
        self.run(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
        })
        .await
    }

    /// Run on an already bound listener until `shutdown` resolves.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener.local_addr()?;
        let id = self.config.member_id.clone();

        tracing::info!("Starting member: {}", id);
        tracing::info!("  gRPC API: {}", local_addr);
        tracing::info!("  Leader: {}", self.config.leader_addr);
        tracing::info!("  Data path: {}", self.storage.dir().display());
        tracing::info!("  I/O mode: {}", self.storage.io_mode());
        tracing::info!("  Stored messages: {}", self.storage.count());

        let (stop_tx, mut stop_rx) = watch::channel(false);

        let service = MemberGrpcService::new(id.clone(), self.storage.clone());
        let mut grpc_stop = stop_rx.clone();
        let grpc_server = tonic::transport::Server::builder()
            .add_service(service.into_server())
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                let _ = grpc_stop.wait_for(|stopped| *stopped).await;
            });
        let grpc_handle = tokio::spawn(grpc_server);

        let leader = Arc::new(LeaderLink::new(
            &self.config,
            &self.config.advertise_host,
            local_addr.port(),
        )?);

        match retry_with_backoff(|| leader.register(), REGISTER_ATTEMPTS, REGISTER_BACKOFF).await {
            Ok(()) => tracing::info!("✓ Registered with leader"),
            Err(e) => tracing::error!("Registration failed, will retry on heartbeat: {}", e),
        }

        let heartbeat_handle = tokio::spawn(heartbeat_task(
            leader.clone(),
            self.storage.clone(),
            self.config.heartbeat_interval(),
            stop_rx.clone(),
        ));
        let stats_interval = self.config.stats_interval();
        let stats_storage = self.storage.clone();
        let stats_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(stats_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let stats = stats_storage.stats();
                        tracing::info!(
                            "Stats: {} messages ({} cached), mode {}, dir {}",
                            stats.message_count,
                            stats.cached,
                            stats.io_mode,
                            stats_storage.dir().display()
                        );
                    }
                    _ = stop_rx.changed() => break,
                }
            }
        });

        tracing::info!("✓ Member ready");
        shutdown.await;

        tracing::info!("Shutting down member {}", id);
        match leader.unregister().await {
            Ok(true) => tracing::info!("Unregistered from leader"),
            Ok(false) => tracing::warn!("Leader did not know member {}", id),
            Err(e) => tracing::warn!("Unregister failed: {}", e),
        }

        let _ = stop_tx.send(true);
        let grpc_result = grpc_handle
            .await
            .map_err(|e| Error::Internal(format!("gRPC task failed: {}", e)))?;
        if let Err(e) = grpc_result {
            tracing::error!("gRPC server error: {}", e);
        }
        let _ = heartbeat_handle.await;
        let _ = stats_handle.await;

        Ok(())
    }
}

async fn heartbeat_task(
    leader: Arc<LeaderLink>,
    storage: Arc<DiskStorage>,
    period: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match leader.heartbeat(storage.count() as u64).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!("Heartbeat not acknowledged, registering again");
                        if let Err(e) = leader.register().await {
                            tracing::warn!("Re-registration failed: {}", e);
                        }
                    }
                    Err(e) => tracing::warn!("Heartbeat failed: {}", e),
                }
            }
            _ = stop.changed() => break,
        }
    }
}

/// Member-side handle on the leader's gRPC service
struct LeaderLink {
    client: LeaderServiceClient<Channel>,
    timeout: Duration,
    member_id: String,
    host: String,
    port: u16,
}

impl LeaderLink {
    fn new(config: &MemberNodeConfig, host: &str, port: u16) -> Result<Self> {
        let endpoint = Endpoint::from_shared(config.leader_addr.clone())?
            .connect_timeout(config.rpc_timeout());
        Ok(Self {
            client: LeaderServiceClient::new(endpoint.connect_lazy()),
            timeout: config.rpc_timeout(),
            member_id: config.member_id.clone(),
            host: host.to_string(),
            port,
        })
    }

    async fn call<T, F>(&self, op: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<tonic::Response<T>, tonic::Status>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(resp)) => Ok(resp.into_inner()),
            Ok(Err(status)) => Err(Error::Grpc(status)),
            Err(_) => Err(Error::Timeout(format!("{} after {:?}", op, self.timeout))),
        }
    }

    async fn register(&self) -> Result<()> {
        let mut client = self.client.clone();
        let req = RegisterRequest {
            member_id: self.member_id.clone(),
            host: self.host.clone(),
            port: u32::from(self.port),
        };
        let resp = self.call("register", client.register_member(req)).await?;
        if resp.accepted {
            Ok(())
        } else {
            Err(Error::Rejected {
                member: self.member_id.clone(),
                reason: resp.error,
            })
        }
    }

    async fn heartbeat(&self, message_count: u64) -> Result<bool> {
        let mut client = self.client.clone();
        let req = HeartbeatRequest {
            member_id: self.member_id.clone(),
            message_count,
        };
        let resp = self.call("heartbeat", client.heartbeat(req)).await?;
        Ok(resp.acknowledged)
    }

    async fn unregister(&self) -> Result<bool> {
        let mut client = self.client.clone();
        let req = UnregisterRequest {
            member_id: self.member_id.clone(),
        };
        let resp = self
            .call("unregister", client.unregister_member(req))
            .await?;
        Ok(resp.success)
    }
}
