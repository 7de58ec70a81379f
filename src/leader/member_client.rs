//! Leader-side handles to members
//!
//! The coordinator and registry only see [`MemberRpc`]; the production handle
//! is [`GrpcMemberClient`], and [`LocalMemberClient`] serves a member's storage
//! in-process.

use crate::common::{Error, Result};
use crate::member::io_mode::IoMode;
use crate::member::storage::DiskStorage;
use crate::proto::member_service_client::MemberServiceClient;
use crate::proto::*;
use bytes::Bytes;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};

/// Calls the leader makes on a member (the RPC contract minus registration).
#[tonic::async_trait]
pub trait MemberRpc: Send + Sync {
    /// Store `body` under `key`; `Err(Rejected)` when the member refused it.
    async fn replicate(&self, key: &str, body: Bytes) -> Result<()>;

    /// `Ok(None)` when the member does not hold `key`.
    async fn fetch(&self, key: &str) -> Result<Option<Bytes>>;

    /// `Ok(true)` when the member deleted `key`.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Message count reported by a healthy member.
    async fn health_check(&self) -> Result<u64>;
}

/// Creates the RPC handle owned by a registry entry.
pub trait MemberConnector: Send + Sync {
    fn connect(&self, member_id: &str, host: &str, port: u16) -> Result<Arc<dyn MemberRpc>>;
}

/// gRPC handle with a bounded timeout on every call
#[derive(Debug, Clone)]
pub struct GrpcMemberClient {
    member_id: String,
    client: MemberServiceClient<Channel>,
    timeout: Duration,
}

impl GrpcMemberClient {
    /// Build a lazily connecting client; nothing is dialed until the first call.
    pub fn connect_lazy(member_id: &str, host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let endpoint = Endpoint::from_shared(member_uri(host, port))?
            .connect_timeout(timeout)
            .tcp_nodelay(true);

        Ok(Self {
            member_id: member_id.to_string(),
            client: MemberServiceClient::new(endpoint.connect_lazy()),
            timeout,
        })
    }

    async fn call<T, F>(&self, op: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<tonic::Response<T>, tonic::Status>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(resp)) => Ok(resp.into_inner()),
            Ok(Err(status)) => Err(Error::Grpc(status)),
            Err(_) => Err(Error::Timeout(format!(
                "{} on {} after {:?}",
                op, self.member_id, self.timeout
            ))),
        }
    }
}

fn member_uri(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("http://[{}]:{}", host, port)
    } else {
        format!("http://{}:{}", host, port)
    }
}

#[tonic::async_trait]
impl MemberRpc for GrpcMemberClient {
    async fn replicate(&self, key: &str, body: Bytes) -> Result<()> {
        let mut client = self.client.clone();
        let req = ReplicateRequest {
            key: key.to_string(),
            body,
        };
        let resp = self.call("replicate", client.replicate(req)).await?;
        if resp.success {
            Ok(())
        } else {
            Err(Error::Rejected {
                member: self.member_id.clone(),
                reason: resp.error,
            })
        }
    }

    async fn fetch(&self, key: &str) -> Result<Option<Bytes>> {
        let mut client = self.client.clone();
        let req = FetchRequest {
            key: key.to_string(),
        };
        let resp = self.call("fetch", client.fetch(req)).await?;
        Ok(resp.found.then_some(resp.body))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut client = self.client.clone();
        let req = DeleteRequest {
            key: key.to_string(),
        };
        let resp = self.call("delete", client.delete(req)).await?;
        Ok(resp.success)
    }

    async fn health_check(&self) -> Result<u64> {
        let mut client = self.client.clone();
        let resp = self
            .call("health_check", client.health_check(HealthCheckRequest {}))
            .await?;
        if resp.healthy {
            Ok(resp.message_count)
        } else {
            Err(Error::Rejected {
                member: self.member_id.clone(),
                reason: "member reports unhealthy".into(),
            })
        }
    }
}

/// Dials members over gRPC
#[derive(Debug, Clone)]
pub struct GrpcConnector {
    timeout: Duration,
}

impl GrpcConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl MemberConnector for GrpcConnector {
    fn connect(&self, member_id: &str, host: &str, port: u16) -> Result<Arc<dyn MemberRpc>> {
        let client = GrpcMemberClient::connect_lazy(member_id, host, port, self.timeout)?;
        Ok(Arc::new(client))
    }
}

/// A member whose storage lives in the leader process
pub struct LocalMemberClient {
    storage: Arc<DiskStorage>,
}

impl LocalMemberClient {
    pub fn new(storage: Arc<DiskStorage>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Arc<DiskStorage> {
        &self.storage
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&DiskStorage) -> Result<T> + Send + 'static,
    {
        let storage = self.storage.clone();
        tokio::task::spawn_blocking(move || f(&storage))
            .await
            .map_err(|e| Error::Internal(format!("storage task failed: {}", e)))?
    }
}

#[tonic::async_trait]
impl MemberRpc for LocalMemberClient {
    async fn replicate(&self, key: &str, body: Bytes) -> Result<()> {
        let key = key.to_string();
        self.blocking(move |s| s.put(&key, body)).await
    }

    async fn fetch(&self, key: &str) -> Result<Option<Bytes>> {
        let key = key.to_string();
        match self.blocking(move |s| s.get(&key)).await {
            Ok(body) => Ok(Some(body)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        match self.blocking(move |s| s.delete(&key)).await {
            Ok(()) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn health_check(&self) -> Result<u64> {
        Ok(self.storage.count() as u64)
    }
}

/// Opens `<base_dir>/<member_id>` storage for every connected member
#[derive(Debug, Clone)]
pub struct LocalConnector {
    base_dir: PathBuf,
    io_mode: IoMode,
}

impl LocalConnector {
    pub fn new(base_dir: impl Into<PathBuf>, io_mode: IoMode) -> Self {
        Self {
            base_dir: base_dir.into(),
            io_mode,
        }
    }
}

impl MemberConnector for LocalConnector {
    fn connect(&self, member_id: &str, _host: &str, _port: u16) -> Result<Arc<dyn MemberRpc>> {
        let storage = DiskStorage::open(self.base_dir.join(member_id), self.io_mode)?;
        Ok(Arc::new(LocalMemberClient::new(Arc::new(storage))))
    }
}
