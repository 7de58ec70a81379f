//! Member gRPC service (leader → member)

use crate::common::Error;
use crate::member::storage::DiskStorage;
use crate::proto::member_service_server::{MemberService, MemberServiceServer};
use crate::proto::*;
use std::sync::Arc;
use tonic::{Request, Response, Status};

/// Serves replicate / fetch / delete / health-check against local storage.
pub struct MemberGrpcService {
    member_id: String,
    storage: Arc<DiskStorage>,
}

impl MemberGrpcService {
    pub fn new(member_id: String, storage: Arc<DiskStorage>) -> Self {
        Self { member_id, storage }
    }

    /// Converts this service into a gRPC server instance.
    pub fn into_server(self) -> MemberServiceServer<Self> {
        MemberServiceServer::new(self)
    }

    /// Runs a storage call off the async executor.
    async fn with_storage<T, F>(&self, f: F) -> Result<crate::Result<T>, Status>
    where
        T: Send + 'static,
        F: FnOnce(&DiskStorage) -> crate::Result<T> + Send + 'static,
    {
        let storage = self.storage.clone();
        tokio::task::spawn_blocking(move || f(&storage))
            .await
            .map_err(|e| Status::internal(format!("storage task failed: {}", e)))
    }
}

#[tonic::async_trait]
impl MemberService for MemberGrpcService {
    async fn replicate(
        &self,
        req: Request<ReplicateRequest>,
    ) -> Result<Response<ReplicateResponse>, Status> {
        let ReplicateRequest { key, body } = req.into_inner();
        tracing::debug!("[{}] replicate {}", self.member_id, key);

        let resp = match self.with_storage(move |s| s.put(&key, body)).await? {
            Ok(()) => ReplicateResponse {
                success: true,
                error: String::new(),
            },
            Err(e) => ReplicateResponse {
                success: false,
                error: e.to_string(),
            },
        };
        Ok(Response::new(resp))
    }

    async fn fetch(&self, req: Request<FetchRequest>) -> Result<Response<FetchResponse>, Status> {
        let key = req.into_inner().key;
        tracing::debug!("[{}] fetch {}", self.member_id, key);

        let resp = match self.with_storage(move |s| s.get(&key)).await? {
            Ok(body) => FetchResponse {
                found: true,
                body,
                error: String::new(),
            },
            Err(e @ Error::NotFound(_)) => FetchResponse {
                found: false,
                body: Default::default(),
                error: e.to_string(),
            },
            Err(e) => return Err(e.to_grpc_status()),
        };
        Ok(Response::new(resp))
    }

    async fn delete(
        &self,
        req: Request<DeleteRequest>,
    ) -> Result<Response<DeleteResponse>, Status> {
        let key = req.into_inner().key;
        tracing::debug!("[{}] delete {}", self.member_id, key);

        let resp = match self.with_storage(move |s| s.delete(&key)).await? {
            Ok(()) => DeleteResponse {
                success: true,
                error: String::new(),
            },
            Err(e) => DeleteResponse {
                success: false,
                error: e.to_string(),
            },
        };
        Ok(Response::new(resp))
    }

    async fn health_check(
        &self,
        _req: Request<HealthCheckRequest>,
    ) -> Result<Response<HealthCheckResponse>, Status> {
        Ok(Response::new(HealthCheckResponse {
            healthy: true,
            message_count: self.storage.count() as u64,
        }))
    }
}
