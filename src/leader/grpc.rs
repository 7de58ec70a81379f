//! Leader gRPC service (member → leader)
//!
//! Members join, leave and heartbeat through this service. Registration
//! failures are reported in the response body, not as gRPC errors.

use crate::leader::registry::{MemberRegistry, Registration};
use crate::proto::leader_service_server::{LeaderService, LeaderServiceServer};
use crate::proto::*;
use std::sync::Arc;
use tonic::{Request, Response, Status};

pub struct LeaderGrpcService {
    registry: Arc<MemberRegistry>,
}

impl LeaderGrpcService {
    pub fn new(registry: Arc<MemberRegistry>) -> Self {
        Self { registry }
    }

    /// Converts this service into a gRPC server instance.
    pub fn into_server(self) -> LeaderServiceServer<Self> {
        LeaderServiceServer::new(self)
    }
}

fn rejected(error: impl Into<String>) -> Response<RegisterResponse> {
    Response::new(RegisterResponse {
        accepted: false,
        error: error.into(),
    })
}

#[tonic::async_trait]
impl LeaderService for LeaderGrpcService {
    async fn register_member(
        &self,
        req: Request<RegisterRequest>,
    ) -> Result<Response<RegisterResponse>, Status> {
        let peer = req.remote_addr();
        let RegisterRequest {
            member_id,
            host,
            port,
        } = req.into_inner();

        if member_id.trim().is_empty() {
            return Ok(rejected("member id must not be empty"));
        }
        let Ok(port) = u16::try_from(port) else {
            return Ok(rejected(format!("invalid port {}", port)));
        };
        // An empty host means "wherever this request came from".
        let host = match (host.trim().is_empty(), peer) {
            (true, Some(addr)) => addr.ip().to_string(),
            (true, None) => return Ok(rejected("member host is required")),
            (false, _) => host,
        };

        match self.registry.register(&member_id, &host, port) {
            Ok(Registration::Accepted) | Ok(Registration::AlreadyPresent) => {
                Ok(Response::new(RegisterResponse {
                    accepted: true,
                    error: String::new(),
                }))
            }
            Err(e) => {
                tracing::warn!("Registration of {} failed: {}", member_id, e);
                Ok(rejected(e.to_string()))
            }
        }
    }

    async fn unregister_member(
        &self,
        req: Request<UnregisterRequest>,
    ) -> Result<Response<UnregisterResponse>, Status> {
        let member_id = req.into_inner().member_id;
        let success = match self.registry.unregister(&member_id) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("Unregister ignored: {}", e);
                false
            }
        };
        Ok(Response::new(UnregisterResponse { success }))
    }

    async fn heartbeat(
        &self,
        req: Request<HeartbeatRequest>,
    ) -> Result<Response<HeartbeatResponse>, Status> {
        let HeartbeatRequest {
            member_id,
            message_count,
        } = req.into_inner();

        let acknowledged = self.registry.heartbeat(&member_id, message_count);
        if !acknowledged {
            tracing::debug!("Heartbeat from unknown member {}", member_id);
        }
        Ok(Response::new(HeartbeatResponse { acknowledged }))
    }
}
