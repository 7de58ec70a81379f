//! Leader: membership, placement and the client-facing front end

pub mod coordinator;
pub mod grpc;
pub mod member_client;
pub mod placement;
pub mod protocol;
pub mod registry;
pub mod server;

pub use coordinator::{Coordinator, WriteOutcome};
pub use member_client::{GrpcConnector, LocalConnector, MemberConnector, MemberRpc};
pub use registry::{MemberRegistry, Registration};
pub use server::LeaderServer;
