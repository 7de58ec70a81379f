//! Error types for hatokuse

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Storage Errors ===
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid key: {0:?}")]
    InvalidKey(String),

    // === Membership Errors ===
    #[error("No active members")]
    NoHealthyMembers,

    #[error("Unknown member: {0}")]
    UnknownMember(String),

    // === Replication Errors ===
    #[error("Replication failed: {0}")]
    ReplicationFailed(String),

    #[error("Member {member} rejected request: {reason}")]
    Rejected { member: String, reason: String },

    // === Network Errors ===
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    // === Client Protocol Errors ===
    #[error("{0}")]
    Protocol(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Replica-side transport failure: the member is marked unhealthy and the
    /// coordinator moves on to the next candidate.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Grpc(_) | Error::Transport(_) | Error::Timeout(_)
        )
    }

    /// Convert to gRPC status for RPC responses
    pub fn to_grpc_status(&self) -> tonic::Status {
        use tonic::Code;
        match self {
            Error::NotFound(_) => tonic::Status::new(Code::NotFound, self.to_string()),
            Error::InvalidKey(_) | Error::InvalidConfig(_) | Error::Protocol(_) => {
                tonic::Status::new(Code::InvalidArgument, self.to_string())
            }
            Error::NoHealthyMembers | Error::ReplicationFailed(_) => {
                tonic::Status::new(Code::Unavailable, self.to_string())
            }
            Error::Timeout(_) => tonic::Status::new(Code::DeadlineExceeded, self.to_string()),
            Error::Grpc(status) => status.clone(),
            _ => tonic::Status::new(Code::Internal, self.to_string()),
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::Timeout("fetch".into()).is_transient());
        assert!(Error::Grpc(tonic::Status::unavailable("down")).is_transient());
        assert!(!Error::NotFound("k".into()).is_transient());
        assert!(!Error::NoHealthyMembers.is_transient());
        assert!(!Error::Rejected {
            member: "m1".into(),
            reason: "disk full".into()
        }
        .is_transient());
    }

    #[test]
    fn test_grpc_status_mapping() {
        assert_eq!(
            Error::NotFound("k".into()).to_grpc_status().code(),
            tonic::Code::NotFound
        );
        assert_eq!(
            Error::InvalidKey(String::new()).to_grpc_status().code(),
            tonic::Code::InvalidArgument
        );
        assert_eq!(
            Error::Io(std::io::Error::other("disk full"))
                .to_grpc_status()
                .code(),
            tonic::Code::Internal
        );
    }
}
