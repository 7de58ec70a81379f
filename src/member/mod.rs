//! Member: message storage and its RPC surface

pub mod grpc;
pub mod io_mode;
pub mod server;
pub mod storage;

pub use io_mode::{IoMode, WriteStrategy};
pub use server::MemberServer;
pub use storage::DiskStorage;
