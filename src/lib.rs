//! # hatokuse
//!
//! A fault-tolerant, leader-coordinated message store:
//! - Clients talk to a single leader over a line-oriented text protocol
//! - The leader replicates each message to a rotating group of members
//! - Reads fail over across the members recorded for a key
//! - Members persist messages with one of four write strategies
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!   clients ── SET / GET / DEL (TCP, one line each)
//!                     │
//! ┌───────────────────▼──────────────────────┐
//! │                 Leader                   │
//! │  registry · group selector · placement   │
//! └───────┬──────────────┬──────────────┬────┘
//!         │ gRPC         │              │
//!   ┌─────▼─────┐  ┌─────▼─────┐  ┌─────▼─────┐
//!   │ Member m1 │  │ Member m2 │  │ Member m3 │
//!   │ *.msg     │  │ *.msg     │  │ *.msg     │
//!   └───────────┘  └───────────┘  └───────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a leader
//! ```bash
//! hatokuse-leader serve \
//!   --client-addr 0.0.0.0:5000 \
//!   --grpc-addr 0.0.0.0:5001 \
//!   --tolerance-file ./tolerance.conf \
//!   --members-file ./members.conf
//! ```
//!
//! ### Start a member
//! ```bash
//! hatokuse-member serve \
//!   --id m1 \
//!   --grpc-addr 0.0.0.0:5002 \
//!   --leader http://127.0.0.1:5001 \
//!   --data ./data/members \
//!   --io-mode zero-copy
//! ```
//!
//! ### Use the CLI
//! ```bash
//! hatokuse set greeting "hello there"
//! hatokuse get greeting
//! hatokuse del greeting
//! ```

pub mod common;
pub mod leader;
pub mod member;
pub mod proto;

// Re-export commonly used types
pub use common::{Error, LeaderConfig, MemberNodeConfig, Result};
pub use leader::{Coordinator, LeaderServer};
pub use member::{DiskStorage, IoMode, MemberServer};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
