//! Common utilities and types shared across hatokuse

pub mod config;
pub mod error;
pub mod utils;

pub use self::config::{
    load_static_members, load_tolerance, LeaderConfig, MemberNodeConfig, ReadOrder, StaticMember,
    DEFAULT_TOLERANCE,
};
pub use self::error::{Error, Result};
pub use self::utils::{
    decode_key, encode_key, parse_duration, retry_with_backoff, timestamp_now_millis,
    validate_key, NodeState,
};
