//! Configuration for hatokuse components

use crate::common::{Error, Result};
use crate::member::io_mode::IoMode;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default replication factor when `tolerance.conf` is absent
pub const DEFAULT_TOLERANCE: usize = 2;

/// Order in which the leader tries recorded replicas on GET/DEL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReadOrder {
    /// Shuffle candidates per read to spread load
    #[default]
    Shuffled,
    /// Try candidates in the order they confirmed the write
    Placement,
}

/// A member known at leader start (`members.conf` entry)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticMember {
    pub id: String,
    pub host: String,
    pub port: u16,
}

/// Leader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderConfig {
    /// Bind address for the text client protocol
    pub client_addr: SocketAddr,

    /// Bind address for member gRPC (register / heartbeat)
    pub grpc_addr: SocketAddr,

    /// Replication factor
    #[serde(default = "default_tolerance")]
    pub tolerance: usize,

    /// Members registered before the first client command
    #[serde(default)]
    pub static_members: Vec<StaticMember>,

    /// Heartbeat age after which a member is flagged unhealthy
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_ms: u64,

    /// Health sweep period
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_ms: u64,

    /// Upper bound for any single leader → member call
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_ms: u64,

    /// Stats log period
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,

    #[serde(default)]
    pub read_order: ReadOrder,
}

fn default_tolerance() -> usize {
    DEFAULT_TOLERANCE
}
fn default_heartbeat_timeout() -> u64 {
    10_000
}
fn default_health_check_interval() -> u64 {
    5_000
}
fn default_rpc_timeout() -> u64 {
    3_000
}
fn default_stats_interval() -> u64 {
    10
}
fn default_heartbeat_interval() -> u64 {
    5_000
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            client_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            grpc_addr: SocketAddr::from(([0, 0, 0, 0], 5001)),
            tolerance: default_tolerance(),
            static_members: Vec::new(),
            heartbeat_timeout_ms: default_heartbeat_timeout(),
            health_check_interval_ms: default_health_check_interval(),
            rpc_timeout_ms: default_rpc_timeout(),
            stats_interval_secs: default_stats_interval(),
            read_order: ReadOrder::default(),
        }
    }
}

impl LeaderConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tolerance == 0 {
            return Err(Error::InvalidConfig("tolerance must be at least 1".into()));
        }
        if self.health_check_interval_ms == 0 || self.rpc_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "health check interval and rpc timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Member node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberNodeConfig {
    /// Unique member id
    pub member_id: String,

    /// Bind address for the member gRPC service
    pub grpc_addr: SocketAddr,

    /// Host the leader should dial back (reported on registration)
    pub advertise_host: String,

    /// Leader gRPC endpoint, e.g. `http://127.0.0.1:5001`
    pub leader_addr: String,

    /// Base directory; the member stores under `<data_dir>/<member_id>`
    pub data_dir: PathBuf,

    #[serde(default)]
    pub io_mode: IoMode,

    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_ms: u64,

    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

impl Default for MemberNodeConfig {
    fn default() -> Self {
        Self {
            member_id: format!("member-{}", crate::common::timestamp_now_millis()),
            grpc_addr: SocketAddr::from(([0, 0, 0, 0], 5002)),
            advertise_host: "127.0.0.1".to_string(),
            leader_addr: "http://127.0.0.1:5001".to_string(),
            data_dir: PathBuf::from("./data/members"),
            io_mode: IoMode::default(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            rpc_timeout_ms: default_rpc_timeout(),
            stats_interval_secs: default_stats_interval(),
        }
    }
}

impl MemberNodeConfig {
    /// Directory holding this member's message files
    pub fn storage_dir(&self) -> PathBuf {
        self.data_dir.join(&self.member_id)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}

/// Read the replication factor from a `tolerance=<n>` file, or from a file
/// holding just the number.
///
/// A missing file yields [`DEFAULT_TOLERANCE`]. `HATOKUSE_TOLERANCE` in the
/// environment overrides the file.
pub fn load_tolerance(path: impl AsRef<Path>) -> Result<usize> {
    let path = path.as_ref();
    let name = path
        .to_str()
        .ok_or_else(|| Error::InvalidConfig(format!("non UTF-8 path: {}", path.display())))?;

    if !path.exists() {
        tracing::info!(
            "{} not found, using default tolerance {}",
            path.display(),
            DEFAULT_TOLERANCE
        );
    }

    let bare = std::fs::read_to_string(path)
        .ok()
        .and_then(|contents| contents.trim().parse::<i64>().ok());

    let mut builder = config::Config::builder()
        .set_default("tolerance", bare.unwrap_or(DEFAULT_TOLERANCE as i64))?;
    if bare.is_none() {
        builder =
            builder.add_source(config::File::new(name, config::FileFormat::Toml).required(false));
    }
    let settings = builder
        .add_source(config::Environment::with_prefix("HATOKUSE"))
        .build()?;

    let tolerance = settings.get_int("tolerance")?;
    if tolerance < 1 {
        return Err(Error::InvalidConfig(format!(
            "tolerance must be at least 1, got {}",
            tolerance
        )));
    }
    Ok(tolerance as usize)
}

/// Read a `members.conf` file (`<id> <host> <port>` per line).
///
/// A missing file yields an empty list.
pub fn load_static_members(path: impl AsRef<Path>) -> Result<Vec<StaticMember>> {
    let path = path.as_ref();
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(parse_static_members(&contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!("{} not found, static member list is empty", path.display());
            Ok(Vec::new())
        }
        Err(e) => Err(e.into()),
    }
}

/// Parse `members.conf` contents, skipping comments and malformed lines.
pub fn parse_static_members(contents: &str) -> Vec<StaticMember> {
    let mut members = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        let [id, host, port] = parts.as_slice() else {
            tracing::warn!("Malformed members.conf line: {}", line);
            continue;
        };
        let Ok(port) = port.parse::<u16>() else {
            tracing::warn!("Invalid port in members.conf line: {}", line);
            continue;
        };

        members.push(StaticMember {
            id: id.to_string(),
            host: host.to_string(),
            port,
        });
    }
    members
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_tolerance_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tolerance.conf");
        std::fs::write(&path, "# replication factor\ntolerance=3\n").unwrap();
        assert_eq!(load_tolerance(&path).unwrap(), 3);
    }

    #[test]
    fn test_tolerance_bare_integer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tolerance.conf");
        std::fs::write(&path, "3\n").unwrap();
        assert_eq!(load_tolerance(&path).unwrap(), 3);

        std::fs::write(&path, "  0  \n").unwrap();
        assert!(matches!(
            load_tolerance(&path),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_tolerance_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.conf");
        assert_eq!(load_tolerance(&path).unwrap(), DEFAULT_TOLERANCE);
    }

    #[test]
    fn test_tolerance_rejects_zero() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tolerance.conf");
        std::fs::write(&path, "tolerance=0\n").unwrap();
        assert!(load_tolerance(&path).is_err());
    }

    #[test]
    fn test_parse_static_members() {
        let members = parse_static_members(
            "# id host port\nm1 localhost 7000\n\nm2 10.0.0.2 7001\nbroken line\nm3 host notaport\n",
        );
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].id, "m1");
        assert_eq!(members[1].host, "10.0.0.2");
        assert_eq!(members[1].port, 7001);
    }

    #[test]
    fn test_static_members_missing_file() {
        let dir = tempdir().unwrap();
        assert!(load_static_members(dir.path().join("members.conf"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_leader_config_validation() {
        let mut config = LeaderConfig::default();
        assert!(config.validate().is_ok());
        config.tolerance = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_member_storage_dir() {
        let config = MemberNodeConfig {
            member_id: "m1".into(),
            data_dir: PathBuf::from("/tmp/hatokuse"),
            ..Default::default()
        };
        assert_eq!(config.storage_dir(), PathBuf::from("/tmp/hatokuse/m1"));
    }
}
