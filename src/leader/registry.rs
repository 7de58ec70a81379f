//! Membership registry and health tracking
//!
//! Each registered member is either healthy or unhealthy. Health is advisory:
//! a missed heartbeat or a failed RPC flags the member, and the next heartbeat
//! or successful health probe clears the flag. Entries only leave the registry
//! through [`MemberRegistry::unregister`].

use crate::common::{Error, NodeState, Result};
use crate::leader::member_client::{MemberConnector, MemberRpc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct MemberEntry {
    host: String,
    port: u16,
    client: Arc<dyn MemberRpc>,
    last_heartbeat: Instant,
    message_count: u64,
    state: NodeState,
}

/// A healthy member with its RPC handle
#[derive(Clone)]
pub struct ActiveMember {
    pub id: String,
    pub client: Arc<dyn MemberRpc>,
}

impl std::fmt::Debug for ActiveMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveMember").field("id", &self.id).finish()
    }
}

/// Point-in-time view of a registry entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberSnapshot {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub state: NodeState,
    pub message_count: u64,
    pub since_heartbeat: Duration,
}

/// Outcome of [`MemberRegistry::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Accepted,
    AlreadyPresent,
}

pub struct MemberRegistry {
    members: DashMap<String, MemberEntry>,
    connector: Arc<dyn MemberConnector>,
    heartbeat_timeout: Duration,
}

impl MemberRegistry {
    pub fn new(connector: Arc<dyn MemberConnector>, heartbeat_timeout: Duration) -> Self {
        Self {
            members: DashMap::new(),
            connector,
            heartbeat_timeout,
        }
    }

    /// Register a member. Re-registering a known id leaves the entry untouched.
    pub fn register(&self, id: &str, host: &str, port: u16) -> Result<Registration> {
        match self.members.entry(id.to_string()) {
            Entry::Occupied(_) => {
                tracing::info!("Member already registered: {}", id);
                Ok(Registration::AlreadyPresent)
            }
            Entry::Vacant(slot) => {
                let client = self.connector.connect(id, host, port)?;
                slot.insert(MemberEntry {
                    host: host.to_string(),
                    port,
                    client,
                    last_heartbeat: Instant::now(),
                    message_count: 0,
                    state: NodeState::Healthy,
                });
                tracing::info!("Registered member {} ({}:{})", id, host, port);
                Ok(Registration::Accepted)
            }
        }
    }

    /// Remove a member and release its RPC handle.
    pub fn unregister(&self, id: &str) -> Result<()> {
        match self.members.remove(id) {
            Some(_) => {
                tracing::info!("Unregistered member {}", id);
                Ok(())
            }
            None => Err(Error::UnknownMember(id.to_string())),
        }
    }

    /// Record a heartbeat; returns `false` for an unknown id.
    pub fn heartbeat(&self, id: &str, message_count: u64) -> bool {
        match self.members.get_mut(id) {
            Some(mut entry) => {
                if !entry.state.is_healthy() {
                    tracing::info!("Member {} is healthy again (heartbeat)", id);
                }
                entry.last_heartbeat = Instant::now();
                entry.message_count = message_count;
                entry.state = NodeState::Healthy;
                true
            }
            None => false,
        }
    }

    /// Flag a member after a failed RPC; returns `true` if it was healthy.
    pub fn mark_unhealthy(&self, id: &str) -> bool {
        match self.members.get_mut(id) {
            Some(mut entry) if entry.state.is_healthy() => {
                entry.state = NodeState::Unhealthy;
                tracing::warn!("Member {} marked unhealthy", id);
                true
            }
            _ => false,
        }
    }

    fn mark_recovered(&self, id: &str, message_count: u64) {
        if let Some(mut entry) = self.members.get_mut(id) {
            entry.last_heartbeat = Instant::now();
            entry.message_count = message_count;
            if !entry.state.is_healthy() {
                entry.state = NodeState::Healthy;
                tracing::info!("Member {} is healthy again (health check)", id);
            }
        }
    }

    /// Flag every healthy member whose last heartbeat is older than the timeout.
    pub fn sweep(&self) -> Vec<String> {
        self.sweep_at(Instant::now())
    }

    /// [`sweep`](Self::sweep) against an explicit clock reading.
    pub fn sweep_at(&self, now: Instant) -> Vec<String> {
        let mut expired = Vec::new();
        for mut entry in self.members.iter_mut() {
            let age = now.saturating_duration_since(entry.last_heartbeat);
            if entry.state.is_healthy() && age > self.heartbeat_timeout {
                entry.state = NodeState::Unhealthy;
                tracing::warn!("Member {} heartbeat timeout ({:?})", entry.key(), age);
                expired.push(entry.key().clone());
            }
        }
        expired
    }

    /// Send `HealthCheck` to every unhealthy member and restore the ones that answer.
    pub async fn probe_unhealthy(&self) -> Vec<String> {
        let targets: Vec<(String, Arc<dyn MemberRpc>)> = self
            .members
            .iter()
            .filter(|entry| !entry.state.is_healthy())
            .map(|entry| (entry.key().clone(), entry.client.clone()))
            .collect();

        let probes = targets.into_iter().map(|(id, client)| async move {
            let result = client.health_check().await;
            (id, result)
        });

        let mut recovered = Vec::new();
        for (id, result) in join_all(probes).await {
            match result {
                Ok(count) => {
                    self.mark_recovered(&id, count);
                    recovered.push(id);
                }
                Err(e) => tracing::debug!("Health check failed for {}: {}", id, e),
            }
        }
        recovered
    }

    /// Healthy members, ordered by id.
    pub fn active_members(&self) -> Vec<ActiveMember> {
        let mut active: Vec<ActiveMember> = self
            .members
            .iter()
            .filter(|entry| entry.state.is_healthy())
            .map(|entry| ActiveMember {
                id: entry.key().clone(),
                client: entry.client.clone(),
            })
            .collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        active
    }

    /// RPC handle for `id` if it is registered and healthy.
    pub fn healthy_client(&self, id: &str) -> Option<Arc<dyn MemberRpc>> {
        self.members
            .get(id)
            .filter(|entry| entry.state.is_healthy())
            .map(|entry| entry.client.clone())
    }

    pub fn state(&self, id: &str) -> Option<NodeState> {
        self.members.get(id).map(|entry| entry.state)
    }

    /// All members, ordered by id.
    pub fn snapshot(&self) -> Vec<MemberSnapshot> {
        let now = Instant::now();
        let mut members: Vec<MemberSnapshot> = self
            .members
            .iter()
            .map(|entry| MemberSnapshot {
                id: entry.key().clone(),
                host: entry.host.clone(),
                port: entry.port,
                state: entry.state,
                message_count: entry.message_count,
                since_heartbeat: now.saturating_duration_since(entry.last_heartbeat),
            })
            .collect();
        members.sort_by(|a, b| a.id.cmp(&b.id));
        members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.members
            .iter()
            .filter(|entry| entry.state.is_healthy())
            .count()
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leader::member_client::LocalConnector;
    use crate::member::io_mode::IoMode;
    use tempfile::{tempdir, TempDir};

    fn registry(timeout: Duration) -> (TempDir, MemberRegistry) {
        let dir = tempdir().unwrap();
        let connector = Arc::new(LocalConnector::new(dir.path(), IoMode::Buffered));
        (dir, MemberRegistry::new(connector, timeout))
    }

    #[test]
    fn test_idempotent_registration() {
        let (_dir, registry) = registry(Duration::from_secs(10));

        assert_eq!(
            registry.register("m1", "localhost", 7000).unwrap(),
            Registration::Accepted
        );
        assert_eq!(
            registry.register("m1", "otherhost", 7001).unwrap(),
            Registration::AlreadyPresent
        );

        assert_eq!(registry.len(), 1);
        let snapshot = registry.snapshot();
        assert_eq!(snapshot[0].host, "localhost");
        assert_eq!(snapshot[0].port, 7000);
    }

    #[test]
    fn test_active_members_sorted() {
        let (_dir, registry) = registry(Duration::from_secs(10));
        for id in ["m3", "m1", "m4", "m2"] {
            registry.register(id, "localhost", 7000).unwrap();
        }
        registry.mark_unhealthy("m3");

        let ids: Vec<String> = registry.active_members().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["m1", "m2", "m4"]);
        assert_eq!(registry.active_count(), 3);
    }

    #[test]
    fn test_heartbeat_restores_health() {
        let (_dir, registry) = registry(Duration::from_secs(10));
        registry.register("m1", "localhost", 7000).unwrap();

        assert!(registry.mark_unhealthy("m1"));
        assert!(!registry.mark_unhealthy("m1"));
        assert!(registry.healthy_client("m1").is_none());

        assert!(registry.heartbeat("m1", 42));
        assert_eq!(registry.state("m1"), Some(NodeState::Healthy));
        assert_eq!(registry.snapshot()[0].message_count, 42);

        assert!(!registry.heartbeat("ghost", 1));
    }

    #[test]
    fn test_sweep_flags_stale_members() {
        let (_dir, registry) = registry(Duration::from_millis(100));
        registry.register("m1", "localhost", 7000).unwrap();
        registry.register("m2", "localhost", 7001).unwrap();

        assert!(registry.sweep_at(Instant::now()).is_empty());

        let later = Instant::now() + Duration::from_millis(500);
        let mut expired = registry.sweep_at(later);
        expired.sort();
        assert_eq!(expired, vec!["m1", "m2"]);
        assert_eq!(registry.active_count(), 0);

        // Still registered, only flagged.
        assert_eq!(registry.len(), 2);
        assert!(registry.sweep_at(later).is_empty());
    }

    #[test]
    fn test_unregister() {
        let (_dir, registry) = registry(Duration::from_secs(10));
        registry.register("m1", "localhost", 7000).unwrap();

        assert!(registry.unregister("m1").is_ok());
        assert!(matches!(
            registry.unregister("m1"),
            Err(Error::UnknownMember(_))
        ));
        assert!(registry.is_empty());
        assert!(registry.active_members().is_empty());
    }

    #[tokio::test]
    async fn test_probe_recovers_reachable_members() {
        let (_dir, registry) = registry(Duration::from_secs(10));
        registry.register("m1", "localhost", 7000).unwrap();
        registry.mark_unhealthy("m1");

        let recovered = registry.probe_unhealthy().await;
        assert_eq!(recovered, vec!["m1"]);
        assert_eq!(registry.state("m1"), Some(NodeState::Healthy));
    }
}
