//! Replication coordinator
//!
//! Turns client SET/GET/DEL into replica RPCs. A failing replica never fails
//! the whole command: transport errors flag the member unhealthy and the
//! coordinator moves on.

use crate::common::{validate_key, Error, ReadOrder, Result};
use crate::leader::member_client::MemberRpc;
use crate::leader::placement::{GroupSelector, PlacementIndex};
use crate::leader::registry::MemberRegistry;
use bytes::Bytes;
use futures_util::future::join_all;
use rand::seq::SliceRandom;
use std::sync::Arc;

/// Result of a successful SET
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Members that confirmed the write, in target order
    pub stored_on: Vec<String>,
    pub degraded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub members: usize,
    pub active: usize,
    pub placements: usize,
    pub rotations: u64,
}

pub struct Coordinator {
    registry: Arc<MemberRegistry>,
    placement: PlacementIndex,
    selector: GroupSelector,
    read_order: ReadOrder,
}

impl Coordinator {
    pub fn new(registry: Arc<MemberRegistry>, tolerance: usize, read_order: ReadOrder) -> Self {
        Self {
            registry,
            placement: PlacementIndex::new(),
            selector: GroupSelector::new(tolerance),
            read_order,
        }
    }

    pub fn registry(&self) -> &Arc<MemberRegistry> {
        &self.registry
    }

    pub fn placement(&self) -> &PlacementIndex {
        &self.placement
    }

    pub fn tolerance(&self) -> usize {
        self.selector.tolerance()
    }

    /// Replicate `body` to the next group and record the members that confirmed.
    pub async fn set(&self, key: &str, body: Bytes) -> Result<WriteOutcome> {
        validate_key(key)?;

        let active = self.registry.active_members();
        let selection = self.selector.select(&active)?;
        if selection.is_degraded() {
            tracing::warn!(
                "Degraded write for {}: {} active members, tolerance {}",
                key,
                active.len(),
                self.selector.tolerance()
            );
        }

        let writes = selection.members.iter().map(|member| {
            let body = body.clone();
            async move { (member, member.client.replicate(key, body).await) }
        });

        let mut stored_on = Vec::with_capacity(selection.members.len());
        for (member, result) in join_all(writes).await {
            match result {
                Ok(()) => stored_on.push(member.id.clone()),
                Err(e) => self.replica_failed(&member.id, "replicate", key, &e),
            }
        }

        if stored_on.is_empty() {
            return Err(Error::ReplicationFailed(key.to_string()));
        }

        tracing::debug!("Stored {} on {:?}", key, stored_on);
        self.placement.record(key, stored_on.clone());

        Ok(WriteOutcome {
            stored_on,
            degraded: selection.is_degraded(),
        })
    }

    /// First body returned by a healthy member listed in the placement record.
    pub async fn get(&self, key: &str) -> Result<Bytes> {
        let Some(mut candidates) = self.placement.get(key) else {
            return Err(Error::NotFound(key.to_string()));
        };
        if self.read_order == ReadOrder::Shuffled {
            candidates.shuffle(&mut rand::thread_rng());
        }

        for id in candidates {
            let Some(client) = self.registry.healthy_client(&id) else {
                tracing::debug!("Skipping {} for {}: not healthy", id, key);
                continue;
            };
            match client.fetch(key).await {
                Ok(Some(body)) => return Ok(body),
                Ok(None) => tracing::debug!("{} has no copy of {}", id, key),
                Err(e) => self.replica_failed(&id, "fetch", key, &e),
            }
        }

        Err(Error::NotFound(key.to_string()))
    }

    /// Delete on every placement target, or on every healthy member when the
    /// key has no placement record. Returns the number of confirmed deletions.
    pub async fn delete(&self, key: &str) -> Result<usize> {
        let targets: Vec<(String, Arc<dyn MemberRpc>)> = match self.placement.get(key) {
            Some(ids) => ids
                .into_iter()
                .filter_map(|id| self.registry.healthy_client(&id).map(|client| (id, client)))
                .collect(),
            None => {
                tracing::debug!("No placement for {}, deleting on all active members", key);
                self.registry
                    .active_members()
                    .into_iter()
                    .map(|member| (member.id, member.client))
                    .collect()
            }
        };

        let deletes = targets
            .iter()
            .map(|(id, client)| async move { (id, client.delete(key).await) });

        let mut deleted = 0;
        for (id, result) in join_all(deletes).await {
            match result {
                Ok(true) => deleted += 1,
                Ok(false) => tracing::debug!("{} had no copy of {}", id, key),
                Err(e) => self.replica_failed(id, "delete", key, &e),
            }
        }

        if deleted == 0 {
            return Err(Error::NotFound(key.to_string()));
        }

        self.placement.remove(key);
        Ok(deleted)
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            members: self.registry.len(),
            active: self.registry.active_count(),
            placements: self.placement.len(),
            rotations: self.selector.rotations(),
        }
    }

    fn replica_failed(&self, id: &str, op: &str, key: &str, err: &Error) {
        tracing::warn!("{} of {} failed on {}: {}", op, key, id, err);
        if err.is_transient() {
            self.registry.mark_unhealthy(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leader::member_client::LocalConnector;
    use crate::member::io_mode::IoMode;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    fn cluster(members: usize, tolerance: usize) -> (TempDir, Coordinator) {
        let dir = tempdir().unwrap();
        let connector = Arc::new(LocalConnector::new(dir.path(), IoMode::Buffered));
        let registry = Arc::new(MemberRegistry::new(connector, Duration::from_secs(10)));
        for i in 1..=members {
            registry
                .register(&format!("m{}", i), "localhost", 7000 + i as u16)
                .unwrap();
        }
        (dir, Coordinator::new(registry, tolerance, ReadOrder::Placement))
    }

    #[tokio::test]
    async fn test_rotating_placement_and_failover_read() {
        let (_dir, coord) = cluster(4, 2);

        let k1 = coord.set("k1", Bytes::from_static(b"v1")).await.unwrap();
        let k2 = coord.set("k2", Bytes::from_static(b"v2")).await.unwrap();
        let k3 = coord.set("k3", Bytes::from_static(b"v3")).await.unwrap();

        assert_eq!(k1.stored_on, vec!["m1", "m2"]);
        assert_eq!(k2.stored_on, vec!["m3", "m4"]);
        assert_eq!(k3.stored_on, vec!["m1", "m2"]);
        assert!(!k1.degraded);

        coord.registry().mark_unhealthy("m1");
        assert_eq!(coord.get("k1").await.unwrap(), &b"v1"[..]);
    }

    #[tokio::test]
    async fn test_get_without_placement_is_not_found() {
        let (_dir, coord) = cluster(2, 2);
        assert!(matches!(
            coord.get("missing").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_get_with_all_candidates_unhealthy() {
        let (_dir, coord) = cluster(2, 2);
        coord.set("k", Bytes::from_static(b"v")).await.unwrap();
        coord.registry().mark_unhealthy("m1");
        coord.registry().mark_unhealthy("m2");

        assert!(matches!(coord.get("k").await, Err(Error::NotFound(_))));
        // The record survives so the key is readable once a replica recovers.
        assert!(coord.placement().contains("k"));
        coord.registry().heartbeat("m2", 1);
        assert_eq!(coord.get("k").await.unwrap(), &b"v"[..]);
    }

    #[tokio::test]
    async fn test_degraded_write() {
        let (_dir, coord) = cluster(1, 3);
        let outcome = coord.set("k", Bytes::from_static(b"v")).await.unwrap();

        assert!(outcome.degraded);
        assert_eq!(outcome.stored_on, vec!["m1"]);
        assert_eq!(coord.placement().get("k").unwrap(), vec!["m1"]);
    }

    #[tokio::test]
    async fn test_set_without_members() {
        let (_dir, coord) = cluster(0, 2);
        assert!(matches!(
            coord.set("k", Bytes::from_static(b"v")).await,
            Err(Error::NoHealthyMembers)
        ));
        assert!(!coord.placement().contains("k"));
    }

    #[tokio::test]
    async fn test_set_rejects_invalid_key() {
        let (_dir, coord) = cluster(2, 2);
        assert!(matches!(
            coord.set("", Bytes::from_static(b"v")).await,
            Err(Error::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_removes_placement() {
        let (_dir, coord) = cluster(2, 2);
        coord.set("k", Bytes::from_static(b"v")).await.unwrap();

        assert_eq!(coord.delete("k").await.unwrap(), 2);
        assert!(!coord.placement().contains("k"));
        assert!(matches!(coord.get("k").await, Err(Error::NotFound(_))));
        assert!(matches!(coord.delete("k").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_falls_back_to_active_members() {
        let (_dir, coord) = cluster(4, 2);
        coord.set("k", Bytes::from_static(b"v")).await.unwrap();

        // Simulate a leader that lost its placement state.
        coord.placement().remove("k");
        assert_eq!(coord.delete("k").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_shuffled_reads_find_every_replica() {
        let dir = tempdir().unwrap();
        let connector = Arc::new(LocalConnector::new(dir.path(), IoMode::Unbuffered));
        let registry = Arc::new(MemberRegistry::new(connector, Duration::from_secs(10)));
        for id in ["a", "b", "c"] {
            registry.register(id, "localhost", 7000).unwrap();
        }
        let coord = Coordinator::new(registry, 3, ReadOrder::Shuffled);
        coord.set("k", Bytes::from_static(b"v")).await.unwrap();

        coord.registry().mark_unhealthy("a");
        coord.registry().mark_unhealthy("b");
        for _ in 0..10 {
            assert_eq!(coord.get("k").await.unwrap(), &b"v"[..]);
        }
    }
}
