//! Replica placement
//!
//! Writes rotate over disjoint groups of `tolerance` members taken from the
//! id-ordered active list. The [`PlacementIndex`] remembers which members
//! confirmed each key so reads and deletes never need a fresh selection.

use crate::common::{Error, Result};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Replica set chosen for one write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection<T> {
    pub members: Vec<T>,
    /// Group index, or `None` when fewer members than `tolerance` are active.
    pub group: Option<usize>,
}

impl<T> Selection<T> {
    pub fn is_degraded(&self) -> bool {
        self.group.is_none()
    }
}

/// Round-robin selection over contiguous groups of `tolerance` members.
#[derive(Debug)]
pub struct GroupSelector {
    tolerance: usize,
    counter: AtomicU64,
}

impl GroupSelector {
    pub fn new(tolerance: usize) -> Self {
        Self {
            tolerance: tolerance.max(1),
            counter: AtomicU64::new(0),
        }
    }

    pub fn tolerance(&self) -> usize {
        self.tolerance
    }

    /// Number of writes that have gone through group rotation so far.
    pub fn rotations(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }

    /// Choose targets from `active`, which must already be in id order.
    ///
    /// With fewer than `tolerance` members every active member is targeted and
    /// the rotation counter is left alone. Otherwise there are
    /// `active.len() / tolerance` groups; trailing members that do not fill a
    /// group are never selected.
    pub fn select<T: Clone>(&self, active: &[T]) -> Result<Selection<T>> {
        if active.is_empty() {
            return Err(Error::NoHealthyMembers);
        }

        if active.len() < self.tolerance {
            return Ok(Selection {
                members: active.to_vec(),
                group: None,
            });
        }

        let groups = (active.len() / self.tolerance) as u64;
        let group = (self.counter.fetch_add(1, Ordering::Relaxed) % groups) as usize;
        let start = group * self.tolerance;

        Ok(Selection {
            members: active[start..start + self.tolerance].to_vec(),
            group: Some(group),
        })
    }
}

/// Key → ids of the members that confirmed the key
#[derive(Debug, Default)]
pub struct PlacementIndex {
    records: DashMap<String, Vec<String>>,
}

impl PlacementIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the record for `key`.
    pub fn record(&self, key: &str, members: Vec<String>) {
        self.records.insert(key.to_string(), members);
    }

    pub fn get(&self, key: &str) -> Option<Vec<String>> {
        self.records.get(key).map(|r| r.value().clone())
    }

    pub fn remove(&self, key: &str) -> Option<Vec<String>> {
        self.records.remove(key).map(|(_, members)| members)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
