//! Actor block-list with expiry.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

/// An active block, as reported to operators.
#[derive(Debug, Clone, Serialize)]
pub struct BlockedActor {
    pub actor: String,
    pub remaining_secs: u64,
}

/// Actor key → expiry.
///
/// An entry is honored only while its expiry is in the future. Expired
/// entries read as absent and are removed on the read that finds them or by
/// [`BlockList::prune`]. Reads never extend an entry.
#[derive(Debug, Default)]
pub struct BlockList {
    entries: DashMap<String, Instant>,
}

impl BlockList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block `actor` until `until`. An existing later expiry is kept.
    pub fn block(&self, actor: &str, until: Instant) {
        self.entries
            .entry(actor.to_string())
            .and_modify(|expiry| {
                if until > *expiry {
                    *expiry = until;
                }
            })
            .or_insert(until);
    }

    /// Time left on `actor`'s block, or `None` if not blocked at `now`.
    pub fn remaining(&self, actor: &str, now: Instant) -> Option<Duration> {
        let expiry = *self.entries.get(actor)?;
        if expiry > now {
            return Some(expiry - now);
        }

        // The guard above is dropped; re-check under the shard lock.
        self.entries.remove_if(actor, |_, expiry| *expiry <= now);
        None
    }

    pub fn is_blocked(&self, actor: &str, now: Instant) -> bool {
        self.remaining(actor, now).is_some()
    }

    /// Lift a block. Returns whether one was present.
    pub fn unblock(&self, actor: &str) -> bool {
        self.entries.remove(actor).is_some()
    }

    /// Remove expired entries. Returns how many were removed.
    pub fn prune(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, expiry| *expiry > now);
        before.saturating_sub(self.entries.len())
    }

    /// Currently active blocks.
    pub fn active(&self, now: Instant) -> Vec<BlockedActor> {
        let mut blocked: Vec<BlockedActor> = self
            .entries
            .iter()
            .filter(|r| *r.value() > now)
            .map(|r| BlockedActor {
                actor: r.key().clone(),
                remaining_secs: (*r.value() - now).as_secs(),
            })
            .collect();
        blocked.sort_by(|a, b| a.actor.cmp(&b.actor));
        blocked
    }

    /// Number of entries, including expired ones not yet pruned.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
