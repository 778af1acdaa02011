//! Expiring key space shared by plain commands and scripts
//!
//! Every operation takes the clock reading to use, so a script sees one
//! instant for all of its commands. Expired entries are dropped when read
//! and swept in bulk every `SWEEP_INTERVAL` writes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use keylatch_store::KeyTtl;
use tokio::time::Instant;

pub(crate) const SWEEP_INTERVAL: u64 = 256;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: &str, ttl: Option<Duration>, now: Instant) -> Self {
        Self {
            value: value.to_string(),
            expires_at: ttl.and_then(|ttl| now.checked_add(ttl)),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SetCondition {
    Always,
    IfAbsent,
    IfPresent,
}

#[derive(Default)]
pub(crate) struct Keyspace {
    entries: DashMap<String, Entry>,
    writes: AtomicU64,
}

impl Keyspace {
    pub fn get(&self, key: &str, now: Instant) -> Option<String> {
        match self.entries.get(key) {
            Some(entry) if entry.is_live(now) => return Some(entry.value.clone()),
            Some(_) => {}
            None => return None,
        }
        self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        None
    }

    /// Write `key` under `condition`. A plain write clears any expiry.
    /// Returns whether the write happened.
    pub fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
        condition: SetCondition,
        now: Instant,
    ) -> bool {
        let written = match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut o) => {
                let live = o.get().is_live(now);
                if (condition == SetCondition::IfAbsent && live)
                    || (condition == SetCondition::IfPresent && !live)
                {
                    false
                } else {
                    o.insert(Entry::new(value, ttl, now));
                    true
                }
            }
            MapEntry::Vacant(v) => {
                if condition == SetCondition::IfPresent {
                    false
                } else {
                    v.insert(Entry::new(value, ttl, now));
                    true
                }
            }
        };
        if written {
            self.record_write(now);
        }
        written
    }

    pub fn delete(&self, key: &str, now: Instant) -> bool {
        self.entries
            .remove(key)
            .is_some_and(|(_, entry)| entry.is_live(now))
    }

    /// Set a live key's expiry to `ttl_ms` from `now`. A non-positive
    /// expiry deletes the key.
    pub fn expire(&self, key: &str, ttl_ms: i64, now: Instant) -> bool {
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut o) if o.get().is_live(now) => {
                if ttl_ms <= 0 {
                    o.remove();
                } else {
                    o.get_mut().expires_at =
                        now.checked_add(Duration::from_millis(ttl_ms.unsigned_abs()));
                }
                true
            }
            _ => false,
        }
    }

    pub fn ttl(&self, key: &str, now: Instant) -> KeyTtl {
        match self.entries.get(key) {
            Some(entry) if entry.is_live(now) => match entry.expires_at {
                Some(at) => KeyTtl::Expires(at - now),
                None => KeyTtl::Persistent,
            },
            _ => KeyTtl::Missing,
        }
    }

    /// Number of live keys.
    pub fn live_len(&self, now: Instant) -> usize {
        self.entries.iter().filter(|e| e.value().is_live(now)).count()
    }

    /// Number of stored entries, expired ones not yet swept included.
    pub fn stored_len(&self) -> usize {
        self.entries.len()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    fn record_write(&self, now: Instant) {
        if self.writes.fetch_add(1, Ordering::Relaxed) % SWEEP_INTERVAL == SWEEP_INTERVAL - 1 {
            self.purge_expired(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_conditions() {
        let keyspace = Keyspace::default();
        let now = Instant::now();

        assert!(!keyspace.set("k", "a", None, SetCondition::IfPresent, now));
        assert!(keyspace.set("k", "a", None, SetCondition::IfAbsent, now));
        assert!(!keyspace.set("k", "b", None, SetCondition::IfAbsent, now));
        assert!(keyspace.set("k", "c", None, SetCondition::IfPresent, now));
        assert_eq!(keyspace.get("k", now).as_deref(), Some("c"));
    }

    #[test]
    fn test_expired_entry_is_absent() {
        let keyspace = Keyspace::default();
        let now = Instant::now();
        keyspace.set("k", "a", Some(Duration::from_secs(1)), SetCondition::Always, now);

        let later = now + Duration::from_secs(2);
        assert_eq!(keyspace.ttl("k", later), KeyTtl::Missing);
        assert!(!keyspace.expire("k", 10_000, later));
        assert!(keyspace.set("k", "b", None, SetCondition::IfAbsent, later));
    }

    #[test]
    fn test_writes_sweep_expired_entries() {
        let keyspace = Keyspace::default();
        let now = Instant::now();
        keyspace.set("idle", "a", Some(Duration::from_secs(1)), SetCondition::Always, now);

        let later = now + Duration::from_secs(2);
        for _ in 1..SWEEP_INTERVAL {
            keyspace.set("busy", "b", None, SetCondition::Always, later);
        }

        assert_eq!(keyspace.stored_len(), 1);
        assert_eq!(keyspace.get("busy", later).as_deref(), Some("b"));
    }
}
