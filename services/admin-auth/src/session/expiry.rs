//! Expiry-ordered index so sweeps only touch entries that have expired.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

#[derive(Debug, Default)]
pub(crate) struct ExpiryIndex {
    entries: BTreeSet<(DateTime<Utc>, String)>,
}

impl ExpiryIndex {
    pub(crate) fn insert(&mut self, expires_at: DateTime<Utc>, key: &str) {
        self.entries.insert((expires_at, key.to_string()));
    }

    pub(crate) fn remove(&mut self, expires_at: DateTime<Utc>, key: &str) {
        self.entries.remove(&(expires_at, key.to_string()));
    }

    /// Move an entry to a new expiry.
    pub(crate) fn reschedule(&mut self, old: DateTime<Utc>, new: DateTime<Utc>, key: &str) {
        self.remove(old, key);
        self.insert(new, key);
    }

    /// Remove and return every key whose expiry is strictly before `now`.
    pub(crate) fn drain_expired(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let mut expired = Vec::new();
        while let Some(first) = self.entries.first() {
            if first.0 >= now {
                break;
            }
            if let Some((_, key)) = self.entries.pop_first() {
                expired.push(key);
            }
        }
        expired
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
