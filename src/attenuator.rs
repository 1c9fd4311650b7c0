//! Attenuator: short-TTL dedup of enqueue attempts.
//!
//! Keyed by request fingerprint. The first sighting creates an entry; while
//! that entry is live every further enqueue attempt for the same fingerprint
//! is suppressed. Suppression does not refresh the TTL — the first-seen
//! timestamp is authoritative, so a sustained burst cannot keep a
//! fingerprint suppressed forever. Eviction is lazy: an expired entry is
//! treated as absent and replaced on the lookup that finds it, no background
//! sweep. Lookups lock only the touched key.

use crate::telemetry::metrics;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use opentelemetry::KeyValue;
use std::time::{Duration, Instant};
use tracing::debug;

pub struct Attenuator {
    entries: DashMap<String, Instant>,
    ttl: Duration,
}

impl Attenuator {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Should an enqueue attempt for this fingerprint be dropped?
    ///
    /// Returns true while a live entry exists. A miss (or an expired entry)
    /// records the sighting and returns false, letting the enqueue through.
    pub fn should_suppress(&self, fingerprint: &str) -> bool {
        let now = Instant::now();
        let suppressed = match self.entries.entry(fingerprint.to_string()) {
            Entry::Occupied(mut occupied) => {
                if now.duration_since(*occupied.get()) < self.ttl {
                    true
                } else {
                    occupied.insert(now);
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(now);
                false
            }
        };
        if suppressed {
            debug!(fingerprint, "duplicate enqueue suppressed");
            metrics::attenuation_suppressions().add(1, &[KeyValue::new("outcome", "suppressed")]);
        }
        suppressed
    }

    /// Number of live (unexpired) entries. Linger time of dead entries
    /// depends on lookup traffic, so this scans rather than trusting len.
    pub fn live_len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| now.duration_since(*entry.value()) < self.ttl)
            .count()
    }
}
