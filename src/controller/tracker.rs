//! # Tracker
//!
//! Reverse index from objects a reconciler reads to the parents that read
//! them, used to requeue parents when a non-owned dependency changes (the
//! `riff-build` ConfigMap, a Stream, the processor image ConfigMap).
//!
//! Every pass that reads a dependency calls [`Tracker::track`], refreshing a
//! lease of one resync period. Entries whose lease ran out are dropped
//! lazily by [`Tracker::lookup`] and in bulk by [`Tracker::sweep`].

use crate::constants::TRACKER_SHARDS;
use crate::controller::client::ObjectKey;
use crate::observability::metrics;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

type Shard = HashMap<ObjectKey, HashMap<ObjectKey, Instant>>;

/// Sharded watched-object to parent index
#[derive(Debug)]
pub struct Tracker {
    lease: Duration,
    shards: Vec<Mutex<Shard>>,
}

impl Tracker {
    pub fn new(lease: Duration) -> Self {
        Self {
            lease,
            shards: (0..TRACKER_SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, key: &ObjectKey) -> MutexGuard<'_, Shard> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        #[allow(
            clippy::cast_possible_truncation,
            reason = "Only the low bits select a shard"
        )]
        let index = (hasher.finish() as usize) % self.shards.len();
        self.shards[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `parent` as interested in `watched`, or refresh its lease
    pub fn track(&self, watched: ObjectKey, parent: ObjectKey) {
        self.track_at(watched, parent, Instant::now());
    }

    pub(crate) fn track_at(&self, watched: ObjectKey, parent: ObjectKey, now: Instant) {
        let expiry = now + self.lease;
        self.shard(&watched)
            .entry(watched)
            .or_default()
            .insert(parent, expiry);
    }

    /// Parents whose lease on `changed` is still live, sorted
    pub fn lookup(&self, changed: &ObjectKey) -> Vec<ObjectKey> {
        self.lookup_at(changed, Instant::now())
    }

    pub(crate) fn lookup_at(&self, changed: &ObjectKey, now: Instant) -> Vec<ObjectKey> {
        let mut shard = self.shard(changed);
        let Some(parents) = shard.get_mut(changed) else {
            return Vec::new();
        };
        parents.retain(|_, expiry| *expiry > now);
        let mut live: Vec<ObjectKey> = parents.keys().cloned().collect();
        if parents.is_empty() {
            shard.remove(changed);
        }
        live.sort();
        live
    }

    /// Drop every expired entry, returning how many watched objects remain
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub(crate) fn sweep_at(&self, now: Instant) -> usize {
        let mut remaining = 0;
        for shard in &self.shards {
            let mut shard = shard.lock().unwrap_or_else(PoisonError::into_inner);
            shard.retain(|_, parents| {
                parents.retain(|_, expiry| *expiry > now);
                !parents.is_empty()
            });
            remaining += shard.len();
        }
        metrics::set_tracked_objects(remaining);
        remaining
    }

    /// Number of watched objects, including ones with expired leases
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::{Function, Processor, Stream};
    use k8s_openapi::api::core::v1::ConfigMap;
    use std::sync::Arc;

    fn config_map(name: &str) -> ObjectKey {
        ObjectKey::of::<ConfigMap>(Some("default"), name)
    }

    #[test]
    fn test_lookup_returns_tracking_parents() {
        let tracker = Tracker::new(Duration::from_secs(60));
        let watched = config_map("riff-build");
        let square = ObjectKey::of::<Function>(Some("default"), "square");
        let uppercase = ObjectKey::of::<Function>(Some("default"), "uppercase");

        tracker.track(watched.clone(), uppercase.clone());
        tracker.track(watched.clone(), square.clone());
        tracker.track(watched.clone(), square.clone());

        assert_eq!(tracker.lookup(&watched), vec![square, uppercase]);
        assert!(tracker.lookup(&config_map("other")).is_empty());
    }

    #[test]
    fn test_lookup_is_scoped_by_kind() {
        let tracker = Tracker::new(Duration::from_secs(60));
        let parent = ObjectKey::of::<Processor>(Some("default"), "square");
        tracker.track(ObjectKey::of::<Stream>(Some("default"), "numbers"), parent);

        assert!(tracker.lookup(&config_map("numbers")).is_empty());
    }

    #[test]
    fn test_expired_entries_are_pruned() {
        let tracker = Tracker::new(Duration::from_secs(60));
        let watched = config_map("riff-build");
        let parent = ObjectKey::of::<Function>(Some("default"), "square");
        let start = Instant::now();

        tracker.track_at(watched.clone(), parent.clone(), start);
        assert_eq!(
            tracker.lookup_at(&watched, start + Duration::from_secs(59)),
            vec![parent.clone()]
        );
        assert!(tracker
            .lookup_at(&watched, start + Duration::from_secs(61))
            .is_empty());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_track_refreshes_lease() {
        let tracker = Tracker::new(Duration::from_secs(60));
        let watched = config_map("riff-build");
        let parent = ObjectKey::of::<Function>(Some("default"), "square");
        let start = Instant::now();

        tracker.track_at(watched.clone(), parent.clone(), start);
        tracker.track_at(watched.clone(), parent.clone(), start + Duration::from_secs(50));

        assert_eq!(
            tracker.lookup_at(&watched, start + Duration::from_secs(100)),
            vec![parent]
        );
    }

    #[test]
    fn test_sweep_drops_expired_everywhere() {
        let tracker = Tracker::new(Duration::from_secs(60));
        let parent = ObjectKey::of::<Function>(Some("default"), "square");
        let start = Instant::now();

        for i in 0..20 {
            tracker.track_at(config_map(&format!("cm-{i}")), parent.clone(), start);
        }
        tracker.track_at(
            config_map("fresh"),
            parent,
            start + Duration::from_secs(30),
        );
        assert_eq!(tracker.len(), 21);

        assert_eq!(tracker.sweep_at(start + Duration::from_secs(70)), 1);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_concurrent_track_and_lookup() {
        let tracker = Arc::new(Tracker::new(Duration::from_secs(60)));
        let watched = config_map("riff-streaming-processor");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let tracker = Arc::clone(&tracker);
                let watched = watched.clone();
                std::thread::spawn(move || {
                    for j in 0..50 {
                        let parent = ObjectKey::of::<Processor>(Some("default"), &format!("p-{i}-{j}"));
                        tracker.track(watched.clone(), parent);
                        tracker.lookup(&watched);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(tracker.lookup(&watched).len(), 400);
    }
}
