//! Correlation of in-flight probe keys to their waiters.

use super::waiter::{Resolution, Waiter};
use super::ProbeKey;
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

const SHARDS: usize = 16;

type Shard = Mutex<HashMap<ProbeKey, Arc<Waiter>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("probe key {0} is already registered")]
    DuplicateKey(ProbeKey),
    #[error("table is closed to new probes")]
    Closed,
}

/// Thread-safe map from probe key to waiter.
///
/// Entries are split over a few independently locked shards (by sequence
/// number), so operations on unrelated keys rarely contend. Every operation
/// on a given key runs under that key's shard lock, which makes register,
/// resolve and cancel linearizable per key: whichever of resolve/cancel
/// removes the entry first wins, the other sees it absent.
///
/// `drain_with` also closes the table: registrations are refused until
/// `reopen`.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    shards: [Shard; SHARDS],
    // Only written with every shard lock held.
    closed: AtomicBool,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn shard(&self, key: &ProbeKey) -> &Shard {
        &self.shards[usize::from(key.sequence) % SHARDS]
    }

    pub fn register(&self, key: ProbeKey) -> Result<Arc<Waiter>, TableError> {
        let mut shard = self.shard(&key).lock();
        if self.closed.load(Ordering::Relaxed) {
            return Err(TableError::Closed);
        }
        match shard.entry(key) {
            Entry::Occupied(_) => Err(TableError::DuplicateKey(key)),
            Entry::Vacant(entry) => Ok(entry.insert(Arc::new(Waiter::new())).clone()),
        }
    }

    /// Removes `key` and fills its waiter. `false` if the key was not
    /// registered (already resolved, cancelled, drained or never seen).
    ///
    /// The waiter is filled before the shard lock is released, so a caller
    /// whose `cancel` lost the race finds the resolution already in place.
    pub fn resolve(&self, key: ProbeKey, resolution: Resolution) -> bool {
        let mut shard = self.shard(&key).lock();
        match shard.remove(&key) {
            Some(waiter) => {
                waiter.resolve(resolution);
                true
            }
            None => false,
        }
    }

    /// Removes `key` without resolving it.
    pub fn cancel(&self, key: ProbeKey) -> bool {
        let mut shard = self.shard(&key).lock();
        match shard.remove(&key) {
            Some(waiter) => {
                waiter.cancel();
                true
            }
            None => false,
        }
    }

    /// Closes the table, then removes every entry and fills each waiter with
    /// `resolution`. All shard locks are held together, so no key can be
    /// registered behind the drain. Returns how many waiters were resolved.
    pub fn drain_with(&self, resolution: Resolution) -> usize {
        let mut shards: Vec<_> = self.shards.iter().map(|shard| shard.lock()).collect();
        self.closed.store(true, Ordering::Relaxed);
        let mut drained = 0;
        for shard in shards.iter_mut() {
            for (_, waiter) in shard.drain() {
                waiter.resolve(resolution.clone());
                drained += 1;
            }
        }
        drained
    }

    /// Accepts registrations again after a drain.
    pub fn reopen(&self) {
        let _shards: Vec<_> = self.shards.iter().map(|shard| shard.lock()).collect();
        self.closed.store(false, Ordering::Relaxed);
    }

    pub fn contains(&self, key: ProbeKey) -> bool {
        self.shard(&key).lock().contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ping::ProbeError;
    use std::thread;
    use std::time::{Duration, Instant};

    fn reply(ttl: u8) -> Resolution {
        Resolution::Reply { ttl: Some(ttl) }
    }

    #[test]
    fn duplicate_key_is_refused() {
        let table = CorrelationTable::new();
        let key = ProbeKey::new(1, 1);
        let first = table.register(key).unwrap();
        assert_eq!(
            table.register(key).unwrap_err(),
            TableError::DuplicateKey(key)
        );
        // The original registration is untouched.
        assert!(table.resolve(key, reply(5)));
        assert_eq!(first.take(), Some(reply(5)));
    }

    #[test]
    fn second_resolve_is_a_no_op() {
        let table = CorrelationTable::new();
        let key = ProbeKey::new(7, 300);
        let waiter = table.register(key).unwrap();
        assert!(table.resolve(key, reply(64)));
        assert!(!table.resolve(key, reply(1)));
        assert_eq!(waiter.take(), Some(reply(64)));
        assert!(table.is_empty());
    }

    #[test]
    fn cancel_then_resolve() {
        let table = CorrelationTable::new();
        let key = ProbeKey::new(7, 301);
        let waiter = table.register(key).unwrap();
        assert!(table.cancel(key));
        assert!(!table.cancel(key));
        assert!(!table.resolve(key, reply(64)));
        assert_eq!(waiter.take(), None);
        assert!(!table.contains(key));
    }

    #[test]
    fn unknown_key() {
        let table = CorrelationTable::new();
        assert!(!table.resolve(ProbeKey::new(1, 2), reply(3)));
        assert!(!table.cancel(ProbeKey::new(1, 2)));
    }

    #[test]
    fn resolved_keys_can_be_registered_again() {
        let table = CorrelationTable::new();
        let key = ProbeKey::new(2, 2);
        table.register(key).unwrap();
        table.cancel(key);
        assert!(table.register(key).is_ok());
    }

    #[test]
    fn drain_resolves_everything() {
        let table = CorrelationTable::new();
        let waiters: Vec<_> = (0..40)
            .map(|sequence| table.register(ProbeKey::new(9, sequence)).unwrap())
            .collect();
        assert_eq!(table.len(), 40);
        let failure = Resolution::Failed(ProbeError::EngineShuttingDown);
        assert_eq!(table.drain_with(failure.clone()), 40);
        assert!(table.is_empty());
        for waiter in waiters {
            assert_eq!(waiter.take(), Some(failure.clone()));
        }
        assert_eq!(table.drain_with(failure), 0);
    }

    #[test]
    fn drained_table_refuses_registrations_until_reopened() {
        let table = CorrelationTable::new();
        table.drain_with(Resolution::Failed(ProbeError::EngineShuttingDown));
        let key = ProbeKey::new(4, 4);
        assert_eq!(table.register(key).err(), Some(TableError::Closed));
        assert!(table.is_empty());

        table.reopen();
        assert!(table.register(key).is_ok());
        assert!(table.contains(key));
    }

    #[test]
    fn racing_resolve_and_cancel_have_one_winner() {
        for round in 0..200u16 {
            let table = Arc::new(CorrelationTable::new());
            let key = ProbeKey::new(3, round);
            let waiter = table.register(key).unwrap();

            let resolver = {
                let table = table.clone();
                thread::spawn(move || table.resolve(key, reply(8)))
            };
            let cancelled = table.cancel(key);
            let resolved = resolver.join().unwrap();

            assert!(cancelled ^ resolved);
            if resolved {
                assert_eq!(
                    waiter.wait_until(Instant::now() + Duration::from_secs(1)),
                    Some(reply(8))
                );
            } else {
                assert_eq!(waiter.take(), None);
            }
            assert!(table.is_empty());
        }
    }
}
