//! The per-process store shard.

use dashmap::DashMap;
use skein_codec::ObjectPayload;
use skein_types::{ObjectId, ProcessId};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, trace, warn};

use crate::error::{Result, StoreError};

/// Authoritative entry for an object owned by this process.
#[derive(Debug)]
struct StoreEntry {
    /// `None` while the producing task is still running.
    payload: Option<ObjectPayload>,
    ref_count: u64,
    pinned: bool,
}

/// One process's shard of the distributed object store.
#[derive(Debug)]
pub struct ObjectStore {
    rank: ProcessId,
    /// Objects this process owns. Entries may be reserved before the value
    /// is materialized.
    entries: DashMap<ObjectId, StoreEntry>,
    /// Weak copies of remote objects, keyed by id. Never counted.
    cache: DashMap<ObjectId, ObjectPayload>,
    /// Bytes held by sealed owned payloads, for occupancy checks in tests
    /// and logs.
    owned_bytes: AtomicUsize,
}

/// Point-in-time occupancy snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub owned_entries: usize,
    pub cached_entries: usize,
    pub owned_bytes: usize,
}

impl ObjectStore {
    pub fn new(rank: ProcessId) -> Self {
        Self {
            rank,
            entries: DashMap::new(),
            cache: DashMap::new(),
            owned_bytes: AtomicUsize::new(0),
        }
    }

    pub fn rank(&self) -> ProcessId {
        self.rank
    }

    /// Create a pending entry with reference count 1, held by the submitter's
    /// reference. Called when this process learns it will own the object.
    pub fn reserve(&self, object: ObjectId) -> Result<()> {
        use dashmap::mapref::entry::Entry;
        match self.entries.entry(object) {
            Entry::Occupied(_) => Err(StoreError::AlreadyReserved { object }),
            Entry::Vacant(slot) => {
                slot.insert(StoreEntry {
                    payload: None,
                    ref_count: 1,
                    pinned: false,
                });
                trace!(object = %object, "reserved store entry");
                Ok(())
            }
        }
    }

    /// Seal the payload for a reserved entry. Write-once.
    ///
    /// If every reference was already released while the value was pending,
    /// the entry is gone and the seal reports `NotFound`; callers discard the
    /// payload in that case.
    pub fn seal(&self, object: ObjectId, payload: ObjectPayload) -> Result<()> {
        let mut entry = self
            .entries
            .get_mut(&object)
            .ok_or(StoreError::NotFound { object })?;
        if entry.payload.is_some() {
            return Err(StoreError::AlreadySealed { object });
        }

        self.owned_bytes.fetch_add(payload.len(), Ordering::Relaxed);
        entry.payload = Some(payload);
        trace!(object = %object, "sealed store entry");
        Ok(())
    }

    /// Reserve and seal in one step, for locally produced values (`put`).
    pub fn put(&self, object: ObjectId, payload: ObjectPayload) -> Result<()> {
        self.reserve(object)?;
        self.seal(object, payload)
    }

    /// Register one more reference held somewhere in the cluster.
    pub fn acquire(&self, object: ObjectId, holder: ProcessId) -> Result<()> {
        let mut entry = self
            .entries
            .get_mut(&object)
            .ok_or(StoreError::NotFound { object })?;
        entry.ref_count += 1;
        trace!(object = %object, holder = %holder, count = entry.ref_count, "acquire");
        Ok(())
    }

    /// Drop one reference. Frees the entry when the count reaches zero and
    /// the entry is not pinned; returns `true` if the entry was freed.
    pub fn release(&self, object: ObjectId, holder: ProcessId) -> Result<bool> {
        let freed = {
            let mut entry = self
                .entries
                .get_mut(&object)
                .ok_or(StoreError::NotFound { object })?;
            if entry.ref_count == 0 {
                return Err(StoreError::RefCountUnderflow { object });
            }
            entry.ref_count -= 1;
            trace!(object = %object, holder = %holder, count = entry.ref_count, "release");
            entry.ref_count == 0 && !entry.pinned
        };

        if freed {
            if let Some((_, entry)) = self.entries.remove(&object) {
                if let Some(payload) = entry.payload {
                    self.owned_bytes.fetch_sub(payload.len(), Ordering::Relaxed);
                }
                debug!(object = %object, "freed store entry");
            }
        }
        Ok(freed)
    }

    /// Pin an entry so it survives a zero reference count.
    pub fn pin(&self, object: ObjectId) -> Result<()> {
        let mut entry = self
            .entries
            .get_mut(&object)
            .ok_or(StoreError::NotFound { object })?;
        entry.pinned = true;
        Ok(())
    }

    /// Unpin; if the count already hit zero the entry is freed now.
    pub fn unpin(&self, object: ObjectId) -> Result<()> {
        let free_now = {
            let mut entry = self
                .entries
                .get_mut(&object)
                .ok_or(StoreError::NotFound { object })?;
            entry.pinned = false;
            entry.ref_count == 0
        };
        if free_now {
            if let Some((_, entry)) = self.entries.remove(&object) {
                if let Some(payload) = entry.payload {
                    self.owned_bytes.fetch_sub(payload.len(), Ordering::Relaxed);
                }
                debug!(object = %object, "freed store entry on unpin");
            }
        }
        Ok(())
    }

    /// Sealed payload of an owned object, if materialized.
    pub fn get_owned(&self, object: ObjectId) -> Option<ObjectPayload> {
        self.entries
            .get(&object)
            .and_then(|entry| entry.payload.clone())
    }

    /// Whether this shard owns an entry (sealed or pending) for the id.
    pub fn owns(&self, object: ObjectId) -> bool {
        self.entries.contains_key(&object)
    }

    /// Whether the owned entry is sealed.
    pub fn is_sealed(&self, object: ObjectId) -> bool {
        self.entries
            .get(&object)
            .map(|entry| entry.payload.is_some())
            .unwrap_or(false)
    }

    /// Look an object up locally: owned entries first, then the weak cache.
    pub fn lookup(&self, object: ObjectId) -> Option<ObjectPayload> {
        self.get_owned(object)
            .or_else(|| self.cache.get(&object).map(|p| p.clone()))
    }

    /// Cache a payload fetched from a remote owner. Does not touch any
    /// reference count.
    pub fn cache_remote(&self, object: ObjectId, payload: ObjectPayload) {
        if payload.is_error() {
            // Failures are tiny and may be observed repeatedly; cache them too.
            trace!(object = %object, "caching remote error payload");
        }
        self.cache.insert(object, payload);
    }

    /// Drop a cached copy. Advisory only.
    pub fn evict_cached(&self, object: ObjectId) {
        if self.cache.remove(&object).is_some() {
            trace!(object = %object, "evicted cached payload");
        }
    }

    /// Current reference count of an owned entry, for diagnostics.
    pub fn ref_count(&self, object: ObjectId) -> Option<u64> {
        self.entries.get(&object).map(|entry| entry.ref_count)
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            owned_entries: self.entries.len(),
            cached_entries: self.cache.len(),
            owned_bytes: self.owned_bytes.load(Ordering::Relaxed),
        }
    }

    /// Drop everything. Called on process shutdown; logs anything that was
    /// still referenced so leaks show up in tests.
    pub fn clear(&self) {
        let leaked: Vec<_> = self
            .entries
            .iter()
            .filter(|entry| entry.ref_count > 0)
            .map(|entry| *entry.key())
            .collect();
        if !leaked.is_empty() {
            warn!(count = leaked.len(), "clearing store with live references");
        }
        self.entries.clear();
        self.cache.clear();
        self.owned_bytes.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn value(data: &'static [u8]) -> ObjectPayload {
        ObjectPayload::Value(Bytes::from_static(data))
    }

    fn store() -> ObjectStore {
        ObjectStore::new(ProcessId(1))
    }

    fn oid(seq: u64) -> ObjectId {
        ObjectId::new(ProcessId(1), seq)
    }

    #[test]
    fn put_then_lookup() {
        let store = store();
        store.put(oid(0), value(b"v")).unwrap();
        assert_eq!(store.lookup(oid(0)), Some(value(b"v")));
        assert_eq!(store.ref_count(oid(0)), Some(1));
    }

    #[test]
    fn release_of_last_reference_frees_entry() {
        let store = store();
        store.put(oid(0), value(b"data")).unwrap();
        store.acquire(oid(0), ProcessId(2)).unwrap();

        assert!(!store.release(oid(0), ProcessId(2)).unwrap());
        assert_eq!(store.stats().owned_entries, 1);

        assert!(store.release(oid(0), ProcessId(0)).unwrap());
        assert_eq!(store.stats().owned_entries, 0);
        assert_eq!(store.stats().owned_bytes, 0);
        assert!(store.lookup(oid(0)).is_none());
    }

    #[test]
    fn pinned_entry_survives_zero_count() {
        let store = store();
        store.put(oid(0), value(b"pinned")).unwrap();
        store.pin(oid(0)).unwrap();

        assert!(!store.release(oid(0), ProcessId(0)).unwrap());
        assert!(store.lookup(oid(0)).is_some());

        store.unpin(oid(0)).unwrap();
        assert!(store.lookup(oid(0)).is_none());
    }

    #[test]
    fn full_release_before_seal_discards_entry() {
        let store = store();
        store.reserve(oid(0)).unwrap();
        assert!(store.release(oid(0), ProcessId(0)).unwrap());

        // The producing task finishes afterwards; the seal finds nothing to
        // fill and the value never lingers.
        assert!(matches!(
            store.seal(oid(0), value(b"late")).unwrap_err(),
            StoreError::NotFound { .. }
        ));
        assert_eq!(store.stats().owned_entries, 0);
    }

    #[test]
    fn release_below_zero_is_an_underflow() {
        let store = store();
        store.put(oid(0), value(b"x")).unwrap();
        store.release(oid(0), ProcessId(0)).unwrap();
        assert!(matches!(
            store.release(oid(0), ProcessId(0)).unwrap_err(),
            StoreError::NotFound { .. }
        ));
    }

    #[test]
    fn cache_does_not_affect_authoritative_count() {
        let store = store();
        let remote = ObjectId::new(ProcessId(2), 9);
        store.cache_remote(remote, value(b"remote"));

        assert_eq!(store.lookup(remote), Some(value(b"remote")));
        assert_eq!(store.ref_count(remote), None);
        assert!(!store.owns(remote));

        store.evict_cached(remote);
        assert!(store.lookup(remote).is_none());
    }

    #[test]
    fn seal_is_write_once() {
        let store = store();
        store.reserve(oid(0)).unwrap();
        store.seal(oid(0), value(b"first")).unwrap();
        assert!(matches!(
            store.seal(oid(0), value(b"second")).unwrap_err(),
            StoreError::AlreadySealed { .. }
        ));
    }
}
