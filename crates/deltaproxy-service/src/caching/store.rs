use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::eviction::{EvictionMethod, EvictionRecord, Usage, Watermarks, select_victims};
use super::fingerprint::Fingerprint;
use super::object::CacheObject;

#[derive(Debug)]
struct StoreEntry {
    object: Arc<CacheObject>,
    record: EvictionRecord,
    expires_at: Option<Instant>,
}

impl StoreEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    entries: HashMap<Fingerprint, StoreEntry>,
    usage: Usage,
    /// Source of the recency and creation markers.
    clock: u64,
}

impl StoreInner {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn remove(&mut self, fingerprint: &Fingerprint) -> Option<StoreEntry> {
        let entry = self.entries.remove(fingerprint)?;
        self.usage.remove(entry.object.size_bytes());
        Some(entry)
    }
}

/// The in-memory map of [`CacheObject`]s with their size accounting and eviction records.
///
/// All bookkeeping happens behind a single lock that is only held for the duration of one
/// operation, and never across an `.await`. Readers get a shared handle to an immutable object,
/// so a concurrent [`put`](Self::put) never changes data a reader already holds.
#[derive(Debug)]
pub struct CacheStore {
    name: Arc<str>,
    method: EvictionMethod,
    watermarks: Watermarks,
    inner: Mutex<StoreInner>,
}

impl CacheStore {
    pub fn new(name: impl Into<Arc<str>>, method: EvictionMethod, watermarks: Watermarks) -> Self {
        Self {
            name: name.into(),
            method,
            watermarks,
            inner: Mutex::default(),
        }
    }

    /// Returns the object for `fingerprint`, marking it as recently used.
    ///
    /// Expired objects are removed and reported as absent.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<CacheObject>> {
        let mut inner = self.inner.lock();
        let entry = inner.entries.get(fingerprint)?;
        if entry.is_expired(Instant::now()) {
            inner.remove(fingerprint);
            tracing::trace!(%fingerprint, "Removed expired cache object");
            return None;
        }

        let marker = inner.tick();
        let entry = inner.entries.get_mut(fingerprint)?;
        entry.record.last_access = marker;
        Some(Arc::clone(&entry.object))
    }

    /// Returns the object for `fingerprint` without affecting its eviction rank.
    pub fn peek(&self, fingerprint: &Fingerprint) -> Option<Arc<CacheObject>> {
        let inner = self.inner.lock();
        let entry = inner.entries.get(fingerprint)?;
        if entry.is_expired(Instant::now()) {
            return None;
        }
        Some(Arc::clone(&entry.object))
    }

    /// Stores `object`, replacing a previous version with the same fingerprint.
    ///
    /// The replaced version keeps its creation marker. If the store grows beyond its high-water
    /// marks, objects are evicted before this returns. Returns the number of evicted objects.
    pub fn put(&self, object: CacheObject) -> usize {
        let mut inner = self.inner.lock();
        self.insert(&mut inner, object)
    }

    /// Stores `object` only if the currently stored version is still `current`.
    ///
    /// `None` stands for no (or an expired) object. Returns the number of evicted objects, or
    /// `None` if the stored version changed in the meantime and nothing was written.
    pub fn replace(
        &self,
        object: CacheObject,
        current: Option<&Arc<CacheObject>>,
    ) -> Option<usize> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let stored = inner
            .entries
            .get(&object.fingerprint)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| &entry.object);
        let unchanged = match (stored, current) {
            (Some(stored), Some(current)) => Arc::ptr_eq(stored, current),
            (None, None) => true,
            _ => false,
        };
        unchanged.then(|| self.insert(&mut inner, object))
    }

    fn insert(&self, inner: &mut StoreInner, object: CacheObject) -> usize {
        let marker = inner.tick();
        let fingerprint = object.fingerprint.clone();
        let created = match inner.remove(&fingerprint) {
            Some(previous) => previous.record.created,
            None => marker,
        };

        inner.usage.objects += 1;
        inner.usage.bytes += object.size_bytes();
        let entry = StoreEntry {
            expires_at: object.ttl.map(|ttl| Instant::now() + ttl),
            object: Arc::new(object),
            record: EvictionRecord {
                last_access: marker,
                created,
            },
        };
        inner.entries.insert(fingerprint, entry);

        let victims = select_victims(
            self.method,
            &self.watermarks,
            inner.usage,
            inner
                .entries
                .iter()
                .map(|(fp, entry)| (fp.clone(), entry.record, entry.object.size_bytes())),
        );
        for victim in &victims {
            inner.remove(victim);
            tracing::debug!(
                fingerprint = %victim,
                method = %self.method,
                "Evicted cache object"
            );
        }

        if !victims.is_empty() {
            metric!(
                counter("deltacache.evictions") += victims.len() as i64,
                "cache" => &self.name,
                "method" => &self.method.to_string(),
            );
        }
        metric!(gauge("deltacache.objects") = inner.usage.objects, "cache" => &self.name);
        metric!(gauge("deltacache.bytes") = inner.usage.bytes, "cache" => &self.name);

        victims.len()
    }

    /// Removes `object` if it is still the stored version of its fingerprint.
    pub fn delete_object(&self, object: &Arc<CacheObject>) -> bool {
        let mut inner = self.inner.lock();
        let stored = inner
            .entries
            .get(&object.fingerprint)
            .is_some_and(|entry| Arc::ptr_eq(&entry.object, object));
        stored && inner.remove(&object.fingerprint).is_some()
    }

    /// Removes the object for `fingerprint`, returning whether there was one.
    pub fn delete(&self, fingerprint: &Fingerprint) -> bool {
        self.inner.lock().remove(fingerprint).is_some()
    }

    /// Marks the object for `fingerprint` as recently used, returning whether there is one.
    pub fn touch(&self, fingerprint: &Fingerprint) -> bool {
        let mut inner = self.inner.lock();
        if !inner.entries.contains_key(fingerprint) {
            return false;
        }
        let marker = inner.tick();
        if let Some(entry) = inner.entries.get_mut(fingerprint) {
            entry.record.last_access = marker;
        }
        true
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The accumulated size of all stored payloads.
    pub fn total_bytes(&self) -> u64 {
        self.inner.lock().usage.bytes
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.usage = Usage::default();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::caching::eviction::Watermark;
    use crate::extents::{Extent, ExtentList};
    use crate::utils::compression::Compression;

    fn object(key: &str, size: usize) -> CacheObject {
        CacheObject {
            fingerprint: Fingerprint::from_raw(key),
            extents: ExtentList::single(Extent::new(0, 10)),
            payload: Bytes::from(vec![0; size]),
            compression: Compression::None,
            created_at: Instant::now(),
            ttl: None,
        }
    }

    fn unbounded() -> CacheStore {
        CacheStore::new("test", EvictionMethod::Lru, Watermarks::default())
    }

    #[test]
    fn test_accounting() {
        let store = unbounded();
        store.put(object("a", 10));
        store.put(object("b", 20));
        assert_eq!(store.len(), 2);
        assert_eq!(store.total_bytes(), 30);

        // replacing an object accounts for the new size only
        store.put(object("a", 5));
        assert_eq!(store.len(), 2);
        assert_eq!(store.total_bytes(), 25);

        assert!(store.delete(&Fingerprint::from_raw("b")));
        assert!(!store.delete(&Fingerprint::from_raw("b")));
        assert_eq!(store.total_bytes(), 5);

        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.total_bytes(), 0);
    }

    #[test]
    fn test_get_and_peek() {
        let store = unbounded();
        let fp = Fingerprint::from_raw("a");
        assert!(store.get(&fp).is_none());
        assert!(!store.touch(&fp));

        store.put(object("a", 10));
        let found = store.get(&fp).unwrap();
        assert_eq!(found.fingerprint, fp);
        assert_eq!(store.peek(&fp).unwrap().size_bytes(), 10);
        assert!(store.touch(&fp));
    }

    #[test]
    fn test_replace_only_unchanged() {
        let store = unbounded();
        let fp = Fingerprint::from_raw("a");
        assert_eq!(store.replace(object("a", 10), None), Some(0));

        let current = store.peek(&fp).unwrap();
        assert_eq!(store.replace(object("a", 20), Some(&current)), Some(0));
        // `current` is no longer the stored version
        assert_eq!(store.replace(object("a", 30), Some(&current)), None);
        assert_eq!(store.total_bytes(), 20);

        let current = store.peek(&fp).unwrap();
        store.delete(&fp);
        assert_eq!(store.replace(object("a", 40), Some(&current)), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_delete_object() {
        let store = unbounded();
        let fp = Fingerprint::from_raw("a");
        store.put(object("a", 10));
        let old = store.peek(&fp).unwrap();
        store.put(object("a", 20));

        assert!(!store.delete_object(&old));
        let current = store.peek(&fp).unwrap();
        assert!(store.delete_object(&current));
        assert!(store.is_empty());
    }

    #[test]
    fn test_recency_policy() {
        let watermarks = Watermarks {
            bytes: None,
            objects: Some(Watermark { high: 3, low: 3 }),
        };
        let store = CacheStore::new("test", EvictionMethod::Lru, watermarks);
        store.put(object("a", 1));
        store.put(object("b", 1));
        store.put(object("c", 1));

        // reads keep `a` alive, while `b` was neither read nor written since
        store.get(&Fingerprint::from_raw("a"));
        store.touch(&Fingerprint::from_raw("c"));

        assert_eq!(store.put(object("d", 1)), 1);
        assert!(store.peek(&Fingerprint::from_raw("a")).is_some());
        assert!(store.peek(&Fingerprint::from_raw("b")).is_none());
    }

    #[test]
    fn test_age_policy_keeps_creation_marker() {
        let watermarks = Watermarks {
            bytes: None,
            objects: Some(Watermark { high: 2, low: 2 }),
        };
        let store = CacheStore::new("test", EvictionMethod::Oldest, watermarks);
        store.put(object("a", 1));
        store.put(object("b", 1));

        // updating `a` does not make it any younger
        store.put(object("a", 2));
        store.get(&Fingerprint::from_raw("a"));

        assert_eq!(store.put(object("c", 1)), 1);
        assert!(store.peek(&Fingerprint::from_raw("a")).is_none());
        assert!(store.peek(&Fingerprint::from_raw("b")).is_some());
    }

    #[test]
    fn test_watermark_hysteresis() {
        let watermarks = Watermarks {
            bytes: Some(Watermark {
                high: 100,
                low: 50,
            }),
            objects: None,
        };
        let store = CacheStore::new("test", EvictionMethod::Oldest, watermarks);
        for i in 0..10 {
            assert_eq!(store.put(object(&i.to_string(), 10)), 0);
        }
        assert_eq!(store.total_bytes(), 100);

        // exceeding the high-water mark evicts down to the low-water mark
        assert_eq!(store.put(object("10", 10)), 6);
        assert_eq!(store.total_bytes(), 50);
        assert!(store.peek(&Fingerprint::from_raw("5")).is_none());
        assert!(store.peek(&Fingerprint::from_raw("6")).is_some());
    }

    #[test]
    fn test_oversized_object() {
        let watermarks = Watermarks {
            bytes: Some(Watermark { high: 10, low: 10 }),
            objects: None,
        };
        let store = CacheStore::new("test", EvictionMethod::Lru, watermarks);
        store.put(object("a", 5));
        assert_eq!(store.put(object("huge", 50)), 2);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl() {
        let store = unbounded();
        let fp = Fingerprint::from_raw("a");
        store.put(CacheObject {
            ttl: Some(Duration::from_secs(60)),
            ..object("a", 10)
        });

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(store.get(&fp).is_some());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(store.peek(&fp).is_none());
        assert_eq!(store.len(), 1);
        assert!(store.get(&fp).is_none());
        assert_eq!(store.len(), 0);
        assert_eq!(store.total_bytes(), 0);
    }
}
