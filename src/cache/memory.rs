use std::collections::VecDeque;
use std::sync::Mutex;

use crate::handler::ResourceRef;
use crate::utils::FastHashMap;

/// A key to resource map of decoded resources, keyed by cache key.
pub trait MemoryCache: Send + Sync {
    fn put(&self, key: &str, resource: ResourceRef);
    fn get(&self, key: &str) -> Option<ResourceRef>;
    /// Removes the resource and hands it to the caller.
    fn extract(&self, key: &str) -> Option<ResourceRef>;
    fn clear(&self);
}

/// A memory cache holding at most `capacity` resources, dropping the least
/// recently used one first. Invalid resources are never returned.
pub struct LruMemoryCache {
    capacity: usize,
    inner: Mutex<LruState>,
}

struct LruState {
    entries: FastHashMap<String, ResourceRef>,
    order: VecDeque<String>,
}

impl LruMemoryCache {
    pub fn new(capacity: usize) -> Self {
        LruMemoryCache {
            capacity: capacity.max(1),
            inner: Mutex::new(LruState {
                entries: FastHashMap::default(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LruState {
    fn touch(&mut self, key: &str) {
        if let Some(i) = self.order.iter().position(|v| v == key) {
            if let Some(v) = self.order.remove(i) {
                self.order.push_back(v);
            }
        }
    }

    fn remove(&mut self, key: &str) -> Option<ResourceRef> {
        let v = self.entries.remove(key)?;
        if let Some(i) = self.order.iter().position(|v| v == key) {
            self.order.remove(i);
        }

        Some(v)
    }
}

impl MemoryCache for LruMemoryCache {
    fn put(&self, key: &str, resource: ResourceRef) {
        let mut inner = self.inner.lock().unwrap();

        if inner.entries.insert(key.to_owned(), resource).is_some() {
            inner.touch(key);
        } else {
            inner.order.push_back(key.to_owned());
        }

        while inner.entries.len() > self.capacity {
            match inner.order.pop_front() {
                Some(v) => {
                    inner.entries.remove(&v);
                    trace!("[MemoryCache] Drops {}.", v);
                }
                None => break,
            }
        }
    }

    fn get(&self, key: &str) -> Option<ResourceRef> {
        let mut inner = self.inner.lock().unwrap();

        let valid = inner.entries.get(key).map(|v| v.is_valid())?;
        if !valid {
            inner.remove(key);
            return None;
        }

        inner.touch(key);
        inner.entries.get(key).cloned()
    }

    fn extract(&self, key: &str) -> Option<ResourceRef> {
        let v = self.inner.lock().unwrap().remove(key)?;
        if v.is_valid() {
            Some(v)
        } else {
            None
        }
    }

    fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.clear();
        inner.order.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::handler::RawResource;
    use std::sync::Arc;

    fn res(v: u8) -> ResourceRef {
        Arc::new(RawResource { bytes: vec![v] })
    }

    #[test]
    fn lru() {
        let cache = LruMemoryCache::new(2);
        cache.put("a", res(1));
        cache.put("b", res(2));
        assert!(cache.get("a").is_some());

        cache.put("c", res(3));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn invalid() {
        let cache = LruMemoryCache::new(2);
        cache.put("a", Arc::new(RawResource { bytes: vec![] }));
        assert!(cache.get("a").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn extract() {
        let cache = LruMemoryCache::new(2);
        cache.put("a", res(1));

        let v = cache.extract("a").unwrap();
        assert_eq!(v.downcast_ref::<RawResource>().unwrap().bytes, vec![1]);
        assert!(cache.get("a").is_none());
        assert!(cache.extract("a").is_none());
    }
}
