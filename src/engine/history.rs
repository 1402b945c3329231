use std::collections::VecDeque;
use std::sync::Mutex;

/// Resource keys fetched from the network recently, oldest first.
pub struct LoadingHistory {
    capacity: usize,
    keys: Mutex<VecDeque<String>>,
}

impl LoadingHistory {
    pub fn new(capacity: usize) -> Self {
        LoadingHistory {
            capacity: capacity.max(1),
            keys: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    /// Records `key` as the most recent one, evicting the oldest key if full.
    pub fn put(&self, key: &str) {
        let mut keys = self.keys.lock().unwrap();
        if let Some(index) = keys.iter().position(|v| v == key) {
            keys.remove(index);
        }

        if keys.len() >= self.capacity {
            keys.pop_front();
        }

        keys.push_back(key.to_owned());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.lock().unwrap().iter().any(|v| v == key)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.keys.lock().unwrap().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.keys.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn evicts_oldest() {
        let history = LoadingHistory::new(3);
        history.put("a");
        history.put("b");
        history.put("c");
        history.put("d");

        assert_eq!(history.len(), 3);
        assert!(!history.contains("a"));
        assert!(history.contains("d"));
    }

    #[test]
    fn put_refreshes() {
        let history = LoadingHistory::new(2);
        history.put("a");
        history.put("b");
        history.put("a");
        history.put("c");

        assert!(history.contains("a"));
        assert!(!history.contains("b"));
        assert_eq!(history.len(), 2);
    }
}
