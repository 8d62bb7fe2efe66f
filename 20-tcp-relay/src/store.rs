//! Labelled blob storage shared by every client of the relay.
//!
//! Entries are last-write-wins and live as long as the process. The store is
//! owned by the event loop, so no locking is involved.

use std::collections::BTreeMap;

use bytes::Bytes;

#[derive(Debug, Default)]
pub struct DataStore {
    entries: BTreeMap<String, Bytes>,
}

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `bytes` under `label`, returning whatever it replaced.
    pub fn store(&mut self, label: String, bytes: Bytes) -> Option<Bytes> {
        self.entries.insert(label, bytes)
    }

    /// Reads an entry without removing it.
    pub fn retrieve(&self, label: &str) -> Option<Bytes> {
        self.entries.get(label).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_write_wins() {
        let mut store = DataStore::new();
        assert!(store.store("k".into(), Bytes::from_static(b"one")).is_none());
        let previous = store.store("k".into(), Bytes::from_static(b"two"));

        assert_eq!(previous, Some(Bytes::from_static(b"one")));
        assert_eq!(store.retrieve("k"), Some(Bytes::from_static(b"two")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn retrieve_does_not_remove() {
        let mut store = DataStore::new();
        store.store("k".into(), Bytes::new());

        assert_eq!(store.retrieve("k"), Some(Bytes::new()));
        assert_eq!(store.retrieve("k"), Some(Bytes::new()));
        assert_eq!(store.retrieve("missing"), None);
    }
}
