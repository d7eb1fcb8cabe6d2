//! In-memory gallery of enrolled faces.
//!
//! The working set is an immutable `Arc<Vec<GalleryEntry>>` that is swapped
//! wholesale on refresh. Readers clone the `Arc` and keep a consistent view
//! for as long as they hold it, even if a refresh lands mid-recognition.

use crate::types::{Embedding, GalleryEntry};
use std::sync::{Arc, RwLock};

/// Shared, atomically-replaceable set of gallery entries.
#[derive(Debug, Default)]
pub struct GalleryStore {
    entries: RwLock<Arc<Vec<GalleryEntry>>>,
}

impl GalleryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current gallery. The returned snapshot never changes underneath the caller.
    pub fn snapshot(&self) -> Arc<Vec<GalleryEntry>> {
        let guard = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Normalize and install a new gallery, replacing the old one in a single swap.
    ///
    /// All entries must share one embedding dimension: the first non-empty
    /// vector fixes it, and entries that disagree (or are empty) are skipped.
    /// Returns the number of entries installed.
    pub fn replace<I>(&self, raw: I) -> usize
    where
        I: IntoIterator<Item = (String, Vec<f32>)>,
    {
        let mut dim: Option<usize> = None;
        let mut next = Vec::new();

        for (name, values) in raw {
            if values.is_empty() {
                tracing::warn!(person = %name, "skipping gallery entry with empty embedding");
                continue;
            }
            let expected = *dim.get_or_insert(values.len());
            if values.len() != expected {
                tracing::warn!(
                    person = %name,
                    expected,
                    actual = values.len(),
                    "skipping gallery entry with mismatched embedding dimension"
                );
                continue;
            }
            next.push(GalleryEntry::new(name, Embedding::new(values)));
        }

        let count = next.len();
        let mut guard = self.entries.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(next);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_normalizes_entries() {
        let store = GalleryStore::new();
        let n = store.replace(vec![("alice".to_string(), vec![0.0, 5.0])]);
        assert_eq!(n, 1);
        let snap = store.snapshot();
        assert!(snap[0].normalized);
        assert_eq!(snap[0].embedding.values, vec![0.0, 1.0]);
    }

    #[test]
    fn test_replace_drops_mismatched_dimensions() {
        let store = GalleryStore::new();
        let n = store.replace(vec![
            ("alice".to_string(), vec![1.0, 0.0]),
            ("bob".to_string(), vec![1.0, 0.0, 0.0]),
            ("carol".to_string(), vec![]),
            ("dave".to_string(), vec![0.0, 1.0]),
        ]);
        assert_eq!(n, 2);
        let names: Vec<_> = store.snapshot().iter().map(|e| e.person_name.clone()).collect();
        assert_eq!(names, vec!["alice", "dave"]);
    }

    #[test]
    fn test_snapshot_survives_refresh() {
        let store = GalleryStore::new();
        store.replace(vec![("old".to_string(), vec![1.0])]);
        let held = store.snapshot();

        store.replace(vec![("new1".to_string(), vec![1.0]), ("new2".to_string(), vec![1.0])]);

        assert_eq!(held.len(), 1);
        assert_eq!(held[0].person_name, "old");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_concurrent_readers_see_whole_galleries() {
        let store = Arc::new(GalleryStore::new());
        store.replace((0..4).map(|i| (format!("a{i}"), vec![1.0, 0.0])));

        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for round in 0..200 {
                    let size = if round % 2 == 0 { 8 } else { 4 };
                    let prefix = if round % 2 == 0 { "b" } else { "a" };
                    store.replace((0..size).map(|i| (format!("{prefix}{i}"), vec![1.0, 0.0])));
                }
            })
        };

        for _ in 0..500 {
            let snap = store.snapshot();
            let first = snap[0].person_name.chars().next();
            assert!(snap.iter().all(|e| e.person_name.chars().next() == first));
            let expected = if first == Some('a') { 4 } else { 8 };
            assert_eq!(snap.len(), expected);
        }
        writer.join().unwrap();
    }
}
