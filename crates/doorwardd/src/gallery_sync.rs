use crate::backend::{Backend, BackendError};
use doorward_core::GalleryStore;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("failed to fetch gallery: {0}")]
    Fetch(#[from] BackendError),
}

/// Fetch this device's watchlist and swap it into `store`.
///
/// On failure the current gallery stays in place. Returns the number of
/// entries installed.
pub async fn refresh<B: Backend + ?Sized>(backend: &B, store: &GalleryStore) -> Result<usize, GalleryError> {
    let remote = backend.gallery_embeddings().await?;
    let fetched = remote.len();
    let loaded = store.replace(remote.into_iter().map(|e| (e.name, e.embedding)));
    tracing::info!(fetched, loaded, "gallery refreshed");
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RemoteEmbedding;
    use crate::testing::ScriptedBackend;

    fn entry(name: &str, embedding: Vec<f32>) -> RemoteEmbedding {
        RemoteEmbedding {
            name: name.into(),
            embedding,
        }
    }

    #[tokio::test]
    async fn test_refresh_replaces_gallery() {
        let backend = ScriptedBackend::default();
        *backend.gallery.lock().unwrap() = Ok(vec![
            entry("Alice", vec![3.0, 4.0]),
            entry("Bob", vec![0.0, 2.0]),
            entry("Broken", vec![1.0, 0.0, 0.0]),
        ]);
        let store = GalleryStore::new();

        assert_eq!(refresh(&backend, &store).await.unwrap(), 2);
        let snapshot = store.snapshot();
        assert_eq!(snapshot[0].person_name, "Alice");
        assert!((snapshot[0].embedding.values[0] - 0.6).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_gallery() {
        let backend = ScriptedBackend::default();
        let store = GalleryStore::new();
        store.replace([("Alice".to_string(), vec![1.0, 0.0])]);

        *backend.gallery.lock().unwrap() = Err(BackendError::Timeout);
        assert!(matches!(
            refresh(&backend, &store).await,
            Err(GalleryError::Fetch(BackendError::Timeout))
        ));
        assert_eq!(store.len(), 1);
    }
}
