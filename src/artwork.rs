//! Latest cover art for the active session.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

/// Holds the most recent artwork image (PNG/JPEG bytes) seen by an input.
///
/// Cloning shares the same slot, so the receiver or the media player can
/// publish while the embedder reads.
#[derive(Debug, Clone, Default)]
pub struct ArtworkStore {
    image: Arc<RwLock<Option<Bytes>>>,
}

impl ArtworkStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the stored image. Empty images clear the slot.
    pub fn set(&self, image: Bytes) {
        *self.image.write() = if image.is_empty() { None } else { Some(image) };
    }

    /// Returns the current image, if any.
    pub fn get(&self) -> Option<Bytes> {
        self.image.read().clone()
    }

    /// Forgets the current image.
    pub fn clear(&self) {
        *self.image.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let store = ArtworkStore::new();
        assert!(store.get().is_none());

        store.set(Bytes::from_static(b"\x89PNG"));
        assert_eq!(store.get().unwrap().as_ref(), b"\x89PNG");

        let shared = store.clone();
        shared.clear();
        assert!(store.get().is_none());
    }

    #[test]
    fn test_empty_image_clears() {
        let store = ArtworkStore::new();
        store.set(Bytes::from_static(b"x"));
        store.set(Bytes::new());
        assert!(store.get().is_none());
    }
}
