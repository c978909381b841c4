//! # Vertex-Layout Object Cache
//!
//! Reference-counted layout objects keyed by [`LayoutKey`].

use std::collections::HashMap;

use crate::error::PipelineError;
use crate::renderer::backend::{GraphicsBackend, LayoutHandle};
use crate::renderer::pipeline::LayoutKey;

/// Live layout object and its users
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutCacheEntry {
    pub layout: LayoutHandle,
    pub reference_count: u32,
}

/// Layout object cache
#[derive(Debug, Default)]
pub struct VertexLayoutCache {
    entries: HashMap<LayoutKey, LayoutCacheEntry>,
}

impl VertexLayoutCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the layout object for `key`, creating it on first use.
    /// A failed creation leaves the cache untouched.
    pub fn acquire<B: GraphicsBackend>(
        &mut self,
        key: &LayoutKey,
        backend: &mut B,
    ) -> Result<LayoutHandle, PipelineError> {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.reference_count += 1;
            return Ok(entry.layout);
        }

        let layout = backend
            .create_vertex_layout(key.attributes(), key.stride())
            .map_err(|e| {
                log::error!("Failed to create vertex layout object: {}", e);
                PipelineError::LayoutCreation(e)
            })?;

        log::trace!(
            "Created layout object {} ({} attributes, stride {})",
            layout.raw(),
            key.attribute_count(),
            key.stride()
        );

        self.entries.insert(*key, LayoutCacheEntry { layout, reference_count: 1 });
        Ok(layout)
    }

    /// Drop one reference. Returns the handle once the last reference is
    /// gone; the entry is already removed and the caller destroys the object.
    ///
    /// # Panics
    /// If `key` is not in the cache.
    pub fn release(&mut self, key: &LayoutKey) -> Option<LayoutHandle> {
        let Some(entry) = self.entries.get_mut(key) else {
            panic!("released a vertex layout that is not in the cache");
        };
        assert!(entry.reference_count > 0, "released a vertex layout with no references");

        entry.reference_count -= 1;
        if entry.reference_count > 0 {
            return None;
        }

        self.entries.remove(key).map(|entry| entry.layout)
    }

    pub fn get(&self, key: &LayoutKey) -> Option<&LayoutCacheEntry> {
        self.entries.get(key)
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
    use crate::renderer::headless::HeadlessBackend;
    use crate::renderer::pipeline::{AttributeType, Semantic, VertexAttribute, VertexLayout};

    fn key() -> LayoutKey {
        LayoutKey::new(&VertexLayout::new(
            vec![VertexAttribute::new(0, Semantic::Position, 0, AttributeType::Float, 2, 0)],
            8,
        ))
    }

    #[test]
    fn test_refcounted_layout() {
        let mut backend = HeadlessBackend::new();
        let mut cache = VertexLayoutCache::new();

        let a = cache.acquire(&key(), &mut backend).unwrap();
        let b = cache.acquire(&key(), &mut backend).unwrap();
        assert_eq!(a, b);
        assert_eq!(backend.counters().layouts_created, 1);
        assert_eq!(cache.get(&key()).unwrap().reference_count, 2);

        assert_eq!(cache.release(&key()), None);
        assert_eq!(cache.release(&key()), Some(a));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_failed_creation_not_cached() {
        let mut backend = HeadlessBackend::new();
        backend.set_fail_layouts(true);
        let mut cache = VertexLayoutCache::new();

        assert!(matches!(cache.acquire(&key(), &mut backend), Err(PipelineError::LayoutCreation(_))));
        assert!(cache.is_empty());

        backend.set_fail_layouts(false);
        assert!(cache.acquire(&key(), &mut backend).is_ok());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    #[should_panic(expected = "not in the cache")]
    fn test_release_absent_panics() {
        let mut cache = VertexLayoutCache::new();
        cache.release(&key());
    }
}
