//! # Program Object Cache
//!
//! Reference-counted programs keyed by [`PipelineKey`]. Entries loaded from
//! the disk cache start out unresolved and are rehydrated from their stored
//! binary on first use; everything else is compiled from source.
//!
//! Failed compiles are never cached. A cached binary that cannot be read,
//! decompressed or linked invalidates the whole disk cache, since blob
//! offsets all point into the same file.

use std::collections::HashMap;
use std::path::Path;

use super::disk::DiskCache;
use super::format::DiskPlacement;
use super::CacheCounters;
use crate::config::PipelineCacheConfig;
use crate::error::{DiskCacheError, PipelineError};
use crate::renderer::backend::{GraphicsBackend, LinkRequest, ProgramBinary, ProgramHandle, ShaderHandle};
use crate::renderer::pipeline::{GraphicsConfig, PipelineKey};
use crate::renderer::shaders::{Shader, ShaderStage};

/// Lifecycle of a program entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramEntryState {
    /// Known from the disk index, no program object yet
    UnresolvedOnDisk,
    /// Program object alive and persisted
    Live,
    /// Program object alive but not in the disk cache
    LiveTransient,
}

/// Program cache entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramCacheEntry {
    program: Option<ProgramHandle>,
    reference_count: u32,
    disk: Option<DiskPlacement>,
}

impl ProgramCacheEntry {
    pub fn program(&self) -> Option<ProgramHandle> {
        self.program
    }

    pub fn reference_count(&self) -> u32 {
        self.reference_count
    }

    pub fn disk(&self) -> Option<&DiskPlacement> {
        self.disk.as_ref()
    }

    pub fn state(&self) -> ProgramEntryState {
        match (self.program, self.disk) {
            (Some(_), Some(_)) => ProgramEntryState::Live,
            (Some(_), None) => ProgramEntryState::LiveTransient,
            (None, _) => ProgramEntryState::UnresolvedOnDisk,
        }
    }
}

/// Collaborators a program lookup may need
pub struct ProgramContext<'a, B: GraphicsBackend> {
    pub backend: &'a mut B,
    pub disk: &'a mut DiskCache,
    pub config: &'a PipelineCacheConfig,
    pub counters: &'a mut CacheCounters,
}

/// Program object cache
#[derive(Debug, Default)]
pub struct ProgramCache {
    entries: HashMap<PipelineKey, ProgramCacheEntry>,
}

impl ProgramCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a program for `key`, rehydrating or compiling it as needed, and
    /// take one reference to it.
    pub fn acquire<B: GraphicsBackend>(
        &mut self,
        key: &PipelineKey,
        config: &GraphicsConfig<'_>,
        ctx: &mut ProgramContext<'_, B>,
    ) -> Result<ProgramHandle, PipelineError> {
        let unresolved = self
            .entries
            .get(key)
            .filter(|entry| entry.program.is_none())
            .and_then(|entry| entry.disk);

        if let Some(placement) = unresolved {
            match rehydrate(ctx, &placement) {
                Ok(program) => {
                    ctx.counters.rehydrations += 1;
                    log::trace!("Rehydrated program {} from disk cache", program.raw());
                    if let Some(entry) = self.entries.get_mut(key) {
                        entry.program = Some(program);
                    }
                }
                Err(e) => {
                    log::error!("Failed to create program from disk cache: {}", e);
                    ctx.counters.rehydration_failures += 1;
                    self.entries.remove(key);
                    if let Err(e) = ctx.disk.discard(self) {
                        log::warn!("Disk cache disabled after discard failure: {}", e);
                    }
                }
            }
        }

        if let Some(entry) = self.entries.get_mut(key) {
            if let Some(program) = entry.program {
                entry.reference_count += 1;
                return Ok(program);
            }
        }

        let program = compile_program(config, ctx)?;
        ctx.counters.compilations += 1;

        let disk = if ctx.disk.is_open() {
            persist_program(program, ctx)
        } else {
            None
        };

        self.entries.insert(
            *key,
            ProgramCacheEntry {
                program: Some(program),
                reference_count: 1,
                disk,
            },
        );

        Ok(program)
    }

    /// Drop one reference. Returns the program once the last reference is
    /// gone so the caller can destroy it. Persisted entries stay in the map
    /// without a program so they can be rehydrated later; others are removed.
    ///
    /// # Panics
    /// If `key` has no live, referenced program.
    pub fn release(&mut self, key: &PipelineKey) -> Option<ProgramHandle> {
        let Some(entry) = self.entries.get_mut(key) else {
            panic!("released a program that is not in the cache");
        };
        assert!(
            entry.program.is_some() && entry.reference_count > 0,
            "released a program with no references"
        );

        entry.reference_count -= 1;
        if entry.reference_count > 0 {
            return None;
        }

        let program = entry.program.take();
        if entry.disk.is_none() {
            self.entries.remove(key);
        }

        program
    }

    /// Register an index entry read from disk. A live entry for the same key
    /// adopts the placement. Returns false if the key already has one.
    pub(crate) fn insert_from_disk(&mut self, key: PipelineKey, placement: DiskPlacement) -> bool {
        match self.entries.get_mut(&key) {
            Some(entry) if entry.disk.is_some() => false,
            Some(entry) => {
                entry.disk = Some(placement);
                true
            }
            None => {
                self.entries.insert(
                    key,
                    ProgramCacheEntry {
                        program: None,
                        reference_count: 0,
                        disk: Some(placement),
                    },
                );
                true
            }
        }
    }

    /// Forget every disk placement: unresolved entries are removed, live
    /// entries become transient.
    pub(crate) fn drop_disk_placements(&mut self) {
        self.entries.retain(|_, entry| {
            entry.disk = None;
            entry.program.is_some()
        });
    }

    /// Entries with a disk placement, for writing the index
    pub(crate) fn persisted(&self) -> impl Iterator<Item = (&PipelineKey, &DiskPlacement)> {
        self.entries
            .iter()
            .filter_map(|(key, entry)| entry.disk.as_ref().map(|placement| (key, placement)))
    }

    pub fn get(&self, key: &PipelineKey) -> Option<&ProgramCacheEntry> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PipelineKey, &ProgramCacheEntry)> {
        self.entries.iter()
    }

    /// Number of entries in a given state
    pub fn count(&self, state: ProgramEntryState) -> usize {
        self.entries.values().filter(|entry| entry.state() == state).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn rehydrate<B: GraphicsBackend>(
    ctx: &mut ProgramContext<'_, B>,
    placement: &DiskPlacement,
) -> Result<ProgramHandle, DiskCacheError> {
    let data = ctx.disk.read_blob(placement)?;
    let binary = ProgramBinary {
        format: placement.format,
        data,
    };

    ctx.backend
        .link_program_binary(&binary)
        .map_err(DiskCacheError::Rejected)
}

fn compile_program<B: GraphicsBackend>(
    config: &GraphicsConfig<'_>,
    ctx: &mut ProgramContext<'_, B>,
) -> Result<ProgramHandle, PipelineError> {
    let mut compiled: Vec<(ShaderStage, ShaderHandle)> = Vec::with_capacity(3);

    for shader in config.shaders() {
        match ctx
            .backend
            .compile_shader(shader.stage(), shader.source(), shader.entry_point())
        {
            Ok(handle) => compiled.push((shader.stage(), handle)),
            Err(e) => {
                log::error!("{} shader failed to compile:\n{}", shader.stage().name(), e);
                ctx.counters.compile_failures += 1;
                ctx.counters.bad_shaders += 1;
                if let Some(dir) = &ctx.config.shader_dump_dir {
                    dump_bad_shader(dir, ctx.counters.bad_shaders, shader, &e.message);
                }
                destroy_shaders(ctx.backend, &compiled);
                return Err(PipelineError::ShaderCompile {
                    stage: shader.stage(),
                    log: e.message,
                });
            }
        }
    }

    let request = LinkRequest {
        shaders: &compiled,
        attributes: &config.input_layout.attributes,
        binary_retrievable: ctx.disk.is_open(),
    };

    let result = ctx.backend.link_program(&request);
    destroy_shaders(ctx.backend, &compiled);

    result.map_err(|e| {
        log::error!("Program failed to link:\n{}", e);
        ctx.counters.compile_failures += 1;
        PipelineError::ProgramLink(e)
    })
}

fn destroy_shaders<B: GraphicsBackend>(backend: &mut B, shaders: &[(ShaderStage, ShaderHandle)]) {
    for (_, shader) in shaders {
        backend.destroy_shader(*shader);
    }
}

/// Write a failing shader's source and log for offline inspection
fn dump_bad_shader(dir: &Path, id: u64, shader: &Shader, info_log: &str) {
    let path = dir.join(format!("bad_shader_{}.txt", id));
    let contents = format!(
        "{}\n\nCompile {} shader failed\n{}",
        shader.source(),
        shader.stage().name(),
        info_log
    );

    if let Err(e) = std::fs::write(&path, contents) {
        log::warn!("Failed to dump bad shader to {:?}: {}", path, e);
    }
}

/// Retrieve, compress and append a freshly compiled program.
/// Failure leaves the program transient.
fn persist_program<B: GraphicsBackend>(
    program: ProgramHandle,
    ctx: &mut ProgramContext<'_, B>,
) -> Option<DiskPlacement> {
    let binary = match ctx.backend.program_binary(program) {
        Ok(binary) if !binary.data.is_empty() => binary,
        Ok(_) => {
            log::warn!("Program {} returned an empty binary", program.raw());
            ctx.counters.persist_failures += 1;
            return None;
        }
        Err(e) => {
            log::warn!("Failed to retrieve binary for program {}: {}", program.raw(), e);
            ctx.counters.persist_failures += 1;
            return None;
        }
    };

    match ctx.disk.append(&binary, ctx.config.compression_level) {
        Ok(placement) => {
            log::debug!(
                "Program binary retrieved and compressed, {} -> {} bytes, format {}",
                placement.uncompressed_size,
                placement.compressed_size,
                placement.format
            );
            Some(placement)
        }
        Err(e) => {
            log::warn!("Failed to write program binary to disk cache: {}", e);
            ctx.counters.persist_failures += 1;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::pipeline::{LayoutKey, VertexLayout};
    use crate::renderer::headless::HeadlessBackend;

    fn placement() -> DiskPlacement {
        DiskPlacement {
            format: 1,
            offset: 0,
            uncompressed_size: 64,
            compressed_size: 32,
        }
    }

    fn test_key(length: u32) -> PipelineKey {
        let vs = Shader::with_main(ShaderStage::Vertex, "x".repeat(length as usize));
        let fs = Shader::with_main(ShaderStage::Fragment, "void main() {}");
        PipelineKey::derive(&GraphicsConfig::new(VertexLayout::empty(), &vs, &fs))
    }

    fn live_entry(cache: &mut ProgramCache, key: PipelineKey, program: ProgramHandle, disk: Option<DiskPlacement>) {
        cache.entries.insert(
            key,
            ProgramCacheEntry {
                program: Some(program),
                reference_count: 2,
                disk,
            },
        );
    }

    #[test]
    fn test_release_transient_removes_entry() {
        let mut cache = ProgramCache::new();
        let program = ProgramHandle::new(7).unwrap();
        live_entry(&mut cache, test_key(1), program, None);

        assert_eq!(cache.release(&test_key(1)), None);
        assert_eq!(cache.release(&test_key(1)), Some(program));
        assert!(cache.get(&test_key(1)).is_none());
    }

    #[test]
    fn test_release_persisted_keeps_metadata() {
        let mut cache = ProgramCache::new();
        let program = ProgramHandle::new(7).unwrap();
        live_entry(&mut cache, test_key(1), program, Some(placement()));

        cache.release(&test_key(1));
        assert_eq!(cache.release(&test_key(1)), Some(program));

        let entry = cache.get(&test_key(1)).unwrap();
        assert_eq!(entry.state(), ProgramEntryState::UnresolvedOnDisk);
        assert_eq!(entry.disk(), Some(&placement()));
        assert_eq!(entry.reference_count(), 0);
    }

    #[test]
    #[should_panic(expected = "no references")]
    fn test_release_unresolved_panics() {
        let mut cache = ProgramCache::new();
        assert!(cache.insert_from_disk(test_key(1), placement()));
        cache.release(&test_key(1));
    }

    #[test]
    fn test_insert_from_disk_adopts_live_entry() {
        let mut cache = ProgramCache::new();
        let program = ProgramHandle::new(3).unwrap();
        live_entry(&mut cache, test_key(2), program, None);

        assert!(cache.insert_from_disk(test_key(2), placement()));
        assert_eq!(cache.get(&test_key(2)).unwrap().state(), ProgramEntryState::Live);

        // a second placement for the same key is a duplicate
        assert!(!cache.insert_from_disk(test_key(2), placement()));
    }

    #[test]
    fn test_drop_disk_placements() {
        let mut cache = ProgramCache::new();
        let program = ProgramHandle::new(3).unwrap();
        live_entry(&mut cache, test_key(1), program, Some(placement()));
        cache.insert_from_disk(test_key(2), placement());

        cache.drop_disk_placements();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&test_key(1)).unwrap().state(), ProgramEntryState::LiveTransient);
        assert_eq!(cache.persisted().count(), 0);
    }

    #[test]
    fn test_compile_failure_not_cached() {
        let mut backend = HeadlessBackend::new();
        backend.set_compile_failure_marker(Some("#error"));
        let mut disk = DiskCache::new();
        let config = PipelineCacheConfig::default();
        let mut counters = CacheCounters::default();
        let mut cache = ProgramCache::new();

        let vs = Shader::with_main(ShaderStage::Vertex, "void main() {}");
        let fs = Shader::with_main(ShaderStage::Fragment, "#error broken\nvoid main() {}");
        let graphics = GraphicsConfig::new(VertexLayout::empty(), &vs, &fs);
        let key = PipelineKey::derive(&graphics);

        let mut ctx = ProgramContext {
            backend: &mut backend,
            disk: &mut disk,
            config: &config,
            counters: &mut counters,
        };
        let result = cache.acquire(&key, &graphics, &mut ctx);

        assert!(matches!(
            result,
            Err(PipelineError::ShaderCompile { stage: ShaderStage::Fragment, .. })
        ));
        assert!(cache.is_empty());
        assert_eq!(counters.compile_failures, 1);
        // the vertex shader compiled before the failure is cleaned up
        assert_eq!(backend.live_shader_count(), 0);
        assert_eq!(*key.layout(), LayoutKey::new(&VertexLayout::empty()));
    }

    #[test]
    fn test_acquire_without_disk_is_transient() {
        let mut backend = HeadlessBackend::new();
        let mut disk = DiskCache::new();
        let config = PipelineCacheConfig::default();
        let mut counters = CacheCounters::default();
        let mut cache = ProgramCache::new();

        let vs = Shader::with_main(ShaderStage::Vertex, "void main() {}");
        let fs = Shader::with_main(ShaderStage::Fragment, "void main() {}");
        let graphics = GraphicsConfig::new(VertexLayout::empty(), &vs, &fs);
        let key = PipelineKey::derive(&graphics);

        let mut ctx = ProgramContext {
            backend: &mut backend,
            disk: &mut disk,
            config: &config,
            counters: &mut counters,
        };
        let a = cache.acquire(&key, &graphics, &mut ctx).unwrap();
        let b = cache.acquire(&key, &graphics, &mut ctx).unwrap();

        assert_eq!(a, b);
        assert_eq!(counters.compilations, 1);
        assert_eq!(cache.get(&key).unwrap().state(), ProgramEntryState::LiveTransient);
        assert_eq!(cache.get(&key).unwrap().reference_count(), 2);
        assert_eq!(backend.counters().programs_linked, 1);
        assert!(backend.is_program_live(a));
    }
}
