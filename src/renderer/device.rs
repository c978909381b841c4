//! # Pipeline Device
//!
//! The rendering backend instance: owns the graphics backend, the program and
//! layout caches and the disk cache file. All of it lives on the thread that
//! owns the graphics context; pipelines share the state through an
//! `Rc<RefCell<_>>` so they can release their references when dropped.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use crate::config::PipelineCacheConfig;
use crate::error::PipelineError;
use crate::renderer::backend::{GraphicsBackend, LayoutHandle, ProgramHandle};
use crate::renderer::cache::{
    CacheCounters, DiskCache, DiskCacheState, ProgramCache, ProgramContext, ProgramEntryState, VertexLayoutCache,
};
use crate::renderer::pipeline::{GraphicsConfig, Pipeline, PipelineKey};

/// Snapshot of cache occupancy and activity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineCacheStats {
    pub program_entries: usize,
    pub live_programs: usize,
    pub transient_programs: usize,
    pub unresolved_programs: usize,
    pub layout_entries: usize,
    pub disk_state: DiskCacheState,
    /// Bytes of compressed blobs in the open disk cache
    pub disk_data_bytes: u32,
    pub disk_discards: u64,
    pub counters: CacheCounters,
}

/// State shared by a device and its pipelines
pub struct DeviceState<B: GraphicsBackend> {
    backend: B,
    config: PipelineCacheConfig,
    programs: ProgramCache,
    layouts: VertexLayoutCache,
    disk: DiskCache,
    bound_program: Option<ProgramHandle>,
    bound_layout: Option<LayoutHandle>,
    counters: CacheCounters,
}

impl<B: GraphicsBackend> DeviceState<B> {
    /// Give back the references a pipeline holds, destroying objects no
    /// longer in use.
    pub(crate) fn release_pipeline(&mut self, key: &PipelineKey) {
        self.release_program(key);

        if let Some(layout) = self.layouts.release(key.layout()) {
            if self.bound_layout == Some(layout) {
                self.backend.bind_vertex_layout(None);
                self.bound_layout = None;
            }
            log::trace!("Destroying layout object {}", layout.raw());
            self.backend.destroy_vertex_layout(layout);
        }
    }

    fn release_program(&mut self, key: &PipelineKey) {
        if let Some(program) = self.programs.release(key) {
            if self.bound_program == Some(program) {
                self.backend.bind_program(None);
                self.bound_program = None;
            }
            log::trace!("Destroying program {}", program.raw());
            self.backend.destroy_program(program);
        }
    }
}

impl<B: GraphicsBackend> Drop for DeviceState<B> {
    fn drop(&mut self) {
        if self.disk.is_open() {
            self.disk.close(&mut self.programs);
        }
    }
}

/// Rendering backend instance exposing pipeline creation and disk cache control
pub struct PipelineDevice<B: GraphicsBackend> {
    state: Rc<RefCell<DeviceState<B>>>,
}

impl<B: GraphicsBackend> PipelineDevice<B> {
    /// Create a device. If the config names a disk cache it is opened right
    /// away; failing to open it only disables disk caching.
    pub fn new(backend: B, config: PipelineCacheConfig) -> Self {
        let disk_cache_path = config.disk_cache_path.clone();

        let device = Self {
            state: Rc::new(RefCell::new(DeviceState {
                backend,
                config,
                programs: ProgramCache::new(),
                layouts: VertexLayoutCache::new(),
                disk: DiskCache::new(),
                bound_program: None,
                bound_layout: None,
                counters: CacheCounters::default(),
            })),
        };

        if let Some(path) = disk_cache_path {
            if let Err(e) = device.open_disk_cache(&path) {
                log::warn!("Pipeline disk cache unavailable: {}", e);
            }
        }

        device
    }

    /// Create a pipeline, reusing cached programs and layout objects.
    ///
    /// # Panics
    /// If the vertex layout has more than
    /// [`MAX_VERTEX_ATTRIBUTES`](crate::renderer::pipeline::MAX_VERTEX_ATTRIBUTES)
    /// attributes or a shader is in the wrong stage slot. Nothing reaches the
    /// backend in that case.
    pub fn create_pipeline(&self, config: &GraphicsConfig<'_>) -> Result<Pipeline<B>, PipelineError> {
        let key = PipelineKey::derive(config);

        let (program, layout) = {
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;

            let mut ctx = ProgramContext {
                backend: &mut state.backend,
                disk: &mut state.disk,
                config: &state.config,
                counters: &mut state.counters,
            };
            let program = state.programs.acquire(&key, config, &mut ctx)?;

            match state.layouts.acquire(key.layout(), &mut state.backend) {
                Ok(layout) => (program, layout),
                Err(e) => {
                    state.release_program(&key);
                    return Err(e);
                }
            }
        };

        Ok(Pipeline::new(key, program, layout, config, Rc::clone(&self.state)))
    }

    /// Make a pipeline's program and layout current, skipping objects that
    /// are already bound.
    ///
    /// # Panics
    /// If the pipeline was created by another device.
    pub fn bind_pipeline(&self, pipeline: &Pipeline<B>) {
        assert!(pipeline.is_owned_by(&self.state), "pipeline belongs to another device");

        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;

        if state.bound_program != Some(pipeline.program()) {
            state.backend.bind_program(Some(pipeline.program()));
            state.bound_program = Some(pipeline.program());
        }
        if state.bound_layout != Some(pipeline.layout()) {
            state.backend.bind_vertex_layout(Some(pipeline.layout()));
            state.bound_layout = Some(pipeline.layout());
        }
    }

    /// Open (or create) the disk cache at `path`. An existing cache is
    /// validated against the running driver and its index loaded.
    pub fn open_disk_cache(&self, path: impl AsRef<Path>) -> Result<(), PipelineError> {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;

        let driver = state.backend.driver_info();
        state
            .disk
            .open(path.as_ref(), state.config.cache_version, &driver, &mut state.programs)?;
        Ok(())
    }

    /// Write the index and footer if anything changed, and close the file
    pub fn close_disk_cache(&self) {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        state.disk.close(&mut state.programs);
    }

    /// Throw away everything in the disk cache and start over with an empty file
    pub fn discard_disk_cache(&self) -> Result<(), PipelineError> {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        state.disk.discard(&mut state.programs)?;
        Ok(())
    }

    pub fn disk_cache_state(&self) -> DiskCacheState {
        self.state.borrow().disk.state()
    }

    pub fn stats(&self) -> PipelineCacheStats {
        let state = self.state.borrow();

        PipelineCacheStats {
            program_entries: state.programs.len(),
            live_programs: state.programs.count(ProgramEntryState::Live),
            transient_programs: state.programs.count(ProgramEntryState::LiveTransient),
            unresolved_programs: state.programs.count(ProgramEntryState::UnresolvedOnDisk),
            layout_entries: state.layouts.len(),
            disk_state: state.disk.state(),
            disk_data_bytes: state.disk.data_end(),
            disk_discards: state.disk.discards(),
            counters: state.counters,
        }
    }

    /// Run `f` with the backend.
    ///
    /// The device state stays borrowed while `f` runs, so dropping a
    /// [`Pipeline`] inside `f` panics.
    pub fn with_backend<R>(&self, f: impl FnOnce(&B) -> R) -> R {
        f(&self.state.borrow().backend)
    }

    /// Run `f` with the backend mutably. Same restriction as [`Self::with_backend`].
    pub fn with_backend_mut<R>(&self, f: impl FnOnce(&mut B) -> R) -> R {
        f(&mut self.state.borrow_mut().backend)
    }
}
