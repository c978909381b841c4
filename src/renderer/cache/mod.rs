//! # Pipeline Object Caches
//!
//! Program and vertex-layout caches plus the disk cache file backing the
//! program cache.

pub mod disk;
pub mod format;
pub mod layout;
pub mod program;

pub use disk::{DiskCache, DiskCacheState};
pub use format::{DiskPlacement, Footer, IndexEntry, FOOTER_SIZE, INDEX_ENTRY_SIZE};
pub use layout::{LayoutCacheEntry, VertexLayoutCache};
pub use program::{ProgramCache, ProgramCacheEntry, ProgramContext, ProgramEntryState};

/// Running totals for cache activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheCounters {
    /// Programs compiled and linked from source
    pub compilations: u64,
    /// Compile or link failures
    pub compile_failures: u64,
    /// Individual shader stages that failed to compile
    pub bad_shaders: u64,
    /// Programs recreated from a disk cache binary
    pub rehydrations: u64,
    pub rehydration_failures: u64,
    /// Compiled programs that could not be written to the disk cache
    pub persist_failures: u64,
}
