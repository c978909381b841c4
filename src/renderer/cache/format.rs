//! # Disk Cache Format
//!
//! Layout of the pipeline disk cache file:
//!
//! ```text
//! [zstd program blobs][index entry x program_count][footer]
//! ```
//!
//! Records are plain `#[repr(C)]` structs without padding, written in host
//! byte order. The footer is always the last [`FOOTER_SIZE`] bytes.

use bytemuck::{Pod, Zeroable};

use crate::renderer::backend::DriverInfo;
use crate::renderer::pipeline::PipelineKey;

/// Size of each driver identity string, including the terminator
pub const DRIVER_STRING_LEN: usize = 128;

/// Trailing footer
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct Footer {
    pub version: u32,
    pub program_count: u32,
    pub driver_vendor: [u8; DRIVER_STRING_LEN],
    pub driver_renderer: [u8; DRIVER_STRING_LEN],
    pub driver_version: [u8; DRIVER_STRING_LEN],
}

/// One index record
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct IndexEntry {
    pub key: PipelineKey,
    pub format: u32,
    pub offset: u32,
    pub uncompressed_size: u32,
    pub compressed_size: u32,
}

pub const FOOTER_SIZE: usize = std::mem::size_of::<Footer>();
pub const INDEX_ENTRY_SIZE: usize = std::mem::size_of::<IndexEntry>();

const _: () = assert!(FOOTER_SIZE == 4 * 2 + DRIVER_STRING_LEN * 3);
const _: () = assert!(INDEX_ENTRY_SIZE == 112);

/// Where a program's blob lives in the cache file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskPlacement {
    /// Driver binary format tag
    pub format: u32,
    pub offset: u32,
    pub uncompressed_size: u32,
    pub compressed_size: u32,
}

impl DiskPlacement {
    /// One past the last blob byte
    pub fn end(&self) -> u64 {
        u64::from(self.offset) + u64::from(self.compressed_size)
    }
}

/// Copy a string into a fixed, NUL-terminated field, truncating if needed
pub fn fixed_string(value: &str) -> [u8; DRIVER_STRING_LEN] {
    let mut out = [0u8; DRIVER_STRING_LEN];
    let bytes = value.as_bytes();
    let len = bytes.len().min(DRIVER_STRING_LEN - 1);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

impl Footer {
    /// Footer for the running driver, with no programs
    pub fn new(version: u32, driver: &DriverInfo) -> Self {
        Self {
            version,
            program_count: 0,
            driver_vendor: fixed_string(&driver.vendor),
            driver_renderer: fixed_string(&driver.renderer),
            driver_version: fixed_string(&driver.version),
        }
    }

    /// Read a footer from exactly [`FOOTER_SIZE`] bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        (bytes.len() == FOOTER_SIZE).then(|| bytemuck::pod_read_unaligned(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Same format version and driver identity; program count is ignored
    pub fn matches_identity(&self, other: &Footer) -> bool {
        self.version == other.version
            && self.driver_vendor == other.driver_vendor
            && self.driver_renderer == other.driver_renderer
            && self.driver_version == other.driver_version
    }
}

impl IndexEntry {
    pub fn new(key: PipelineKey, placement: &DiskPlacement) -> Self {
        Self {
            key,
            format: placement.format,
            offset: placement.offset,
            uncompressed_size: placement.uncompressed_size,
            compressed_size: placement.compressed_size,
        }
    }

    /// Read an entry from exactly [`INDEX_ENTRY_SIZE`] bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        (bytes.len() == INDEX_ENTRY_SIZE).then(|| bytemuck::pod_read_unaligned(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    pub fn placement(&self) -> DiskPlacement {
        DiskPlacement {
            format: self.format,
            offset: self.offset,
            uncompressed_size: self.uncompressed_size,
            compressed_size: self.compressed_size,
        }
    }
}
