//! # Disk Cache File Manager
//!
//! Owns the on-disk program cache. On open the footer is validated against
//! the running driver and the index is loaded into the [`ProgramCache`] as
//! unresolved entries. New program blobs are appended during the session;
//! the index and footer are rewritten on close.
//!
//! Anything suspicious (short file, driver change, bad offsets, duplicate
//! keys) discards the whole file and starts over with an empty one.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::format::{DiskPlacement, Footer, IndexEntry, FOOTER_SIZE, INDEX_ENTRY_SIZE};
use super::program::ProgramCache;
use crate::error::DiskCacheError;
use crate::renderer::backend::{DriverInfo, ProgramBinary};

/// Disk cache lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DiskCacheState {
    /// No file
    #[default]
    Closed,
    /// Existing file validated and its index loaded
    Open,
    /// Previous contents abandoned, empty file open for appends
    Recreated,
    /// Caching turned off for this session (file in use or not writable)
    Disabled,
}

/// Disk cache file manager
#[derive(Debug)]
pub struct DiskCache {
    state: DiskCacheState,
    path: Option<PathBuf>,
    file: Option<File>,
    /// End of the blob region, where the next blob goes
    data_end: u32,
    /// Something was appended since open
    changed: bool,
    /// Footer describing the running driver
    identity: Footer,
    discards: u64,
}

impl Default for DiskCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskCache {
    pub fn new() -> Self {
        Self {
            state: DiskCacheState::Closed,
            path: None,
            file: None,
            data_end: 0,
            changed: false,
            identity: Footer::new(0, &DriverInfo::default()),
            discards: 0,
        }
    }

    /// Open `path`, loading its index into `programs`.
    ///
    /// A missing, stale or corrupt file is replaced with an empty one. A file
    /// held by another process disables caching for the session without
    /// failing. Only a file that can be neither opened nor recreated is an error.
    pub fn open(
        &mut self,
        path: &Path,
        version: u32,
        driver: &DriverInfo,
        programs: &mut ProgramCache,
    ) -> Result<(), DiskCacheError> {
        let _span = tracing::debug_span!("disk_cache_open", path = %path.display()).entered();

        if self.file.is_some() {
            log::warn!("Disk cache already open, closing it first");
            self.close(programs);
        }

        self.path = Some(path.to_path_buf());
        self.identity = Footer::new(version, driver);
        self.data_end = 0;
        self.changed = false;

        let file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => file,
            Err(e) => return self.open_failed(e, programs),
        };

        self.file = Some(file);

        match self.load_index(programs) {
            Ok(count) => {
                self.state = DiskCacheState::Open;
                log::debug!("Read {} programs from disk cache", count);
                Ok(())
            }
            Err(e) => {
                log::error!("Discarding disk cache: {}", e);
                self.discard(programs)
            }
        }
    }

    /// Decide what a failed open means: contention disables caching, a
    /// missing file is created, anything else is an error.
    fn open_failed(&mut self, e: io::Error, programs: &mut ProgramCache) -> Result<(), DiskCacheError> {
        if is_access_contention(&e) {
            log::warn!(
                "Disk cache {:?} is in use by another process, caching disabled for this session",
                self.path
            );
            self.path = None;
            self.state = DiskCacheState::Disabled;
            return Ok(());
        }

        if e.kind() == io::ErrorKind::NotFound {
            log::warn!("Disk cache does not exist, creating.");
            return self.discard(programs);
        }

        log::warn!("Failed to open disk cache {:?}: {}", self.path, e);
        self.path = None;
        self.state = DiskCacheState::Disabled;
        Err(e.into())
    }

    fn load_index(&mut self, programs: &mut ProgramCache) -> Result<usize, DiskCacheError> {
        let identity = self.identity;
        let file = self.file.as_mut().ok_or(DiskCacheError::NotOpen)?;

        let size = file.metadata()?.len();
        if size < FOOTER_SIZE as u64 {
            return Err(DiskCacheError::Corrupt(format!("file too short ({} bytes)", size)));
        }
        if size >= u64::from(u32::MAX) {
            return Err(DiskCacheError::TooLarge);
        }

        let mut footer_bytes = [0u8; FOOTER_SIZE];
        file.seek(SeekFrom::Start(size - FOOTER_SIZE as u64))?;
        file.read_exact(&mut footer_bytes)?;

        let footer = Footer::from_bytes(&footer_bytes)
            .ok_or_else(|| DiskCacheError::Corrupt("unreadable footer".to_string()))?;
        if !footer.matches_identity(&identity) {
            return Err(DiskCacheError::DriverMismatch);
        }

        let index_size = u64::from(footer.program_count) * INDEX_ENTRY_SIZE as u64;
        let data_end = size
            .checked_sub(FOOTER_SIZE as u64 + index_size)
            .ok_or_else(|| {
                DiskCacheError::Corrupt(format!("{} index entries do not fit in the file", footer.program_count))
            })?;

        let mut index = vec![0u8; index_size as usize];
        file.seek(SeekFrom::Start(data_end))?;
        file.read_exact(&mut index)?;

        let mut seen = HashSet::with_capacity(footer.program_count as usize);
        for chunk in index.chunks_exact(INDEX_ENTRY_SIZE) {
            let entry = IndexEntry::from_bytes(chunk)
                .ok_or_else(|| DiskCacheError::Corrupt("short index entry".to_string()))?;
            let placement = entry.placement();

            if !entry.key.is_valid() {
                return Err(DiskCacheError::Corrupt("invalid pipeline key in index".to_string()));
            }
            if placement.uncompressed_size == 0 || placement.compressed_size == 0 {
                return Err(DiskCacheError::Corrupt("empty program in index".to_string()));
            }
            if placement.end() > data_end {
                return Err(DiskCacheError::Corrupt(format!(
                    "program at {}+{} lies outside the blob region ({} bytes)",
                    placement.offset, placement.compressed_size, data_end
                )));
            }
            if !seen.insert(entry.key) || !programs.insert_from_disk(entry.key, placement) {
                return Err(DiskCacheError::Corrupt("duplicate program in disk cache".to_string()));
            }
        }

        self.data_end = data_end as u32;
        Ok(seen.len())
    }

    /// Throw away the cache contents and start over with an empty file.
    ///
    /// Unresolved entries leave `programs`; live ones lose their placement
    /// and become transient. Safe to call mid-session.
    pub fn discard(&mut self, programs: &mut ProgramCache) -> Result<(), DiskCacheError> {
        let _span = tracing::debug_span!("disk_cache_discard").entered();

        programs.drop_disk_placements();
        self.file = None;
        self.data_end = 0;
        self.changed = false;
        self.discards += 1;

        let Some(path) = self.path.clone() else {
            self.state = DiskCacheState::Closed;
            return Err(DiskCacheError::NotOpen);
        };

        match OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
        {
            Ok(file) => {
                self.file = Some(file);
                self.state = DiskCacheState::Recreated;
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to recreate disk cache {:?}: {}", path, e);
                self.path = None;
                self.state = DiskCacheState::Disabled;
                Err(e.into())
            }
        }
    }

    /// Compress and append a program binary at the end of the blob region
    pub fn append(&mut self, binary: &ProgramBinary, compression_level: i32) -> Result<DiskPlacement, DiskCacheError> {
        let file = self.file.as_mut().ok_or(DiskCacheError::NotOpen)?;

        let uncompressed_size = u32::try_from(binary.data.len()).map_err(|_| DiskCacheError::TooLarge)?;
        let compressed = zstd::bulk::compress(&binary.data, compression_level)?;
        let compressed_size = u32::try_from(compressed.len()).map_err(|_| DiskCacheError::TooLarge)?;
        let new_end = self
            .data_end
            .checked_add(compressed_size)
            .ok_or(DiskCacheError::TooLarge)?;

        file.seek(SeekFrom::Start(u64::from(self.data_end)))?;
        file.write_all(&compressed)?;

        let placement = DiskPlacement {
            format: binary.format,
            offset: self.data_end,
            uncompressed_size,
            compressed_size,
        };

        self.data_end = new_end;
        self.changed = true;
        Ok(placement)
    }

    /// Read and decompress the blob at `placement`
    pub fn read_blob(&mut self, placement: &DiskPlacement) -> Result<Vec<u8>, DiskCacheError> {
        let file = self.file.as_mut().ok_or(DiskCacheError::NotOpen)?;

        if placement.end() > u64::from(self.data_end) {
            return Err(DiskCacheError::Corrupt(format!(
                "program at {}+{} lies past the blob region",
                placement.offset, placement.compressed_size
            )));
        }

        let mut compressed = vec![0u8; placement.compressed_size as usize];
        file.seek(SeekFrom::Start(u64::from(placement.offset)))?;
        file.read_exact(&mut compressed)?;

        // the index size is only trusted once the frame agrees with it
        match zstd::zstd_safe::get_frame_content_size(&compressed) {
            Ok(Some(size)) if size == u64::from(placement.uncompressed_size) => {}
            Ok(Some(size)) => {
                return Err(DiskCacheError::Decompress(format!(
                    "frame holds {} bytes, index says {}",
                    size, placement.uncompressed_size
                )));
            }
            Ok(None) => return Err(DiskCacheError::Decompress("frame has no content size".to_string())),
            Err(e) => return Err(DiskCacheError::Decompress(e.to_string())),
        }

        let data = zstd::bulk::decompress(&compressed, placement.uncompressed_size as usize)
            .map_err(|e| DiskCacheError::Decompress(e.to_string()))?;
        if data.len() != placement.uncompressed_size as usize {
            return Err(DiskCacheError::Decompress(format!(
                "expected {} bytes, got {}",
                placement.uncompressed_size,
                data.len()
            )));
        }

        Ok(data)
    }

    /// Write the index and footer if anything changed, then close the file.
    ///
    /// Entries keep their programs but lose their placements, since the file
    /// backing them is no longer open.
    pub fn close(&mut self, programs: &mut ProgramCache) {
        let _span = tracing::debug_span!("disk_cache_close").entered();

        let Some(mut file) = self.file.take() else {
            return;
        };

        if self.changed {
            match self.write_index(&mut file, programs) {
                Ok(count) => log::debug!("Wrote {} programs to disk cache", count),
                Err(e) => log::error!("Failed to write disk cache index: {}", e),
            }
        } else {
            log::debug!("Not updating pipeline cache because it has not changed.");
        }

        programs.drop_disk_placements();
        self.path = None;
        self.state = DiskCacheState::Closed;
        self.data_end = 0;
        self.changed = false;
    }

    fn write_index(&self, file: &mut File, programs: &ProgramCache) -> Result<u32, DiskCacheError> {
        let mut buffer = Vec::new();
        let mut count = 0u32;

        for (key, placement) in programs.persisted() {
            buffer.extend_from_slice(IndexEntry::new(*key, placement).as_bytes());
            count += 1;
        }

        let mut footer = self.identity;
        footer.program_count = count;
        buffer.extend_from_slice(footer.as_bytes());

        let end = u64::from(self.data_end) + buffer.len() as u64;
        if end >= u64::from(u32::MAX) {
            return Err(DiskCacheError::TooLarge);
        }

        file.seek(SeekFrom::Start(u64::from(self.data_end)))?;
        file.write_all(&buffer)?;
        file.set_len(end)?;
        file.flush()?;

        Ok(count)
    }

    pub fn state(&self) -> DiskCacheState {
        self.state
    }

    /// A file is open and accepting appends
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Size of the blob region in bytes
    pub fn data_end(&self) -> u32 {
        self.data_end
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// How many times the cache has been discarded
    pub fn discards(&self) -> u64 {
        self.discards
    }
}

/// Another process holding the file shows up as a permission or sharing error
fn is_access_contention(e: &io::Error) -> bool {
    const ERROR_SHARING_VIOLATION: i32 = 32;

    e.kind() == io::ErrorKind::PermissionDenied
        || (cfg!(windows) && e.raw_os_error() == Some(ERROR_SHARING_VIOLATION))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> DriverInfo {
        DriverInfo::new("LIBS", "Headless", "1.0")
    }

    fn binary(fill: u8, len: usize) -> ProgramBinary {
        ProgramBinary {
            format: 0x8E21,
            data: vec![fill; len],
        }
    }

    #[test]
    fn test_open_missing_creates_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipelines.bin");
        let mut disk = DiskCache::new();
        let mut programs = ProgramCache::new();

        disk.open(&path, 1, &driver(), &mut programs).unwrap();

        assert_eq!(disk.state(), DiskCacheState::Recreated);
        assert!(disk.is_open());
        assert!(path.exists());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn test_append_and_read_blob() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipelines.bin");
        let mut disk = DiskCache::new();
        let mut programs = ProgramCache::new();
        disk.open(&path, 1, &driver(), &mut programs).unwrap();

        let first = disk.append(&binary(0xAB, 4096), 0).unwrap();
        let second = disk.append(&binary(0x11, 100), 3).unwrap();

        assert_eq!(first.offset, 0);
        assert_eq!(second.offset, first.compressed_size);
        assert_eq!(first.uncompressed_size, 4096);
        assert!(first.compressed_size < 4096);
        assert_eq!(disk.data_end(), first.compressed_size + second.compressed_size);
        assert!(disk.is_changed());

        assert_eq!(disk.read_blob(&first).unwrap(), vec![0xAB; 4096]);
        assert_eq!(disk.read_blob(&second).unwrap(), vec![0x11; 100]);
    }

    #[test]
    fn test_read_blob_past_data_end() {
        let dir = tempfile::tempdir().unwrap();
        let mut disk = DiskCache::new();
        let mut programs = ProgramCache::new();
        disk.open(&dir.path().join("pipelines.bin"), 1, &driver(), &mut programs).unwrap();

        let mut placement = disk.append(&binary(1, 64), 0).unwrap();
        placement.offset += 1;

        assert!(matches!(disk.read_blob(&placement), Err(DiskCacheError::Corrupt(_))));
    }

    #[test]
    fn test_wrong_uncompressed_size_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut disk = DiskCache::new();
        let mut programs = ProgramCache::new();
        disk.open(&dir.path().join("pipelines.bin"), 1, &driver(), &mut programs).unwrap();

        let mut placement = disk.append(&binary(7, 512), 0).unwrap();
        placement.uncompressed_size = 128;

        assert!(matches!(disk.read_blob(&placement), Err(DiskCacheError::Decompress(_))));
    }

    #[test]
    fn test_short_file_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipelines.bin");
        std::fs::write(&path, b"not a cache").unwrap();

        let mut disk = DiskCache::new();
        let mut programs = ProgramCache::new();
        disk.open(&path, 1, &driver(), &mut programs).unwrap();

        assert_eq!(disk.state(), DiskCacheState::Recreated);
        assert_eq!(disk.discards(), 1);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn test_unchanged_close_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipelines.bin");
        let mut disk = DiskCache::new();
        let mut programs = ProgramCache::new();

        disk.open(&path, 1, &driver(), &mut programs).unwrap();
        disk.close(&mut programs);

        assert_eq!(disk.state(), DiskCacheState::Closed);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn test_close_writes_footer_for_appended_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipelines.bin");
        let mut disk = DiskCache::new();
        let mut programs = ProgramCache::new();

        disk.open(&path, 1, &driver(), &mut programs).unwrap();
        let placement = disk.append(&binary(3, 256), 0).unwrap();
        disk.close(&mut programs);

        // nothing in the program cache references the blob, so the index is empty
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), placement.compressed_size as usize + FOOTER_SIZE);

        let footer = Footer::from_bytes(&bytes[bytes.len() - FOOTER_SIZE..]).unwrap();
        assert_eq!(footer.program_count, 0);
        assert!(footer.matches_identity(&Footer::new(1, &driver())));
    }

    #[test]
    fn test_discard_without_path_fails() {
        let mut disk = DiskCache::new();
        let mut programs = ProgramCache::new();

        assert!(matches!(disk.discard(&mut programs), Err(DiskCacheError::NotOpen)));
        assert!(!disk.is_open());
    }

    #[test]
    fn test_file_in_use_disables_caching() {
        assert!(is_access_contention(&io::Error::from(io::ErrorKind::PermissionDenied)));
        assert!(!is_access_contention(&io::Error::from(io::ErrorKind::NotFound)));

        let dir = tempfile::tempdir().unwrap();
        let mut disk = DiskCache::new();
        let mut programs = ProgramCache::new();
        disk.path = Some(dir.path().join("pipelines.bin"));

        let result = disk.open_failed(io::Error::from(io::ErrorKind::PermissionDenied), &mut programs);

        assert!(result.is_ok());
        assert_eq!(disk.state(), DiskCacheState::Disabled);
        assert_eq!(disk.path(), None);
        assert!(!disk.is_open());
        assert_eq!(disk.discards(), 0);
    }

    #[test]
    fn test_other_open_error_disables_and_fails() {
        let mut disk = DiskCache::new();
        let mut programs = ProgramCache::new();
        disk.path = Some(PathBuf::from("pipelines.bin"));

        let result = disk.open_failed(io::Error::from(io::ErrorKind::InvalidInput), &mut programs);

        assert!(matches!(result, Err(DiskCacheError::Io(_))));
        assert_eq!(disk.state(), DiskCacheState::Disabled);
        assert_eq!(disk.path(), None);
    }

    #[test]
    fn test_file_past_32_bit_range_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipelines.bin");
        // sparse, nothing is actually written
        File::create(&path).unwrap().set_len(u64::from(u32::MAX) + 10).unwrap();

        let mut disk = DiskCache::new();
        let mut programs = ProgramCache::new();
        disk.open(&path, 1, &driver(), &mut programs).unwrap();

        assert_eq!(disk.state(), DiskCacheState::Recreated);
        assert_eq!(disk.discards(), 1);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn test_oversized_index_entry_rejected_before_decompress() {
        let dir = tempfile::tempdir().unwrap();
        let mut disk = DiskCache::new();
        let mut programs = ProgramCache::new();
        disk.open(&dir.path().join("pipelines.bin"), 1, &driver(), &mut programs).unwrap();

        let mut placement = disk.append(&binary(9, 256), 0).unwrap();
        placement.uncompressed_size = u32::MAX - 1;

        let err = disk.read_blob(&placement).unwrap_err();
        assert!(matches!(err, DiskCacheError::Decompress(ref msg) if msg.contains("index says")));
    }
}
