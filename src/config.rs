//! # Pipeline Cache Configuration
//!
//! Configuration parsed from JSON.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Footer version written by this build
pub const DEFAULT_CACHE_VERSION: u32 = 1;

/// Pipeline cache configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineCacheConfig {
    /// Disk cache file, opened when the device is created
    #[serde(rename = "diskCachePath")]
    pub disk_cache_path: Option<PathBuf>,

    /// Footer version; a cache written with another version is discarded
    #[serde(rename = "cacheVersion")]
    pub cache_version: u32,

    /// zstd level for program blobs (0 = zstd default)
    #[serde(rename = "compressionLevel")]
    pub compression_level: i32,

    /// Where sources of shaders that fail to compile are dumped
    #[serde(rename = "shaderDumpDir")]
    pub shader_dump_dir: Option<PathBuf>,
}

impl Default for PipelineCacheConfig {
    fn default() -> Self {
        Self {
            disk_cache_path: None,
            cache_version: DEFAULT_CACHE_VERSION,
            compression_level: 0,
            shader_dump_dir: None,
        }
    }
}

impl PipelineCacheConfig {
    /// Parse config from bytes (JSON)
    pub fn from_bytes(data: &[u8]) -> Result<Self, PipelineError> {
        if data.is_empty() {
            log::warn!("Empty config data, using defaults");
            return Ok(Self::default());
        }

        serde_json::from_slice(data).map_err(|e| PipelineError::Config(e.to_string()))
    }

    /// Load config from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, PipelineError> {
        let data = std::fs::read(path.as_ref())?;
        Self::from_bytes(&data)
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Builder-style setter for the disk cache path
    pub fn with_disk_cache<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.disk_cache_path = Some(path.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = PipelineCacheConfig::from_bytes(&[]).unwrap();
        assert_eq!(config, PipelineCacheConfig::default());
        assert_eq!(config.cache_version, DEFAULT_CACHE_VERSION);
    }

    #[test]
    fn test_partial_json() {
        let json = br#"{"diskCachePath": "/tmp/pipelines.bin", "compressionLevel": 9}"#;
        let config = PipelineCacheConfig::from_bytes(json).unwrap();

        assert_eq!(config.disk_cache_path, Some(PathBuf::from("/tmp/pipelines.bin")));
        assert_eq!(config.compression_level, 9);
        assert_eq!(config.cache_version, DEFAULT_CACHE_VERSION);
        assert!(config.shader_dump_dir.is_none());
    }

    #[test]
    fn test_invalid_json() {
        let result = PipelineCacheConfig::from_bytes(b"{not json");
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(&path, br#"{"cacheVersion": 3, "shaderDumpDir": "dumps"}"#).unwrap();

        let config = PipelineCacheConfig::from_file(&path).unwrap();
        assert_eq!(config.cache_version, 3);
        assert_eq!(config.shader_dump_dir, Some(PathBuf::from("dumps")));

        assert!(matches!(
            PipelineCacheConfig::from_file(dir.path().join("missing.json")),
            Err(PipelineError::Io(_))
        ));
    }

    #[test]
    fn test_bytes_roundtrip() {
        let config = PipelineCacheConfig::default().with_disk_cache("cache/gl_programs.bin");
        let parsed = PipelineCacheConfig::from_bytes(&config.to_bytes()).unwrap();
        assert_eq!(parsed, config);
    }
}
