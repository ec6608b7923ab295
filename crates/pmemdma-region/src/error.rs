use std::path::PathBuf;

/// Errors that can occur while accessing a mapped region.
#[derive(Debug, thiserror::Error)]
pub enum RegionError {
    /// The requested span does not lie within the region.
    #[error("span {offset:#x}+{size:#x} exceeds region extent {extent:#x}")]
    OutOfBounds { offset: u64, size: u64, extent: u64 },

    /// Failed to open the backing file or device.
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// `mmap(2)` rejected the mapping.
    #[error("failed to map {path} ({len} bytes): {source}")]
    Map {
        path: PathBuf,
        len: u64,
        source: std::io::Error,
    },

    /// The region length is zero or cannot be addressed on this platform.
    #[error("invalid region length {len} for {path}")]
    InvalidLength { path: PathBuf, len: u64 },

    /// Process memory for a heap region could not be reserved.
    #[error("cannot allocate {len} bytes for region {name}")]
    Alloc { name: String, len: u64 },
}

pub type Result<T> = std::result::Result<T, RegionError>;
