use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use tracing::debug;

use crate::error::{RegionError, Result};
use crate::traits::{check_span, MappedRegion};

/// A shared `mmap(2)` view of a DAX device or regular file.
///
/// The region name is the path as given, so clients address it with the same
/// string they opened (`/dev/dax0.0` in a persistent-memory deployment).
pub struct MmapRegion {
    name: String,
    path: PathBuf,
    base: NonNull<u8>,
    len: usize,
    // Keeps the descriptor open for the lifetime of the mapping.
    _file: File,
}

// SAFETY: `base..base + len` stays mapped until drop, and all access goes through
// raw-pointer copies that never create long-lived references into the mapping.
unsafe impl Send for MmapRegion {}
// SAFETY: see `Send`; concurrent copies on overlapping bytes are the caller's
// responsibility, exactly as with a shared hardware mapping.
unsafe impl Sync for MmapRegion {}

impl MmapRegion {
    /// Map the whole file at `path`.
    ///
    /// Character devices report a size of zero; use [`MmapRegion::open_with_len`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = open_rw(&path)?;
        let len = file
            .metadata()
            .map_err(|source| RegionError::Open {
                path: path.clone(),
                source,
            })?
            .len();
        Self::map(path, file, len)
    }

    /// Map the first `len` bytes of `path`.
    pub fn open_with_len(path: impl AsRef<Path>, len: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = open_rw(&path)?;
        Self::map(path, file, len)
    }

    fn map(path: PathBuf, file: File, len: u64) -> Result<Self> {
        let map_len = match usize::try_from(len) {
            Ok(n) if n > 0 => n,
            _ => return Err(RegionError::InvalidLength { path, len }),
        };

        // SAFETY: we request a fresh mapping (null hint) over an open descriptor;
        // the kernel validates length, protection and flags.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(RegionError::Map {
                path,
                len,
                source: std::io::Error::last_os_error(),
            });
        }
        let base = match NonNull::new(ptr.cast::<u8>()) {
            Some(base) => base,
            None => {
                return Err(RegionError::Map {
                    path,
                    len,
                    source: std::io::Error::other("mmap returned null"),
                })
            }
        };

        debug!(path = %path.display(), len, "mapped region");
        Ok(Self {
            name: path.to_string_lossy().into_owned(),
            path,
            base,
            len: map_len,
            _file: file,
        })
    }

    /// Path of the mapped file or device.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Synchronously write dirty pages back to the backing store.
    pub fn flush(&self) -> Result<()> {
        // SAFETY: `base..base + len` is exactly the mapping created in `map`.
        let rc = unsafe { libc::msync(self.base.as_ptr().cast(), self.len, libc::MS_SYNC) };
        if rc != 0 {
            return Err(RegionError::Map {
                path: self.path.clone(),
                len: self.len as u64,
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(())
    }
}

fn open_rw(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|source| RegionError::Open {
            path: path.to_path_buf(),
            source,
        })
}

impl MappedRegion for MmapRegion {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> u64 {
        self.len as u64
    }

    fn read_span(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_span(offset, buf.len() as u64, self.len as u64)?;
        // SAFETY: the span was bounds-checked against the live mapping and `buf`
        // is a distinct allocation.
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.base.as_ptr().add(offset as usize),
                buf.as_mut_ptr(),
                buf.len(),
            );
        }
        Ok(())
    }

    fn write_span(&self, offset: u64, data: &[u8]) -> Result<()> {
        check_span(offset, data.len() as u64, self.len as u64)?;
        // SAFETY: the span was bounds-checked against the live mapping and `data`
        // is a distinct allocation.
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.base.as_ptr().add(offset as usize),
                data.len(),
            );
        }
        Ok(())
    }

    fn copy_span(&self, src: u64, dst: u64, size: u64) -> Result<()> {
        let extent = self.len as u64;
        check_span(src, size, extent)?;
        check_span(dst, size, extent)?;
        // SAFETY: both spans were bounds-checked; `ptr::copy` tolerates overlap.
        unsafe {
            std::ptr::copy(
                self.base.as_ptr().add(src as usize),
                self.base.as_ptr().add(dst as usize),
                size as usize,
            );
        }
        Ok(())
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        // SAFETY: unmapping the exact range returned by `mmap`; no references
        // into it outlive `self`.
        let rc = unsafe { libc::munmap(self.base.as_ptr().cast(), self.len) };
        if rc != 0 {
            debug!(path = %self.path.display(), "munmap failed");
        }
    }
}

impl std::fmt::Debug for MmapRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MmapRegion")
            .field("path", &self.path)
            .field("len", &self.len)
            .finish()
    }
}
