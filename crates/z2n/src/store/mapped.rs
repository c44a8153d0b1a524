//! Memory-mapped `f64` buffer backed by a scratch file.
//!
//! The scratch file is created inside a caller-chosen directory and deleted
//! when the buffer drops. The mapping is always dropped before the file.

use crate::error::{Result, Z2nError};
use memmap2::{MmapMut, MmapOptions};
use std::mem::size_of;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Scratch file name prefix.
const SCRATCH_PREFIX: &str = "z2n-";

/// Scratch file name suffix.
const SCRATCH_SUFFIX: &str = ".f64";

const ELEMENT_SIZE: usize = size_of::<f64>();

/// A zero-initialized `f64` buffer living in a memory-mapped scratch file.
#[derive(Debug)]
pub struct MappedBuffer {
    // Field order matters: the mapping must drop before the file is removed.
    /// `None` while the buffer is empty; zero-length mappings are not portable.
    mmap: Option<MmapMut>,
    /// Scratch file, removed on drop.
    file: NamedTempFile,
    /// Length in elements.
    len: usize,
}

impl MappedBuffer {
    /// Creates a zero-filled buffer of `len` elements in `scratch_dir`.
    ///
    /// # Errors
    ///
    /// Returns `Z2nError::OutOfResources` if the scratch file cannot be
    /// created, sized or mapped.
    pub fn create(len: usize, scratch_dir: &Path) -> Result<Self> {
        let requested_bytes = byte_len(len)?;
        let file = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .suffix(SCRATCH_SUFFIX)
            .tempfile_in(scratch_dir)
            .map_err(|e| out_of_resources(requested_bytes, "create scratch file", e))?;

        // set_len zero-fills the new region
        file.as_file()
            .set_len(requested_bytes)
            .map_err(|e| out_of_resources(requested_bytes, "size scratch file", e))?;

        let mmap = map(&file, len)?;
        debug!(
            "Mapped {} bytes at {}",
            requested_bytes,
            file.path().display()
        );

        Ok(Self { mmap, file, len })
    }

    /// Length in elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Path of the scratch file.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Views the buffer as a slice.
    pub fn as_slice(&self) -> &[f64] {
        match &self.mmap {
            Some(mmap) => &bytemuck::cast_slice(&mmap[..])[..self.len],
            None => &[],
        }
    }

    /// Views the buffer as a mutable slice.
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        match &mut self.mmap {
            Some(mmap) => &mut bytemuck::cast_slice_mut(&mut mmap[..])[..self.len],
            None => &mut [],
        }
    }

    /// Flushes dirty pages to the scratch file.
    pub fn flush(&self) -> Result<()> {
        if let Some(mmap) = &self.mmap {
            mmap.flush()?;
        }
        Ok(())
    }

    /// Resizes the buffer to `new_len` elements, zero-filling any growth.
    ///
    /// Growing can fail and then leaves the buffer untouched. Shrinking never
    /// fails: if the shorter view cannot be mapped, the old mapping is kept
    /// and only the logical length drops.
    pub fn resize(&mut self, new_len: usize) -> Result<()> {
        if new_len == self.len {
            return Ok(());
        }
        if new_len > self.len {
            self.grow(new_len)
        } else {
            self.shrink(new_len);
            Ok(())
        }
    }

    fn grow(&mut self, new_len: usize) -> Result<()> {
        let new_bytes = byte_len(new_len)?;
        let old_bytes = byte_len(self.len)?;
        self.flush()?;

        self.file
            .as_file()
            .set_len(new_bytes)
            .map_err(|e| out_of_resources(new_bytes, "grow scratch file", e))?;
        match map(&self.file, new_len) {
            Ok(mmap) => {
                self.mmap = mmap;
                self.len = new_len;
                // An earlier best-effort shrink may have left stale bytes behind.
                self.zero_bytes(old_bytes, new_bytes);
                Ok(())
            }
            Err(err) => {
                let restore = old_bytes.max(self.mapped_bytes());
                if let Err(e) = self.file.as_file().set_len(restore) {
                    warn!("Failed to restore scratch file length: {:?}", e);
                }
                Err(err)
            }
        }
    }

    fn shrink(&mut self, new_len: usize) {
        match map(&self.file, new_len) {
            Ok(mmap) => {
                self.mmap = mmap;
                // Best effort: `grow` re-zeroes anything a failed truncate leaves behind.
                if let Ok(new_bytes) = byte_len(new_len) {
                    if let Err(e) = self.file.as_file().set_len(new_bytes) {
                        warn!(
                            "Failed to shrink scratch file {}: {:?}",
                            self.file.path().display(),
                            e
                        );
                    }
                }
            }
            Err(e) => warn!("Keeping oversized mapping after failed remap: {:?}", e),
        }
        self.len = new_len;
    }

    fn mapped_bytes(&self) -> u64 {
        self.mmap.as_ref().map_or(0, |m| m.len() as u64)
    }

    fn zero_bytes(&mut self, from: u64, to: u64) {
        if let Some(mmap) = &mut self.mmap {
            let end = (to as usize).min(mmap.len());
            let start = (from as usize).min(end);
            mmap[start..end].fill(0);
        }
    }
}

impl Drop for MappedBuffer {
    fn drop(&mut self) {
        // Release the mapping before NamedTempFile removes the file.
        self.mmap.take();
        debug!("Releasing scratch file {}", self.file.path().display());
    }
}

fn map(file: &NamedTempFile, len: usize) -> Result<Option<MmapMut>> {
    if len == 0 {
        return Ok(None);
    }
    let bytes = len * ELEMENT_SIZE;
    // SAFETY: the scratch file is private to this buffer (unique temp name,
    // never shared with another process) and only resized through `resize`,
    // which drops or replaces the mapping around every length change.
    let mmap = unsafe { MmapOptions::new().len(bytes).map_mut(file.as_file()) }
        .map_err(|e| out_of_resources(bytes as u64, "map scratch file", e))?;
    Ok(Some(mmap))
}

fn byte_len(len: usize) -> Result<u64> {
    len.checked_mul(ELEMENT_SIZE)
        .map(|b| b as u64)
        .ok_or_else(|| Z2nError::OutOfResources {
            requested_bytes: u64::MAX,
            reason: format!("{len} elements overflow the address space"),
        })
}

fn out_of_resources(requested_bytes: u64, what: &str, err: std::io::Error) -> Z2nError {
    Z2nError::OutOfResources {
        requested_bytes,
        reason: format!("{what}: {err}"),
    }
}
