//! Numeric backing store for spectrum data.
//!
//! A [`BackingStore`] is an `f64` array that lives either in RAM or in a
//! memory-mapped scratch file ([`MappedBuffer`]). Both backings expose the
//! same operations with the same semantics:
//!
//! - `read` / `write` single elements
//! - `slice` a half-open range into an owned `Vec`
//! - `splice` a half-open range with a replacement of any length
//! - `resize` (zero-filling growth)
//!
//! # Splice cost
//!
//! Splicing shifts every element after the replaced range, so it is linear in
//! the store length. Spectra are at most a few hundred million bins, which
//! keeps this acceptable for interactive region refinement.
//!
//! # Example
//!
//! ```rust,ignore
//! use z2n::store::BackingStore;
//!
//! let mut store = BackingStore::in_memory(4)?;
//! store.splice(1, 3, &[9.0, 9.0, 9.0])?;
//! assert_eq!(store.slice(0, 5)?, vec![0.0, 9.0, 9.0, 9.0, 0.0]);
//! ```

mod mapped;

pub use mapped::MappedBuffer;

use crate::error::{Result, Z2nError};
use std::path::Path;
use tracing::debug;

/// Size in bytes of one stored element.
pub const ELEMENT_SIZE: u64 = std::mem::size_of::<f64>() as u64;

#[derive(Debug)]
enum Backing {
    Memory(Vec<f64>),
    Mapped(MappedBuffer),
}

/// An `f64` array held in memory or in a memory-mapped scratch file.
#[derive(Debug)]
pub struct BackingStore {
    backing: Backing,
}

impl BackingStore {
    /// Allocates a zero-initialized store of `size` elements.
    ///
    /// When `disk_backed` is set, the store is a memory-mapped scratch file
    /// created in `scratch_dir`, removed again when the store drops.
    ///
    /// # Errors
    ///
    /// Returns `Z2nError::OutOfResources` if neither the memory nor the
    /// scratch file can be obtained.
    pub fn allocate(size: usize, disk_backed: bool, scratch_dir: &Path) -> Result<Self> {
        if disk_backed {
            let buffer = MappedBuffer::create(size, scratch_dir)?;
            Ok(Self {
                backing: Backing::Mapped(buffer),
            })
        } else {
            Self::in_memory(size)
        }
    }

    /// Allocates a zero-initialized in-memory store of `size` elements.
    pub fn in_memory(size: usize) -> Result<Self> {
        let mut values = Vec::new();
        values
            .try_reserve_exact(size)
            .map_err(|e| Z2nError::OutOfResources {
                requested_bytes: (size as u64).saturating_mul(ELEMENT_SIZE),
                reason: e.to_string(),
            })?;
        values.resize(size, 0.0);
        Ok(Self {
            backing: Backing::Memory(values),
        })
    }

    /// Builds an in-memory store holding `values`.
    pub fn from_vec(values: Vec<f64>) -> Self {
        Self {
            backing: Backing::Memory(values),
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match &self.backing {
            Backing::Memory(values) => values.len(),
            Backing::Mapped(buffer) => buffer.len(),
        }
    }

    /// Returns true if the store holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if the store lives in a memory-mapped scratch file.
    pub fn is_disk_backed(&self) -> bool {
        matches!(self.backing, Backing::Mapped(_))
    }

    /// Path of the scratch file, for disk-backed stores.
    pub fn scratch_path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::Memory(_) => None,
            Backing::Mapped(buffer) => Some(buffer.path()),
        }
    }

    /// Views the whole store as a slice.
    pub fn as_slice(&self) -> &[f64] {
        match &self.backing {
            Backing::Memory(values) => values,
            Backing::Mapped(buffer) => buffer.as_slice(),
        }
    }

    /// Views the whole store as a mutable slice.
    ///
    /// Disjoint sub-slices of it may be written from different threads.
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        match &mut self.backing {
            Backing::Memory(values) => values,
            Backing::Mapped(buffer) => buffer.as_mut_slice(),
        }
    }

    /// Reads element `index`.
    pub fn read(&self, index: usize) -> Result<f64> {
        self.check_index(index)?;
        Ok(self.as_slice()[index])
    }

    /// Writes `value` at `index`.
    pub fn write(&mut self, index: usize, value: f64) -> Result<()> {
        self.check_index(index)?;
        self.as_mut_slice()[index] = value;
        Ok(())
    }

    /// Copies the half-open range `[lo, hi)` out of the store.
    pub fn slice(&self, lo: usize, hi: usize) -> Result<Vec<f64>> {
        self.check_range(lo, hi)?;
        Ok(self.as_slice()[lo..hi].to_vec())
    }

    /// Replaces `[lo, hi)` with `replacement`.
    ///
    /// The store grows or shrinks by `replacement.len() - (hi - lo)`;
    /// elements after `hi` are shifted to follow the replacement. On error
    /// the store is unchanged.
    ///
    /// # Errors
    ///
    /// Returns `Z2nError::IndexOutOfBounds` unless `lo <= hi <= len`, and
    /// `Z2nError::OutOfResources` if a disk-backed store cannot grow.
    pub fn splice(&mut self, lo: usize, hi: usize, replacement: &[f64]) -> Result<()> {
        self.check_range(lo, hi)?;
        let old_len = self.len();
        let removed = hi - lo;
        let new_len = old_len - removed + replacement.len();

        match &mut self.backing {
            Backing::Memory(values) => {
                if replacement.len() > removed {
                    values
                        .try_reserve(replacement.len() - removed)
                        .map_err(|e| Z2nError::OutOfResources {
                            requested_bytes: (new_len as u64).saturating_mul(ELEMENT_SIZE),
                            reason: e.to_string(),
                        })?;
                }
                values.splice(lo..hi, replacement.iter().copied());
            }
            Backing::Mapped(buffer) => {
                let new_hi = lo + replacement.len();
                if new_len > old_len {
                    buffer.resize(new_len)?;
                    let data = buffer.as_mut_slice();
                    data.copy_within(hi..old_len, new_hi);
                    data[lo..new_hi].copy_from_slice(replacement);
                } else {
                    let data = buffer.as_mut_slice();
                    data[lo..new_hi].copy_from_slice(replacement);
                    data.copy_within(hi..old_len, new_hi);
                    buffer.resize(new_len)?;
                }
            }
        }

        debug!(
            "Spliced [{}, {}) with {} values ({} -> {} elements)",
            lo,
            hi,
            replacement.len(),
            old_len,
            new_len
        );
        Ok(())
    }

    /// Resizes the store to `new_len` elements, zero-filling growth.
    pub fn resize(&mut self, new_len: usize) -> Result<()> {
        match &mut self.backing {
            Backing::Memory(values) => {
                if new_len > values.len() {
                    values
                        .try_reserve_exact(new_len - values.len())
                        .map_err(|e| Z2nError::OutOfResources {
                            requested_bytes: (new_len as u64).saturating_mul(ELEMENT_SIZE),
                            reason: e.to_string(),
                        })?;
                }
                values.resize(new_len, 0.0);
                Ok(())
            }
            Backing::Mapped(buffer) => buffer.resize(new_len),
        }
    }

    /// Flushes pending writes of a disk-backed store. No-op in memory.
    pub fn flush(&self) -> Result<()> {
        match &self.backing {
            Backing::Memory(_) => Ok(()),
            Backing::Mapped(buffer) => buffer.flush(),
        }
    }

    /// Copies the contents into an owned `Vec`.
    pub fn to_vec(&self) -> Vec<f64> {
        self.as_slice().to_vec()
    }

    fn check_index(&self, index: usize) -> Result<()> {
        let len = self.len();
        if index >= len {
            return Err(Z2nError::IndexOutOfBounds {
                lo: index,
                hi: index + 1,
                len,
            });
        }
        Ok(())
    }

    fn check_range(&self, lo: usize, hi: usize) -> Result<()> {
        let len = self.len();
        if lo > hi || hi > len {
            return Err(Z2nError::IndexOutOfBounds { lo, hi, len });
        }
        Ok(())
    }
}
