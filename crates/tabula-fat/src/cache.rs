//! Windowed cache over the on-disk FAT bytes.
//!
//! The engine never hands FAT regions to anyone else: every entry access
//! goes through a [`FatBlock`] window owned by this cache. Reads are served
//! from the first FAT copy; a flush writes every dirty window back to each
//! copy in turn, which is what makes a mutation committed.

use std::collections::BTreeMap;

use log::{debug, trace};
use tabula_io::BlockDevice;

use crate::error::FatError;

/// Default window length for 16- and 32-bit tables. 12-bit tables always
/// use a single whole-table window, so no entry straddles a boundary.
pub const DEFAULT_WINDOW_SIZE: usize = 4096;

/// A cached window of raw FAT bytes.
///
/// `offset` is relative to the start of the first FAT copy. The window is
/// exclusively owned while cached; a dirty window covers exactly the bytes
/// that will be rewritten on flush.
pub struct FatBlock {
    offset: u64,
    data: Vec<u8>,
    dirty: bool,
}

impl FatBlock {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable view of the window, marking it dirty.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.dirty = true;
        &mut self.data
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

pub struct FatCache {
    device: Option<Box<dyn BlockDevice + Send>>,
    blocks: BTreeMap<u64, FatBlock>,
    window_size: usize,
    fat_offset: u64,
    fat_size: u64,
    fat_count: u8,
    retain: bool,
}

impl FatCache {
    pub fn new(
        device: Option<Box<dyn BlockDevice + Send>>,
        fat_offset: u64,
        fat_size: u64,
        fat_count: u8,
        window_size: usize,
        retain: bool,
    ) -> Self {
        // Without a device the windows are the only copy of the table
        let retain = retain || device.is_none();
        Self {
            device,
            blocks: BTreeMap::new(),
            window_size: window_size.max(1),
            fat_offset,
            fat_size,
            fat_count,
            retain,
        }
    }

    pub fn has_device(&self) -> bool {
        self.device.is_some()
    }

    /// Seeds a window without touching the device. Used when a volume is
    /// built over bytes the caller already holds.
    pub fn insert_window(&mut self, offset: u64, data: Vec<u8>) {
        self.blocks.insert(
            offset,
            FatBlock {
                offset,
                data,
                dirty: false,
            },
        );
    }

    fn window_base(&self, rel: u64) -> u64 {
        rel - rel % self.window_size as u64
    }

    /// Returns the window owning the `span` bytes at table offset `rel`,
    /// loading it from the device on a miss.
    pub fn block(&mut self, rel: u64, span: usize) -> Result<&mut FatBlock, FatError> {
        let base = self.window_base(rel);
        let remaining = self.fat_size.checked_sub(base).ok_or(FatError::NotLoaded)?;
        if !self.blocks.contains_key(&base) {
            let device = self.device.as_mut().ok_or(FatError::NotLoaded)?;
            let len = remaining.min(self.window_size as u64) as usize;
            let mut data = vec![0u8; len];
            device.read_at(self.fat_offset + base, &mut data)?;
            trace!("loaded FAT window {:#x}+{}", base, len);
            self.blocks.insert(
                base,
                FatBlock {
                    offset: base,
                    data,
                    dirty: false,
                },
            );
        }
        let block = self
            .blocks
            .get_mut(&base)
            .filter(|block| rel + span as u64 <= block.offset + block.data.len() as u64)
            .ok_or(FatError::NotLoaded)?;
        Ok(block)
    }

    /// Writes every dirty window to each on-disk FAT copy, then applies the
    /// retention policy. All copies carry identical bytes once this returns.
    pub fn flush(&mut self) -> Result<(), FatError> {
        if let Some(device) = self.device.as_mut() {
            for block in self.blocks.values_mut().filter(|block| block.dirty) {
                for copy in 0..self.fat_count {
                    let offset = self.fat_offset + copy as u64 * self.fat_size + block.offset;
                    device.write_at(offset, &block.data)?;
                }
                debug!(
                    "flushed FAT window {:#x}+{} to {} cop{}",
                    block.offset,
                    block.data.len(),
                    self.fat_count,
                    if self.fat_count == 1 { "y" } else { "ies" }
                );
                block.dirty = false;
            }
            if !self.retain {
                self.blocks.clear();
            }
        }
        Ok(())
    }
}
