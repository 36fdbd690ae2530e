//! Per-volume cluster-allocation state.
//!
//! One [`FatVolume`] exclusively owns a mounted volume's FAT bytes, its
//! free-cluster hint and its free-count bookkeeping. Nothing here is
//! synchronized; serialization comes from running every operation on the
//! volume's [`crate::queue::FatQueue`].

mod alloc;
mod chain;
mod dirty;

pub use alloc::Allocation;
pub use chain::ContigRun;
pub use dirty::{DirtyState, VolumeFlags};

use log::trace;
use tabula_io::BlockDevice;

use crate::cache::{DEFAULT_WINDOW_SIZE, FatCache};
use crate::error::FatError;
use crate::structures::fat::FatType;
use crate::structures::raw::fat::constants;

/// Construction parameters, read off the boot sector by the mount layer.
#[derive(Debug, Clone)]
pub struct FatVolumeConfig {
    pub fat_type: FatType,
    /// Device byte offset of the first FAT copy.
    pub fat_offset: u64,
    /// Size of one FAT copy in bytes.
    pub fat_size: u64,
    /// Number of on-disk FAT copies.
    pub fat_count: u8,
    /// Highest valid cluster number. Derived from `fat_size` when `None`.
    pub max_cluster: Option<u32>,
    /// Recorded next-free hint (FAT32 FsInfo); cluster 2 when absent.
    pub free_hint: Option<u32>,
    /// Recorded free-cluster count; recounted on demand when absent.
    pub free_count: Option<u32>,
    /// Retain clean FAT windows between operations.
    pub cache_blocks: bool,
}

impl FatVolumeConfig {
    pub fn new(fat_type: FatType, fat_offset: u64, fat_size: u64, fat_count: u8) -> Self {
        Self {
            fat_type,
            fat_offset,
            fat_size,
            fat_count,
            max_cluster: None,
            free_hint: None,
            free_count: None,
            cache_blocks: true,
        }
    }
}

/// A cluster chain as the upper layer tracks it: first cluster plus the
/// cached EOF-holding tail. `Chain::empty()` stands for an item with no
/// clusters at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Chain {
    pub(crate) first: u32,
    pub(crate) last: u32,
}

impl Chain {
    pub const fn empty() -> Self {
        Self { first: 0, last: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.first < constants::FIRST_VALID_CLUSTER
    }

    pub fn first_cluster(&self) -> Option<u32> {
        (!self.is_empty()).then_some(self.first)
    }

    pub fn last_cluster(&self) -> Option<u32> {
        (!self.is_empty()).then_some(self.last)
    }
}

pub struct FatVolume {
    fat_type: FatType,
    cache: FatCache,
    max_cluster: u32,
    free_hint: u32,
    free_count: Option<u32>,
}

impl FatVolume {
    /// Opens a volume over a block device. No I/O happens until the first
    /// entry is touched.
    pub fn new(config: FatVolumeConfig, device: Box<dyn BlockDevice + Send>) -> Self {
        Self::build(config, Some(device), None)
    }

    /// Builds a volume over FAT bytes the caller already read, with no
    /// device behind them. Mutations stay in memory; touching an entry
    /// beyond the supplied bytes reports [`FatError::NotLoaded`].
    pub fn from_bytes(config: FatVolumeConfig, table: Vec<u8>) -> Self {
        Self::build(config, None, Some(table))
    }

    fn build(
        config: FatVolumeConfig,
        device: Option<Box<dyn BlockDevice + Send>>,
        table: Option<Vec<u8>>,
    ) -> Self {
        let derived_max = config.fat_type.entries_in(config.fat_size).saturating_sub(1);
        let max_cluster = config
            .max_cluster
            .map_or(derived_max, |max| max.min(derived_max));

        // One whole-table window keeps 12-bit entries from straddling
        // window boundaries; FAT12 tables top out at a few KiB anyway.
        let window_size = match config.fat_type {
            FatType::Fat12 => config.fat_size as usize,
            FatType::Fat16 | FatType::Fat32 => {
                DEFAULT_WINDOW_SIZE.min(config.fat_size as usize).max(4) & !3
            }
        };

        let mut cache = FatCache::new(
            device,
            config.fat_offset,
            config.fat_size,
            config.fat_count.max(1),
            window_size,
            config.cache_blocks,
        );
        if let Some(table) = table {
            cache.insert_window(0, table);
        }

        let free_hint = config
            .free_hint
            .filter(|hint| (constants::FIRST_VALID_CLUSTER..=max_cluster).contains(hint))
            .unwrap_or(constants::FIRST_VALID_CLUSTER);

        Self {
            fat_type: config.fat_type,
            cache,
            max_cluster,
            free_hint,
            free_count: config.free_count,
        }
    }

    pub fn fat_type(&self) -> FatType {
        self.fat_type
    }

    /// Highest valid cluster number.
    pub fn max_cluster(&self) -> u32 {
        self.max_cluster
    }

    /// Where the next free-space scan starts.
    pub fn free_hint(&self) -> u32 {
        self.free_hint
    }

    /// Number of valid clusters on the volume.
    pub(crate) fn cluster_population(&self) -> u32 {
        self.max_cluster
            .saturating_sub(constants::FIRST_VALID_CLUSTER)
            .saturating_add(1)
    }

    pub(crate) fn check_cluster(&self, cluster: u32) -> Result<(), FatError> {
        if (constants::FIRST_VALID_CLUSTER..=self.max_cluster).contains(&cluster) {
            Ok(())
        } else {
            Err(FatError::OutOfRange(cluster))
        }
    }

    pub(crate) fn next_cluster_circular(&self, cluster: u32) -> u32 {
        if cluster >= self.max_cluster {
            constants::FIRST_VALID_CLUSTER
        } else {
            cluster + 1
        }
    }

    /// Reads an entry without range checks or canonical widening. Entry
    /// indices 0 and 1 are only reachable through here.
    pub(crate) fn read_raw_entry(&mut self, index: u32) -> Result<u32, FatError> {
        let offset = self.fat_type.entry_offset(index);
        let span = self.fat_type.entry_span();
        let block = self.cache.block(offset, span)?;
        let local = (offset - block.offset()) as usize;
        Ok(self.fat_type.unpack_raw(block.data(), local, index))
    }

    pub(crate) fn write_raw_entry(&mut self, index: u32, raw: u32) -> Result<(), FatError> {
        let offset = self.fat_type.entry_offset(index);
        let span = self.fat_type.entry_span();
        let block = self.cache.block(offset, span)?;
        let local = (offset - block.offset()) as usize;
        self.fat_type.pack_raw(block.data_mut(), local, index, raw);
        Ok(())
    }

    /// Reads `cluster`'s entry as a canonical 32-bit value.
    pub fn read_entry(&mut self, cluster: u32) -> Result<u32, FatError> {
        self.check_cluster(cluster)?;
        let raw = self.read_raw_entry(cluster)?;
        Ok(self.fat_type.decode(raw))
    }

    /// Writes a canonical value into `cluster`'s entry, marking the owning
    /// window dirty. The write reaches the device at the next commit.
    pub fn write_entry(&mut self, cluster: u32, value: u32) -> Result<(), FatError> {
        self.check_cluster(cluster)?;
        trace!("entry[{cluster}] <- {value:#010x}");
        self.write_raw_entry(cluster, self.fat_type.encode(value))
    }

    /// Pushes every pending entry write to all on-disk FAT copies.
    pub fn commit(&mut self) -> Result<(), FatError> {
        self.cache.flush()
    }

    /// Current free-cluster count, counting the table on first use if the
    /// mount layer supplied none.
    pub fn free_cluster_count(&mut self) -> Result<u32, FatError> {
        if let Some(count) = self.free_count {
            return Ok(count);
        }
        let mut count = 0u32;
        for cluster in constants::FIRST_VALID_CLUSTER..=self.max_cluster {
            if self.read_entry(cluster)? == constants::CLUSTER_FREE {
                count += 1;
            }
        }
        self.free_count = Some(count);
        Ok(count)
    }
}
