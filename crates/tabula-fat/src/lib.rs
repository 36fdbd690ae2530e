//! A cluster-allocation engine for FAT12/16/32 tables
//!
//! This crate owns the File Allocation Table of a mounted volume: it
//! allocates and frees cluster chains, walks chains as contiguous runs,
//! and maintains the volume dirty-bit, while reproducing the exact on-disk
//! binary layout (packed 12-bit entries, little-endian 16/32-bit entries
//! with the FAT32 reserved nibble, end-of-chain marker ranges, mirrored
//! table copies).
//!
//! It is deliberately not a filesystem: boot-sector parsing, directories
//! and long filenames belong to the layer above, which talks to this crate
//! through [`FatVolume`] (or through a [`FatQueue`] when operations from
//! several threads must be serialized) and supplies the raw medium as a
//! `tabula_io::BlockDevice`.
//!
//! ```no_run
//! use tabula_fat::{FatQueue, FatType, FatVolume, FatVolumeConfig};
//! use tabula_io::MemoryBlockDevice;
//!
//! let device = MemoryBlockDevice::new(64 * 1024);
//! let config = FatVolumeConfig::new(FatType::Fat32, 0, 16 * 1024, 2);
//! let queue = FatQueue::spawn(FatVolume::new(config, Box::new(device)))?;
//! let alloc = queue.run(|volume| volume.allocate_clusters(8, None, false, true))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod cache;
pub mod error;
pub mod queue;
pub mod structures;
pub mod volume;

pub use error::FatError;
pub use queue::FatQueue;
pub use structures::fat::{FatType, is_eof_cluster};
pub use volume::{
    Allocation, Chain, ContigRun, DirtyState, FatVolume, FatVolumeConfig, VolumeFlags,
};
