//! Volume health flags kept in FAT entry #1.
//!
//! The clean-shutdown bit lives at a width-dependent position (bit 15 on
//! FAT16, bit 27 on FAT32) and is independent of the allocation bits in the
//! same entry; reads and writes here are targeted single-bit operations.
//! FAT12 defines no such bit.

use bitflags::bitflags;
use log::debug;

use crate::error::FatError;
use crate::volume::FatVolume;

/// The clean/dirty flag as the mount layer sees it. `Unknown` means the
/// sub-type defines no dirty bit or the entry could not be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyState {
    Clean,
    Dirty,
    Unknown,
}

bitflags! {
    /// Width-independent view of the health bits in FAT entry #1.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VolumeFlags: u8 {
        /// Set while the volume is cleanly unmounted; clear means the
        /// volume should be scanned before reuse.
        const CLEAN_SHUTDOWN = 1 << 0;
        /// Clear when a read/write error was hit during the last mount.
        const HARD_ERROR = 1 << 1;
    }
}

impl FatVolume {
    /// Both health bits, or `None` when the width defines none (FAT12) or
    /// the entry is unreadable.
    pub fn volume_flags(&mut self) -> Option<VolumeFlags> {
        let clean_mask = self.fat_type().clean_shutdown_mask()?;
        let error_mask = self.fat_type().hard_error_mask()?;
        let raw = self.read_raw_entry(1).ok()?;
        let mut flags = VolumeFlags::empty();
        if raw & clean_mask != 0 {
            flags |= VolumeFlags::CLEAN_SHUTDOWN;
        }
        if raw & error_mask != 0 {
            flags |= VolumeFlags::HARD_ERROR;
        }
        Some(flags)
    }

    pub fn dirty_state(&mut self) -> DirtyState {
        match self.volume_flags() {
            Some(flags) if flags.contains(VolumeFlags::CLEAN_SHUTDOWN) => DirtyState::Clean,
            Some(_) => DirtyState::Dirty,
            None => DirtyState::Unknown,
        }
    }

    /// Sets or clears the clean-shutdown bit with a read-modify-write of
    /// entry #1, leaving every other bit in the entry alone. A no-op on
    /// FAT12 and for `DirtyState::Unknown`.
    pub fn set_dirty_state(&mut self, state: DirtyState) -> Result<(), FatError> {
        let set_bit = match state {
            DirtyState::Clean => true,
            DirtyState::Dirty => false,
            DirtyState::Unknown => return Ok(()),
        };
        let Some(mask) = self.fat_type().clean_shutdown_mask() else {
            debug!("volume has no dirty bit, ignoring state change");
            return Ok(());
        };
        let raw = self.read_raw_entry(1)?;
        let updated = if set_bit { raw | mask } else { raw & !mask };
        if updated != raw {
            self.write_raw_entry(1, updated)?;
            self.commit()?;
        }
        Ok(())
    }
}
