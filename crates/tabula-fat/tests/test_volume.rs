use pretty_assertions::assert_eq;
use tabula_fat::{
    Chain, DirtyState, FatError, FatType, FatVolume, FatVolumeConfig, VolumeFlags, is_eof_cluster,
};
use tabula_io::{MemoryBlockDevice, SharedBlockDevice};

/// Table bytes the way a formatter leaves them: media byte in entry #0,
/// end-of-chain plus both health bits in entry #1.
fn formatted_table(fat_type: FatType, entries: u32) -> Vec<u8> {
    match fat_type {
        FatType::Fat12 => {
            let mut bytes = vec![0u8; (entries as usize * 3).div_ceil(2)];
            bytes[..3].copy_from_slice(&[0xF8, 0xFF, 0xFF]);
            bytes
        }
        FatType::Fat16 => {
            let mut bytes = vec![0u8; entries as usize * 2];
            bytes[..4].copy_from_slice(&[0xF8, 0xFF, 0xFF, 0xFF]);
            bytes
        }
        FatType::Fat32 => {
            let mut bytes = vec![0u8; entries as usize * 4];
            bytes[..8].copy_from_slice(&[0xF8, 0xFF, 0xFF, 0x0F, 0xFF, 0xFF, 0xFF, 0xFF]);
            bytes
        }
    }
}

fn volume_over(fat_type: FatType, entries: u32) -> (FatVolume, SharedBlockDevice) {
    let table = formatted_table(fat_type, entries);
    let fat_size = table.len() as u64;
    let device = SharedBlockDevice::from_vec(table);
    let config = FatVolumeConfig::new(fat_type, 0, fat_size, 1);
    let volume = FatVolume::new(config, Box::new(device.clone()));
    (volume, device)
}

#[test]
fn fat16_dirty_bit_survives_remounting() {
    let (mut volume, device) = volume_over(FatType::Fat16, 64);
    assert_eq!(volume.dirty_state(), DirtyState::Clean);

    volume.set_dirty_state(DirtyState::Dirty).unwrap();
    assert_eq!(volume.dirty_state(), DirtyState::Dirty);

    // A new manager over the same bytes sees the flag
    let config = FatVolumeConfig::new(FatType::Fat16, 0, 128, 1);
    let mut reopened = FatVolume::new(config, Box::new(device.clone()));
    assert_eq!(reopened.dirty_state(), DirtyState::Dirty);

    reopened.set_dirty_state(DirtyState::Clean).unwrap();
    let config = FatVolumeConfig::new(FatType::Fat16, 0, 128, 1);
    let mut reopened = FatVolume::new(config, Box::new(device.clone()));
    assert_eq!(reopened.dirty_state(), DirtyState::Clean);
}

#[test]
fn dirty_bit_leaves_allocation_bits_alone() {
    let (mut volume, device) = volume_over(FatType::Fat16, 64);
    volume.set_dirty_state(DirtyState::Dirty).unwrap();
    // Entry #1 keeps its low bits, only bit 15 dropped
    assert_eq!(&device.contents()[2..4], &[0xFF, 0x7F]);

    let (mut volume, device) = volume_over(FatType::Fat32, 64);
    volume.set_dirty_state(DirtyState::Dirty).unwrap();
    // Bit 27 dropped, reserved high nibble intact
    assert_eq!(&device.contents()[4..8], &[0xFF, 0xFF, 0xFF, 0xF7]);
}

#[test]
fn fat32_health_flags_are_both_visible() {
    let (mut volume, _device) = volume_over(FatType::Fat32, 64);
    let flags = volume.volume_flags().unwrap();
    assert!(flags.contains(VolumeFlags::CLEAN_SHUTDOWN));
    assert!(flags.contains(VolumeFlags::HARD_ERROR));

    volume.set_dirty_state(DirtyState::Dirty).unwrap();
    let flags = volume.volume_flags().unwrap();
    assert!(!flags.contains(VolumeFlags::CLEAN_SHUTDOWN));
    assert!(flags.contains(VolumeFlags::HARD_ERROR));
}

#[test]
fn fat12_has_no_dirty_bit() {
    let (mut volume, device) = volume_over(FatType::Fat12, 16);
    assert_eq!(volume.dirty_state(), DirtyState::Unknown);

    let before = device.contents();
    volume.set_dirty_state(DirtyState::Dirty).unwrap();
    assert_eq!(device.contents(), before);
}

#[test]
fn setting_unknown_changes_nothing() {
    let (mut volume, device) = volume_over(FatType::Fat16, 64);
    let before = device.contents();
    volume.set_dirty_state(DirtyState::Unknown).unwrap();
    assert_eq!(device.contents(), before);
    assert_eq!(volume.dirty_state(), DirtyState::Clean);
}

#[test]
fn fat12_chains_pack_and_unpack_through_the_table() {
    let (mut volume, _device) = volume_over(FatType::Fat12, 16);
    let mut chain = Chain::empty();
    let alloc = volume
        .allocate_clusters(5, Some(&mut chain), false, false)
        .unwrap();
    assert_eq!((alloc.first, alloc.last, alloc.count), (2, 6, 5));

    // Odd and even entries share bytes; neighbours must survive each write
    for cluster in 2..6 {
        assert_eq!(volume.read_entry(cluster).unwrap(), cluster + 1);
    }
    assert!(is_eof_cluster(volume.read_entry(6).unwrap()));

    volume.free_clusters(2, &mut chain).unwrap();
    let (last, len) = volume.chain_length(&chain).unwrap();
    assert_eq!((last, len), (4, 3));
    assert_eq!(volume.read_entry(5).unwrap(), 0);
    assert_eq!(volume.read_entry(6).unwrap(), 0);
}

#[test]
fn fat16_chains_round_trip_through_the_table() {
    let (mut volume, device) = volume_over(FatType::Fat16, 64);
    let mut chain = Chain::empty();
    volume
        .allocate_clusters(3, Some(&mut chain), false, true)
        .unwrap();

    let bytes = device.contents();
    // Entries 2, 3, 4 on disk: 3, 4, EOC little-endian
    assert_eq!(&bytes[4..10], &[0x03, 0x00, 0x04, 0x00, 0xFF, 0xFF]);
}

#[test]
fn preloaded_volume_reports_unloaded_regions() {
    // Table claims 64 entries but only the first 4 are supplied
    let config = FatVolumeConfig::new(FatType::Fat32, 0, 256, 1);
    let mut volume = FatVolume::from_bytes(config, vec![0u8; 16]);

    assert_eq!(volume.read_entry(2).unwrap(), 0);
    assert!(matches!(volume.read_entry(4), Err(FatError::NotLoaded)));
    assert!(matches!(
        volume.allocate_clusters(60, None, false, false),
        Err(FatError::NotLoaded)
    ));
}

#[test]
fn preloaded_volume_mutates_in_memory() {
    let config = FatVolumeConfig::new(FatType::Fat32, 0, 64, 1);
    let mut volume = FatVolume::from_bytes(config, formatted_table(FatType::Fat32, 16));

    let alloc = volume.allocate_clusters(4, None, false, true).unwrap();
    assert_eq!((alloc.first, alloc.last), (2, 5));
    assert_eq!(volume.read_entry(2).unwrap(), 3);
    assert_eq!(volume.dirty_state(), DirtyState::Clean);
}

#[test]
fn device_errors_surface_as_io_failures() {
    // Device too small for the configured table: first load fails
    let device = MemoryBlockDevice::new(8);
    let config = FatVolumeConfig::new(FatType::Fat32, 0, 256, 1);
    let mut volume = FatVolume::new(config, Box::new(device));
    assert!(matches!(
        volume.read_entry(2),
        Err(FatError::DeviceIo(_))
    ));
}

#[test]
fn uncached_volumes_reread_the_device() {
    let table = formatted_table(FatType::Fat32, 16);
    let fat_size = table.len() as u64;
    let device = SharedBlockDevice::from_vec(table);
    let mut config = FatVolumeConfig::new(FatType::Fat32, 0, fat_size, 1);
    config.cache_blocks = false;
    let mut volume = FatVolume::new(config, Box::new(device.clone()));

    volume.allocate_clusters(2, None, false, true).unwrap();

    // Another writer changes the bytes behind the engine's back; with
    // caching off the next read observes it
    let mut probe = FatVolume::new(
        FatVolumeConfig::new(FatType::Fat32, 0, fat_size, 1),
        Box::new(device.clone()),
    );
    probe.write_entry(10, 0xFFFF_FFFF).unwrap();
    probe.commit().unwrap();

    assert!(is_eof_cluster(volume.read_entry(10).unwrap()));
}
