use thiserror::Error;

/// Errors reported by the cluster-allocation engine.
///
/// Every public operation returns these through its `Result` (or, on a
/// [`crate::queue::FatQueue`], through its completion callback); nothing is
/// swallowed. Device failures are wrapped as [`FatError::DeviceIo`] and are
/// never retried here, retry policy belongs to the device or its caller.
#[derive(Debug, Error)]
pub enum FatError {
    /// The cluster lies outside the valid cluster space of the volume.
    #[error("cluster {0:#010x} is outside the valid cluster space")]
    OutOfRange(u32),

    /// Not enough free clusters to satisfy a non-partial allocation.
    #[error("not enough free clusters on the volume")]
    InsufficientSpace,

    /// No single free run long enough for a contiguous allocation.
    #[error("no contiguous free run of the requested length")]
    InsufficientContiguousSpace,

    /// A tail-retraction asked for more clusters than the chain holds.
    #[error("chain holds fewer clusters than requested")]
    ChainTooShort,

    /// A chain links out of the valid space or back into itself.
    #[error("corrupt cluster chain")]
    CorruptChain,

    /// The owning FAT window is absent and no device is attached.
    #[error("FAT region not loaded and no device attached")]
    NotLoaded,

    /// The block device failed; the current operation was aborted without
    /// further mutation.
    #[error("device I/O error")]
    DeviceIo(#[from] std::io::Error),
}

impl FatError {
    /// Whether retrying the same call can ever succeed without outside help
    /// (space being freed, the device recovering).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FatError::InsufficientSpace
                | FatError::InsufficientContiguousSpace
                | FatError::DeviceIo(_)
        )
    }
}
