//! Free-space allocation and chain retraction.

use log::{debug, warn};

use crate::error::FatError;
use crate::structures::fat::is_eof_cluster;
use crate::structures::raw::fat::constants;
use crate::volume::{Chain, FatVolume};

/// Result of a successful allocation: the run's first and last clusters
/// and how many were actually granted (which can be less than requested
/// only under `allow_partial`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Allocation {
    pub first: u32,
    pub last: u32,
    pub count: u32,
}

impl FatVolume {
    /// Allocates `count` clusters, scanning circularly from the free hint.
    ///
    /// With `must_be_contiguous` the grant is a single physically
    /// consecutive run or the call fails with
    /// [`FatError::InsufficientContiguousSpace`] having claimed nothing.
    /// Otherwise clusters are claimed wherever found and chained together;
    /// running out of space either returns the partial grant
    /// (`allow_partial`) or restores every touched entry and fails with
    /// [`FatError::InsufficientSpace`].
    ///
    /// Passing a non-empty `chain` links the grant onto its tail: the old
    /// tail's end-of-chain marker is rewritten to point at the new first
    /// cluster, and the handle's cached tail moves to the new last. The
    /// grant is committed to every FAT copy before the call returns.
    pub fn allocate_clusters(
        &mut self,
        count: u32,
        chain: Option<&mut Chain>,
        allow_partial: bool,
        must_be_contiguous: bool,
    ) -> Result<Allocation, FatError> {
        if count == 0 {
            return Ok(Allocation::default());
        }
        if self.max_cluster() < constants::FIRST_VALID_CLUSTER {
            return Err(if must_be_contiguous {
                FatError::InsufficientContiguousSpace
            } else {
                FatError::InsufficientSpace
            });
        }
        let old_tail = match &chain {
            Some(chain) if !chain.is_empty() => {
                self.check_cluster(chain.last)?;
                Some(chain.last)
            }
            _ => None,
        };

        let alloc = if must_be_contiguous {
            let alloc = self.claim_contiguous(count)?;
            if let Some(tail) = old_tail {
                self.write_entry(tail, alloc.first)?;
            }
            alloc
        } else {
            self.claim_fragmented(count, allow_partial, old_tail)?
        };

        if let Some(chain) = chain {
            if chain.is_empty() {
                chain.first = alloc.first;
            }
            chain.last = alloc.last;
        }
        self.free_hint = self.next_cluster_circular(alloc.last);
        if let Some(free) = &mut self.free_count {
            *free = free.saturating_sub(alloc.count);
        }
        self.commit()?;
        debug!(
            "allocated {} cluster(s), first {} last {}",
            alloc.count, alloc.first, alloc.last
        );
        Ok(alloc)
    }

    /// Finds and claims one free run of exactly `count` clusters. The scan
    /// is read-only, so a failed search leaves the table untouched.
    fn claim_contiguous(&mut self, count: u32) -> Result<Allocation, FatError> {
        let Some(start) = self.find_free_run(count)? else {
            return Err(FatError::InsufficientContiguousSpace);
        };
        for i in 0..count - 1 {
            self.write_entry(start + i, start + i + 1)?;
        }
        let last = start + count - 1;
        self.write_entry(last, constants::CLUSTER_LAST)?;
        Ok(Allocation {
            first: start,
            last,
            count,
        })
    }

    /// First cluster of a free run of `count` entries, preferring runs at
    /// or after the hint. A run never wraps the end of the cluster space;
    /// the wrap pass rescans from cluster 2 over the whole range so a run
    /// straddling the hint is still seen.
    fn find_free_run(&mut self, count: u32) -> Result<Option<u32>, FatError> {
        let hint = self.free_hint.clamp(constants::FIRST_VALID_CLUSTER, self.max_cluster);
        let segments = [
            (hint, self.max_cluster),
            (constants::FIRST_VALID_CLUSTER, self.max_cluster),
        ];
        for (from, to) in segments {
            let mut run_len = 0u32;
            for cluster in from..=to {
                if self.read_entry(cluster)? == constants::CLUSTER_FREE {
                    run_len += 1;
                    if run_len == count {
                        return Ok(Some(cluster + 1 - count));
                    }
                } else {
                    run_len = 0;
                }
            }
        }
        Ok(None)
    }

    /// Greedy claim: takes free clusters in scan order, linking each to the
    /// previous one (or onto `old_tail`) as it is found.
    fn claim_fragmented(
        &mut self,
        count: u32,
        allow_partial: bool,
        old_tail: Option<u32>,
    ) -> Result<Allocation, FatError> {
        let saved_tail = match old_tail {
            Some(tail) => Some((tail, self.read_raw_entry(tail)?)),
            None => None,
        };

        let population = self.cluster_population();
        let mut claimed: Vec<u32> = Vec::with_capacity(count.min(population) as usize);
        let mut prev = old_tail;
        let mut first = 0u32;
        let mut cluster = self.free_hint.clamp(constants::FIRST_VALID_CLUSTER, self.max_cluster);
        let mut visited = 0u32;
        while (claimed.len() as u32) < count && visited < population {
            if self.read_entry(cluster)? == constants::CLUSTER_FREE {
                self.write_entry(cluster, constants::CLUSTER_LAST)?;
                if let Some(prev) = prev {
                    self.write_entry(prev, cluster)?;
                }
                if claimed.is_empty() {
                    first = cluster;
                }
                prev = Some(cluster);
                claimed.push(cluster);
            }
            visited += 1;
            cluster = self.next_cluster_circular(cluster);
        }

        let granted = claimed.len() as u32;
        if granted == count || (allow_partial && granted > 0) {
            return Ok(Allocation {
                first,
                last: claimed[claimed.len() - 1],
                count: granted,
            });
        }

        // Put back everything this call touched, newest first
        for cluster in claimed.iter().rev() {
            self.write_entry(*cluster, constants::CLUSTER_FREE)?;
        }
        if let Some((tail, raw)) = saved_tail {
            self.write_raw_entry(tail, raw)?;
        }
        Err(FatError::InsufficientSpace)
    }

    /// Frees exactly `count` clusters off the tail of `chain`, writing a
    /// fresh end-of-chain marker at the new tail. Fails with
    /// [`FatError::ChainTooShort`], chain untouched, if the chain holds
    /// fewer than `count` clusters.
    pub fn free_clusters(&mut self, count: u32, chain: &mut Chain) -> Result<(), FatError> {
        if count == 0 {
            return Ok(());
        }
        let Some(first) = chain.first_cluster() else {
            return Err(FatError::ChainTooShort);
        };
        let (_, length) = self.chain_length_of(first)?;
        if count > length {
            return Err(FatError::ChainTooShort);
        }

        let lowest = if count == length {
            let lowest = self.release_linked(first, count)?;
            *chain = Chain::empty();
            lowest
        } else {
            let mut new_tail = first;
            for _ in 0..length - count - 1 {
                new_tail = self.read_entry(new_tail)?;
            }
            let first_freed = self.read_entry(new_tail)?;
            self.write_entry(new_tail, constants::CLUSTER_LAST)?;
            let lowest = self.release_linked(first_freed, count)?;
            chain.last = new_tail;
            lowest
        };

        self.free_hint = self.free_hint.min(lowest);
        if let Some(free) = &mut self.free_count {
            *free = free.saturating_add(count);
        }
        self.commit()?;
        debug!("freed {count} cluster(s) from chain tail");
        Ok(())
    }

    /// Low-level free of a linked run, for cleaning up partially completed
    /// allocations. Follows linkage from `start_cluster` for at most
    /// `num_clusters` entries and stops quietly at an end-of-chain marker,
    /// an already-free entry, or a link leaving the valid space. Does not
    /// maintain any chain handle; never use it on a chain still reachable
    /// from a directory entry.
    pub fn free_cluster_from(
        &mut self,
        start_cluster: u32,
        num_clusters: u32,
    ) -> Result<(), FatError> {
        self.check_cluster(start_cluster)?;
        let mut cluster = start_cluster;
        let mut freed = 0u32;
        let mut lowest = u32::MAX;
        while freed < num_clusters {
            let value = self.read_entry(cluster)?;
            if value == constants::CLUSTER_FREE {
                break;
            }
            self.write_entry(cluster, constants::CLUSTER_FREE)?;
            lowest = lowest.min(cluster);
            freed += 1;
            if is_eof_cluster(value) || self.check_cluster(value).is_err() {
                break;
            }
            cluster = value;
        }
        if freed > 0 {
            self.free_hint = self.free_hint.min(lowest);
            if let Some(free) = &mut self.free_count {
                *free = free.saturating_add(freed);
            }
            self.commit()?;
            debug!("released {freed} cluster(s) starting at {start_cluster}");
        }
        Ok(())
    }

    /// Frees `limit` clusters known to be linked starting at `start`,
    /// returning the lowest cluster freed.
    fn release_linked(&mut self, start: u32, limit: u32) -> Result<u32, FatError> {
        let mut cluster = start;
        let mut lowest = u32::MAX;
        for i in 0..limit {
            if self.check_cluster(cluster).is_err() {
                warn!("chain link {cluster:#x} leaves the valid space");
                return Err(FatError::CorruptChain);
            }
            let next = self.read_entry(cluster)?;
            self.write_entry(cluster, constants::CLUSTER_FREE)?;
            lowest = lowest.min(cluster);
            if i + 1 < limit {
                if is_eof_cluster(next) {
                    warn!("chain ended {} cluster(s) early", limit - i - 1);
                    return Err(FatError::CorruptChain);
                }
                cluster = next;
            }
        }
        Ok(lowest)
    }
}
