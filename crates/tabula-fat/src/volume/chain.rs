//! Chain walking: contiguous runs, full-chain accounting, run iteration.

use core::ops::ControlFlow;

use log::warn;

use crate::error::FatError;
use crate::structures::fat::is_eof_cluster;
use crate::volume::{Chain, FatVolume};

/// A maximal physically-contiguous run and the logical value following it
/// (the next chain cluster, or an end-of-chain marker).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContigRun {
    pub len: u32,
    pub next: u32,
}

impl FatVolume {
    /// Length of the maximal contiguous run starting at `cluster`, plus
    /// the entry value that follows the run.
    pub fn contiguous_run(&mut self, cluster: u32) -> Result<ContigRun, FatError> {
        self.check_cluster(cluster)?;
        let mut current = cluster;
        let mut len = 1u32;
        loop {
            let value = self.read_entry(current)?;
            if value == current + 1 && value <= self.max_cluster() {
                current = value;
                len += 1;
            } else {
                return Ok(ContigRun { len, next: value });
            }
        }
    }

    /// Walks the whole chain, returning its EOF-holding tail cluster and
    /// total length. An empty chain reports `(0, 0)`.
    pub fn chain_length(&mut self, chain: &Chain) -> Result<(u32, u32), FatError> {
        match chain.first_cluster() {
            None => Ok((0, 0)),
            Some(first) => self.chain_length_of(first),
        }
    }

    pub(crate) fn chain_length_of(&mut self, first: u32) -> Result<(u32, u32), FatError> {
        self.check_cluster(first)?;
        let step_limit = self.cluster_population();
        let mut cluster = first;
        let mut length = 1u32;
        loop {
            let value = self.read_entry(cluster)?;
            if is_eof_cluster(value) {
                return Ok((cluster, length));
            }
            if self.check_cluster(value).is_err() {
                warn!("chain from {first} links to invalid entry {value:#010x}");
                return Err(FatError::CorruptChain);
            }
            length += 1;
            // More steps than clusters on the volume means a cycle
            if length > step_limit {
                warn!("chain from {first} never reaches an end-of-chain marker");
                return Err(FatError::CorruptChain);
            }
            cluster = value;
        }
    }

    /// Feeds the chain to `step` one `(start_cluster, run_len)` pair per
    /// contiguous run, so the caller can turn a fragmented chain into as
    /// few physical extents as possible. Iteration ends at the chain's EOF
    /// marker, when `step` breaks, or on the first error.
    pub fn iterate_chain(
        &mut self,
        chain: &Chain,
        mut step: impl FnMut(u32, u32) -> ControlFlow<()>,
    ) -> Result<(), FatError> {
        let Some(mut cluster) = chain.first_cluster() else {
            return Ok(());
        };
        let step_limit = self.cluster_population();
        let mut walked = 0u32;
        loop {
            let run = self.contiguous_run(cluster)?;
            if step(cluster, run.len).is_break() {
                return Ok(());
            }
            if is_eof_cluster(run.next) {
                return Ok(());
            }
            if self.check_cluster(run.next).is_err() {
                warn!("chain run at {cluster} links to invalid entry {:#010x}", run.next);
                return Err(FatError::CorruptChain);
            }
            walked = walked.saturating_add(run.len);
            if walked >= step_limit {
                warn!("chain starting at {} cycles", chain.first);
                return Err(FatError::CorruptChain);
            }
            cluster = run.next;
        }
    }

    /// Builds a handle for an existing chain discovered by the upper layer
    /// (typically out of a directory entry), walking it once to locate and
    /// cache the tail.
    pub fn open_chain(&mut self, first_cluster: u32) -> Result<Chain, FatError> {
        let (last, _) = self.chain_length_of(first_cluster)?;
        Ok(Chain {
            first: first_cluster,
            last,
        })
    }
}
