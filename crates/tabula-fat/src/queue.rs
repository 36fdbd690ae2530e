//! Per-volume serial execution queue.
//!
//! Every public operation on a mounted volume flows through one
//! [`FatQueue`]: a worker thread exclusively owning the [`FatVolume`],
//! fed jobs over a channel. That single consumer is what serializes
//! allocate/free/dirty-bit mutations against each other and against
//! read-only walks, so no cluster can be claimed twice and no chain is
//! walked mid-mutation. Jobs are not cancellable; once one starts
//! (including any rollback) it runs to completion before the next is
//! dequeued.

use std::io;
use std::ops::ControlFlow;
use std::sync::mpsc;
use std::thread;

use log::warn;

use crate::error::FatError;
use crate::volume::{Allocation, Chain, ContigRun, DirtyState, FatVolume};

type Job = Box<dyn FnOnce(&mut FatVolume) + Send>;

pub struct FatQueue {
    sender: Option<mpsc::Sender<Job>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl FatQueue {
    /// Moves the volume onto a dedicated worker thread.
    pub fn spawn(volume: FatVolume) -> io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let worker = thread::Builder::new()
            .name("fat-volume".into())
            .spawn(move || {
                let mut volume = volume;
                while let Ok(job) = receiver.recv() {
                    job(&mut volume);
                }
            })?;
        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    /// Enqueues `op` and hands its result to `completion` on the worker
    /// thread. Returns immediately.
    pub fn dispatch<R, F, C>(&self, op: F, completion: C)
    where
        R: Send + 'static,
        F: FnOnce(&mut FatVolume) -> R + Send + 'static,
        C: FnOnce(R) + Send + 'static,
    {
        let job: Job = Box::new(move |volume| completion(op(volume)));
        if let Some(sender) = &self.sender {
            if sender.send(job).is_err() {
                warn!("volume worker is gone, dropping job");
            }
        }
    }

    /// Enqueues `op` and blocks until the worker has run it.
    pub fn run<R, F>(&self, op: F) -> R
    where
        R: Send + 'static,
        F: FnOnce(&mut FatVolume) -> R + Send + 'static,
    {
        let (result_tx, result_rx) = mpsc::channel();
        self.dispatch(op, move |result| {
            let _ = result_tx.send(result);
        });
        result_rx
            .recv()
            .expect("volume worker terminated with jobs pending")
    }

    /// See [`FatVolume::allocate_clusters`]. The chain handle travels by
    /// value; the completion receives the grant and the updated handle.
    pub fn allocate_clusters(
        &self,
        count: u32,
        chain: Option<Chain>,
        allow_partial: bool,
        must_be_contiguous: bool,
        completion: impl FnOnce(Result<(Allocation, Chain), FatError>) + Send + 'static,
    ) {
        self.dispatch(
            move |volume| {
                let mut chain = chain.unwrap_or_default();
                let alloc = volume.allocate_clusters(
                    count,
                    Some(&mut chain),
                    allow_partial,
                    must_be_contiguous,
                )?;
                Ok((alloc, chain))
            },
            completion,
        );
    }

    /// See [`FatVolume::free_clusters`].
    pub fn free_clusters(
        &self,
        count: u32,
        chain: Chain,
        completion: impl FnOnce(Result<Chain, FatError>) + Send + 'static,
    ) {
        self.dispatch(
            move |volume| {
                let mut chain = chain;
                volume.free_clusters(count, &mut chain)?;
                Ok(chain)
            },
            completion,
        );
    }

    /// See [`FatVolume::free_cluster_from`].
    pub fn free_cluster_from(
        &self,
        start_cluster: u32,
        num_clusters: u32,
        completion: impl FnOnce(Result<(), FatError>) + Send + 'static,
    ) {
        self.dispatch(
            move |volume| volume.free_cluster_from(start_cluster, num_clusters),
            completion,
        );
    }

    /// See [`FatVolume::contiguous_run`].
    pub fn contiguous_run(
        &self,
        cluster: u32,
        completion: impl FnOnce(Result<ContigRun, FatError>) + Send + 'static,
    ) {
        self.dispatch(move |volume| volume.contiguous_run(cluster), completion);
    }

    /// See [`FatVolume::chain_length`].
    pub fn chain_length(
        &self,
        chain: Chain,
        completion: impl FnOnce(Result<(u32, u32), FatError>) + Send + 'static,
    ) {
        self.dispatch(move |volume| volume.chain_length(&chain), completion);
    }

    /// See [`FatVolume::iterate_chain`]. Runs are delivered to `step` on
    /// the worker thread, in chain order.
    pub fn iterate_chain(
        &self,
        chain: Chain,
        step: impl FnMut(u32, u32) -> ControlFlow<()> + Send + 'static,
        completion: impl FnOnce(Result<(), FatError>) + Send + 'static,
    ) {
        self.dispatch(
            move |volume| {
                let mut step = step;
                volume.iterate_chain(&chain, &mut step)
            },
            completion,
        );
    }

    /// See [`FatVolume::dirty_state`].
    pub fn dirty_state(&self, completion: impl FnOnce(DirtyState) + Send + 'static) {
        self.dispatch(move |volume| volume.dirty_state(), completion);
    }

    /// See [`FatVolume::set_dirty_state`].
    pub fn set_dirty_state(
        &self,
        state: DirtyState,
        completion: impl FnOnce(Result<(), FatError>) + Send + 'static,
    ) {
        self.dispatch(move |volume| volume.set_dirty_state(state), completion);
    }
}

impl Drop for FatQueue {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain what is queued and exit
        drop(self.sender.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("volume worker panicked during shutdown");
            }
        }
    }
}
