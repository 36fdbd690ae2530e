use std::collections::HashSet;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

use tabula_fat::{Chain, DirtyState, FatQueue, FatType, FatVolume, FatVolumeConfig};
use tabula_io::SharedBlockDevice;

fn fat32_queue(max_cluster: u32) -> (Arc<FatQueue>, SharedBlockDevice) {
    let fat_size = (max_cluster as u64 + 1) * 4;
    let device = SharedBlockDevice::new(fat_size as usize);
    let config = FatVolumeConfig::new(FatType::Fat32, 0, fat_size, 1);
    let volume = FatVolume::new(config, Box::new(device.clone()));
    (Arc::new(FatQueue::spawn(volume).unwrap()), device)
}

#[test]
fn blocking_run_executes_on_the_worker() {
    let (queue, _device) = fat32_queue(16);
    let alloc = queue
        .run(|volume| volume.allocate_clusters(3, None, false, true))
        .unwrap();
    assert_eq!((alloc.first, alloc.last, alloc.count), (2, 4, 3));
}

#[test]
fn completion_callbacks_deliver_results() {
    let (queue, _device) = fat32_queue(16);
    let (tx, rx) = mpsc::channel();

    queue.allocate_clusters(2, None, false, true, move |result| {
        tx.send(result).unwrap();
    });
    let (alloc, chain) = rx.recv().unwrap().unwrap();
    assert_eq!(alloc.count, 2);
    assert_eq!(chain.first_cluster(), Some(alloc.first));
    assert_eq!(chain.last_cluster(), Some(alloc.last));

    let (tx, rx) = mpsc::channel();
    queue.set_dirty_state(DirtyState::Dirty, {
        let tx = tx.clone();
        move |result| tx.send(result.is_ok()).unwrap()
    });
    assert!(rx.recv().unwrap());
}

#[test]
fn concurrent_allocations_never_share_a_cluster() {
    // 4 threads x 5 clusters out of 25 free
    let (queue, _device) = fat32_queue(26);
    let mut workers = Vec::new();
    for _ in 0..4 {
        let queue = Arc::clone(&queue);
        workers.push(thread::spawn(move || {
            queue.run(|volume| {
                let mut chain = Chain::empty();
                volume.allocate_clusters(5, Some(&mut chain), false, false)?;
                let mut clusters = Vec::new();
                volume.iterate_chain(&chain, |start, len| {
                    clusters.extend(start..start + len);
                    ControlFlow::Continue(())
                })?;
                Ok::<_, tabula_fat::FatError>(clusters)
            })
        }));
    }

    let mut seen = HashSet::new();
    for worker in workers {
        let clusters = worker.join().unwrap().unwrap();
        assert_eq!(clusters.len(), 5);
        for cluster in clusters {
            // A double grant would collide here
            assert!(seen.insert(cluster));
        }
    }
    assert_eq!(seen.len(), 20);

    let free = queue.run(|volume| volume.free_cluster_count()).unwrap();
    assert_eq!(free, 5);
}

#[test]
fn queued_jobs_run_in_submission_order() {
    let (queue, _device) = fat32_queue(16);
    let (tx, rx) = mpsc::channel();

    for tag in 0..8 {
        let tx = tx.clone();
        queue.dispatch(move |_| tag, move |tag| tx.send(tag).unwrap());
    }
    let order: Vec<i32> = rx.iter().take(8).collect();
    assert_eq!(order, (0..8).collect::<Vec<_>>());
}

#[test]
fn chain_walks_flow_through_the_queue() {
    let (queue, _device) = fat32_queue(16);
    let chain = queue
        .run(|volume| {
            let mut chain = Chain::empty();
            volume.allocate_clusters(4, Some(&mut chain), false, true)?;
            Ok::<_, tabula_fat::FatError>(chain)
        })
        .unwrap();

    let (tx, rx) = mpsc::channel();
    queue.chain_length(chain, move |result| tx.send(result).unwrap());
    assert_eq!(rx.recv().unwrap().unwrap(), (5, 4));

    let (tx, rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel();
    queue.iterate_chain(
        chain,
        move |start, len| {
            tx.send((start, len)).unwrap();
            ControlFlow::Continue(())
        },
        move |result| done_tx.send(result).unwrap(),
    );
    assert!(done_rx.recv().unwrap().is_ok());
    assert_eq!(rx.try_recv().unwrap(), (2, 4));
}
