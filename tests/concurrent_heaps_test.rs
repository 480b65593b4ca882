//! Thread heaps driven from real OS threads

use hoardsim::error::Result;
use hoardsim::{Hoard, HoardConfig, GLOBAL_HEAP};
use std::sync::Arc;
use std::thread;

const THREADS: usize = 4;

fn shared_hoard() -> Arc<Hoard> {
    let config = HoardConfig {
        page_size: 256,
        superblock_pages: 1,
        capacity: 1024 * 1024,
        threads: THREADS,
        ..HoardConfig::default()
    };
    Arc::new(Hoard::new(config).expect("Failed to create allocator"))
}

/// Allocate, paint and free in a per-thread pattern; return what is still live
fn churn(hoard: &Hoard, heap: usize, rounds: usize) -> Result<Vec<(usize, usize)>> {
    let fill = b'0' + heap as u8;
    let mut live = Vec::new();

    for i in 0..rounds {
        let size = 1 + (i * 13 + heap * 7) % 128;
        let address = hoard.allocate(heap, size)?;
        hoard.write(address, fill, size)?;
        live.push((address, size));

        if i % 4 == 3 {
            let (address, _) = live.swap_remove((i * 5) % live.len());
            hoard.release(heap, address)?;
        }
    }
    Ok(live)
}

#[test]
fn test_parallel_heaps_keep_slots_disjoint() {
    let hoard = shared_hoard();

    let handles: Vec<_> = (1..=THREADS)
        .map(|heap| {
            let hoard = Arc::clone(&hoard);
            thread::spawn(move || churn(&hoard, heap, 400).map(|live| (heap, live)))
        })
        .collect();

    let results: Vec<(usize, Vec<(usize, usize)>)> = handles
        .into_iter()
        .map(|h| h.join().expect("worker panicked").expect("allocator call failed"))
        .collect();

    // every byte a thread painted still carries its mark
    let dump = hoard.dump_state();
    for (heap, live) in &results {
        let fill = b'0' + *heap as u8;
        for &(address, size) in live {
            assert!(
                dump.bytes[address..address + size].iter().all(|&b| b == fill),
                "heap {} slot at {} was overwritten",
                heap,
                address
            );
        }
    }

    let mut all: Vec<usize> = results
        .iter()
        .flat_map(|(_, live)| live.iter().map(|&(address, _)| address))
        .collect();
    let count = all.len();
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), count, "an address was handed out twice");
}

#[test]
fn test_parallel_release_drains_everything() {
    let hoard = shared_hoard();

    let handles: Vec<_> = (1..=THREADS)
        .map(|heap| {
            let hoard = Arc::clone(&hoard);
            thread::spawn(move || -> Result<()> {
                let live = churn(&hoard, heap, 200)?;
                for (address, _) in live {
                    hoard.release(heap, address)?;
                }
                Ok(())
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("worker panicked").expect("allocator call failed");
    }

    let stats = hoard.stats();
    let used: usize = stats.heaps.iter().map(|h| h.used_units).sum();
    assert_eq!(used, 0);
    assert_eq!(hoard.dump_state().summary().live, 0);
    assert!(stats.heap(GLOBAL_HEAP).is_some());
    for heap in &stats.heaps {
        assert!(heap.used_units <= heap.total_units);
    }
}
