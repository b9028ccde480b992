#![no_main]

use arbitrary::{Arbitrary, Unstructured};
use lifecycle_sync::{Handle, Pool, PoolError};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum PoolOperation {
    Alloc(u32),
    Free(u8),
    FreeStale(u8),
    Get(u8),
    Overwrite { index: u8, value: u32 },
}

fuzz_target!(|data: &[u8]| {
    let mut u = Unstructured::new(data);
    let capacity = u.int_in_range(0..=16usize).unwrap_or(4);

    let operations: Result<Vec<PoolOperation>, _> = (0..64)
        .map(|_| PoolOperation::arbitrary(&mut u))
        .collect();

    if let Ok(ops) = operations {
        fuzz_pool(capacity, ops);
    }
});

fn fuzz_pool(capacity: usize, operations: Vec<PoolOperation>) {
    let mut pool = Pool::with_capacity(capacity);
    // Model: live handles with the value they should read back
    let mut live: Vec<(Handle<u32>, u32)> = Vec::new();
    let mut freed: Vec<Handle<u32>> = Vec::new();

    for op in operations {
        match op {
            PoolOperation::Alloc(value) => match pool.alloc(value) {
                Ok(handle) => live.push((handle, value)),
                Err(err) => {
                    assert_eq!(err, PoolError::Exhausted);
                    assert_eq!(live.len(), capacity);
                }
            },
            PoolOperation::Free(index) => {
                if live.is_empty() {
                    continue;
                }
                let (handle, value) = live.swap_remove(index as usize % live.len());
                assert_eq!(pool.free(handle), Ok(value));
                freed.push(handle);
            }
            PoolOperation::FreeStale(index) => {
                if freed.is_empty() {
                    continue;
                }
                let handle = freed[index as usize % freed.len()];
                assert_eq!(pool.free(handle), Err(PoolError::StaleHandle));
                assert!(pool.get(handle).is_none());
            }
            PoolOperation::Get(index) => {
                if live.is_empty() {
                    continue;
                }
                let (handle, value) = live[index as usize % live.len()];
                assert_eq!(pool.get(handle), Some(&value));
            }
            PoolOperation::Overwrite { index, value } => {
                if live.is_empty() {
                    continue;
                }
                let slot = index as usize % live.len();
                let handle = live[slot].0;
                if let Some(current) = pool.get_mut(handle) {
                    *current = value;
                    live[slot].1 = value;
                }
            }
        }

        assert_eq!(pool.len(), live.len());
        assert_eq!(pool.available(), capacity - live.len());
        assert_eq!(pool.is_full(), live.len() == capacity);
    }

    for (handle, value) in live {
        assert_eq!(pool.free(handle), Ok(value));
    }
    assert!(pool.is_empty());
}
