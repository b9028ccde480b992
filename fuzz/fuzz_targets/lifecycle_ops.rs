#![no_main]

use arbitrary::{Arbitrary, Unstructured};
use lifecycle_sync::{Claim, Lifecycle, LifecycleError};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum LifecycleOperation {
    Lock(u8),
    Unlock(u8),
    Release(u8),
}

fuzz_target!(|data: &[u8]| {
    let mut u = Unstructured::new(data);

    let operations: Result<Vec<LifecycleOperation>, _> = (0..64)
        .map(|_| LifecycleOperation::arbitrary(&mut u))
        .collect();

    if let Ok(ops) = operations {
        fuzz_lifecycle(ops);
    }
});

/// Single-threaded sequences over a few guards. Release never blocks
/// here: the calling thread is the only possible holder.
fn fuzz_lifecycle(operations: Vec<LifecycleOperation>) {
    let guards: Vec<Lifecycle> = (0..3).map(|_| Lifecycle::new()).collect();
    let mut claims: Vec<Vec<Claim>> = vec![Vec::new(); guards.len()];
    let mut released = vec![false; guards.len()];

    for op in operations {
        match op {
            LifecycleOperation::Lock(which) => {
                let i = which as usize % guards.len();
                match guards[i].lock() {
                    Ok(claim) => {
                        assert!(!released[i]);
                        let expected = if claims[i].is_empty() {
                            Claim::Acquired
                        } else {
                            Claim::Reentered
                        };
                        assert_eq!(claim, expected);
                        claims[i].push(claim);
                    }
                    Err(err) => {
                        assert_eq!(err, LifecycleError::Released);
                        assert!(released[i]);
                    }
                }
            }
            LifecycleOperation::Unlock(which) => {
                let i = which as usize % guards.len();
                if let Some(claim) = claims[i].pop() {
                    guards[i].unlock(claim);
                }
            }
            LifecycleOperation::Release(which) => {
                let i = which as usize % guards.len();
                guards[i].release();
                released[i] = true;
            }
        }

        for (i, guard) in guards.iter().enumerate() {
            let expected = usize::from(!claims[i].is_empty() && !released[i]);
            assert_eq!(guard.use_count(), expected);
            assert_eq!(guard.is_held_by_current_thread(), !claims[i].is_empty());
        }
    }

    for (guard, held) in guards.iter().zip(claims.iter_mut()) {
        while let Some(claim) = held.pop() {
            guard.unlock(claim);
        }
        assert_eq!(guard.use_count(), 0);
    }
}
