//! Integration tests for `vigil_common::collections`.

use std::sync::{Arc, Mutex};
use std::thread;

use vigil_common::collections::RingBuffer;

/// Validates that concurrent producers behind one lock never push the buffer
/// past its capacity and that every eviction is reported exactly once.
///
/// Assertions:
/// - Final length equals capacity.
/// - Evicted + retained equals total pushed.
#[test]
fn concurrent_producers_respect_capacity() {
    let buffer = Arc::new(Mutex::new(RingBuffer::<u64>::new(100)));
    let evicted = Arc::new(Mutex::new(0usize));

    let handles: Vec<_> = (0..4u64)
        .map(|producer| {
            let buffer = Arc::clone(&buffer);
            let evicted = Arc::clone(&evicted);
            thread::spawn(move || {
                for i in 0..250u64 {
                    let dropped = buffer.lock().unwrap().push(producer * 1000 + i);
                    if dropped.is_some() {
                        *evicted.lock().unwrap() += 1;
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let buffer = buffer.lock().unwrap();
    assert_eq!(buffer.len(), 100);
    assert_eq!(*evicted.lock().unwrap() + buffer.len(), 1000);
}

/// Validates drop-oldest versus reject-new on the same input.
#[test]
fn overflow_policies_keep_different_windows() {
    let mut drop_oldest = RingBuffer::new(3);
    let mut reject_new = RingBuffer::new(3);
    let mut rejected = Vec::new();

    for job in ["a", "b", "c", "d", "e"] {
        drop_oldest.push(job);
        if let Err(job) = reject_new.try_push(job) {
            rejected.push(job);
        }
    }

    assert_eq!(drop_oldest.into_iter().collect::<Vec<_>>(), vec!["c", "d", "e"]);
    assert_eq!(reject_new.into_iter().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    assert_eq!(rejected, vec!["d", "e"]);
}
