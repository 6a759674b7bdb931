#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use skyjet_core::{Error, OperationType};
use skyjet_tracker::TrackerRegistry;

#[test]
fn concurrent_starts_admit_exactly_one_operation() {
    let reg = Arc::new(TrackerRegistry::new());
    let uid = [9u8; 16];
    let winners = Arc::new(AtomicUsize::new(0));
    let ops = [OperationType::Create, OperationType::Update, OperationType::Delete];
    let handles: Vec<_> = (0..32)
        .map(|i| {
            let reg = Arc::clone(&reg);
            let winners = Arc::clone(&winners);
            let op = ops[i % ops.len()];
            std::thread::spawn(move || {
                if reg.tracker(uid).mark_start(op) {
                    winners.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(winners.load(Ordering::SeqCst), 1);

    let t = reg.tracker(uid);
    let running = t.last_operation();
    let err = running.running_error().expect("operation should be running");
    assert!(matches!(err, Error::OperationRunning { started, .. } if Some(started) == running.started));

    t.mark_end();
    assert!(t.mark_start(OperationType::Update));
}
