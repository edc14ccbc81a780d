use kernel_sync::{IrqGuard, SpinLock};
use std::{panic, thread};

#[test]
fn lock_and_release_through_guard() {
    let l = SpinLock::new(0_u32);
    {
        let mut g = l.lock();
        *g = 41;
        assert!(l.is_locked());
    }
    assert!(!l.is_locked());
    l.with_lock(|v| *v += 1);
    assert_eq!(l.into_inner(), 42);
}

#[test]
fn try_lock_fails_while_held() {
    let l = SpinLock::new(1u8);
    let g1 = l.try_lock();
    assert!(g1.is_some());
    assert!(l.try_lock().is_none());
    drop(g1);
    assert!(l.try_lock().is_some());
}

#[test]
fn try_lock_irq_reports_reentry() {
    let l = SpinLock::new(7u64);
    let outer = l.try_lock_irq().expect("first acquisition");
    assert_eq!(*outer, 7);
    assert!(l.try_lock_irq().is_none(), "nested acquisition must fail");
    drop(outer);

    let mut again = l.try_lock_irq().expect("released");
    *again = 8;
    drop(again);
    assert_eq!(l.with_lock(|v| *v), 8);
}

#[test]
fn irq_guard_is_inert_on_hosted_targets() {
    let outer = IrqGuard::new();
    let inner = IrqGuard::new();
    assert!(!outer.were_enabled());
    assert!(!inner.were_enabled());
}

#[test]
fn contended_increments_are_exact() {
    use std::sync::Arc;

    let threads = 4;
    let iters = 2_000;
    let lock = Arc::new(SpinLock::new(0usize));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                for _ in 0..iters {
                    lock.with_lock(|v| *v += 1);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(lock.with_lock(|v| *v), threads * iters);
}

#[test]
fn lock_is_released_on_panic() {
    let l = SpinLock::new(0u32);
    let res = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        l.with_lock(|v| {
            *v = 123;
            panic!("boom");
        });
    }));
    assert!(res.is_err());
    assert_eq!(l.with_lock(|v| *v), 123);
}
