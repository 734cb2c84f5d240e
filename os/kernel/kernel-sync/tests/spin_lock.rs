use kernel_sync::SpinLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, mpsc};
use std::thread;

#[test]
fn guard_holds_the_lock_until_dropped() {
    let lock = SpinLock::new(0_u32);

    let mut guard = lock.lock();
    *guard = 7;
    assert!(lock.is_locked());
    assert!(lock.try_lock().is_none());
    drop(guard);

    assert!(!lock.is_locked());
    assert_eq!(lock.with_lock(|v| *v), 7);
}

#[test]
fn debug_shows_state_not_contents() {
    let lock = SpinLock::new([0xAB_u8; 4]);
    assert_eq!(format!("{lock:?}"), "SpinLock { locked: false, .. }");

    let _guard = lock.lock();
    assert_eq!(format!("{lock:?}"), "SpinLock { locked: true, .. }");
}

#[test]
fn try_lock_from_another_thread_fails_while_held() {
    let lock = Arc::new(SpinLock::new(Vec::<u64>::new()));
    let (held_tx, held_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    let holder = {
        let lock = Arc::clone(&lock);
        thread::spawn(move || {
            let mut guard = lock.lock();
            guard.push(1);
            held_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        })
    };

    held_rx.recv().unwrap();
    assert!(lock.try_lock().is_none());
    assert!(lock.is_locked());

    release_tx.send(()).unwrap();
    holder.join().unwrap();

    let mut guard = lock.try_lock().expect("released by the holder");
    guard.push(2);
    drop(guard);
    assert_eq!(Arc::try_unwrap(lock).unwrap().into_inner(), vec![1, 2]);
}

#[test]
fn get_mut_needs_no_locking() {
    let mut lock = SpinLock::new(String::from("frame"));
    lock.get_mut().push('s');
    assert!(!lock.is_locked());
    assert_eq!(lock.into_inner(), "frames");
}

#[test]
fn spinning_waiters_get_exclusive_access() {
    const THREADS: usize = 4;
    const ROUNDS: usize = 2_000;

    let lock = Arc::new(SpinLock::new(0usize));
    let inside = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(THREADS));

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let (lock, inside, start) = (Arc::clone(&lock), Arc::clone(&inside), Arc::clone(&start));
            thread::spawn(move || {
                start.wait();
                for _ in 0..ROUNDS {
                    let mut count = lock.lock();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    *count += 1;
                    inside.fetch_sub(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(lock.with_lock(|v| *v), THREADS * ROUNDS);
}

#[test]
fn panicking_holder_releases_the_lock() {
    let lock = SpinLock::new(0u32);

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        lock.with_lock(|v| {
            *v = 9;
            panic!("holder died");
        });
    }));

    assert!(result.is_err());
    assert!(!lock.is_locked());
    assert_eq!(lock.with_lock(|v| *v), 9);
}
