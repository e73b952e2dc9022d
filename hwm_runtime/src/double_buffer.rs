//! Single-writer double buffer.
//!
//! The writer fills the inactive slot and publishes it by bumping a
//! sequence counter; it never waits for readers. Readers copy the active
//! slot and retry if a writer started overwriting that slot meanwhile.
//! Used to hand the module state from the cycle thread to non-realtime
//! callers.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering, fence};

/// Two-slot buffer with one writer and any number of readers.
///
/// `T: Copy` keeps reads free of destructors and allocation.
pub struct DoubleBuffer<T> {
    slots: [UnsafeCell<T>; 2],
    /// Number of commits; the active slot is `sequence % 2`.
    sequence: AtomicU64,
    /// Commit number the writer is currently filling.
    writing: AtomicU64,
}

// SAFETY: slot access is coordinated through the counters; `write` requires
// exclusive writer access (see its contract) and readers only copy.
unsafe impl<T: Copy + Send> Sync for DoubleBuffer<T> {}
unsafe impl<T: Copy + Send> Send for DoubleBuffer<T> {}

impl<T: Copy> DoubleBuffer<T> {
    /// Buffer whose active value is `initial`.
    pub fn new(initial: T) -> Self {
        Self {
            slots: [UnsafeCell::new(initial), UnsafeCell::new(initial)],
            sequence: AtomicU64::new(0),
            writing: AtomicU64::new(0),
        }
    }

    /// Publish `value`.
    ///
    /// # Safety
    ///
    /// At most one thread may call `write` at a time.
    pub unsafe fn write(&self, value: T) {
        let next = self.sequence.load(Ordering::Relaxed) + 1;
        self.writing.swap(next, Ordering::Acquire);
        fence(Ordering::Release);
        let slot = self.slots[(next % 2) as usize].get();
        // SAFETY: the caller guarantees a single writer; readers of this
        // slot detect the overwrite through `writing` and retry.
        unsafe { std::ptr::write_volatile(slot, value) };
        self.sequence.store(next, Ordering::Release);
    }

    /// Copy of the most recently published value.
    pub fn read(&self) -> T {
        loop {
            let before = self.sequence.load(Ordering::Acquire);
            let slot = self.slots[(before % 2) as usize].get();
            // SAFETY: the slot stays valid for the buffer's lifetime; a
            // concurrent overwrite is detected below and the copy discarded.
            let value = unsafe { std::ptr::read_volatile(slot) };
            fence(Ordering::Acquire);
            let writing = self.writing.load(Ordering::Relaxed);
            // The slot read is only rewritten by commit `before + 2`.
            if writing < before + 2 {
                return value;
            }
            std::hint::spin_loop();
        }
    }

    /// Number of commits so far.
    pub fn commits(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn read_returns_initial_value() {
        let buffer = DoubleBuffer::new(7u64);
        assert_eq!(buffer.read(), 7);
        assert_eq!(buffer.commits(), 0);
    }

    #[test]
    fn read_returns_last_write() {
        let buffer = DoubleBuffer::new(0u64);
        for i in 1..=5 {
            unsafe { buffer.write(i) };
        }
        assert_eq!(buffer.read(), 5);
        assert_eq!(buffer.commits(), 5);
    }

    #[test]
    fn concurrent_reader_never_sees_torn_value() {
        #[derive(Clone, Copy)]
        struct Pair {
            a: u64,
            b: u64,
        }

        let buffer = Arc::new(DoubleBuffer::new(Pair { a: 0, b: 0 }));
        let done = Arc::new(AtomicBool::new(false));

        let reader = {
            let buffer = Arc::clone(&buffer);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                let mut last = 0;
                while !done.load(Ordering::Acquire) {
                    let pair = buffer.read();
                    assert_eq!(pair.a, pair.b);
                    assert!(pair.a >= last);
                    last = pair.a;
                }
            })
        };

        for i in 1..=100_000u64 {
            unsafe { buffer.write(Pair { a: i, b: i }) };
        }
        done.store(true, Ordering::Release);
        reader.join().unwrap();
        assert_eq!(buffer.read().a, 100_000);
    }
}
