//! Binary semaphore on top of the Linux futex syscall.
//!
//! A [`BinaryFutex`] lives either in a shared memory segment (process-shared,
//! the default) or inside an in-process struct (`new_private`). Posting never
//! blocks and never allocates, so the cycle thread may post. Waiting blocks
//! the caller until a post, a close, or the deadline.

use crate::error::{ShmError, ShmResult};
use crate::payload::SegmentPayload;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

const READY: u32 = 0;
const POSTED: u32 = 1;
const CLOSED: u32 = 2;

/// Binary semaphore with `Ready`, `Posted` and `Closed` states.
#[repr(C)]
#[derive(Debug)]
pub struct BinaryFutex {
    value: AtomicU32,
    private: u32,
}

unsafe impl SegmentPayload for BinaryFutex {
    const TYPE_ID: &'static str = "hwm.BinaryFutex";
}

impl Default for BinaryFutex {
    fn default() -> Self {
        Self::new(false)
    }
}

impl BinaryFutex {
    /// Process-shared futex, suitable for a shared memory segment.
    pub const fn new(posted: bool) -> Self {
        Self {
            value: AtomicU32::new(if posted { POSTED } else { READY }),
            private: 0,
        }
    }

    /// Futex only used by threads of this process.
    pub const fn new_private(posted: bool) -> Self {
        Self {
            value: AtomicU32::new(if posted { POSTED } else { READY }),
            private: 1,
        }
    }

    /// Raw state value.
    #[inline]
    pub fn value(&self) -> u32 {
        self.value.load(Ordering::Acquire)
    }

    /// Signal one waiter. Does not block.
    pub fn post(&self) -> ShmResult<()> {
        match self
            .value
            .compare_exchange(READY, POSTED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                // A waiter may already be gone; EFAULT/EINVAL are not actionable.
                let _ = self.futex(libc::FUTEX_WAKE, 1, None);
                Ok(())
            }
            Err(CLOSED) => Err(ShmError::Closed),
            Err(_) => Ok(()),
        }
    }

    /// Consume a pending post without blocking.
    ///
    /// `Some(true)` if a post was consumed, `Some(false)` if none was
    /// pending, `None` if the futex is closed.
    pub fn try_wait(&self) -> Option<bool> {
        match self.try_consume() {
            POSTED => Some(true),
            READY => Some(false),
            _ => None,
        }
    }

    /// Wait for a post for at most `timeout`.
    pub fn wait_for(&self, timeout: Duration) -> ShmResult<()> {
        self.wait_until(Instant::now() + timeout)
    }

    /// Wait for a post until `deadline`.
    pub fn wait_until(&self, deadline: Instant) -> ShmResult<()> {
        let start = Instant::now();
        loop {
            match self.try_consume() {
                POSTED => return Ok(()),
                READY => {}
                CLOSED => return Err(ShmError::Closed),
                value => return Err(ShmError::UnexpectedFutexValue { value }),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ShmError::Timeout {
                    elapsed_ms: now.duration_since(start).as_millis() as u64,
                });
            }
            let remaining = deadline - now;
            let ts = libc::timespec {
                tv_sec: remaining.as_secs() as libc::time_t,
                tv_nsec: remaining.subsec_nanos() as libc::c_long,
            };

            if self.futex(libc::FUTEX_WAIT, READY, Some(&ts)) == -1 {
                match nix::errno::Errno::last() {
                    // Deadline is re-checked at the top of the loop.
                    nix::errno::Errno::ETIMEDOUT
                    | nix::errno::Errno::EAGAIN
                    | nix::errno::Errno::EINTR => {}
                    errno => return Err(errno.into()),
                }
            }
        }
    }

    /// Close the futex and wake every waiter.
    pub fn close(&self) {
        if self.value.swap(CLOSED, Ordering::AcqRel) != CLOSED {
            let _ = self.futex(libc::FUTEX_WAKE, i32::MAX as u32, None);
        }
    }

    /// Whether `close` was called.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.value() == CLOSED
    }

    /// Reopen a closed futex in the `Ready` state.
    pub fn reset(&self) {
        self.value.store(READY, Ordering::Release);
    }

    fn try_consume(&self) -> u32 {
        match self
            .value
            .compare_exchange(POSTED, READY, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => POSTED,
            Err(actual) => actual,
        }
    }

    fn futex(&self, op: libc::c_int, val: u32, timeout: Option<&libc::timespec>) -> libc::c_long {
        let op = if self.private != 0 {
            op | libc::FUTEX_PRIVATE_FLAG
        } else {
            op
        };
        let ts = timeout.map_or(std::ptr::null(), |t| t as *const libc::timespec);
        // SAFETY: `self.value` is a valid, aligned u32 for the lifetime of `self`.
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.value.as_ptr(),
                op,
                val,
                ts,
                std::ptr::null::<u32>(),
                0u32,
            )
        }
    }
}
