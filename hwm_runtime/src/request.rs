//! Transition requests from non-realtime threads to the cycle thread.
//!
//! A non-realtime action submits a [`TransitionRequest`] and blocks on its
//! completion slot; the cycle thread drains the queue once per cycle and
//! resolves the slot with a [`RequestOutcome`].
//!
//! ```text
//!  trigger thread                     cycle thread
//!  ──────────────                     ────────────
//!  acquire slot (Free → Pending)
//!  lock queue, push request
//!  wait on slot futex ─┐              try_lock queue, pop newest
//!                      │              claim (Pending → Claimed), apply
//!                      └────────────  store outcome, Claimed → Resolved, post
//!  read outcome, Resolved → Free
//! ```
//!
//! Completion slots are preallocated. A waiter that times out marks its
//! slot `Abandoned` and leaves; whoever later dequeues the request drops it
//! and frees the slot instead of posting. Before applying a request the
//! cycle thread claims its slot, so a request is either applied with the
//! waiter still listening or not applied at all. Nothing is allocated or
//! deallocated on the cycle thread, and no list of orphaned waiters is
//! needed.

use crate::error::{ErrorKind, HwmError, HwmResult};
use heapless::Deque;
use hwm_common::consts::{REQUEST_QUEUE_CAPACITY, REQUEST_SLOT_COUNT, TRIGGER_WAIT_SLICE};
use hwm_common::state::{FaultMessage, StateCode};
use hwm_shared_memory::{BinaryFutex, ShmError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU16, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

// ─── Outcomes ───────────────────────────────────────────────────────

/// Why a request was cancelled instead of applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CancelReason {
    /// `activate` ran while the request was queued.
    Activation = 0,
    /// `deactivate` ran while the request was queued, or requests are
    /// currently refused.
    Deactivation = 1,
    /// The runtime is shutting down.
    Shutdown = 2,
    /// A later request or a direct state change superseded this one.
    NewerRequest = 3,
    /// `read_status` failed and faulted the module.
    ReadStatusError = 4,
    /// `apply_command` failed and faulted the module.
    ApplyCommandError = 5,
}

impl CancelReason {
    /// Message delivered to the waiting caller.
    pub const fn message(self) -> &'static str {
        match self {
            Self::Activation => "Request cancelled due to activation",
            Self::Deactivation => "Request cancelled due to deactivation",
            Self::Shutdown => "Request cancelled due to shutdown",
            Self::NewerRequest => "Request cancelled due to newer request",
            Self::ReadStatusError => "Request cancelled due to error in ReadStatus",
            Self::ApplyCommandError => "Request cancelled due to error in ApplyCommand",
        }
    }

    const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Activation,
            1 => Self::Deactivation,
            2 => Self::Shutdown,
            3 => Self::NewerRequest,
            4 => Self::ReadStatusError,
            5 => Self::ApplyCommandError,
            _ => return None,
        })
    }
}

/// How the cycle thread resolved a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The state changed to the requested one.
    Applied,
    /// The guard refused the transition.
    Prohibited {
        /// State at the time of the attempt.
        from: StateCode,
        /// Requested state.
        to: StateCode,
    },
    /// The request was dropped.
    Cancelled(CancelReason),
}

impl RequestOutcome {
    const APPLIED: u8 = 1;
    const PROHIBITED: u8 = 2;
    const CANCELLED: u8 = 3;

    /// Pack into 16 bits: tag in the high byte, payload in the low byte(s).
    const fn encode(self) -> u16 {
        match self {
            Self::Applied => (Self::APPLIED as u16) << 8,
            Self::Prohibited { from, to } => {
                ((Self::PROHIBITED as u16) << 8) | ((from as u16) << 4) | (to as u16)
            }
            Self::Cancelled(reason) => ((Self::CANCELLED as u16) << 8) | (reason as u16),
        }
    }

    const fn decode(raw: u16) -> Option<Self> {
        let tag = (raw >> 8) as u8;
        let low = (raw & 0xff) as u8;
        match tag {
            Self::APPLIED => Some(Self::Applied),
            Self::PROHIBITED => match (StateCode::from_u8(low >> 4), StateCode::from_u8(low & 0xf)) {
                (Some(from), Some(to)) => Some(Self::Prohibited { from, to }),
                _ => None,
            },
            Self::CANCELLED => match CancelReason::from_u8(low) {
                Some(reason) => Some(Self::Cancelled(reason)),
                None => None,
            },
            _ => None,
        }
    }

    /// `Ok` if applied, otherwise the error the caller sees.
    pub fn into_result(self) -> HwmResult<()> {
        match self {
            Self::Applied => Ok(()),
            Self::Prohibited { from, to } => Err(HwmError::failed_precondition(format!(
                "Transition from {from} to {to} is prohibited!"
            ))),
            Self::Cancelled(reason) => Err(HwmError::new(ErrorKind::Cancelled, reason.message())),
        }
    }
}

// ─── Requests ───────────────────────────────────────────────────────

/// Index of the completion slot belonging to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(usize);

/// State change requested by a non-realtime action.
#[derive(Debug, Clone)]
pub struct TransitionRequest {
    /// State the requester observed.
    pub from: StateCode,
    /// Requested state.
    pub to: StateCode,
    /// Message to publish with the new state.
    pub message: FaultMessage,
    /// Submission time [ns], same clock as the state update time.
    pub timestamp_ns: u64,
    ticket: Ticket,
}

impl TransitionRequest {
    /// Slot the outcome goes to.
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }
}

// ─── Completion slots ───────────────────────────────────────────────

const FREE: u8 = 0;
const PENDING: u8 = 1;
const CLAIMED: u8 = 2;
const RESOLVED: u8 = 3;
const ABANDONED: u8 = 4;

struct CompletionSlot {
    state: AtomicU8,
    outcome: AtomicU16,
    signal: BinaryFutex,
}

impl CompletionSlot {
    const fn new() -> Self {
        Self {
            state: AtomicU8::new(FREE),
            outcome: AtomicU16::new(0),
            signal: BinaryFutex::new_private(false),
        }
    }

    fn try_acquire(&self) -> bool {
        let acquired = self
            .state
            .compare_exchange(FREE, PENDING, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok();
        if acquired {
            let _ = self.signal.try_wait();
        }
        acquired
    }

    /// Cycle thread side: reserve the request for applying. Fails (and
    /// frees the slot) if the waiter already gave up.
    fn claim(&self) -> bool {
        match self
            .state
            .compare_exchange(PENDING, CLAIMED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(ABANDONED) => {
                self.state.store(FREE, Ordering::Release);
                false
            }
            Err(_) => false,
        }
    }

    /// Cycle thread side. Never blocks.
    fn resolve(&self, outcome: RequestOutcome) {
        self.outcome.store(outcome.encode(), Ordering::Relaxed);
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            match current {
                PENDING | CLAIMED => {
                    match self.state.compare_exchange(
                        current,
                        RESOLVED,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => {
                            // Private futexes are never closed.
                            let _ = self.signal.post();
                            return;
                        }
                        Err(actual) => current = actual,
                    }
                }
                ABANDONED => {
                    self.state.store(FREE, Ordering::Release);
                    return;
                }
                _ => return,
            }
        }
    }

    fn is_resolved(&self) -> bool {
        self.state.load(Ordering::Acquire) == RESOLVED
    }

    /// Waiter side, after the signal arrived. Frees the slot once resolved.
    fn take(&self) -> Option<RequestOutcome> {
        if self.state.load(Ordering::Acquire) != RESOLVED {
            return None;
        }
        let outcome = RequestOutcome::decode(self.outcome.load(Ordering::Relaxed));
        self.state.store(FREE, Ordering::Release);
        outcome
    }

    /// Waiter side, on timeout. `true` if the slot is now abandoned; `false`
    /// if the cycle thread claimed or resolved it first.
    fn abandon(&self) -> bool {
        self.state
            .compare_exchange(PENDING, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn release(&self) {
        self.state.store(FREE, Ordering::Release);
    }
}

// ─── Queue ──────────────────────────────────────────────────────────

/// Bounded request queue plus its completion slots.
pub struct RequestQueue {
    pending: Mutex<Deque<TransitionRequest, REQUEST_QUEUE_CAPACITY>>,
    slots: [CompletionSlot; REQUEST_SLOT_COUNT],
    reject_new: AtomicBool,
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestQueue {
    /// Empty queue accepting requests.
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Deque::new()),
            slots: [const { CompletionSlot::new() }; REQUEST_SLOT_COUNT],
            reject_new: AtomicBool::new(false),
        }
    }

    /// Refuse (or accept again) new submissions.
    pub fn set_reject_new(&self, reject: bool) {
        self.reject_new.store(reject, Ordering::Release);
    }

    /// Whether new submissions are refused.
    pub fn rejects_new(&self) -> bool {
        self.reject_new.load(Ordering::Acquire)
    }

    // ─── Non-realtime side ──────────────────────────────────────────

    /// Queue a request. Blocks only on the queue lock.
    pub fn submit(
        &self,
        from: StateCode,
        to: StateCode,
        message: FaultMessage,
        timestamp_ns: u64,
    ) -> HwmResult<Ticket> {
        let ticket = self.acquire_slot()?;
        let request = TransitionRequest {
            from,
            to,
            message,
            timestamp_ns,
            ticket,
        };

        let mut pending = self.pending.lock();
        if self.rejects_new() {
            self.slots[ticket.0].release();
            return Err(HwmError::failed_precondition(
                CancelReason::Deactivation.message(),
            ));
        }
        if pending.push_back(request).is_err() {
            self.slots[ticket.0].release();
            return Err(HwmError::new(
                ErrorKind::ResourceExhausted,
                format!("Request queue is full ({REQUEST_QUEUE_CAPACITY} pending requests)"),
            ));
        }
        Ok(ticket)
    }

    /// Wait up to `timeout` for the outcome of `ticket`.
    ///
    /// On timeout the slot is abandoned and reclaimed when the cycle thread
    /// gets to the request.
    pub fn wait(&self, ticket: Ticket, timeout: Duration) -> HwmResult<()> {
        let slot = &self.slots[ticket.0];
        if let Err(e) = slot.signal.wait_for(timeout) {
            if slot.abandon() {
                return Err(match e {
                    ShmError::Timeout { .. } => {
                        warn!("State change request timed out after {timeout:?}, abandoning it");
                        HwmError::new(
                            ErrorKind::DeadlineExceeded,
                            format!("State change request timed out after {timeout:?}"),
                        )
                    }
                    e => e.into(),
                });
            }
            // Claimed before the abandon attempt; a claimed request is
            // always resolved.
            while !slot.is_resolved() {
                let _ = slot.signal.wait_for(TRIGGER_WAIT_SLICE);
            }
        }
        match slot.take() {
            Some(outcome) => outcome.into_result(),
            None => Err(HwmError::internal("Request slot resolved without outcome")),
        }
    }

    /// Cancel every queued request. Blocks on the queue lock.
    pub fn cancel_all(&self, reason: CancelReason) {
        let mut pending = self.pending.lock();
        self.cancel_locked(&mut pending, reason);
    }

    fn acquire_slot(&self) -> HwmResult<Ticket> {
        self.slots
            .iter()
            .position(CompletionSlot::try_acquire)
            .map(Ticket)
            .ok_or_else(|| {
                HwmError::new(
                    ErrorKind::ResourceExhausted,
                    format!("All {REQUEST_SLOT_COUNT} request slots are in use"),
                )
            })
    }

    // ─── Realtime side ──────────────────────────────────────────────

    /// Take the newest queued request, cancelling everything submitted
    /// before it. `None` if the queue is empty or currently locked.
    pub fn try_pop_newest(&self) -> Option<TransitionRequest> {
        let mut pending = self.pending.try_lock()?;
        while pending.len() > 1 {
            if let Some(older) = pending.pop_front() {
                debug!("Cancelling request to switch to {}: superseded", older.to);
                self.resolve(&older, RequestOutcome::Cancelled(CancelReason::NewerRequest));
            }
        }
        pending.pop_front()
    }

    /// Cancel every queued request if the queue lock is free. Returns
    /// whether the queue was drained.
    pub fn try_cancel_all(&self, reason: CancelReason) -> bool {
        match self.pending.try_lock() {
            Some(mut pending) => {
                self.cancel_locked(&mut pending, reason);
                true
            }
            None => false,
        }
    }

    /// Reserve `request` for applying. `false` means the waiter timed out
    /// and the request must be dropped; its slot is reclaimed.
    pub fn claim(&self, request: &TransitionRequest) -> bool {
        self.slots[request.ticket.0].claim()
    }

    /// Deliver `outcome` to the waiter of `request`. Never blocks.
    pub fn resolve(&self, request: &TransitionRequest, outcome: RequestOutcome) {
        self.slots[request.ticket.0].resolve(outcome);
    }

    fn cancel_locked(
        &self,
        pending: &mut Deque<TransitionRequest, REQUEST_QUEUE_CAPACITY>,
        reason: CancelReason,
    ) {
        while let Some(request) = pending.pop_front() {
            debug!(
                "Cancelling request to switch to {}: {}",
                request.to,
                reason.message()
            );
            self.resolve(&request, RequestOutcome::Cancelled(reason));
        }
    }

    // ─── Introspection ──────────────────────────────────────────────

    /// Number of queued requests.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether no request is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of completion slots not free.
    pub fn slots_in_use(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state.load(Ordering::Acquire) != FREE)
            .count()
    }
}
