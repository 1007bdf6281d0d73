//! PushHandle - per-consumer dispatch state
//!
//! Holds the consumer's input queue, the execution/back-pressure status
//! flags, the outstanding request context and the expiry timer slot.
//!
//! Status flags and the queue depth use SeqCst so that the enqueue side
//! (push, then read exec status) and the dispatch side (write Closing, then
//! read queue depth) always observe at least one another's write.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicIsize, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::queue::SegQueue;
use parking_lot::Mutex;
use tracing::debug;

use contracts::{ConsumerId, ConsumerKey, PollRequest, RpcContext, SubmitPayload, Version};

use crate::error::PushError;
use crate::metrics::{HandleMetrics, MetricsSnapshot};
use crate::registry::HandleId;
use crate::timer::{TimerService, TimerSlot};

/// Admission state of the input queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InputStatus {
    /// Accepting new payloads
    Normal = 0,
    /// Back-pressure: new payloads are refused until the next poll
    Blocked = 1,
}

impl InputStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Normal,
            _ => Self::Blocked,
        }
    }
}

/// Execution state of the handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExecStatus {
    /// No dispatcher owns the handle
    Idle = 0,
    /// One dispatcher is draining the queue
    Executing = 1,
    /// A drain pass finished; the dispatcher is re-checking before idling
    Closing = 2,
}

impl ExecStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Executing,
            _ => Self::Closing,
        }
    }
}

/// How a dispatcher leaves a handle after a drain pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Settle {
    /// Work arrived during the pass; the dispatcher keeps ownership
    Continue,
    /// Nothing left to do; the handle is idle
    Idle,
    /// A broadcaster claimed the handle and scheduled a new job
    Handoff,
}

/// Request bookkeeping guarded by the handle lock
#[derive(Debug, Default)]
pub(crate) struct RequestState {
    /// Reply context of the outstanding poll
    pub pending: Option<RpcContext>,
    /// Offset the outstanding poll asked for
    pub requested_offset: i64,
}

/// Identity of the poll an execution started under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RequestTag {
    pub epoch: i32,
    pub request_id: i64,
}

/// Per-consumer push state
#[derive(Debug)]
pub struct PushHandle {
    id: HandleId,
    key: ConsumerKey,
    request_id: AtomicI64,
    epoch: AtomicI32,
    processed_version: AtomicI64,
    input_status: AtomicU8,
    exec_status: AtomicU8,
    queue: SegQueue<SubmitPayload>,
    /// Payload the dispatcher put back ahead of the queue
    parked: Mutex<Option<SubmitPayload>>,
    /// Queued plus parked payloads
    depth: AtomicIsize,
    capacity: usize,
    /// Mirrors `request.pending.is_some()` for lock-free checks
    request_open: AtomicBool,
    /// Set by a new poll; asks the dispatcher to catch up from the WAL
    catch_up: AtomicBool,
    expired: AtomicBool,
    closed: AtomicBool,
    timer: Arc<TimerSlot>,
    pub(crate) request: Mutex<RequestState>,
    metrics: HandleMetrics,
}

impl PushHandle {
    /// Build a fully initialised handle; it is not visible to anyone until
    /// the registry publishes it.
    pub(crate) fn new(id: HandleId, key: ConsumerKey, capacity: usize) -> Self {
        Self {
            id,
            key,
            request_id: AtomicI64::new(0),
            epoch: AtomicI32::new(0),
            processed_version: AtomicI64::new(-1),
            input_status: AtomicU8::new(InputStatus::Normal as u8),
            exec_status: AtomicU8::new(ExecStatus::Idle as u8),
            queue: SegQueue::new(),
            parked: Mutex::new(None),
            depth: AtomicIsize::new(0),
            capacity,
            request_open: AtomicBool::new(false),
            catch_up: AtomicBool::new(false),
            expired: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            timer: Arc::new(TimerSlot::new()),
            request: Mutex::new(RequestState::default()),
            metrics: HandleMetrics::new(),
        }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn key(&self) -> &ConsumerKey {
        &self.key
    }

    pub fn consumer_id(&self) -> ConsumerId {
        self.key.consumer_id
    }

    pub fn epoch(&self) -> i32 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn request_id(&self) -> i64 {
        self.request_id.load(Ordering::SeqCst)
    }

    pub fn processed_version(&self) -> Version {
        self.processed_version.load(Ordering::SeqCst)
    }

    pub fn input_status(&self) -> InputStatus {
        InputStatus::from_u8(self.input_status.load(Ordering::SeqCst))
    }

    pub fn exec_status(&self) -> ExecStatus {
        ExecStatus::from_u8(self.exec_status.load(Ordering::SeqCst))
    }

    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// True while a poll is waiting for a response
    pub fn request_open(&self) -> bool {
        self.request_open.load(Ordering::SeqCst)
    }

    /// Offset of the outstanding poll, if any
    pub fn requested_offset(&self) -> Option<i64> {
        let state = self.request.lock();
        state.pending.map(|_| state.requested_offset)
    }

    /// Reply context of the outstanding poll, if any
    pub fn pending_request(&self) -> Option<RpcContext> {
        self.request.lock().pending
    }

    pub fn queue_len(&self) -> usize {
        self.depth.load(Ordering::SeqCst).max(0) as usize
    }

    pub fn timer_armed(&self) -> bool {
        self.timer.is_armed()
    }

    pub fn metrics(&self) -> &HandleMetrics {
        &self.metrics
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Force the back-pressure flag. The next poll resets it to Normal.
    pub fn set_input_status(&self, status: InputStatus) {
        self.input_status.store(status as u8, Ordering::SeqCst);
    }

    /// Queue a shared reference to `payload`.
    ///
    /// Never copies the batch; the queue entry holds one more reference.
    pub fn enqueue(&self, payload: &SubmitPayload) -> Result<(), PushError> {
        let result = self.try_enqueue(payload);
        if result.is_err() {
            self.metrics.inc_rejected();
        }
        result
    }

    fn try_enqueue(&self, payload: &SubmitPayload) -> Result<(), PushError> {
        let handle_id = self.id;
        if self.is_closed() {
            return Err(PushError::HandleClosed { handle_id });
        }
        if self.is_expired() {
            return Err(PushError::Expired { handle_id });
        }
        if self.input_status() == InputStatus::Blocked {
            return Err(PushError::Blocked { handle_id });
        }
        if self.queue_len() >= self.capacity {
            self.set_input_status(InputStatus::Blocked);
            debug!(
                handle_id,
                capacity = self.capacity,
                "Input queue full, handle blocked"
            );
            return Err(PushError::Blocked { handle_id });
        }

        self.queue.push(payload.clone());
        self.depth.fetch_add(1, Ordering::SeqCst);

        // Lost a race with unregister: release what we just queued
        if self.is_closed() {
            self.drain();
            return Err(PushError::HandleClosed { handle_id });
        }

        self.metrics.inc_enqueued();
        Ok(())
    }

    /// Pop the next payload: a parked one first, then the oldest queued
    pub(crate) fn pop(&self) -> Option<SubmitPayload> {
        let payload = match self.parked.lock().take() {
            Some(payload) => payload,
            None => self.queue.pop()?,
        };
        self.depth.fetch_sub(1, Ordering::SeqCst);
        Some(payload)
    }

    /// Return a popped payload that cannot run yet; the next `pop` yields it.
    ///
    /// Only the dispatcher owning the handle parks, right after popping, so
    /// the slot is empty here.
    pub(crate) fn park(&self, payload: SubmitPayload) {
        let mut parked = self.parked.lock();
        match parked.as_ref() {
            None => *parked = Some(payload),
            Some(_) => self.queue.push(payload),
        }
        self.depth.fetch_add(1, Ordering::SeqCst);
        drop(parked);

        // Lost a race with unregister: release it
        if self.is_closed() {
            self.drain();
        }
    }

    /// Ask the next dispatch pass to keep catching up from the WAL
    pub(crate) fn request_catch_up(&self) {
        self.catch_up.store(true, Ordering::SeqCst);
    }

    /// Release every queued payload. Returns how many were released.
    pub(crate) fn drain(&self) -> usize {
        let mut released = 0;
        while self.pop().is_some() {
            released += 1;
        }
        released
    }

    /// Claim the handle for dispatch.
    ///
    /// Succeeds only from Idle or Closing; a handle that is already
    /// Executing is left alone.
    pub(crate) fn try_begin_exec(&self) -> bool {
        let mut current = self.exec_status.load(Ordering::SeqCst);
        loop {
            if current == ExecStatus::Executing as u8 {
                return false;
            }
            match self.exec_status.compare_exchange(
                current,
                ExecStatus::Executing as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Undo a claim whose job could not be scheduled
    pub(crate) fn abort_exec(&self) {
        self.exec_status
            .store(ExecStatus::Idle as u8, Ordering::SeqCst);
    }

    /// End-of-pass protocol for the owning dispatcher.
    ///
    /// Publishes Closing first, then looks for work that may have been
    /// queued after the pass stopped popping. Only work that can make
    /// progress (an open request plus queued payloads or a pending catch-up)
    /// keeps the dispatcher running.
    pub(crate) fn settle(&self) -> Settle {
        self.exec_status
            .store(ExecStatus::Closing as u8, Ordering::SeqCst);

        let more_work = !self.is_closed()
            && self.request_open()
            && (self.queue_len() > 0 || self.catch_up.load(Ordering::SeqCst));

        let next = if more_work {
            ExecStatus::Executing
        } else {
            ExecStatus::Idle
        };
        match self.exec_status.compare_exchange(
            ExecStatus::Closing as u8,
            next as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) if more_work => Settle::Continue,
            Ok(_) => Settle::Idle,
            Err(_) => Settle::Handoff,
        }
    }

    /// Consume a catch-up request left by the latest poll
    pub(crate) fn take_catch_up(&self) -> bool {
        self.catch_up.swap(false, Ordering::SeqCst)
    }

    /// Record progress after a batch was executed (and delivered, if it had rows)
    pub(crate) fn advance(&self, version: Version) {
        self.processed_version.fetch_max(version, Ordering::SeqCst);
    }

    /// Poll currently open (or last opened) on this handle
    pub(crate) fn request_tag(&self) -> RequestTag {
        RequestTag {
            epoch: self.epoch(),
            request_id: self.request_id(),
        }
    }

    /// Advance for work done under `tag`. A newer poll resets the processed
    /// version, so progress from an older one is dropped.
    pub(crate) fn advance_for(&self, tag: RequestTag, version: Version) -> bool {
        let _state = self.request.lock();
        if self.request_tag() != tag {
            return false;
        }
        self.advance(version);
        true
    }

    /// Open a new outstanding request, replacing whatever was there.
    ///
    /// Returns the superseded reply context, if the previous request was
    /// still open.
    pub(crate) fn open_request(
        self: &Arc<Self>,
        req: &PollRequest,
        timers: &TimerService,
        timeout: Duration,
    ) -> Option<RpcContext> {
        let mut state = self.request.lock();
        let superseded = state.pending.replace(req.rpc);
        state.requested_offset = req.requested_offset;

        self.request_id.store(req.request_id, Ordering::SeqCst);
        self.epoch.store(req.epoch, Ordering::SeqCst);
        self.processed_version
            .store(req.processed_version, Ordering::SeqCst);
        self.input_status
            .store(InputStatus::Normal as u8, Ordering::SeqCst);
        self.request_open.store(true, Ordering::SeqCst);
        self.catch_up.store(true, Ordering::SeqCst);

        let weak = Arc::downgrade(self);
        timers.arm(&self.timer, timeout, move || {
            if let Some(handle) = weak.upgrade() {
                handle.mark_expired();
            }
        });
        // Cleared after arming so a timer that fired just before the re-arm
        // cannot leave a stale flag behind.
        self.expired.store(false, Ordering::SeqCst);

        drop(state);
        superseded
    }

    /// Take the reply context for sending; the request is closed afterwards
    pub(crate) fn close_request(&self, state: &mut RequestState) -> Option<RpcContext> {
        let ctx = state.pending.take()?;
        state.requested_offset = 0;
        self.request_open.store(false, Ordering::SeqCst);
        Some(ctx)
    }

    /// Timer callback: advisory only, never touches the request lock
    fn mark_expired(&self) {
        if !self.expired.swap(true, Ordering::SeqCst) {
            self.metrics.inc_expired();
            observability::metrics::record_request_expired();
            debug!(
                handle_id = self.id,
                consumer_id = self.key.consumer_id,
                epoch = self.epoch(),
                "Poll request expired"
            );
        }
    }

    /// Tear down: refuse further input, cancel the timer, release the queue.
    pub(crate) fn close(&self, timers: &TimerService) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        timers.cancel(&self.timer);
        self.drain()
    }
}
