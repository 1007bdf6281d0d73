//! Exec dispatcher - worker pool draining push handles
//!
//! A handle is owned by at most one worker at a time (its exec status is
//! Executing). The owning worker drains the queue in FIFO order, fills
//! version gaps from the WAL, runs the execution engine and hands non-empty
//! results to the response sender.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_channel::{Receiver, Sender, TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

use contracts::{ExecContext, ExecEngine, MsgType, RpcSender, SubmitPayload, Version, WalReader};

use crate::encoder::{self, SendOutcome};
use crate::error::PushError;
use crate::handle::{PushHandle, Settle};

/// One unit of work: drain this handle
#[derive(Debug)]
pub(crate) struct DispatchJob {
    pub handle: Arc<PushHandle>,
}

/// Whether the current job should keep going after an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    /// The request was answered or abandoned; stop draining
    Stop,
    /// A newer poll replaced the request mid-execution; the batch must run
    /// again under the new one
    Superseded,
}

/// How far one WAL replay got
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Replay {
    /// Every entry below the bound was replayed
    Complete,
    /// The scan limit was hit; more entries remain
    Truncated,
    /// A response went out or the poll was replaced
    Stop,
}

/// Sending side of the job channel, cloned into broadcasters
#[derive(Debug, Clone)]
pub(crate) struct DispatchQueue {
    tx: Sender<DispatchJob>,
}

impl DispatchQueue {
    /// Claim `handle` and queue a job for it.
    ///
    /// Returns `Ok(false)` when the handle is already Executing; that worker
    /// will see the new input on its re-check.
    pub fn request_dispatch(&self, handle: &Arc<PushHandle>) -> Result<bool, PushError> {
        if !handle.try_begin_exec() {
            trace!(handle_id = handle.id(), "Dispatch coalesced");
            return Ok(false);
        }
        let job = DispatchJob {
            handle: Arc::clone(handle),
        };
        match self.tx.try_send(job) {
            Ok(()) => {
                observability::metrics::record_dispatch_requested();
                Ok(true)
            }
            Err(TrySendError::Closed(job)) | Err(TrySendError::Full(job)) => {
                job.handle.abort_exec();
                Err(PushError::Shutdown)
            }
        }
    }

    pub fn close(&self) {
        self.tx.close();
    }
}

/// Limits the dispatcher applies per job
#[derive(Debug, Clone, Copy)]
pub(crate) struct ExecLimits {
    pub max_response_bytes: usize,
    pub wal_scan_limit: usize,
}

/// State shared by every worker
pub(crate) struct ExecShared<E> {
    pub engine: E,
    pub rpc: Arc<dyn RpcSender>,
    pub wal: Arc<dyn WalReader>,
    /// Latest submit version accepted by the node
    pub watermark: Arc<AtomicI64>,
    pub limits: ExecLimits,
}

impl<E> ExecShared<E>
where
    E: ExecEngine + Sync,
{
    /// Drain `handle` until it settles idle or is handed off
    #[instrument(
        name = "exec_dispatch_job",
        skip(self, handle),
        fields(handle_id = handle.id(), consumer_id = handle.consumer_id())
    )]
    pub async fn run_job(&self, handle: &Arc<PushHandle>, worker_id: usize) {
        let mut passes = 0u32;
        loop {
            passes += 1;
            self.drain_pass(handle, worker_id).await;
            match handle.settle() {
                Settle::Continue => {
                    observability::metrics::record_dispatch_recheck();
                    continue;
                }
                Settle::Idle => break,
                Settle::Handoff => {
                    trace!("Handle claimed by a broadcaster during re-check");
                    break;
                }
            }
        }
        trace!(passes, "Dispatch job finished");
    }

    async fn drain_pass(&self, handle: &Arc<PushHandle>, worker_id: usize) {
        if handle.is_closed() || !handle.request_open() {
            return;
        }

        if handle.take_catch_up() {
            let upto = self.watermark.load(Ordering::SeqCst) + 1;
            match self.recover_gap(handle, worker_id, upto).await {
                Replay::Complete => {}
                Replay::Truncated => {
                    // Next pass resumes from the new processed version
                    handle.request_catch_up();
                    return;
                }
                Replay::Stop => return,
            }
        }

        while let Some(payload) = handle.pop() {
            if handle.is_closed() {
                return;
            }
            let expected = handle.processed_version() + 1;
            if payload.version() < expected {
                trace!(version = payload.version(), expected, "Already processed, skipping");
                continue;
            }
            if payload.version() > expected {
                match self.recover_gap(handle, worker_id, payload.version()).await {
                    Replay::Complete => {}
                    Replay::Truncated | Replay::Stop => {
                        // Runs once everything before it has been replayed
                        handle.park(payload);
                        return;
                    }
                }
                if payload.version() <= handle.processed_version() {
                    continue;
                }
            }
            match self.exec_one(handle, &payload, worker_id).await {
                Flow::Continue => {}
                Flow::Stop => return,
                Flow::Superseded => {
                    handle.park(payload);
                    return;
                }
            }
        }
    }

    /// Replay WAL entries in `[processed_version + 1, upto)` for `handle`.
    ///
    /// One call replays at most `wal_scan_limit` entries and reports
    /// `Truncated` when more remain.
    #[instrument(level = "debug", name = "exec_recover_gap", skip(self, handle))]
    async fn recover_gap(&self, handle: &Arc<PushHandle>, worker_id: usize, upto: Version) -> Replay {
        let from = handle.processed_version() + 1;
        if from >= upto {
            return Replay::Complete;
        }

        let scan = match self.wal.scan_from(from) {
            Ok(scan) => scan,
            Err(e) => {
                warn!(from, upto, error = %e, "WAL scan failed, gap skipped");
                return Replay::Complete;
            }
        };

        let limit = self.limits.wal_scan_limit.max(1);
        let mut scanned = 0usize;
        let mut last_seen = from - 1;
        let mut recovered = 0u64;
        let mut outcome = Replay::Complete;
        for entry in scan.take_while(|entry| entry.version < upto).take(limit) {
            scanned += 1;
            last_seen = entry.version;
            if entry.version <= handle.processed_version() {
                continue;
            }
            if entry.msg_type != MsgType::Submit {
                let skipped = PushError::UnsupportedMessage {
                    msg_type: entry.msg_type,
                    version: entry.version,
                };
                debug!(error = %skipped, "Skipping WAL entry");
                handle.advance(entry.version);
                continue;
            }

            recovered += 1;
            let payload = SubmitPayload::new(entry.version, entry.body);
            if self.exec_one(handle, &payload, worker_id).await != Flow::Continue {
                outcome = Replay::Stop;
                break;
            }
        }

        if recovered > 0 {
            handle.metrics().add_wal_recovered(recovered);
            observability::metrics::record_wal_recovered(recovered);
            debug!(from, upto, recovered, "Recovered entries from WAL");
        }

        if outcome == Replay::Complete && scanned == limit && last_seen < upto - 1 {
            if handle.processed_version() >= from {
                debug!(from, last_seen, upto, "WAL scan limit reached, resuming next pass");
                return Replay::Truncated;
            }
            // Every entry in the window failed; retrying would spin
            warn!(from, last_seen, upto, "No progress within one WAL scan, gap skipped");
        }
        outcome
    }

    /// Execute one batch and deliver its results, if any
    async fn exec_one(&self, handle: &Arc<PushHandle>, payload: &SubmitPayload, worker_id: usize) -> Flow {
        let tag = handle.request_tag();
        let ctx = ExecContext {
            handle_id: handle.id(),
            key: handle.key().clone(),
            processed_version: handle.processed_version(),
        };

        let started = Instant::now();
        let result = self.engine.execute(&ctx, payload, worker_id).await;
        observability::metrics::record_exec_latency_ms(started.elapsed().as_secs_f64() * 1000.0);

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                handle.metrics().inc_exec_failures();
                observability::metrics::record_exec_failure();
                warn!(
                    handle_id = handle.id(),
                    version = payload.version(),
                    error = %e,
                    "Execution failed"
                );
                return Flow::Continue;
            }
        };
        handle.metrics().inc_executed();

        if output.is_empty() {
            if handle.advance_for(tag, output.processed_version) {
                return Flow::Continue;
            }
            debug!(version = payload.version(), "Poll replaced during execution");
            return Flow::Superseded;
        }

        match encoder::send_response(
            handle,
            self.rpc.as_ref(),
            tag,
            output.blocks,
            output.processed_version,
            self.limits.max_response_bytes,
        ) {
            Ok(SendOutcome::Sent { bytes, .. }) => {
                handle.metrics().inc_responses_sent();
                observability::metrics::record_response_sent(bytes);
                Flow::Stop
            }
            Ok(SendOutcome::NoRequest) => {
                debug!(
                    handle_id = handle.id(),
                    version = payload.version(),
                    "Results ready but no request open"
                );
                Flow::Stop
            }
            Ok(SendOutcome::Superseded) => {
                debug!(
                    handle_id = handle.id(),
                    version = payload.version(),
                    "Poll replaced during execution, results dropped"
                );
                Flow::Superseded
            }
            Err(e) => {
                // An unencodable result would block the consumer forever
                handle.metrics().inc_oversized();
                observability::metrics::record_response_failed();
                error!(
                    handle_id = handle.id(),
                    version = payload.version(),
                    error = %e,
                    "Failed to build poll response, version skipped"
                );
                if handle.advance_for(tag, output.processed_version) {
                    Flow::Continue
                } else {
                    Flow::Superseded
                }
            }
        }
    }
}

/// Fixed pool of dispatch workers sharing one job channel
pub(crate) struct WorkerPool {
    queue: DispatchQueue,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `worker_count` workers on the current runtime.
    ///
    /// The channel is unbounded: a handle has at most one job in flight, so
    /// the backlog never exceeds the number of live handles.
    pub fn spawn<E>(shared: Arc<ExecShared<E>>, worker_count: usize) -> Self
    where
        E: ExecEngine + Send + Sync + 'static,
    {
        let (tx, rx) = async_channel::unbounded();
        let workers = (0..worker_count)
            .map(|worker_id| {
                let rx = rx.clone();
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    worker_loop(worker_id, rx, shared).await;
                })
            })
            .collect();

        Self {
            queue: DispatchQueue { tx },
            workers,
        }
    }

    pub fn queue(&self) -> &DispatchQueue {
        &self.queue
    }

    /// Stop accepting jobs and wait for in-flight ones to finish
    #[instrument(name = "worker_pool_shutdown", skip(self), fields(workers = self.workers.len()))]
    pub async fn shutdown(self) {
        self.queue.close();
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!(error = ?e, "Dispatch worker panicked");
            }
        }
        debug!("Worker pool shutdown complete");
    }
}

#[instrument(name = "exec_worker_loop", skip(rx, shared))]
async fn worker_loop<E>(worker_id: usize, rx: Receiver<DispatchJob>, shared: Arc<ExecShared<E>>)
where
    E: ExecEngine + Sync,
{
    debug!(worker_id, "Dispatch worker started");
    let mut jobs: u64 = 0;

    while let Ok(job) = rx.recv().await {
        jobs += 1;
        shared.run_job(&job.handle, worker_id).await;

        if jobs.is_multiple_of(1000) {
            debug!(worker_id, jobs, "Dispatch worker progress");
        }
    }

    info!(worker_id, jobs, "Dispatch worker stopped");
}
