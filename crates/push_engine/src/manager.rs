//! PushManager - node-level owner of the push layer
//!
//! Owns the handle registry, the timer service and the dispatch worker
//! pool. A storage node builds one at start-up and shuts it down at
//! teardown; every entry point takes `&self`.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use contracts::{
    ConsumerKey, ExecEngine, MsgType, PollRequest, PushConfig, RpcContext, RpcSender,
    SubmitPayload, Version, WalReader, WriteMsg,
};

use crate::broadcast::{self, BroadcastReport};
use crate::error::PushError;
use crate::exec::{ExecLimits, ExecShared, WorkerPool};
use crate::handle::{ExecStatus, InputStatus, PushHandle};
use crate::metrics::MetricsSnapshot;
use crate::registry::{HandleId, HandleRegistry};
use crate::timer::TimerService;

/// Point-in-time view of one handle
#[derive(Debug, Clone, PartialEq)]
pub struct HandleStats {
    pub handle_id: HandleId,
    pub key: ConsumerKey,
    pub epoch: i32,
    pub request_id: i64,
    pub processed_version: Version,
    /// Offset of the open request, if one is open
    pub requested_offset: Option<i64>,
    pub input_status: InputStatus,
    pub exec_status: ExecStatus,
    pub expired: bool,
    pub queue_len: usize,
    pub timer_armed: bool,
    pub metrics: MetricsSnapshot,
}

impl HandleStats {
    fn of(handle: &PushHandle) -> Self {
        Self {
            handle_id: handle.id(),
            key: handle.key().clone(),
            epoch: handle.epoch(),
            request_id: handle.request_id(),
            processed_version: handle.processed_version(),
            requested_offset: handle.requested_offset(),
            input_status: handle.input_status(),
            exec_status: handle.exec_status(),
            expired: handle.is_expired(),
            queue_len: handle.queue_len(),
            timer_armed: handle.timer_armed(),
            metrics: handle.metrics_snapshot(),
        }
    }
}

/// Builder for creating a PushManager
pub struct PushManagerBuilder<E> {
    config: PushConfig,
    engine: E,
    rpc: Arc<dyn RpcSender>,
    wal: Arc<dyn WalReader>,
}

impl<E> PushManagerBuilder<E>
where
    E: ExecEngine + Send + Sync + 'static,
{
    pub fn new(config: PushConfig, engine: E, rpc: Arc<dyn RpcSender>, wal: Arc<dyn WalReader>) -> Self {
        Self {
            config,
            engine,
            rpc,
            wal,
        }
    }

    /// Start the worker pool on the current tokio runtime
    #[instrument(
        name = "push_manager_build",
        skip(self),
        fields(vgroup_id = self.config.vgroup_id, workers = self.config.worker_count)
    )]
    pub fn build(self) -> Result<PushManager, PushError> {
        let timers = TimerService::current()?;
        let watermark = Arc::new(AtomicI64::new(-1));

        let shared = Arc::new(ExecShared {
            engine: self.engine,
            rpc: self.rpc,
            wal: self.wal,
            watermark: Arc::clone(&watermark),
            limits: ExecLimits {
                max_response_bytes: self.config.max_response_bytes,
                wal_scan_limit: self.config.wal_scan_limit,
            },
        });
        let pool = WorkerPool::spawn(shared, self.config.worker_count.max(1));
        let registry = HandleRegistry::new(self.config.max_handles, self.config.queue_capacity);

        info!(
            queue_capacity = self.config.queue_capacity,
            max_handles = self.config.max_handles,
            poll_timeout_ms = self.config.poll_timeout_ms,
            "Push manager started"
        );

        Ok(PushManager {
            config: self.config,
            registry,
            timers,
            pool,
            watermark,
            shutting_down: AtomicBool::new(false),
        })
    }
}

/// The push layer of one storage node
pub struct PushManager {
    config: PushConfig,
    registry: HandleRegistry,
    timers: TimerService,
    pool: WorkerPool,
    watermark: Arc<AtomicI64>,
    shutting_down: AtomicBool,
}

impl PushManager {
    pub fn config(&self) -> &PushConfig {
        &self.config
    }

    pub fn registry(&self) -> &HandleRegistry {
        &self.registry
    }

    pub fn timers(&self) -> &TimerService {
        &self.timers
    }

    /// Latest submit version accepted by this node
    pub fn watermark(&self) -> Version {
        self.watermark.load(Ordering::SeqCst)
    }

    /// Register a consumer for push delivery
    pub fn register(&self, key: ConsumerKey) -> Result<HandleId, PushError> {
        self.ensure_running()?;
        self.registry.register(key)
    }

    /// Remove a consumer; returns the number of queued payloads released
    pub fn unregister(&self, id: HandleId) -> Result<usize, PushError> {
        self.registry.unregister(id, &self.timers)
    }

    /// Open a long-poll request on handle `id`.
    ///
    /// Replaces any request still open on the handle and returns its reply
    /// context. Asks for a dispatch when the consumer is behind the node.
    #[instrument(
        name = "push_prepare",
        skip(self, req),
        fields(
            vgroup_id = self.config.vgroup_id,
            request_id = req.request_id,
            epoch = req.epoch,
            processed_version = req.processed_version
        )
    )]
    pub fn prepare_push(&self, id: HandleId, req: PollRequest) -> Result<Option<RpcContext>, PushError> {
        self.ensure_running()?;
        let handle = self.registry.lookup(id).ok_or(PushError::HandleNotFound(id))?;
        if handle.is_closed() {
            return Err(PushError::HandleClosed { handle_id: id });
        }

        let timeout = req.timeout.unwrap_or_else(|| self.config.poll_timeout());
        let superseded = handle.open_request(&req, &self.timers, timeout);
        if let Some(previous) = superseded {
            debug!(
                consumer_id = handle.consumer_id(),
                conn_id = previous.conn_id,
                correlation_id = previous.correlation_id,
                "Open request superseded by a new poll"
            );
        }

        let behind = self.watermark() > req.processed_version;
        if behind || handle.queue_len() > 0 {
            self.pool.queue().request_dispatch(&handle)?;
        }
        Ok(superseded)
    }

    /// Node-facing entry for accepted writes. Only submits are pushed.
    pub fn push_msg(&self, msg: WriteMsg) -> Result<BroadcastReport, PushError> {
        if msg.msg_type != MsgType::Submit {
            observability::metrics::record_unsupported_message();
            return Err(PushError::UnsupportedMessage {
                msg_type: msg.msg_type,
                version: msg.version,
            });
        }
        self.broadcast(SubmitPayload::from(msg))
    }

    /// Fan a submit out to every registered handle
    pub fn broadcast(&self, payload: SubmitPayload) -> Result<BroadcastReport, PushError> {
        self.ensure_running()?;
        self.watermark.fetch_max(payload.version(), Ordering::SeqCst);
        Ok(broadcast::broadcast(&self.registry, self.pool.queue(), payload))
    }

    /// Put handle `id` under back-pressure until its next poll
    pub fn set_input_blocked(&self, id: HandleId) -> Result<(), PushError> {
        let handle = self.registry.lookup(id).ok_or(PushError::HandleNotFound(id))?;
        handle.set_input_status(InputStatus::Blocked);
        Ok(())
    }

    pub fn handle_stats(&self, id: HandleId) -> Result<HandleStats, PushError> {
        self.registry
            .lookup(id)
            .map(|h| HandleStats::of(&h))
            .ok_or(PushError::HandleNotFound(id))
    }

    /// Stats of every registered handle, ordered by id
    pub fn stats(&self) -> Vec<HandleStats> {
        let mut stats: Vec<_> = self
            .registry
            .snapshot()
            .iter()
            .map(|h| HandleStats::of(h))
            .collect();
        stats.sort_by_key(|s| s.handle_id);
        stats
    }

    /// Stop the workers, then release every handle's queue and timer
    #[instrument(name = "push_manager_shutdown", skip(self))]
    pub async fn shutdown(self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.pool.shutdown().await;

        let mut released = 0;
        for id in self.registry.ids() {
            match self.registry.unregister(id, &self.timers) {
                Ok(n) => released += n,
                Err(e) => warn!(handle_id = id, error = %e, "Unregister during shutdown failed"),
            }
        }
        info!(released, "Push manager shutdown complete");
    }

    fn ensure_running(&self) -> Result<(), PushError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(PushError::Shutdown);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::sync::Semaphore;
    use tokio::time::sleep;

    use crate::encoder::PollResponse;
    use crate::mock::{MemoryWal, MockExecEngine, RecordingRpc};

    struct Fixture {
        manager: PushManager,
        engine: MockExecEngine,
        rpc: Arc<RecordingRpc>,
        wal: Arc<MemoryWal>,
    }

    fn config() -> PushConfig {
        PushConfig {
            worker_count: 2,
            queue_capacity: 16,
            poll_timeout_ms: 5_000,
            ..Default::default()
        }
    }

    fn fixture_with(engine: MockExecEngine, config: PushConfig) -> Fixture {
        let rpc = Arc::new(RecordingRpc::new());
        let wal = Arc::new(MemoryWal::new());
        let manager = PushManagerBuilder::new(
            config,
            engine.clone(),
            Arc::clone(&rpc) as Arc<dyn RpcSender>,
            Arc::clone(&wal) as Arc<dyn WalReader>,
        )
        .build()
        .unwrap();
        Fixture {
            manager,
            engine,
            rpc,
            wal,
        }
    }

    fn fixture(engine: MockExecEngine) -> Fixture {
        fixture_with(engine, config())
    }

    fn poll(id: i64, processed: Version) -> PollRequest {
        PollRequest::new(id, id as i32, RpcContext::new(1, id as u64), processed)
    }

    /// Append to the WAL and push, as the write path does
    fn write(f: &Fixture, version: Version, body: &'static [u8]) -> BroadcastReport {
        let msg = WriteMsg::submit(version, Bytes::from_static(body));
        f.wal.append(msg.clone().into());
        f.manager.push_msg(msg).unwrap()
    }

    #[tokio::test]
    async fn test_broadcast_adds_one_reference_per_accepting_handle() {
        let f = fixture(MockExecEngine::silent());
        let a = f.manager.register(ConsumerKey::new("meters", 1)).unwrap();
        let b = f.manager.register(ConsumerKey::new("meters", 2)).unwrap();
        f.manager.register(ConsumerKey::new("meters", 3)).unwrap();
        f.manager.set_input_blocked(b).unwrap();

        // No request open anywhere: payloads stay queued
        let payload = SubmitPayload::new(0, Bytes::from_static(b"rows"));
        let report = f.manager.broadcast(payload.clone()).unwrap();

        assert_eq!(report.visited, 3);
        assert_eq!(report.accepted, 2);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.dispatched, 0);
        assert_eq!(payload.ref_count(), 1 + 2);
        assert_eq!(f.manager.handle_stats(a).unwrap().queue_len, 1);
        assert_eq!(f.manager.handle_stats(b).unwrap().queue_len, 0);

        f.manager.shutdown().await;
        assert_eq!(payload.ref_count(), 1);
    }

    #[tokio::test]
    async fn test_zero_blocks_keep_long_poll_open_then_one_send() {
        let engine = MockExecEngine::with_fn(|_, payload| {
            if payload.version() < 2 {
                Vec::new()
            } else {
                vec![payload.body().clone()]
            }
        });
        let f = fixture(engine);
        let id = f.manager.register(ConsumerKey::new("meters", 7)).unwrap();
        f.manager.prepare_push(id, poll(1, -1)).unwrap();

        write(&f, 0, b"a");
        write(&f, 1, b"b");
        sleep(Duration::from_millis(50)).await;
        assert_eq!(f.rpc.len(), 0);
        let stats = f.manager.handle_stats(id).unwrap();
        assert_eq!(stats.processed_version, 1);
        assert!(stats.requested_offset.is_some());

        write(&f, 2, b"c");
        write(&f, 3, b"d");
        assert!(f.rpc.wait_for(1, Duration::from_secs(2)).await);
        sleep(Duration::from_millis(50)).await;

        assert_eq!(f.rpc.len(), 1);
        let (ctx, buf) = f.rpc.sent()[0].clone();
        assert_eq!(ctx, RpcContext::new(1, 1));
        let rsp = PollResponse::decode(buf).unwrap();
        assert_eq!(rsp.head.consumer_id, 7);
        assert_eq!(rsp.returned_offset, 2);
        assert_eq!(rsp.blocks, vec![Bytes::from_static(b"c")]);

        let stats = f.manager.handle_stats(id).unwrap();
        assert_eq!(stats.requested_offset, None);
        assert_eq!(stats.input_status, InputStatus::Blocked);
        assert_eq!(stats.metrics.responses_sent, 1);

        f.manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_second_prepare_replaces_first() {
        let f = fixture(MockExecEngine::echo());
        let id = f.manager.register(ConsumerKey::new("meters", 7)).unwrap();

        assert_eq!(f.manager.prepare_push(id, poll(1, -1)).unwrap(), None);
        let superseded = f.manager.prepare_push(id, poll(2, -1)).unwrap();
        assert_eq!(superseded, Some(RpcContext::new(1, 1)));

        write(&f, 0, b"rows");
        assert!(f.rpc.wait_for(1, Duration::from_secs(2)).await);
        sleep(Duration::from_millis(30)).await;

        let sent = f.rpc.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, RpcContext::new(1, 2));
        let rsp = PollResponse::decode(sent[0].1.clone()).unwrap();
        assert_eq!(rsp.head.epoch, 2);
        assert!(rsp.validate_epoch(1).is_err());

        f.manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_blocked_handle_does_not_affect_others() {
        let f = fixture(MockExecEngine::echo());
        let blocked = f.manager.register(ConsumerKey::new("meters", 1)).unwrap();
        let open = f.manager.register(ConsumerKey::new("meters", 2)).unwrap();
        f.manager.prepare_push(blocked, poll(1, -1)).unwrap();
        f.manager.prepare_push(open, poll(2, -1)).unwrap();
        f.manager.set_input_blocked(blocked).unwrap();

        let report = write(&f, 0, b"rows");
        assert_eq!(report.accepted, 1);
        assert_eq!(report.rejected, 1);

        assert!(f.rpc.wait_for(1, Duration::from_secs(2)).await);
        sleep(Duration::from_millis(30)).await;
        assert_eq!(f.rpc.len(), 1);
        assert_eq!(f.rpc.sent()[0].0, RpcContext::new(1, 2));
        assert_eq!(f.manager.handle_stats(blocked).unwrap().metrics.rejected, 1);

        f.manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_expiry_sends_nothing_and_refuses_input() {
        let f = fixture(MockExecEngine::echo());
        let id = f.manager.register(ConsumerKey::new("meters", 1)).unwrap();
        f.manager
            .prepare_push(id, poll(1, -1).with_timeout(Duration::from_millis(20)))
            .unwrap();

        sleep(Duration::from_millis(100)).await;
        let stats = f.manager.handle_stats(id).unwrap();
        assert!(stats.expired);
        assert!(!stats.timer_armed);
        assert_eq!(stats.metrics.expired, 1);
        assert_eq!(f.rpc.len(), 0);

        let report = write(&f, 0, b"rows");
        assert_eq!(report.rejected, 1);
        sleep(Duration::from_millis(30)).await;
        assert_eq!(f.rpc.len(), 0);

        // The next poll clears the flag and catches up from the WAL
        f.manager.prepare_push(id, poll(2, -1)).unwrap();
        assert!(!f.manager.handle_stats(id).unwrap().expired);
        assert!(f.rpc.wait_for(1, Duration::from_secs(2)).await);

        f.manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_second_broadcast_while_executing_is_not_lost() {
        let gate = Arc::new(Semaphore::new(0));
        let engine = MockExecEngine::with_fn(|_, payload| {
            if payload.version() == 0 {
                Vec::new()
            } else {
                vec![payload.body().clone()]
            }
        })
        .with_gate(Arc::clone(&gate));
        let f = fixture(engine);
        let id = f.manager.register(ConsumerKey::new("meters", 1)).unwrap();
        f.manager.prepare_push(id, poll(1, -1)).unwrap();

        let first = write(&f, 0, b"empty");
        assert_eq!(first.dispatched, 1);
        sleep(Duration::from_millis(20)).await;
        assert_eq!(
            f.manager.handle_stats(id).unwrap().exec_status,
            ExecStatus::Executing
        );

        // The worker is parked inside the engine; this must not start a second one
        let second = write(&f, 1, b"rows");
        assert_eq!(second.accepted, 1);
        assert_eq!(second.dispatched, 0);

        gate.add_permits(2);
        assert!(f.rpc.wait_for(1, Duration::from_secs(2)).await);
        sleep(Duration::from_millis(30)).await;

        assert_eq!(f.rpc.len(), 1);
        let rsp = PollResponse::decode(f.rpc.sent()[0].1.clone()).unwrap();
        assert_eq!(rsp.blocks, vec![Bytes::from_static(b"rows")]);
        assert_eq!(f.engine.call_count(), 2);
        assert_eq!(
            f.manager.handle_stats(id).unwrap().exec_status,
            ExecStatus::Idle
        );

        f.manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_gap_recovered_from_wal() {
        let f = fixture(MockExecEngine::with_fn(|_, payload| {
            if payload.version() < 3 {
                Vec::new()
            } else {
                vec![payload.body().clone()]
            }
        }));
        let id = f.manager.register(ConsumerKey::new("meters", 1)).unwrap();
        f.manager.set_input_blocked(id).unwrap();

        // Written while the handle refused input: only in the WAL
        for v in 0..3 {
            write(&f, v, b"missed");
        }
        assert_eq!(f.manager.handle_stats(id).unwrap().queue_len, 0);

        f.manager.prepare_push(id, poll(1, -1)).unwrap();
        sleep(Duration::from_millis(30)).await;
        assert_eq!(f.manager.handle_stats(id).unwrap().processed_version, 2);
        assert_eq!(f.rpc.len(), 0);

        write(&f, 3, b"fresh");
        assert!(f.rpc.wait_for(1, Duration::from_secs(2)).await);
        sleep(Duration::from_millis(30)).await;

        let stats = f.manager.handle_stats(id).unwrap();
        assert_eq!(stats.processed_version, 3);
        assert_eq!(stats.metrics.wal_recovered, 3);
        let versions: Vec<_> = f.engine.calls().iter().map(|c| c.version).collect();
        assert_eq!(versions, vec![0, 1, 2, 3]);

        f.manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_gap_longer_than_scan_limit_is_replayed_in_full() {
        let cfg = PushConfig {
            queue_capacity: 2,
            wal_scan_limit: 2,
            ..config()
        };
        let f = fixture_with(MockExecEngine::silent(), cfg);
        let id = f.manager.register(ConsumerKey::new("meters", 1)).unwrap();

        // No poll yet: two versions queue up, the rest only reach the WAL
        for v in 0..6 {
            write(&f, v, b"backlog");
        }
        assert_eq!(f.manager.handle_stats(id).unwrap().queue_len, 2);

        f.manager.prepare_push(id, poll(1, -1)).unwrap();
        sleep(Duration::from_millis(30)).await;
        assert_eq!(f.manager.handle_stats(id).unwrap().processed_version, 5);

        write(&f, 6, b"fresh");
        sleep(Duration::from_millis(30)).await;

        let stats = f.manager.handle_stats(id).unwrap();
        assert_eq!(stats.processed_version, 6);
        assert_eq!(stats.metrics.wal_recovered, 6);
        assert_eq!(stats.queue_len, 0);
        let versions: Vec<_> = f.engine.calls().iter().map(|c| c.version).collect();
        assert_eq!(versions, vec![0, 1, 2, 3, 4, 5, 6]);

        f.manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_repoll_during_execution_drops_stale_results() {
        let gate = Arc::new(Semaphore::new(0));
        let f = fixture(MockExecEngine::echo().with_gate(Arc::clone(&gate)));
        let id = f.manager.register(ConsumerKey::new("meters", 1)).unwrap();
        f.manager.prepare_push(id, poll(1, -1)).unwrap();

        write(&f, 0, b"old");
        sleep(Duration::from_millis(20)).await;
        assert_eq!(
            f.manager.handle_stats(id).unwrap().exec_status,
            ExecStatus::Executing
        );

        // Consumer moved on while the worker sits in the engine
        f.manager.prepare_push(id, poll(2, 5)).unwrap();
        gate.add_permits(10);
        sleep(Duration::from_millis(50)).await;

        assert_eq!(f.rpc.len(), 0);
        let stats = f.manager.handle_stats(id).unwrap();
        assert_eq!(stats.processed_version, 5);
        assert_eq!(stats.requested_offset, Some(6));
        assert_eq!(stats.exec_status, ExecStatus::Idle);

        write(&f, 6, b"new");
        assert!(f.rpc.wait_for(1, Duration::from_secs(2)).await);
        let (ctx, buf) = f.rpc.sent()[0].clone();
        assert_eq!(ctx, RpcContext::new(1, 2));
        let rsp = PollResponse::decode(buf).unwrap();
        assert_eq!(rsp.head.epoch, 2);
        assert_eq!(rsp.requested_offset, 6);
        assert_eq!(rsp.returned_offset, 6);
        assert_eq!(rsp.blocks, vec![Bytes::from_static(b"new")]);

        f.manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_oversized_result_is_skipped() {
        let cfg = PushConfig {
            max_response_bytes: 100,
            ..config()
        };
        let engine = MockExecEngine::with_fn(|_, payload| {
            if payload.version() == 0 {
                vec![Bytes::from(vec![0u8; 200])]
            } else {
                vec![payload.body().clone()]
            }
        });
        let f = fixture_with(engine, cfg);
        let id = f.manager.register(ConsumerKey::new("meters", 1)).unwrap();
        f.manager.prepare_push(id, poll(1, -1)).unwrap();

        for v in 0..4 {
            write(&f, v, b"ok");
        }
        assert!(f.rpc.wait_for(1, Duration::from_secs(2)).await);
        sleep(Duration::from_millis(30)).await;

        assert_eq!(f.rpc.len(), 1);
        let rsp = PollResponse::decode(f.rpc.sent()[0].1.clone()).unwrap();
        assert_eq!(rsp.returned_offset, 1);
        let stats = f.manager.handle_stats(id).unwrap();
        assert_eq!(stats.metrics.oversized, 1);
        assert_eq!(stats.processed_version, 1);

        // The consumer keeps making progress
        f.manager.prepare_push(id, poll(2, 1)).unwrap();
        assert!(f.rpc.wait_for(2, Duration::from_secs(2)).await);
        let rsp = PollResponse::decode(f.rpc.sent()[1].1.clone()).unwrap();
        assert_eq!(rsp.returned_offset, 2);

        f.manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_non_submit_is_unsupported() {
        let f = fixture(MockExecEngine::echo());
        let msg = WriteMsg {
            msg_type: MsgType::DropTable,
            version: 4,
            body: Bytes::new(),
        };
        assert!(matches!(
            f.manager.push_msg(msg),
            Err(PushError::UnsupportedMessage {
                msg_type: MsgType::DropTable,
                version: 4
            })
        ));
        assert_eq!(f.manager.watermark(), -1);
        f.manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_engine_failure_does_not_advance() {
        let f = fixture(MockExecEngine::echo().failing_on([0]));
        let id = f.manager.register(ConsumerKey::new("meters", 1)).unwrap();
        f.manager.prepare_push(id, poll(1, -1)).unwrap();

        // Not in the WAL, so only the queued copy is executed
        f.manager.push_msg(WriteMsg::submit(0, Bytes::from_static(b"bad"))).unwrap();
        sleep(Duration::from_millis(50)).await;

        let stats = f.manager.handle_stats(id).unwrap();
        assert_eq!(stats.processed_version, -1);
        assert_eq!(stats.metrics.exec_failures, 1);
        assert_eq!(f.rpc.len(), 0);

        f.manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_unregister_releases_queue_and_timer() {
        let f = fixture(MockExecEngine::echo());
        let id = f.manager.register(ConsumerKey::new("meters", 1)).unwrap();
        f.manager
            .prepare_push(id, poll(1, -1).with_timeout(Duration::from_secs(60)))
            .unwrap();
        f.manager.set_input_blocked(id).unwrap();
        assert_eq!(f.manager.timers().armed_count(), 1);

        assert_eq!(f.manager.unregister(id).unwrap(), 0);
        assert_eq!(f.manager.timers().armed_count(), 0);
        assert!(matches!(
            f.manager.handle_stats(id),
            Err(PushError::HandleNotFound(_))
        ));

        f.manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_calls_after_shutdown_fail() {
        let f = fixture(MockExecEngine::echo());
        let manager = f.manager;
        manager.shutting_down.store(true, Ordering::SeqCst);
        assert!(matches!(
            manager.register(ConsumerKey::new("meters", 1)),
            Err(PushError::Shutdown)
        ));
        manager.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_lost_wakeup_under_concurrent_writers() {
        let mut cfg = config();
        cfg.worker_count = 3;
        cfg.queue_capacity = 100_000;
        let f = Arc::new(fixture_with(MockExecEngine::silent(), cfg));
        let ids: Vec<_> = (0..8)
            .map(|c| f.manager.register(ConsumerKey::new("meters", c)).unwrap())
            .collect();
        for (i, id) in ids.iter().enumerate() {
            f.manager.prepare_push(*id, poll(i as i64 + 1, -1)).unwrap();
        }

        // Writers hand out disjoint versions; FIFO order per handle is not
        // required across writers here, only that nothing is stranded.
        let writers: Vec<_> = (0..4)
            .map(|w| {
                let f = Arc::clone(&f);
                tokio::spawn(async move {
                    for i in 0..250 {
                        let version = i * 4 + w;
                        f.manager
                            .broadcast(SubmitPayload::new(version, Bytes::from_static(b"x")))
                            .unwrap();
                        if i % 50 == 0 {
                            tokio::task::yield_now().await;
                        }
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap();
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let stranded: usize = f.manager.stats().iter().map(|s| s.queue_len).sum();
            let busy = f
                .manager
                .stats()
                .iter()
                .any(|s| s.exec_status != ExecStatus::Idle);
            if stranded == 0 && !busy {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "{stranded} payloads stranded"
            );
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(f.rpc.len(), 0);
    }
}
