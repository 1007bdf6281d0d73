//! In-memory collaborators for tests and the simulator
//!
//! - `MockExecEngine`: scripted execution engine with call recording
//! - `RecordingRpc`: RPC sender that keeps every response
//! - `MemoryWal`: append-only WAL held in a `Vec`

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Semaphore;
use tokio::time::{sleep, Instant};

use contracts::{
    ConsumerId, ContractError, ExecContext, ExecEngine, ExecOutput, RpcContext, RpcSender,
    SubmitPayload, Version, WalEntry, WalReader, WalScan,
};

type ProduceFn = dyn Fn(&ExecContext, &SubmitPayload) -> Vec<Bytes> + Send + Sync;

/// One recorded engine invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecCall {
    pub handle_id: u64,
    pub consumer_id: ConsumerId,
    pub version: Version,
    pub worker_id: usize,
}

/// Scripted execution engine. Clones share the call log.
#[derive(Clone)]
pub struct MockExecEngine {
    produce: Arc<ProduceFn>,
    delay: Option<Duration>,
    gate: Option<Arc<Semaphore>>,
    failing: Arc<HashSet<Version>>,
    calls: Arc<Mutex<Vec<ExecCall>>>,
}

impl MockExecEngine {
    /// Engine computing result blocks with `f`
    pub fn with_fn<F>(f: F) -> Self
    where
        F: Fn(&ExecContext, &SubmitPayload) -> Vec<Bytes> + Send + Sync + 'static,
    {
        Self {
            produce: Arc::new(f),
            delay: None,
            gate: None,
            failing: Arc::new(HashSet::new()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// One block per batch: the batch body itself
    pub fn echo() -> Self {
        Self::with_fn(|_, payload| vec![payload.body().clone()])
    }

    /// Never produces rows
    pub fn silent() -> Self {
        Self::with_fn(|_, _| Vec::new())
    }

    /// Produces the batch body for every version divisible by `n`
    pub fn every(n: i64) -> Self {
        let n = n.max(1);
        Self::with_fn(move |_, payload| {
            if payload.version() % n == 0 {
                vec![payload.body().clone()]
            } else {
                Vec::new()
            }
        })
    }

    /// Sleep before every execution
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Each execution consumes one permit of `gate` before it runs
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Fail every execution of the given versions
    pub fn failing_on(mut self, versions: impl IntoIterator<Item = Version>) -> Self {
        self.failing = Arc::new(versions.into_iter().collect());
        self
    }

    /// Invocations so far, in call order
    pub fn calls(&self) -> Vec<ExecCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl fmt::Debug for MockExecEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockExecEngine")
            .field("delay", &self.delay)
            .field("gated", &self.gate.is_some())
            .field("failing", &self.failing)
            .field("calls", &self.call_count())
            .finish()
    }
}

impl ExecEngine for MockExecEngine {
    async fn execute(
        &self,
        ctx: &ExecContext,
        payload: &SubmitPayload,
        worker_id: usize,
    ) -> Result<ExecOutput, ContractError> {
        if let Some(gate) = &self.gate {
            match gate.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => return Err(ContractError::exec(payload.version(), "engine gate closed")),
            }
        }
        if let Some(delay) = self.delay {
            sleep(delay).await;
        }

        self.calls.lock().push(ExecCall {
            handle_id: ctx.handle_id,
            consumer_id: ctx.key.consumer_id,
            version: payload.version(),
            worker_id,
        });

        if self.failing.contains(&payload.version()) {
            return Err(ContractError::exec(payload.version(), "scripted failure"));
        }

        Ok(ExecOutput {
            blocks: (self.produce)(ctx, payload),
            processed_version: payload.version(),
        })
    }
}

/// RPC sender that records every response
#[derive(Debug, Default)]
pub struct RecordingRpc {
    sent: Mutex<Vec<(RpcContext, Bytes)>>,
}

impl RecordingRpc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every response sent so far, in send order
    pub fn sent(&self) -> Vec<(RpcContext, Bytes)> {
        self.sent.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.lock().is_empty()
    }

    /// Remove and return the recorded responses
    pub fn take(&self) -> Vec<(RpcContext, Bytes)> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Wait until at least `n` responses were sent. False on timeout.
    pub async fn wait_for(&self, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.len() >= n {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(Duration::from_millis(5)).await;
        }
    }
}

impl RpcSender for RecordingRpc {
    fn send(&self, ctx: RpcContext, buf: Bytes) {
        self.sent.lock().push((ctx, buf));
    }
}

/// WAL kept in memory, ordered by version
#[derive(Debug, Default)]
pub struct MemoryWal {
    entries: RwLock<Vec<WalEntry>>,
    scans: AtomicUsize,
}

impl MemoryWal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, keeping version order
    pub fn append(&self, entry: WalEntry) {
        let mut entries = self.entries.write();
        let at = entries.partition_point(|e| e.version <= entry.version);
        entries.insert(at, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Latest version written, or -1 when empty
    pub fn last_version(&self) -> Version {
        self.entries.read().last().map_or(-1, |e| e.version)
    }

    /// Number of scans served
    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::Relaxed)
    }
}

impl WalReader for MemoryWal {
    fn scan_from(&self, from: Version) -> Result<WalScan<'_>, ContractError> {
        self.scans.fetch_add(1, Ordering::Relaxed);
        let entries = self.entries.read();
        let start = entries.partition_point(|e| e.version < from);
        let snapshot: Vec<WalEntry> = entries[start..].to_vec();
        Ok(Box::new(snapshot.into_iter()))
    }
}
