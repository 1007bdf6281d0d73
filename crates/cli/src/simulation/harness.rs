//! Simulation harness - writers, consumers and one PushManager.
//!
//! Consumers behave like real subscribers: each response advances the
//! consumer's offset and is followed by a new poll; an expired poll is
//! re-issued from the last offset the consumer actually received.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use contracts::{
    ConsumerId, ConsumerKey, PollRequest, PushConfig, RpcContext, RpcSender, Version, WriteMsg,
};
use observability::PushMetricsAggregator;
use push_engine::mock::{MemoryWal, MockExecEngine};
use push_engine::{HandleId, PollResponse, PushError, PushManager, PushManagerBuilder};

use super::stats::{ConsumerReport, SimulationStats};
use crate::error::{CliError, Result};

/// Simulation parameters
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub push: PushConfig,
    pub consumers: u32,
    pub writes: u64,
    pub blocks_every: i64,
    pub write_interval: Duration,
    pub exec_delay: Duration,
    pub topic: String,
    pub settle_timeout: Duration,
}

/// RPC transport that hands responses back to the consumer loop
struct ChannelRpc {
    tx: mpsc::UnboundedSender<(RpcContext, Bytes)>,
}

impl RpcSender for ChannelRpc {
    fn send(&self, ctx: RpcContext, buf: Bytes) {
        if self.tx.send((ctx, buf)).is_err() {
            warn!(conn_id = ctx.conn_id, "Consumer loop gone, response dropped");
        }
    }
}

/// Consumer-side view of one subscription
#[derive(Debug)]
struct Consumer {
    id: ConsumerId,
    handle: HandleId,
    epoch: i32,
    request_id: i64,
    /// Last offset received in a response
    processed: Version,
    responses: u64,
}

impl Consumer {
    fn next_poll(&mut self) -> PollRequest {
        self.request_id += 1;
        self.epoch += 1;
        PollRequest::new(
            self.request_id,
            self.epoch,
            RpcContext::new(self.id as u64, self.request_id as u64),
            self.processed,
        )
    }
}

/// One simulation run
pub struct Simulation {
    config: SimulationConfig,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    /// Run until every consumer has caught up with the last write, or the
    /// settle timeout passes after the writer finished.
    #[instrument(
        name = "simulation_run",
        skip(self),
        fields(consumers = self.config.consumers, writes = self.config.writes)
    )]
    pub async fn run(self) -> Result<SimulationStats> {
        let started = Instant::now();
        let cfg = self.config;

        let (rsp_tx, mut rsp_rx) = mpsc::unbounded_channel();
        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<(Version, Instant)>();

        let wal = Arc::new(MemoryWal::new());
        let mut engine = MockExecEngine::every(cfg.blocks_every);
        if !cfg.exec_delay.is_zero() {
            engine = engine.with_delay(cfg.exec_delay);
        }
        let manager = Arc::new(
            PushManagerBuilder::new(
                cfg.push.clone(),
                engine,
                Arc::new(ChannelRpc { tx: rsp_tx }),
                Arc::clone(&wal) as Arc<dyn contracts::WalReader>,
            )
            .build()?,
        );

        let mut consumers = HashMap::new();
        for i in 0..cfg.consumers {
            let id = ConsumerId::from(i) + 1;
            let handle = manager.register(ConsumerKey::new(cfg.topic.as_str(), id))?;
            let mut consumer = Consumer {
                id,
                handle,
                epoch: 0,
                request_id: 0,
                processed: -1,
                responses: 0,
            };
            manager.prepare_push(handle, consumer.next_poll())?;
            consumers.insert(id as u64, consumer);
        }
        info!(consumers = consumers.len(), "Consumers subscribed");

        let writer = tokio::spawn(write_loop(
            Arc::clone(&manager),
            Arc::clone(&wal),
            cfg.writes,
            cfg.write_interval,
            write_tx,
        ));

        let last_version = cfg.writes as Version - 1;
        let mut aggregator = PushMetricsAggregator::new();
        let mut written_at: HashMap<Version, Instant> = HashMap::new();
        let mut stale = 0u64;
        let mut repolls = 0u64;
        let mut writer_done = false;
        let mut settle_deadline = None;

        let tick_every = (cfg.push.poll_timeout() / 2)
            .clamp(Duration::from_millis(10), Duration::from_millis(100));
        let mut ticker = interval(tick_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let caught_up = loop {
            tokio::select! {
                write = write_rx.recv(), if !writer_done => match write {
                    Some((version, at)) => {
                        written_at.insert(version, at);
                        aggregator.record_write();
                    }
                    None => {
                        writer_done = true;
                        settle_deadline = Some(Instant::now() + cfg.settle_timeout);
                        debug!("Writer finished");
                    }
                },
                Some((ctx, buf)) = rsp_rx.recv() => {
                    while let Ok((version, at)) = write_rx.try_recv() {
                        written_at.insert(version, at);
                        aggregator.record_write();
                    }
                    let Some(consumer) = consumers.get_mut(&ctx.conn_id) else {
                        warn!(conn_id = ctx.conn_id, "Response for unknown consumer");
                        continue;
                    };
                    let bytes = buf.len();
                    let rsp = PollResponse::decode(buf)?;
                    if rsp.validate_epoch(consumer.epoch).is_err() {
                        stale += 1;
                        continue;
                    }

                    consumer.processed = rsp.returned_offset;
                    consumer.responses += 1;
                    let delivery_ms = written_at
                        .get(&rsp.returned_offset)
                        .map_or(0.0, |at| at.elapsed().as_secs_f64() * 1000.0);
                    aggregator.record_response(consumer.id, bytes, rsp.blocks.len(), delivery_ms);

                    manager.prepare_push(consumer.handle, consumer.next_poll())?;
                }
                _ = ticker.tick() => {
                    for consumer in consumers.values_mut() {
                        if manager.handle_stats(consumer.handle)?.expired {
                            repolls += 1;
                            manager.prepare_push(consumer.handle, consumer.next_poll())?;
                        }
                    }
                }
            }

            if writer_done && all_caught_up(&manager, &consumers, last_version)? {
                break true;
            }
            if settle_deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                warn!("Settle timeout reached before every consumer caught up");
                break false;
            }
        };

        let write_rejections = writer
            .await
            .map_err(|e| CliError::simulation(format!("writer task failed: {e}")))??;

        let mut reports: Vec<ConsumerReport> = consumers
            .values()
            .map(|c| {
                manager.handle_stats(c.handle).map(|stats| ConsumerReport {
                    consumer_id: c.id,
                    handle_id: c.handle,
                    responses: c.responses,
                    received_offset: c.processed,
                    processed_version: stats.processed_version,
                    enqueued: stats.metrics.enqueued,
                    rejected: stats.metrics.rejected,
                    wal_recovered: stats.metrics.wal_recovered,
                    expired: stats.metrics.expired,
                })
            })
            .collect::<std::result::Result<_, PushError>>()?;
        reports.sort_by_key(|r| r.consumer_id);

        match Arc::try_unwrap(manager) {
            Ok(manager) => manager.shutdown().await,
            Err(_) => warn!("Push manager still shared, skipping graceful shutdown"),
        }

        Ok(SimulationStats {
            duration: started.elapsed(),
            writes: cfg.writes,
            write_rejections,
            stale_responses: stale,
            repolls_after_expiry: repolls,
            caught_up,
            consumers: reports,
            metrics: aggregator.summary(),
        })
    }
}

/// Every handle has executed through `last_version`
fn all_caught_up(
    manager: &PushManager,
    consumers: &HashMap<u64, Consumer>,
    last_version: Version,
) -> Result<bool> {
    for consumer in consumers.values() {
        if manager.handle_stats(consumer.handle)?.processed_version < last_version {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Append to the WAL, then push, the way a storage node's write path does
async fn write_loop(
    manager: Arc<PushManager>,
    wal: Arc<MemoryWal>,
    writes: u64,
    write_interval: Duration,
    written: mpsc::UnboundedSender<(Version, Instant)>,
) -> std::result::Result<u64, CliError> {
    let mut rejected = 0u64;
    for version in 0..writes as Version {
        let msg = WriteMsg::submit(version, Bytes::from(format!("batch-{version}")));
        wal.append(msg.clone().into());
        let _ = written.send((version, Instant::now()));

        let report = manager.push_msg(msg)?;
        rejected += report.rejected as u64;

        if write_interval.is_zero() {
            tokio::task::yield_now().await;
        } else {
            sleep(write_interval).await;
        }
    }
    debug!(writes, rejected, "Write loop complete");
    Ok(rejected)
}
