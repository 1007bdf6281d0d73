//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 配置文件到 PushManager 的完整链路
//! - 多消费者长轮询 e2e 测试
//! - 背压与 WAL 补齐、并发注销

#[cfg(test)]
mod contract_tests {
    #[test]
    fn test_contracts_compile() {
        let _ = contracts::ConfigVersion::V1;
        assert_eq!(contracts::MIN_RESPONSE_BYTES, 34);
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{
        ConsumerKey, PollRequest, PushConfig, RpcContext, RpcSender, SubmitPayload, Version,
        WalReader, WriteMsg,
    };
    use push_engine::mock::{MemoryWal, MockExecEngine, RecordingRpc};
    use push_engine::{HandleId, InputStatus, PollResponse, PushManager, PushManagerBuilder};
    use tokio::time::{sleep, Instant};

    const WAIT: Duration = Duration::from_secs(5);

    fn build(
        config: PushConfig,
        engine: MockExecEngine,
    ) -> (PushManager, Arc<RecordingRpc>, Arc<MemoryWal>) {
        let rpc = Arc::new(RecordingRpc::new());
        let wal = Arc::new(MemoryWal::new());
        let manager = PushManagerBuilder::new(
            config,
            engine,
            Arc::clone(&rpc) as Arc<dyn RpcSender>,
            Arc::clone(&wal) as Arc<dyn WalReader>,
        )
        .build()
        .unwrap();
        (manager, rpc, wal)
    }

    fn write(manager: &PushManager, wal: &MemoryWal, version: Version) {
        let msg = WriteMsg::submit(version, Bytes::from(format!("rows-{version}")));
        wal.append(msg.clone().into());
        manager.push_msg(msg).unwrap();
    }

    fn poll(consumer: u64, request_id: i64, processed: Version) -> PollRequest {
        PollRequest::new(
            request_id,
            request_id as i32,
            RpcContext::new(consumer, request_id as u64),
            processed,
        )
    }

    /// Wait until handle `id` has executed through `version`
    async fn wait_processed(manager: &PushManager, id: HandleId, version: Version) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if manager.handle_stats(id).unwrap().processed_version >= version {
                return true;
            }
            sleep(Duration::from_millis(5)).await;
        }
        false
    }

    /// Config file -> manager -> one pushed response
    #[tokio::test]
    async fn test_config_to_first_response() {
        let toml = r#"
version = "V1"
vgroup_id = 3
worker_count = 2
queue_capacity = 32
poll_timeout_ms = 2000
max_response_bytes = 4096
max_handles = 8
wal_scan_limit = 64
"#;
        let config = ConfigLoader::load_from_str(toml, ConfigFormat::Toml).unwrap();
        assert_eq!(config.vgroup_id, 3);

        let (manager, rpc, wal) = build(config, MockExecEngine::echo());
        let id = manager.register(ConsumerKey::new("meters", 42)).unwrap();
        manager.prepare_push(id, poll(42, 1, -1)).unwrap();

        write(&manager, &wal, 0);
        assert!(rpc.wait_for(1, WAIT).await);

        let (ctx, buf) = rpc.take().remove(0);
        assert_eq!(ctx, RpcContext::new(42, 1));
        let rsp = PollResponse::decode(buf).unwrap();
        assert!(rsp.validate_epoch(1).is_ok());
        assert_eq!(rsp.head.consumer_id, 42);
        assert_eq!(rsp.returned_offset, 0);
        assert_eq!(rsp.blocks, vec![Bytes::from_static(b"rows-0")]);

        manager.shutdown().await;
    }

    /// Consumers re-poll after every response and see every version in order
    #[tokio::test]
    async fn test_multi_consumer_long_poll_loop() {
        let config = PushConfig {
            worker_count: 3,
            queue_capacity: 16,
            ..Default::default()
        };
        let (manager, rpc, wal) = build(config, MockExecEngine::echo());

        let mut handles = HashMap::new();
        let mut next_request = HashMap::new();
        for consumer in 1..=3u64 {
            let id = manager
                .register(ConsumerKey::new("meters", consumer as i64))
                .unwrap();
            manager.prepare_push(id, poll(consumer, 1, -1)).unwrap();
            handles.insert(consumer, id);
            next_request.insert(consumer, 2i64);
        }

        let mut received: HashMap<u64, Vec<Version>> = HashMap::new();
        for version in 0..6 {
            write(&manager, &wal, version);
            assert!(rpc.wait_for(3, WAIT).await, "version {version}");

            for (ctx, buf) in rpc.take() {
                let rsp = PollResponse::decode(buf).unwrap();
                assert_eq!(rsp.blocks.len(), 1);
                received.entry(ctx.conn_id).or_default().push(rsp.returned_offset);

                let request_id = next_request[&ctx.conn_id];
                next_request.insert(ctx.conn_id, request_id + 1);
                manager
                    .prepare_push(
                        handles[&ctx.conn_id],
                        poll(ctx.conn_id, request_id, rsp.returned_offset),
                    )
                    .unwrap();
            }
        }

        for consumer in 1..=3u64 {
            assert_eq!(received[&consumer], vec![0, 1, 2, 3, 4, 5]);
            let stats = manager.handle_stats(handles[&consumer]).unwrap();
            assert_eq!(stats.metrics.rejected, 0);
            assert_eq!(stats.metrics.responses_sent, 6);
        }

        manager.shutdown().await;
    }

    /// A full queue blocks the handle; the next poll recovers the rest from the WAL
    #[tokio::test]
    async fn test_backpressure_then_wal_recovery() {
        let config = PushConfig {
            worker_count: 1,
            queue_capacity: 2,
            ..Default::default()
        };
        let engine = MockExecEngine::with_fn(|_, payload| {
            if payload.version() == 4 {
                vec![payload.body().clone()]
            } else {
                Vec::new()
            }
        });
        let (manager, rpc, wal) = build(config, engine);
        let id = manager.register(ConsumerKey::new("meters", 1)).unwrap();

        // No open request: nothing drains, the queue fills up
        for version in 0..6 {
            write(&manager, &wal, version);
        }
        let stats = manager.handle_stats(id).unwrap();
        assert_eq!(stats.queue_len, 2);
        assert_eq!(stats.input_status, InputStatus::Blocked);
        assert_eq!(stats.metrics.rejected, 4);
        assert!(rpc.is_empty());

        manager.prepare_push(id, poll(1, 1, -1)).unwrap();
        assert!(rpc.wait_for(1, WAIT).await);
        let rsp = PollResponse::decode(rpc.take().remove(0).1).unwrap();
        assert_eq!(rsp.returned_offset, 4);
        assert_eq!(rsp.blocks, vec![Bytes::from_static(b"rows-4")]);
        assert!(wal.scans() >= 1);

        manager.prepare_push(id, poll(1, 2, 4)).unwrap();
        assert!(wait_processed(&manager, id, 5).await);

        let stats = manager.handle_stats(id).unwrap();
        assert!(stats.metrics.wal_recovered >= 1);
        assert_eq!(stats.input_status, InputStatus::Normal);
        assert_eq!(stats.requested_offset, Some(5));
        assert!(rpc.is_empty());

        manager.shutdown().await;
    }

    /// Handles come and go while writes fan out; every reference is released
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_unregister_during_broadcast() {
        let config = PushConfig {
            worker_count: 2,
            queue_capacity: 8,
            ..Default::default()
        };
        let (manager, _rpc, _wal) = build(config, MockExecEngine::silent());
        let manager = Arc::new(manager);
        let tracked = SubmitPayload::new(0, Bytes::from_static(b"shared"));

        let writer = {
            let manager = Arc::clone(&manager);
            let tracked = tracked.clone();
            tokio::spawn(async move {
                for _ in 0..200 {
                    manager.broadcast(tracked.clone()).unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };

        let churn = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                for round in 0..50i64 {
                    let id = manager
                        .register(ConsumerKey::new("meters", 1000 + round))
                        .unwrap();
                    if round % 2 == 0 {
                        manager.prepare_push(id, poll(round as u64, 1, -1)).unwrap();
                    }
                    tokio::task::yield_now().await;
                    manager.unregister(id).unwrap();
                }
            })
        };

        writer.await.unwrap();
        churn.await.unwrap();
        assert!(manager.registry().is_empty());

        let Ok(manager) = Arc::try_unwrap(manager) else {
            panic!("manager still shared");
        };
        manager.shutdown().await;
        assert_eq!(tracked.ref_count(), 1);
    }

    /// Observability aggregator fed from decoded responses
    #[tokio::test]
    async fn test_aggregator_from_responses() {
        let (manager, rpc, wal) = build(PushConfig::default(), MockExecEngine::echo());
        let id = manager.register(ConsumerKey::new("meters", 9)).unwrap();
        manager.prepare_push(id, poll(9, 1, -1)).unwrap();
        write(&manager, &wal, 0);
        assert!(rpc.wait_for(1, WAIT).await);

        let mut aggregator = observability::PushMetricsAggregator::new();
        aggregator.record_write();
        for (_, buf) in rpc.take() {
            let bytes = buf.len();
            let rsp = PollResponse::decode(buf).unwrap();
            aggregator.record_response(rsp.head.consumer_id, bytes, rsp.blocks.len(), 0.5);
        }

        let summary = aggregator.summary();
        assert_eq!(summary.total_responses, 1);
        assert_eq!(summary.total_blocks, 1);
        // Header, body prefix, one length field and "rows-0"
        assert_eq!(summary.total_bytes, 34 + 4 + 6);
        assert_eq!(summary.responses_by_consumer.get(&9), Some(&1));

        manager.shutdown().await;
    }
}
