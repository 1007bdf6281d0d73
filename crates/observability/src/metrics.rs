//! Push 层指标收集模块
//!
//! 通过 `metrics` facade 记录推送路径的计数器与直方图，
//! 并提供内存聚合器用于模拟运行后的摘要输出。

use std::collections::BTreeMap;

use contracts::ConsumerId;
use metrics::{counter, gauge, histogram};

/// 记录一次广播的结果
pub fn record_broadcast(accepted: usize, rejected: usize) {
    counter!("tq_push_broadcasts_total").increment(1);
    counter!("tq_push_enqueue_total", "outcome" => "accepted").increment(accepted as u64);
    if rejected > 0 {
        counter!("tq_push_enqueue_total", "outcome" => "rejected").increment(rejected as u64);
    }
}

/// 记录一次分发任务提交
pub fn record_dispatch_requested() {
    counter!("tq_push_dispatch_jobs_total").increment(1);
}

/// Closing 复检发现新工作，worker 继续持有 handle
pub fn record_dispatch_recheck() {
    counter!("tq_push_dispatch_rechecks_total").increment(1);
}

/// 记录响应发送
pub fn record_response_sent(bytes: usize) {
    counter!("tq_push_responses_total", "status" => "sent").increment(1);
    histogram!("tq_push_response_bytes").record(bytes as f64);
}

/// 记录响应构建失败
pub fn record_response_failed() {
    counter!("tq_push_responses_total", "status" => "failed").increment(1);
}

/// 记录请求过期
pub fn record_request_expired() {
    counter!("tq_push_requests_expired_total").increment(1);
}

/// 记录从 WAL 补齐的条目数
pub fn record_wal_recovered(entries: u64) {
    counter!("tq_push_wal_recovered_total").increment(entries);
}

/// 记录执行引擎耗时
pub fn record_exec_latency_ms(latency_ms: f64) {
    histogram!("tq_push_exec_latency_ms").record(latency_ms);
}

/// 记录执行失败
pub fn record_exec_failure() {
    counter!("tq_push_exec_failures_total").increment(1);
}

/// 非 submit 消息进入推送路径
pub fn record_unsupported_message() {
    counter!("tq_push_unsupported_messages_total").increment(1);
}

/// 记录已注册 handle 数
pub fn record_handle_count(count: usize) {
    gauge!("tq_push_handles").set(count as f64);
}

/// 推送指标聚合器
///
/// 在内存中聚合消费端观测到的响应，便于统计和输出摘要。
#[derive(Debug, Clone, Default)]
pub struct PushMetricsAggregator {
    /// 写入批次总数
    pub total_writes: u64,

    /// 收到的响应总数
    pub total_responses: u64,

    /// 响应字节总数
    pub total_bytes: u64,

    /// 结果块总数
    pub total_blocks: u64,

    /// 写入到响应的延迟统计
    pub delivery_stats: RunningStats,

    /// 各消费者收到的响应数
    pub responses_by_consumer: BTreeMap<ConsumerId, u64>,
}

impl PushMetricsAggregator {
    /// 创建新的聚合器
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_write(&mut self) {
        self.total_writes += 1;
    }

    /// 更新一次响应
    pub fn record_response(
        &mut self,
        consumer_id: ConsumerId,
        bytes: usize,
        blocks: usize,
        delivery_ms: f64,
    ) {
        self.total_responses += 1;
        self.total_bytes += bytes as u64;
        self.total_blocks += blocks as u64;
        self.delivery_stats.push(delivery_ms);
        *self.responses_by_consumer.entry(consumer_id).or_insert(0) += 1;
    }

    /// 生成摘要报告
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_writes: self.total_writes,
            total_responses: self.total_responses,
            total_bytes: self.total_bytes,
            total_blocks: self.total_blocks,
            avg_response_bytes: if self.total_responses > 0 {
                self.total_bytes as f64 / self.total_responses as f64
            } else {
                0.0
            },
            delivery_ms: StatsSummary::from(&self.delivery_stats),
            responses_by_consumer: self.responses_by_consumer.clone(),
        }
    }

    /// 重置统计
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 指标摘要
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub total_writes: u64,
    pub total_responses: u64,
    pub total_bytes: u64,
    pub total_blocks: u64,
    pub avg_response_bytes: f64,
    pub delivery_ms: StatsSummary,
    pub responses_by_consumer: BTreeMap<ConsumerId, u64>,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Push Metrics Summary ===")?;
        writeln!(f, "Writes: {}", self.total_writes)?;
        writeln!(f, "Responses: {}", self.total_responses)?;
        writeln!(
            f,
            "Bytes: {} (avg {:.1} per response)",
            self.total_bytes, self.avg_response_bytes
        )?;
        writeln!(f, "Blocks: {}", self.total_blocks)?;
        writeln!(f, "Delivery latency (ms): {}", self.delivery_ms)?;

        if !self.responses_by_consumer.is_empty() {
            writeln!(f, "Responses per consumer:")?;
            for (consumer, count) in &self.responses_by_consumer {
                writeln!(f, "  {}: {}", consumer, count)?;
            }
        }

        Ok(())
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// 添加新值
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            self.m2 += delta * (value - self.mean);
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 样本方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}
