//! Simulation results

use std::time::Duration;

use serde::Serialize;

use contracts::{ConsumerId, Version};
use observability::MetricsSummary;
use push_engine::HandleId;

/// Per-consumer outcome
#[derive(Debug, Clone, Serialize)]
pub struct ConsumerReport {
    pub consumer_id: ConsumerId,
    pub handle_id: HandleId,
    pub responses: u64,
    /// Offset of the last response the consumer received
    pub received_offset: Version,
    /// Last version the handle executed
    pub processed_version: Version,
    pub enqueued: u64,
    pub rejected: u64,
    pub wal_recovered: u64,
    pub expired: u64,
}

/// Result of one simulation run
#[derive(Debug, Clone, Serialize)]
pub struct SimulationStats {
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
    pub writes: u64,
    /// Enqueue refusals summed over writes (blocked or expired handles)
    pub write_rejections: u64,
    pub stale_responses: u64,
    pub repolls_after_expiry: u64,
    pub caught_up: bool,
    pub consumers: Vec<ConsumerReport>,
    #[serde(skip)]
    pub metrics: MetricsSummary,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64() * 1000.0)
}

impl SimulationStats {
    pub fn responses(&self) -> u64 {
        self.metrics.total_responses
    }

    pub fn writes_per_sec(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.writes as f64 / secs
        } else {
            0.0
        }
    }

    /// JSON document including the latency figures
    pub fn to_json(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let Some(obj) = value.as_object_mut() {
            obj.insert("responses".into(), self.metrics.total_responses.into());
            obj.insert("blocks".into(), self.metrics.total_blocks.into());
            obj.insert("bytes".into(), self.metrics.total_bytes.into());
            obj.insert(
                "delivery_ms".into(),
                serde_json::json!({
                    "count": self.metrics.delivery_ms.count,
                    "min": self.metrics.delivery_ms.min,
                    "max": self.metrics.delivery_ms.max,
                    "mean": self.metrics.delivery_ms.mean,
                }),
            );
        }
        value
    }

    pub fn print_summary(&self) {
        println!();
        println!("=== Simulation Summary ===");
        println!("Duration: {:.2}s", self.duration.as_secs_f64());
        println!("Writes: {} ({:.1}/s)", self.writes, self.writes_per_sec());
        println!("Enqueue rejections: {}", self.write_rejections);
        println!("Re-polls after expiry: {}", self.repolls_after_expiry);
        println!("Stale responses: {}", self.stale_responses);
        println!(
            "Caught up: {}",
            if self.caught_up { "yes" } else { "NO (settle timeout)" }
        );
        println!();
        print!("{}", self.metrics);
        println!();
        println!(
            "{:>10} {:>8} {:>10} {:>10} {:>9} {:>9} {:>9}",
            "consumer", "handle", "responses", "processed", "rejected", "wal", "expired"
        );
        for c in &self.consumers {
            println!(
                "{:>10} {:>8} {:>10} {:>10} {:>9} {:>9} {:>9}",
                c.consumer_id,
                c.handle_id,
                c.responses,
                c.processed_version,
                c.rejected,
                c.wal_recovered,
                c.expired
            );
        }
    }
}
