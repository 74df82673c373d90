//! Counters kept by a running stage.

use log::info;
use serde_json::{Value, json};
use std::time::{Duration, Instant};

/// What happened to the records a stage has seen.
#[derive(Debug, Clone, Default)]
pub struct StageStats {
    /// Records read from the consumer.
    pub read: u64,
    /// Records (or batches) the processor reported as handled.
    pub processed: u64,
    /// Records (or batches) the processor could not handle.
    pub failed: u64,
    /// Records dropped because they could not be decoded.
    pub undecodable: u64,
    /// Messages handed to the producer.
    pub written: u64,
    start_time: Option<Instant>,
    end_time: Option<Instant>,
}

impl StageStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_start(&mut self) {
        self.start_time = Some(Instant::now());
    }

    pub fn record_end(&mut self) {
        self.end_time = Some(Instant::now());
    }

    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some(end.duration_since(start)),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut stats = json!({
            "read": self.read,
            "processed": self.processed,
            "failed": self.failed,
            "undecodable": self.undecodable,
            "written": self.written,
        });
        if let Some(elapsed) = self.elapsed() {
            let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
            stats["execution_time_ms"] = json!(ms);
        }
        stats
    }

    /// Log a one-line summary.
    pub fn log_summary(&self) {
        let elapsed = self
            .elapsed()
            .map(|d| format!(" in {:.3}s", d.as_secs_f64()))
            .unwrap_or_default();
        info!(
            "records read: {}, processed: {}, failed: {}, undecodable: {}; messages written: {}{elapsed}",
            self.read, self.processed, self.failed, self.undecodable, self.written
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_has_counters_and_time() {
        let mut stats = StageStats::new();
        stats.record_start();
        stats.read = 3;
        stats.failed = 1;
        assert!(stats.to_json().get("execution_time_ms").is_none());
        stats.record_end();

        let json = stats.to_json();
        assert_eq!(json["read"], 3);
        assert_eq!(json["failed"], 1);
        assert!(json["execution_time_ms"].is_u64());
    }
}
