//! Storage operation statistics

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters for a single storage operation
#[derive(Debug, Default)]
pub struct OpStats {
    pub success: AtomicU64,
    pub failed: AtomicU64,
    pub bytes: AtomicU64,
    pub latency_sum_us: AtomicU64,
}

impl OpStats {
    pub fn record(&self, success: bool, bytes: u64, latency: Duration) {
        if success {
            self.success.fetch_add(1, Ordering::Relaxed);
            self.bytes.fetch_add(bytes, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        let latency_us = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
    }

    #[must_use]
    pub fn success_count(&self) -> u64 {
        self.success.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

/// Counters for every ledger storage operation
#[derive(Debug, Default)]
pub struct StorageStats {
    pub add_entry: OpStats,
    pub recovery_add_entry: OpStats,
    pub read_entry: OpStats,
    pub set_explicit_lac: OpStats,
    pub journal_sync: OpStats,
}

impl StorageStats {
    fn operations(&self) -> [(&'static str, &OpStats); 5] {
        [
            ("add_entry", &self.add_entry),
            ("recovery_add_entry", &self.recovery_add_entry),
            ("read_entry", &self.read_entry),
            ("set_explicit_lac", &self.set_explicit_lac),
            ("journal_sync", &self.journal_sync),
        ]
    }

    /// Export counters in Prometheus text format
    #[must_use]
    pub fn export_prometheus(&self, bookie_id: &str) -> String {
        let mut output = String::with_capacity(2 * 1024);
        let ops = self.operations();

        let _ = writeln!(
            output,
            "# HELP bookie_storage_ops_total Storage operations by operation and status"
        );
        let _ = writeln!(output, "# TYPE bookie_storage_ops_total counter");
        for (op, stats) in &ops {
            let _ = writeln!(
                output,
                "bookie_storage_ops_total{{bookie_id=\"{bookie_id}\",op=\"{op}\",status=\"success\"}} {}",
                stats.success_count()
            );
            let _ = writeln!(
                output,
                "bookie_storage_ops_total{{bookie_id=\"{bookie_id}\",op=\"{op}\",status=\"failed\"}} {}",
                stats.failed_count()
            );
        }

        let _ = writeln!(
            output,
            "# HELP bookie_storage_bytes_total Bytes handled by successful operations"
        );
        let _ = writeln!(output, "# TYPE bookie_storage_bytes_total counter");
        for (op, stats) in &ops {
            let _ = writeln!(
                output,
                "bookie_storage_bytes_total{{bookie_id=\"{bookie_id}\",op=\"{op}\"}} {}",
                stats.total_bytes()
            );
        }

        let _ = writeln!(
            output,
            "# HELP bookie_storage_latency_seconds_sum Sum of operation latencies"
        );
        let _ = writeln!(output, "# TYPE bookie_storage_latency_seconds_sum counter");
        for (op, stats) in &ops {
            let sum_us = stats.latency_sum_us.load(Ordering::Relaxed);
            let _ = writeln!(
                output,
                "bookie_storage_latency_seconds_sum{{bookie_id=\"{bookie_id}\",op=\"{op}\"}} {:.6}",
                sum_us as f64 / 1_000_000.0
            );
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_export() {
        let stats = StorageStats::default();
        stats.add_entry.record(true, 100, Duration::from_micros(250));
        stats.add_entry.record(false, 100, Duration::from_micros(50));

        assert_eq!(stats.add_entry.success_count(), 1);
        assert_eq!(stats.add_entry.failed_count(), 1);
        assert_eq!(stats.add_entry.total_bytes(), 100);

        let text = stats.export_prometheus("bookie-1:3181");
        assert!(text.contains(
            "bookie_storage_ops_total{bookie_id=\"bookie-1:3181\",op=\"add_entry\",status=\"success\"} 1"
        ));
        assert!(text.contains(
            "bookie_storage_bytes_total{bookie_id=\"bookie-1:3181\",op=\"add_entry\"} 100"
        ));
        assert!(text.contains("op=\"add_entry\"} 0.000300"));
    }
}
