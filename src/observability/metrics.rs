//! Thread-safe metrics collection system
//!
//! Atomic counters for broker sessions and for what happened to every record
//! and post that went through the emission pipeline.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::protocol::PublishOutcome;

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    // Session metrics
    connection_attempts: AtomicU64,
    connection_failures: AtomicU64,
    messages_published: AtomicU64,
    publish_failures: AtomicU64,

    // Emission outcomes
    delivered: AtomicU64,
    sanitized_retries: AtomicU64,
    error_reports: AtomicU64,
    dropped: AtomicU64,
    queue_overflows: AtomicU64,

    // Full publish cycle durations in milliseconds
    cycle_times: Mutex<Vec<u64>>,

    started_at: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            connection_attempts: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            sanitized_retries: AtomicU64::new(0),
            error_reports: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            queue_overflows: AtomicU64::new(0),
            cycle_times: Mutex::new(Vec::new()),
            started_at: AtomicU64::new(current_timestamp()),
        }
    }

    // MQTT metrics
    pub fn mqtt_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a retry with a sanitized topic and payload
    pub fn sanitized_retry(&self) {
        self.sanitized_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a record the sink queue had no room for
    pub fn queue_overflow(&self) {
        self.queue_overflows.fetch_add(1, Ordering::Relaxed);
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record how a publish cycle ended and how long it took
    pub fn publish_cycle_finished(&self, outcome: PublishOutcome, duration: Duration) {
        match outcome {
            PublishOutcome::Delivered | PublishOutcome::DeliveredSanitized => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            PublishOutcome::Reported => {
                self.error_reports.fetch_add(1, Ordering::Relaxed);
            }
            PublishOutcome::Dropped => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }

        if let Ok(mut times) = self.cycle_times.lock() {
            times.push(duration.as_millis() as u64);

            // Limit to last 1000 measurements to prevent unbounded growth
            if times.len() > 1000 {
                times.remove(0);
            }
        }
    }

    // Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.connection_attempts,
            &self.connection_failures,
            &self.messages_published,
            &self.publish_failures,
            &self.delivered,
            &self.sanitized_retries,
            &self.error_reports,
            &self.dropped,
            &self.queue_overflows,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        if let Ok(mut times) = self.cycle_times.lock() {
            times.clear();
        }
        self.started_at.store(current_timestamp(), Ordering::Relaxed);
    }

    /// Calculate cycle time statistics (pure function)
    fn calculate_cycle_time_statistics(&self) -> (f64, f64, f64) {
        match self.cycle_times.lock() {
            Ok(times) if !times.is_empty() => {
                let mut sorted_times = times.clone();
                sorted_times.sort_unstable();

                let avg = sorted_times.iter().sum::<u64>() as f64 / sorted_times.len() as f64;
                (
                    avg,
                    percentile(&sorted_times, 50.0),
                    percentile(&sorted_times, 95.0),
                )
            }
            _ => (0.0, 0.0, 0.0),
        }
    }

    /// Get complete metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg_cycle_time_ms, cycle_time_p50_ms, cycle_time_p95_ms) =
            self.calculate_cycle_time_statistics();

        MetricsSnapshot {
            mqtt: MqttMetrics {
                connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
                connection_failures: self.connection_failures.load(Ordering::Relaxed),
                messages_published: self.messages_published.load(Ordering::Relaxed),
                publish_failures: self.publish_failures.load(Ordering::Relaxed),
            },
            emission: EmissionMetrics {
                delivered: self.delivered.load(Ordering::Relaxed),
                sanitized_retries: self.sanitized_retries.load(Ordering::Relaxed),
                error_reports: self.error_reports.load(Ordering::Relaxed),
                dropped: self.dropped.load(Ordering::Relaxed),
                queue_overflows: self.queue_overflows.load(Ordering::Relaxed),
                avg_cycle_time_ms,
                cycle_time_p50_ms,
                cycle_time_p95_ms,
            },
            uptime_seconds: now.saturating_sub(self.started_at.load(Ordering::Relaxed)),
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

// Public metrics structures
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub mqtt: MqttMetrics,
    pub emission: EmissionMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct MqttMetrics {
    pub connection_attempts: u64,
    pub connection_failures: u64,
    pub messages_published: u64,
    pub publish_failures: u64,
}

#[derive(Debug, Serialize)]
pub struct EmissionMetrics {
    pub delivered: u64,
    pub sanitized_retries: u64,
    pub error_reports: u64,
    pub dropped: u64,
    pub queue_overflows: u64,
    pub avg_cycle_time_ms: f64,
    pub cycle_time_p50_ms: f64,
    pub cycle_time_p95_ms: f64,
}

// Helper functions
fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let len = sorted_data.len();
    let index = (percentile / 100.0) * (len - 1) as f64;

    if index.fract() == 0.0 {
        sorted_data[index as usize] as f64
    } else {
        let lower_index = index.floor() as usize;
        let upper_index = index.ceil() as usize;
        let lower_value = sorted_data[lower_index] as f64;
        let upper_value = sorted_data[upper_index] as f64;

        lower_value + (upper_value - lower_value) * index.fract()
    }
}
