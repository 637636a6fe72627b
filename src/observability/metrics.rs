//! Metrics collection and reporting

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Pipeline metrics snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineMetrics {
    /// Total requests that entered the pipeline
    pub total_requests: u64,

    /// Requests answered with a rejection, by kind
    pub cors_rejections: u64,
    pub rate_limit_rejections: u64,
    pub payload_rejections: u64,
    pub media_type_rejections: u64,
    pub other_rejections: u64,

    /// Operator-prefixed keys renamed
    pub injection_neutralizations: u64,

    /// Repeated query parameters collapsed
    pub pollution_neutralizations: u64,

    pub audit_events_saved: u64,
    pub audit_events_failed: u64,

    /// Average request duration (ms)
    pub avg_request_duration_ms: f64,

    pub uptime_secs: u64,
}

/// Latency histogram buckets (in milliseconds)
const LATENCY_BUCKETS: &[f64] = &[1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0];

/// Histogram for tracking latency distribution
#[derive(Debug, Clone)]
pub struct Histogram {
    buckets: Vec<(f64, Arc<AtomicU64>)>,
    sum: Arc<AtomicU64>,
    count: Arc<AtomicU64>,
}

impl Histogram {
    fn new(buckets: &[f64]) -> Self {
        Self {
            buckets: buckets
                .iter()
                .map(|&b| (b, Arc::new(AtomicU64::new(0))))
                .collect(),
            sum: Arc::new(AtomicU64::new(0)),
            count: Arc::new(AtomicU64::new(0)),
        }
    }

    fn observe(&self, value_ms: f64) {
        self.sum.fetch_add(value_ms as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        // Cumulative: every bucket at or above the value counts it
        for (bucket, counter) in &self.buckets {
            if value_ms <= *bucket {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn export_prometheus(&self, name: &str, help: &str) -> String {
        let mut output = String::new();
        output.push_str(&format!("# HELP {} {}\n", name, help));
        output.push_str(&format!("# TYPE {} histogram\n", name));

        for (bucket, counter) in &self.buckets {
            output.push_str(&format!(
                "{}_bucket{{le=\"{}\"}} {}\n",
                name,
                bucket,
                counter.load(Ordering::Relaxed)
            ));
        }

        let total = self.count.load(Ordering::Relaxed);
        output.push_str(&format!("{}_bucket{{le=\"+Inf\"}} {}\n", name, total));
        output.push_str(&format!(
            "{}_sum {:.3}\n",
            name,
            self.sum.load(Ordering::Relaxed) as f64
        ));
        output.push_str(&format!("{}_count {}\n", name, total));
        output
    }
}

/// Metrics collector shared by the security chain and the audit layer
#[derive(Debug)]
pub struct MetricsCollector {
    start_time: Instant,
    total_requests: AtomicU64,
    cors_rejections: AtomicU64,
    rate_limit_rejections: AtomicU64,
    payload_rejections: AtomicU64,
    media_type_rejections: AtomicU64,
    other_rejections: AtomicU64,
    injection_neutralizations: AtomicU64,
    pollution_neutralizations: AtomicU64,
    audit_events_saved: AtomicU64,
    audit_events_failed: AtomicU64,
    total_duration_ms: AtomicU64,
    request_latency: Histogram,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            total_requests: AtomicU64::new(0),
            cors_rejections: AtomicU64::new(0),
            rate_limit_rejections: AtomicU64::new(0),
            payload_rejections: AtomicU64::new(0),
            media_type_rejections: AtomicU64::new(0),
            other_rejections: AtomicU64::new(0),
            injection_neutralizations: AtomicU64::new(0),
            pollution_neutralizations: AtomicU64::new(0),
            audit_events_saved: AtomicU64::new(0),
            audit_events_failed: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            request_latency: Histogram::new(LATENCY_BUCKETS),
        }
    }

    /// Record a completed request and its duration
    pub fn record_request(&self, duration: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let ms = duration.as_millis() as u64;
        self.total_duration_ms.fetch_add(ms, Ordering::Relaxed);
        self.request_latency.observe(ms as f64);
    }

    /// Record a rejection by its kind label (`cors`, `rate_limit`, ...)
    pub fn record_rejection(&self, kind: &str) {
        let counter = match kind {
            "cors" => &self.cors_rejections,
            "rate_limit" => &self.rate_limit_rejections,
            "payload_too_large" => &self.payload_rejections,
            "unsupported_media_type" => &self.media_type_rejections,
            _ => &self.other_rejections,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_injection_neutralized(&self, count: usize) {
        self.injection_neutralizations
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_pollution_collapsed(&self, count: usize) {
        self.pollution_neutralizations
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_audit_saved(&self) {
        self.audit_events_saved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_audit_failed(&self) {
        self.audit_events_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics
    pub fn get_metrics(&self) -> PipelineMetrics {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_duration = self.total_duration_ms.load(Ordering::Relaxed);
        let avg_request_duration_ms = if total_requests > 0 {
            total_duration as f64 / total_requests as f64
        } else {
            0.0
        };

        PipelineMetrics {
            total_requests,
            cors_rejections: self.cors_rejections.load(Ordering::Relaxed),
            rate_limit_rejections: self.rate_limit_rejections.load(Ordering::Relaxed),
            payload_rejections: self.payload_rejections.load(Ordering::Relaxed),
            media_type_rejections: self.media_type_rejections.load(Ordering::Relaxed),
            other_rejections: self.other_rejections.load(Ordering::Relaxed),
            injection_neutralizations: self.injection_neutralizations.load(Ordering::Relaxed),
            pollution_neutralizations: self.pollution_neutralizations.load(Ordering::Relaxed),
            audit_events_saved: self.audit_events_saved.load(Ordering::Relaxed),
            audit_events_failed: self.audit_events_failed.load(Ordering::Relaxed),
            avg_request_duration_ms,
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    /// Export metrics in Prometheus format
    pub fn export_prometheus(&self) -> String {
        let m = self.get_metrics();

        let mut output = format!(
            "# HELP security_pipeline_requests_total Total number of requests\n\
             # TYPE security_pipeline_requests_total counter\n\
             security_pipeline_requests_total {}\n\
             \n\
             # HELP security_pipeline_rejections_total Requests rejected by the security chain\n\
             # TYPE security_pipeline_rejections_total counter\n\
             security_pipeline_rejections_total{{kind=\"cors\"}} {}\n\
             security_pipeline_rejections_total{{kind=\"rate_limit\"}} {}\n\
             security_pipeline_rejections_total{{kind=\"payload_too_large\"}} {}\n\
             security_pipeline_rejections_total{{kind=\"unsupported_media_type\"}} {}\n\
             security_pipeline_rejections_total{{kind=\"other\"}} {}\n\
             \n\
             # HELP security_pipeline_neutralizations_total Inputs rewritten without rejecting\n\
             # TYPE security_pipeline_neutralizations_total counter\n\
             security_pipeline_neutralizations_total{{kind=\"injection\"}} {}\n\
             security_pipeline_neutralizations_total{{kind=\"pollution\"}} {}\n\
             \n\
             # HELP security_pipeline_audit_events_total Audit events by write outcome\n\
             # TYPE security_pipeline_audit_events_total counter\n\
             security_pipeline_audit_events_total{{outcome=\"saved\"}} {}\n\
             security_pipeline_audit_events_total{{outcome=\"failed\"}} {}\n\
             \n\
             # HELP security_pipeline_avg_request_duration_ms Average request duration in milliseconds\n\
             # TYPE security_pipeline_avg_request_duration_ms gauge\n\
             security_pipeline_avg_request_duration_ms {:.2}\n\
             \n\
             # HELP security_pipeline_uptime_seconds Uptime in seconds\n\
             # TYPE security_pipeline_uptime_seconds counter\n\
             security_pipeline_uptime_seconds {}\n\
             \n",
            m.total_requests,
            m.cors_rejections,
            m.rate_limit_rejections,
            m.payload_rejections,
            m.media_type_rejections,
            m.other_rejections,
            m.injection_neutralizations,
            m.pollution_neutralizations,
            m.audit_events_saved,
            m.audit_events_failed,
            m.avg_request_duration_ms,
            m.uptime_secs,
        );

        output.push_str(&self.request_latency.export_prometheus(
            "security_pipeline_request_duration_ms",
            "Request duration in milliseconds",
        ));
        output
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
