use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Business counters exposed on `/metrics` and `/metrics/prometheus`.
#[derive(Clone)]
pub struct Metrics {
    pub residents_admitted: Arc<AtomicU64>,
    pub residents_discharged: Arc<AtomicU64>,
    pub inquiries_created: Arc<AtomicU64>,
    pub inquiries_converted: Arc<AtomicU64>,
    pub tours_requested: Arc<AtomicU64>,
    pub matches_computed: Arc<AtomicU64>,
    pub timesheets_approved: Arc<AtomicU64>,
    pub audit_events: Arc<AtomicU64>,
    pub audit_failures: Arc<AtomicU64>,
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            residents_admitted: Arc::new(AtomicU64::new(0)),
            residents_discharged: Arc::new(AtomicU64::new(0)),
            inquiries_created: Arc::new(AtomicU64::new(0)),
            inquiries_converted: Arc::new(AtomicU64::new(0)),
            tours_requested: Arc::new(AtomicU64::new(0)),
            matches_computed: Arc::new(AtomicU64::new(0)),
            timesheets_approved: Arc::new(AtomicU64::new(0)),
            audit_events: Arc::new(AtomicU64::new(0)),
            audit_failures: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            residents_admitted: self.residents_admitted.load(Ordering::Relaxed),
            residents_discharged: self.residents_discharged.load(Ordering::Relaxed),
            inquiries_created: self.inquiries_created.load(Ordering::Relaxed),
            inquiries_converted: self.inquiries_converted.load(Ordering::Relaxed),
            tours_requested: self.tours_requested.load(Ordering::Relaxed),
            matches_computed: self.matches_computed.load(Ordering::Relaxed),
            timesheets_approved: self.timesheets_approved.load(Ordering::Relaxed),
            audit_events: self.audit_events.load(Ordering::Relaxed),
            audit_failures: self.audit_failures.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub residents_admitted: u64,
    pub residents_discharged: u64,
    pub inquiries_created: u64,
    pub inquiries_converted: u64,
    pub tours_requested: u64,
    pub matches_computed: u64,
    pub timesheets_approved: u64,
    pub audit_events: u64,
    pub audit_failures: u64,
    pub uptime_seconds: u64,
}

impl MetricsSnapshot {
    /// Prometheus text exposition format, one counter per field.
    pub fn to_prometheus(&self) -> String {
        let counters: [(&str, &str, u64); 9] = [
            ("residents_admitted", "Residents admitted", self.residents_admitted),
            ("residents_discharged", "Residents discharged, archived or deceased while active", self.residents_discharged),
            ("inquiries_created", "Inquiries created", self.inquiries_created),
            ("inquiries_converted", "Inquiries converted to residents", self.inquiries_converted),
            ("tours_requested", "Tours requested", self.tours_requested),
            ("matches_computed", "Home match requests scored", self.matches_computed),
            ("timesheets_approved", "Timesheets approved", self.timesheets_approved),
            ("audit_events", "Audit entries written", self.audit_events),
            ("audit_failures", "Audit entries that failed to persist", self.audit_failures),
        ];
        let mut body = String::new();
        for (name, help, value) in counters {
            body.push_str(&format!(
                "# HELP carelink_{name} {help}\n# TYPE carelink_{name} counter\ncarelink_{name} {value}\n"
            ));
        }
        body.push_str(&format!(
            "# HELP carelink_uptime_seconds Uptime seconds\n# TYPE carelink_uptime_seconds gauge\ncarelink_uptime_seconds {}\n",
            self.uptime_seconds
        ));
        body
    }
}
