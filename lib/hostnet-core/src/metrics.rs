//! Prometheus metrics for the reconcilers

use std::sync::Arc;
use std::time::Duration;

use prometheus::{Counter, CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};

use crate::Result;

/// Reconcile counters shared by every controller in the process
#[derive(Clone)]
pub struct ReconcileMetrics {
    /// Reconciliations run, by controller
    pub reconciliations_total: CounterVec,
    /// Reconciliations that returned an error, by controller
    pub reconcile_failures_total: CounterVec,
    /// Reconcile latency in seconds, by controller
    pub reconcile_duration_seconds: HistogramVec,
    /// Gratuitous ARP announcements sent after migrations
    pub gratuitous_arps_total: Counter,
    pub registry: Arc<Registry>,
}

impl ReconcileMetrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let reconciliations_total = CounterVec::new(
            Opts::new("hostnet_reconciliations_total", "Total reconciliations"),
            &["controller"],
        )?;

        let reconcile_failures_total = CounterVec::new(
            Opts::new("hostnet_reconcile_failures_total", "Total failed reconciliations"),
            &["controller"],
        )?;

        let reconcile_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "hostnet_reconcile_duration_seconds",
                "Reconcile latency in seconds",
            ),
            &["controller"],
        )?;

        let gratuitous_arps_total = Counter::new(
            "hostnet_gratuitous_arps_total",
            "Gratuitous ARP announcements sent",
        )?;

        registry.register(Box::new(reconciliations_total.clone()))?;
        registry.register(Box::new(reconcile_failures_total.clone()))?;
        registry.register(Box::new(reconcile_duration_seconds.clone()))?;
        registry.register(Box::new(gratuitous_arps_total.clone()))?;

        Ok(Self {
            reconciliations_total,
            reconcile_failures_total,
            reconcile_duration_seconds,
            gratuitous_arps_total,
            registry,
        })
    }

    /// Record one reconcile pass
    pub fn observe(&self, controller: &str, elapsed: Duration, failed: bool) {
        self.reconciliations_total
            .with_label_values(&[controller])
            .inc();
        self.reconcile_duration_seconds
            .with_label_values(&[controller])
            .observe(elapsed.as_secs_f64());
        if failed {
            self.reconcile_failures_total
                .with_label_values(&[controller])
                .inc();
        }
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
