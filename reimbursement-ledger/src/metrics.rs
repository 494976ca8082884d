//! Metrics collection for observability
//!
//! Prometheus collectors registered in a per-engine [`Registry`], so several
//! engines can live in one process (tests, multi-tenant hosts).
//!
//! # Metrics
//!
//! - `reimbursement_executions_succeeded_total` - Executed records
//! - `reimbursement_executions_failed_total` - Failed (rolled back) records
//! - `reimbursement_rejections_total{category}` - Calls rejected before any effect
//! - `reimbursement_volume_micros_total` - Gross executed volume (micro-units)
//! - `reimbursement_fees_micros_total` - Fees collected (micro-units)
//! - `reimbursement_transfer_duration_seconds` - Provider transfer latency
//! - `reimbursement_paused` - 1 while execution is paused
//! - `reimbursement_persist_failures_total` - Snapshot writes that failed

use crate::error::ErrorCategory;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use spend_policy::Amount;
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Debug)]
pub struct Metrics {
    /// Executed records
    pub executions_succeeded: IntCounter,

    /// Failed records
    pub executions_failed: IntCounter,

    /// Rejections by error category
    pub rejections: IntCounterVec,

    /// Gross executed volume
    pub volume_micros: IntCounter,

    /// Fees collected
    pub fees_micros: IntCounter,

    /// Transfer latency histogram
    pub transfer_duration: Histogram,

    /// Pause state
    pub paused: IntGauge,

    /// Failed snapshot writes
    pub persist_failures: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let executions_succeeded = IntCounter::new(
            "reimbursement_executions_succeeded_total",
            "Reimbursements executed",
        )?;
        registry.register(Box::new(executions_succeeded.clone()))?;

        let executions_failed = IntCounter::new(
            "reimbursement_executions_failed_total",
            "Reimbursements whose transfer failed and was rolled back",
        )?;
        registry.register(Box::new(executions_failed.clone()))?;

        let rejections = IntCounterVec::new(
            Opts::new(
                "reimbursement_rejections_total",
                "Calls rejected before any state change",
            ),
            &["category"],
        )?;
        registry.register(Box::new(rejections.clone()))?;

        let volume_micros = IntCounter::new(
            "reimbursement_volume_micros_total",
            "Gross executed volume in micro-units",
        )?;
        registry.register(Box::new(volume_micros.clone()))?;

        let fees_micros = IntCounter::new(
            "reimbursement_fees_micros_total",
            "Fees collected in micro-units",
        )?;
        registry.register(Box::new(fees_micros.clone()))?;

        let transfer_duration = Histogram::with_opts(
            HistogramOpts::new(
                "reimbursement_transfer_duration_seconds",
                "Transfer provider latency",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 5.0]),
        )?;
        registry.register(Box::new(transfer_duration.clone()))?;

        let paused = IntGauge::new("reimbursement_paused", "1 while execution is paused")?;
        registry.register(Box::new(paused.clone()))?;

        let persist_failures = IntCounter::new(
            "reimbursement_persist_failures_total",
            "Ledger snapshot writes that failed",
        )?;
        registry.register(Box::new(persist_failures.clone()))?;

        Ok(Self {
            executions_succeeded,
            executions_failed,
            rejections,
            volume_micros,
            fees_micros,
            transfer_duration,
            paused,
            persist_failures,
            registry,
        })
    }

    /// Record an executed reimbursement
    pub fn record_executed(&self, amount: Amount, fee: Amount) {
        self.executions_succeeded.inc();
        self.volume_micros.inc_by(saturating_u64(amount));
        self.fees_micros.inc_by(saturating_u64(fee));
    }

    /// Record a failed transfer
    pub fn record_failed(&self) {
        self.executions_failed.inc();
    }

    /// Record a rejected call
    pub fn record_rejection(&self, category: ErrorCategory) {
        self.rejections.with_label_values(&[category.as_str()]).inc();
    }

    /// Record transfer latency
    pub fn record_transfer_duration(&self, duration_seconds: f64) {
        self.transfer_duration.observe(duration_seconds);
    }

    /// Record a failed snapshot write
    pub fn record_persist_failure(&self) {
        self.persist_failures.inc();
    }

    /// Update pause gauge
    pub fn set_paused(&self, paused: bool) {
        self.paused.set(i64::from(paused));
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render the registry in Prometheus text format
    pub fn render(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = vec![];
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

fn saturating_u64(amount: Amount) -> u64 {
    u64::try_from(amount.micros()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.executions_succeeded.get(), 0);
        assert_eq!(metrics.executions_failed.get(), 0);
    }

    #[test]
    fn test_independent_registries() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.record_failed();
        assert_eq!(a.executions_failed.get(), 1);
        assert_eq!(b.executions_failed.get(), 0);
    }

    #[test]
    fn test_record_executed() {
        let metrics = Metrics::new().unwrap();
        metrics.record_executed(Amount::from_units(100), Amount::from_units(2));
        assert_eq!(metrics.executions_succeeded.get(), 1);
        assert_eq!(metrics.volume_micros.get(), 100_000_000);
        assert_eq!(metrics.fees_micros.get(), 2_000_000);
    }

    #[test]
    fn test_rejections_by_category() {
        let metrics = Metrics::new().unwrap();
        metrics.record_rejection(ErrorCategory::Capacity);
        metrics.record_rejection(ErrorCategory::Capacity);
        metrics.record_rejection(ErrorCategory::Authorization);

        assert_eq!(metrics.rejections.with_label_values(&["capacity"]).get(), 2);
        assert_eq!(metrics.rejections.with_label_values(&["authorization"]).get(), 1);
    }

    #[test]
    fn test_render() {
        let metrics = Metrics::new().unwrap();
        metrics.set_paused(true);
        metrics.record_transfer_duration(0.02);
        let output = metrics.render().unwrap();
        assert!(output.contains("reimbursement_paused 1"));
        assert!(output.contains("reimbursement_transfer_duration_seconds"));
    }
}
