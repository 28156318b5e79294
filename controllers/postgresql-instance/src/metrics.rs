//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `cloudsql_postgres_operator_reconciliations_total` - Total number of reconciliations
//! - `cloudsql_postgres_operator_reconciliation_errors_total` - Failed reconciliations by retry class
//! - `cloudsql_postgres_operator_reconciliation_duration_seconds` - Duration of reconciliations

use controller_runtime::Requeue;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::time::Duration;

/// Metrics registered in their own registry, served on `/metrics`
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    reconciliations: IntCounter,
    errors: IntCounterVec,
    duration: Histogram,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconciliations = IntCounter::new(
            "cloudsql_postgres_operator_reconciliations_total",
            "Total number of reconciliations",
        )?;
        let errors = IntCounterVec::new(
            Opts::new(
                "cloudsql_postgres_operator_reconciliation_errors_total",
                "Total number of failed reconciliations, by retry class",
            ),
            &["requeue"],
        )?;
        let duration = Histogram::with_opts(
            HistogramOpts::new(
                "cloudsql_postgres_operator_reconciliation_duration_seconds",
                "Duration of reconciliation in seconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        )?;

        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(duration.clone()))?;

        Ok(Self {
            registry,
            reconciliations,
            errors,
            duration,
        })
    }

    /// Records one reconciliation; `failure` is the retry class of its error, if any.
    pub fn observe_reconciliation(&self, elapsed: Duration, failure: Option<Requeue>) {
        self.reconciliations.inc();
        self.duration.observe(elapsed.as_secs_f64());
        if let Some(requeue) = failure {
            let class = match requeue {
                Requeue::Backoff => "backoff",
                Requeue::Immediate => "immediate",
                Requeue::Never => "never",
            };
            self.errors.with_label_values(&[class]).inc();
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
