//! Prometheus metrics for the registration RPCs.
//!
//! - `svc_collector_registration_requests_total{rpc,outcome}` (counter)
//! - `svc_collector_registration_request_duration_seconds{rpc}` (histogram)
//! - `svc_collector_registrations_active` (gauge)
//! - `svc_collector_panics_total` (counter)

use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use tonic::{Code, Status};

#[derive(Clone)]
pub struct RegistrationMetrics {
    registry: Registry,
    requests: IntCounterVec,
    duration: HistogramVec,
    active: IntGauge,
    panics: IntCounter,
}

impl RegistrationMetrics {
    /// Create the collectors and register them in a fresh registry.
    ///
    /// # Errors
    /// Returns an error if a collector cannot be created or registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new(
                "svc_collector_registration_requests_total",
                "Registration RPCs handled, by outcome",
            ),
            &["rpc", "outcome"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "svc_collector_registration_request_duration_seconds",
                "Registration RPC latency",
            ),
            &["rpc"],
        )?;
        let active = IntGauge::new(
            "svc_collector_registrations_active",
            "Registrations currently held by this process",
        )?;
        let panics = IntCounter::new(
            "svc_collector_panics_total",
            "Requests whose handler panicked",
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(duration.clone()))?;
        registry.register(Box::new(active.clone()))?;
        registry.register(Box::new(panics.clone()))?;

        Ok(Self {
            registry,
            requests,
            duration,
            active,
            panics,
        })
    }

    pub fn observe<T>(&self, rpc: &str, result: &Result<T, Status>, elapsed: Duration) {
        self.requests
            .with_label_values(&[rpc, outcome(result)])
            .inc();
        self.duration
            .with_label_values(&[rpc])
            .observe(elapsed.as_secs_f64());
    }

    pub fn set_active(&self, count: usize) {
        self.active.set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    pub fn record_panic(&self) {
        self.panics.inc();
    }

    /// Render all collectors in the Prometheus text format.
    ///
    /// # Errors
    /// Returns an error if encoding fails.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn outcome<T>(result: &Result<T, Status>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(status) => match status.code() {
            Code::InvalidArgument => "invalid_argument",
            Code::Unavailable => "unavailable",
            Code::Internal => "internal",
            _ => "error",
        },
    }
}
