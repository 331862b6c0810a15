//! Prometheus metrics for leases and schedules.
//!
//! # Metrics
//!
//! - `azimuth_lease_phase` - info series carrying the phase of each lease
//! - `azimuth_lease_ends_at` - end of each lease in unix seconds, `-1` if open-ended
//! - `azimuth_schedule_ref_found` - whether the schedule's ref has been found (1 or 0)
//! - `azimuth_schedule_delete_triggered` - whether the schedule deleted its ref (1 or 0)
//!
//! Series are updated after every reconcile and removed with the object.
//! `/metrics` serves them in the Prometheus text format, `/healthz` answers
//! liveness probes.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use crds::{Lease, LeasePhase, Schedule};
use kube::ResourceExt;
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::ControllerError;

const LEASE_LABELS: [&str; 3] = ["lease_namespace", "lease_name", "phase"];
const LEASE_END_LABELS: [&str; 2] = ["lease_namespace", "lease_name"];
const SCHEDULE_LABELS: [&str; 4] = ["schedule_namespace", "schedule_name", "ref_kind", "ref_name"];

#[derive(Debug)]
pub struct Metrics {
    registry: Registry,
    lease_phase: GaugeVec,
    lease_ends_at: GaugeVec,
    schedule_ref_found: GaugeVec,
    schedule_delete_triggered: GaugeVec,
    /// Labels last recorded for each schedule, keyed by `namespace/name`
    schedule_series: Mutex<HashMap<String, [String; 4]>>,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let lease_phase = GaugeVec::new(Opts::new("azimuth_lease_phase", "The phase of the lease"), &LEASE_LABELS)?;
        let lease_ends_at = GaugeVec::new(
            Opts::new("azimuth_lease_ends_at", "The end time of the lease"),
            &LEASE_END_LABELS,
        )?;
        let schedule_ref_found = GaugeVec::new(
            Opts::new("azimuth_schedule_ref_found", "Indicates whether the ref has been found"),
            &SCHEDULE_LABELS,
        )?;
        let schedule_delete_triggered = GaugeVec::new(
            Opts::new(
                "azimuth_schedule_delete_triggered",
                "Indicates whether the schedule has triggered a delete",
            ),
            &SCHEDULE_LABELS,
        )?;

        registry.register(Box::new(lease_phase.clone()))?;
        registry.register(Box::new(lease_ends_at.clone()))?;
        registry.register(Box::new(schedule_ref_found.clone()))?;
        registry.register(Box::new(schedule_delete_triggered.clone()))?;

        Ok(Self {
            registry,
            lease_phase,
            lease_ends_at,
            schedule_ref_found,
            schedule_delete_triggered,
            schedule_series: Mutex::new(HashMap::new()),
        })
    }

    pub fn record_lease(&self, lease: &Lease) {
        let namespace = lease.namespace().unwrap_or_default();
        let name = lease.name_any();
        let phase = lease.status.as_ref().map(|s| s.phase).unwrap_or_default();

        self.clear_lease_phase(&namespace, &name);
        self.lease_phase
            .with_label_values(&[namespace.as_str(), name.as_str(), phase.as_str()])
            .set(1.0);

        let ends_at = lease.spec.ends_at.map_or(-1.0, |t| t.timestamp() as f64);
        self.lease_ends_at
            .with_label_values(&[namespace.as_str(), name.as_str()])
            .set(ends_at);
    }

    pub fn forget_lease(&self, lease: &Lease) {
        let namespace = lease.namespace().unwrap_or_default();
        let name = lease.name_any();
        self.clear_lease_phase(&namespace, &name);
        // Missing series are fine
        let _ = self.lease_ends_at.remove_label_values(&[namespace.as_str(), name.as_str()]);
    }

    fn clear_lease_phase(&self, namespace: &str, name: &str) {
        for phase in LeasePhase::ALL {
            let _ = self.lease_phase.remove_label_values(&[namespace, name, phase.as_str()]);
        }
    }

    pub fn record_schedule(&self, schedule: &Schedule) {
        let labels = schedule_labels(schedule);
        let status = schedule.status.clone().unwrap_or_default();

        // A changed ref moves the series to new labels
        if let Some(previous) = self.schedule_series().insert(schedule_key(schedule), labels.clone()) {
            if previous != labels {
                self.remove_schedule_series(&previous);
            }
        }

        let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
        self.schedule_ref_found
            .with_label_values(&labels)
            .set(if status.ref_exists { 1.0 } else { 0.0 });
        self.schedule_delete_triggered
            .with_label_values(&labels)
            .set(if status.ref_delete_triggered { 1.0 } else { 0.0 });
    }

    pub fn forget_schedule(&self, schedule: &Schedule) {
        let labels = self
            .schedule_series()
            .remove(&schedule_key(schedule))
            .unwrap_or_else(|| schedule_labels(schedule));
        self.remove_schedule_series(&labels);
    }

    fn remove_schedule_series(&self, labels: &[String; 4]) {
        let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
        let _ = self.schedule_ref_found.remove_label_values(&labels);
        let _ = self.schedule_delete_triggered.remove_label_values(&labels);
    }

    fn schedule_series(&self) -> std::sync::MutexGuard<'_, HashMap<String, [String; 4]>> {
        match self.schedule_series.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// All series in the Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn schedule_key(schedule: &Schedule) -> String {
    format!("{}/{}", schedule.namespace().unwrap_or_default(), schedule.name_any())
}

fn schedule_labels(schedule: &Schedule) -> [String; 4] {
    [
        schedule.namespace().unwrap_or_default(),
        schedule.name_any(),
        schedule.spec.reference.kind.clone(),
        schedule.spec.reference.name.clone(),
    ]
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())], body),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain".to_string())],
                e.to_string(),
            )
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}

pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(metrics)
}

/// Serves the metrics endpoint until the listener fails
pub async fn serve(address: SocketAddr, metrics: Arc<Metrics>) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .map_err(|e| ControllerError::Watch(format!("failed to bind metrics endpoint {}: {}", address, e)))?;
    info!("Serving metrics on {}", address);
    axum::serve(listener, router(metrics))
        .await
        .map_err(|e| ControllerError::Watch(format!("metrics endpoint failed: {}", e)))
}
