//! Client metrics
//!
//! Instruments are created on the global OpenTelemetry meter, so they are
//! no-ops until an application installs a meter provider (for example with
//! `phxlink_core::init_observability`).
//!
//! # Metrics Collected
//!
//! - **phxlink.client.connection.state**: current [`ConnectionState`] (gauge)
//! - **phxlink.client.requests.total**: requests completed, by status (counter)
//! - **phxlink.client.request.duration**: request latency in seconds (histogram)
//! - **phxlink.client.errors.total**: failures by error kind (counter)
//! - **phxlink.client.heartbeats.sent** / **.missed** (counters)
//! - **phxlink.client.events.received**: server pushes, by event (counter)
//! - **phxlink.client.reconnection.attempts** / **.success** (counters)

use crate::connection_state::ConnectionState;
use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, Meter},
    KeyValue,
};
use phxlink_core::Error;
use std::time::Duration;

/// OpenTelemetry instruments for one client
#[derive(Clone)]
pub struct ClientMetrics {
    pub connection_state: Gauge<i64>,
    pub requests_total: Counter<u64>,
    pub request_duration: Histogram<f64>,
    pub errors_total: Counter<u64>,
    pub heartbeats_sent: Counter<u64>,
    pub heartbeats_missed: Counter<u64>,
    pub events_received: Counter<u64>,
    pub reconnection_attempts: Counter<u64>,
    pub reconnection_success: Counter<u64>,
}

impl ClientMetrics {
    /// Instruments on the global meter named `service_name`
    pub fn new(service_name: impl Into<String>) -> Self {
        let meter = global::meter_with_scope(
            opentelemetry::InstrumentationScope::builder(service_name.into())
                .with_version(env!("CARGO_PKG_VERSION"))
                .build(),
        );
        Self::new_with_meter(&meter)
    }

    pub fn new_with_meter(meter: &Meter) -> Self {
        Self {
            connection_state: meter
                .i64_gauge("phxlink.client.connection.state")
                .with_description("Connection state (0=disconnected, 1=connecting, 2=awaiting join, 3=ready)")
                .build(),
            requests_total: meter
                .u64_counter("phxlink.client.requests.total")
                .with_description("Total number of requests completed")
                .build(),
            request_duration: meter
                .f64_histogram("phxlink.client.request.duration")
                .with_description("Request round trip in seconds")
                .with_unit("s")
                .build(),
            errors_total: meter
                .u64_counter("phxlink.client.errors.total")
                .with_description("Total number of errors, by kind")
                .build(),
            heartbeats_sent: meter
                .u64_counter("phxlink.client.heartbeats.sent")
                .with_description("Heartbeats sent")
                .build(),
            heartbeats_missed: meter
                .u64_counter("phxlink.client.heartbeats.missed")
                .with_description("Heartbeats that got no reply in time")
                .build(),
            events_received: meter
                .u64_counter("phxlink.client.events.received")
                .with_description("Server pushes delivered to subscribers")
                .build(),
            reconnection_attempts: meter
                .u64_counter("phxlink.client.reconnection.attempts")
                .with_description("Total number of reconnection attempts")
                .build(),
            reconnection_success: meter
                .u64_counter("phxlink.client.reconnection.success")
                .with_description("Total number of successful reconnections")
                .build(),
        }
    }

    pub fn update_connection_state(&self, state: ConnectionState) {
        self.connection_state.record(state.as_gauge(), &[]);
    }

    /// Record a finished request and, on failure, its error kind
    pub fn record_request(&self, event: &str, outcome: Result<(), &Error>, duration: Duration) {
        let status = match outcome {
            Ok(()) => "ok",
            Err(e) => e.kind(),
        };
        let attributes = [
            KeyValue::new("event", event.to_string()),
            KeyValue::new("status", status),
        ];
        self.requests_total.add(1, &attributes);
        self.request_duration.record(duration.as_secs_f64(), &attributes);
        if let Err(e) = outcome {
            self.record_error(e);
        }
    }

    pub fn record_error(&self, error: &Error) {
        self.errors_total
            .add(1, &[KeyValue::new("error_type", error.kind())]);
    }

    pub fn record_heartbeat_sent(&self) {
        self.heartbeats_sent.add(1, &[]);
    }

    pub fn record_heartbeat_missed(&self) {
        self.heartbeats_missed.add(1, &[]);
    }

    pub fn record_event(&self, event: &str) {
        self.events_received
            .add(1, &[KeyValue::new("event", event.to_string())]);
    }

    pub fn record_reconnection_attempt(&self) {
        self.reconnection_attempts.add(1, &[]);
    }

    pub fn record_reconnection_success(&self) {
        self.reconnection_success.add(1, &[]);
    }
}
