use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::{global, KeyValue};
use std::sync::OnceLock;
use std::time::Instant;

/// OpenTelemetry metrics for client observability.
///
/// Tracks connect attempts and outcomes, commands and errors.
/// Singleton instance accessed via `Metrics::get()`.
pub struct Metrics {
    // Connection metrics
    pub connect_attempts_total: Counter<u64>,
    pub connect_failures_total: Counter<u64>,
    pub connections_total: Counter<u64>,

    // Command metrics
    pub commands_total: Counter<u64>,
    pub command_duration: Histogram<f64>,

    pub errors_total: Counter<u64>,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

impl Metrics {
    pub fn init() -> &'static Self {
        METRICS.get_or_init(|| {
            let meter = global::meter("coral-client");

            Metrics {
                connect_attempts_total: meter
                    .u64_counter("coral_client_connect_attempts_total")
                    .with_description("Total number of connect attempts")
                    .init(),

                connect_failures_total: meter
                    .u64_counter("coral_client_connect_failures_total")
                    .with_description("Connect attempts that did not produce a connection")
                    .init(),

                connections_total: meter
                    .u64_counter("coral_client_connections_total")
                    .with_description("Total number of established connections")
                    .init(),

                commands_total: meter
                    .u64_counter("coral_client_commands_total")
                    .with_description("Total number of commands sent")
                    .init(),

                command_duration: meter
                    .f64_histogram("coral_client_command_duration_seconds")
                    .with_description("Command round trip duration in seconds")
                    .init(),

                errors_total: meter
                    .u64_counter("coral_client_errors_total")
                    .with_description("Total number of errors returned to callers")
                    .init(),
            }
        })
    }

    pub fn get() -> &'static Self {
        Self::init()
    }

    pub fn record_connect_attempt(&self, persistent: bool) {
        self.connect_attempts_total
            .add(1, &[KeyValue::new("persistent", persistent)]);
    }

    /// `outcome` is "failure" or "fault".
    pub fn record_connect_failure(&self, outcome: &'static str) {
        self.connect_failures_total
            .add(1, &[KeyValue::new("outcome", outcome)]);
    }

    pub fn record_connection(&self) {
        self.connections_total.add(1, &[]);
    }

    pub fn record_command(&self, command: &'static str, duration: f64) {
        let labels = &[KeyValue::new("command", command)];
        self.commands_total.add(1, labels);
        self.command_duration.record(duration, labels);
    }

    pub fn record_error(&self, kind: &'static str, command: Option<&'static str>) {
        let mut labels = vec![KeyValue::new("kind", kind)];
        if let Some(cmd) = command {
            labels.push(KeyValue::new("command", cmd));
        }
        self.errors_total.add(1, &labels);
    }
}

// Timer utility for measuring durations
pub struct Timer {
    start: Instant,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}
