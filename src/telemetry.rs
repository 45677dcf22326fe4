use crate::error::TelemetryError;
use crate::metrics::Metrics;
use opentelemetry::global;
use opentelemetry_sdk::metrics::MeterProvider;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub struct TelemetryConfig {
    pub enable_metrics: bool,
    /// Default filter when `RUST_LOG` is not set.
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enable_metrics: true,
            log_level: "warn".to_string(),
        }
    }
}

pub struct TelemetryService {
    config: TelemetryConfig,
}

impl TelemetryService {
    pub fn new(config: TelemetryConfig) -> Self {
        if config.enable_metrics {
            let provider = MeterProvider::builder().build();
            global::set_meter_provider(provider);
        }

        Self { config }
    }

    pub fn metrics_enabled(&self) -> bool {
        self.config.enable_metrics
    }
}

/// Install the stderr log subscriber and the metrics provider.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryService, TelemetryError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| TelemetryError::Subscriber(e.to_string()))?;

    let service = TelemetryService::new(config);
    Metrics::init();

    if service.metrics_enabled() {
        info!("OpenTelemetry metrics initialized");
    } else {
        info!("Metrics collection disabled");
    }
    Ok(service)
}
