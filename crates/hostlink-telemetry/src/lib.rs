mod console;

pub use console::{
    HostLogLayer, HostLogLevel, HostLogQueue, HostLogRecord, HostLogSink, StderrConsole,
    DEFAULT_CONSOLE_CAPACITY,
};

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "hostlink_server" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Copy events into a [`HostLogQueue`] for the host to flush.
    pub host_console: bool,
    /// Lowest level copied to the host console.
    pub host_console_level: Level,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
            host_console: false,
            host_console_level: Level::INFO,
        }
    }
}

/// Handle returned by [`init_telemetry`]. Keep it alive for the life of the
/// process.
pub struct TelemetryGuard {
    host_console: Option<HostLogQueue>,
}

impl TelemetryGuard {
    /// Queue the host flushes on each tick, when forwarding is enabled.
    pub fn host_console(&self) -> Option<&HostLogQueue> {
        self.host_console.as_ref()
    }
}

/// Build the filter directive string: default level, then module overrides.
fn filter_directives(config: &TelemetryConfig) -> String {
    let mut filter_str = config.log_level.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    filter_str
}

/// Initialize the telemetry subsystem. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(&config)));

    let json_layer = config.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
    });
    let text_layer = (!config.json).then(|| tracing_subscriber::fmt::layer().with_target(true));

    let host_console = config.host_console.then(HostLogQueue::default);
    let console_layer = host_console
        .clone()
        .map(|queue| HostLogLayer::new(queue, config.host_console_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(console_layer)
        .init();

    TelemetryGuard { host_console }
}
