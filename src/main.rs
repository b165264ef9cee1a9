use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use hostlink_host::{host_queue, QueueCapacity};
use hostlink_server::HostlinkServer;
use hostlink_settings::{load_settings, load_settings_from_path, HostlinkSettings};
use hostlink_telemetry::{init_telemetry, StderrConsole, TelemetryConfig};
use hostlink_tools::{default_registry, HostState};
use tracing::{info, warn, Level};

/// Time allowed for sessions and the listener to stop after Ctrl-C.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "hostlink", version, about = "Bridge streaming sessions to a single-threaded host")]
struct Cli {
    /// Settings file (default: ~/.hostlink/settings.json).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen port; overrides settings and environment.
    #[arg(long)]
    port: Option<u16>,

    /// Bind address; overrides settings and environment.
    #[arg(long)]
    host: Option<String>,

    /// Milliseconds between host ticks.
    #[arg(long)]
    tick_ms: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;

    let (log_level, bad_level) = match settings.logging.level.parse::<Level>() {
        Ok(level) => (level, None),
        Err(_) => (Level::INFO, Some(settings.logging.level.clone())),
    };
    let module_levels = settings
        .logging
        .modules
        .iter()
        .filter_map(|(module, level)| Some((module.clone(), level.parse::<Level>().ok()?)))
        .collect();
    let telemetry = init_telemetry(TelemetryConfig {
        log_level,
        module_levels,
        json: settings.logging.json,
        host_console: settings.logging.host_console,
        host_console_level: Level::WARN,
    });
    if let Some(level) = bad_level {
        warn!(level = %level, "unknown log level, using info");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("hostlink-worker")
        .build()
        .context("failed to build tokio runtime")?;

    // This thread becomes the host: it alone touches `HostState`.
    let (dispatcher, pump) = host_queue::<HostState>(QueueCapacity::from_limit(
        settings.host.queue_capacity,
    ));
    let mut pump = pump.with_runtime(runtime.handle().clone());
    let stats = dispatcher.stats();
    let registry = default_registry(dispatcher).context("failed to build capability registry")?;

    let server = runtime
        .block_on(
            HostlinkServer::new(settings.server.clone(), registry)
                .with_host_stats(stats)
                .start(),
        )
        .with_context(|| {
            format!(
                "failed to bind {}:{}",
                settings.server.host, settings.server.port
            )
        })?;
    info!(
        port = server.port(),
        sse = %format!("{}/sse", settings.server.base_path.trim_end_matches('/')),
        "hostlink ready"
    );

    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    let _ = runtime.spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("ctrl-c received, shutting down"),
            Err(e) => warn!(error = %e, "failed to listen for ctrl-c, shutting down"),
        }
        flag.store(true, Ordering::SeqCst);
    });

    let tick = Duration::from_millis(settings.host.tick_interval_ms);
    let mut state = HostState::default();
    let mut console = StderrConsole;
    while !stop.load(Ordering::SeqCst) {
        let _ = pump.drain(&mut state);
        if let Some(queue) = telemetry.host_console() {
            let _ = queue.flush(&mut console);
        }
        std::thread::sleep(tick);
    }

    // Keep draining while sessions wind down so no caller waits on a host
    // that stopped ticking.
    let shutdown = runtime.spawn(server.shutdown(SHUTDOWN_TIMEOUT));
    while !shutdown.is_finished() {
        let _ = pump.drain(&mut state);
        if let Some(queue) = telemetry.host_console() {
            let _ = queue.flush(&mut console);
        }
        std::thread::sleep(tick);
    }
    let _ = runtime.block_on(shutdown);

    info!(ticks = pump.ticks(), "host stopped");
    if let Some(queue) = telemetry.host_console() {
        let _ = queue.flush(&mut console);
    }
    drop(pump);
    runtime.shutdown_timeout(Duration::from_secs(1));
    Ok(())
}

/// Settings file, then environment, then command-line flags.
fn load(cli: &Cli) -> anyhow::Result<HostlinkSettings> {
    let mut settings = match &cli.config {
        Some(path) => load_settings_from_path(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => load_settings().context("failed to load settings")?,
    };
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    if let Some(host) = &cli.host {
        settings.server.host.clone_from(host);
    }
    if let Some(tick_ms) = cli.tick_ms {
        settings.host.tick_interval_ms = tick_ms;
    }
    settings.validate().context("invalid settings")?;
    Ok(settings)
}
