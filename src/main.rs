use std::env;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use sysinfo::System;

use lyra::messaging::events::PLAYBACK_FINISHED;
use lyra::runtime::{self, fatal, PanicRouter, Unrecoverable};
use lyra::{modules, AppResult, RuntimeConfig};

const LOG_TARGET_STARTUP: &str = "lyra::startup";

/// Raise an unrecoverable panic on a worker thread after start
const FATAL_DRILL_FLAG: &str = "--fatal-drill";

/// Initialize tracing with file rotation
///
/// Logs are written to `<config dir>/logs/` unless `log_dir` is set:
/// - macOS: ~/Library/Application Support/Lyra/logs/
/// - Windows: %APPDATA%/Lyra/logs/
/// - Linux: ~/.config/Lyra/logs/
///
/// Log rotation:
/// - Daily rotation (new file each day)
/// - Files named: lyra.log.YYYY-MM-DD
///
/// Log output:
/// - Debug builds: Console + File
/// - Release builds: File only
fn initialize_tracing(config: &RuntimeConfig) {
    use tracing_appender::rolling;
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let log_dir = config.resolved_log_dir();

    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Warning: Failed to create log directory: {}", e);
    }

    // Not wrapped in non_blocking: the fatal path exits without flushing guards
    let file_appender = rolling::daily(&log_dir, "lyra.log");

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true)
        .with_line_number(true);

    #[cfg(debug_assertions)]
    {
        let console_layer = fmt::layer()
            .with_writer(std::io::stdout)
            .with_ansi(true)
            .with_target(true);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(console_layer)
            .init();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();
    }

    tracing::info!(target: LOG_TARGET_STARTUP, "Log directory: {}", log_dir.display());
}

fn log_runtime_environment() {
    let mut system = System::new_all();
    system.refresh_all();

    let version = env!("CARGO_PKG_VERSION");
    let os_name = System::long_os_version()
        .or_else(System::name)
        .unwrap_or_else(|| "Unknown OS".to_string());
    let kernel = System::kernel_version().unwrap_or_else(|| "Unknown Kernel".to_string());
    let architecture = std::env::consts::ARCH;

    tracing::info!(target: LOG_TARGET_STARTUP, "Starting Lyra v{} on ({})", version, architecture);
    tracing::info!(target: LOG_TARGET_STARTUP, "Operating System: {} (kernel {})", os_name, kernel);
    tracing::debug!(
        target: LOG_TARGET_STARTUP,
        "CPUs: {}, memory: {} MiB",
        system.cpus().len(),
        system.total_memory() / (1024 * 1024)
    );
}

fn spawn_fatal_drill() -> AppResult<()> {
    thread::Builder::new()
        .name("lyra-fatal-drill".to_string())
        .spawn(|| {
            thread::sleep(Duration::from_millis(100));
            tracing::warn!(target: LOG_TARGET_STARTUP, "Fatal drill: raising unrecoverable panic");
            std::panic::panic_any(Unrecoverable::new("fatal drill"));
        })
        .context("Failed to spawn fatal drill")?;
    Ok(())
}

fn run(config: &RuntimeConfig) -> AppResult<()> {
    fatal::configure(config.shutdown_timeout());

    let supervisor = runtime::initialize(&modules::catalog(), &config.namespace)
        .context("Failed to initialize supervisor")?;
    PanicRouter::for_process().install();

    let (finished_tx, finished_rx) = crossbeam_channel::bounded::<()>(1);
    supervisor
        .bus()
        .register("main", "on_playback_finished", &PLAYBACK_FINISHED, move |_| {
            let _ = finished_tx.try_send(());
            Ok(())
        })?;

    if let Err(err) = supervisor.start() {
        runtime::teardown();
        return Err(err).context("Failed to start modules");
    }

    if env::args().any(|arg| arg == FATAL_DRILL_FLAG) {
        spawn_fatal_drill()?;
    }

    if supervisor.module_names().iter().any(|name| name == "playback") {
        tracing::info!(target: LOG_TARGET_STARTUP, "Waiting for playback to finish");
        if finished_rx.recv().is_err() {
            tracing::warn!(target: LOG_TARGET_STARTUP, "Playback listener dropped");
        }
    } else {
        tracing::info!(
            target: LOG_TARGET_STARTUP,
            "No playback module in namespace {}, shutting down",
            config.namespace
        );
    }

    runtime::teardown();
    tracing::info!(target: LOG_TARGET_STARTUP, "Shutdown complete");
    Ok(())
}

fn main() -> AppResult<()> {
    let loaded = RuntimeConfig::load();

    // Logging comes up even when the config is broken so the failure is recorded
    let defaults = loaded.as_ref().cloned().unwrap_or_default();
    initialize_tracing(&defaults);
    log_runtime_environment();

    let config = loaded.map_err(|err| {
        tracing::error!(target: LOG_TARGET_STARTUP, "Failed to load config: {:#}", err);
        err
    })?;

    if let Err(err) = run(&config) {
        tracing::error!(target: LOG_TARGET_STARTUP, "Bootstrap failed: {:#}", err);
        return Err(err);
    }
    Ok(())
}
