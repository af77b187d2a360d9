// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # WARDEN daemon
//!
//! The `warden` binary serves the security-tool broker over one of two
//! transports:
//!
//! - **http**: the axum API (`/health`, `/tools`, `/tools/{name}/execute`,
//!   `/metrics`, `/events`)
//! - **stdio**: newline-delimited JSON with `list_tools` / `execute_tool`
//!
//! Configuration resolves defaults → `--config` YAML → `MCP_*` environment
//! variables; SIGHUP re-resolves and swaps the snapshot. Exit codes:
//! 0 normal, 1 startup failure, 2 invalid configuration, 130 interrupted.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use warden_core::application::health::{standard_checks, HealthMonitor, ProcessLivenessCheck};
use warden_core::application::limiter::{SchedulerId, SemaphoreRegistry};
use warden_core::application::registry::ToolRegistry;
use warden_core::application::tool::ExecutionEnv;
use warden_core::domain::config::{ConfigHandle, ServerConfig, Transport};
use warden_core::infrastructure::event_bus::EventBus;
use warden_core::infrastructure::metrics::MetricsHandle;
use warden_core::infrastructure::spawner::Spawner;
use warden_core::presentation::http::{self, AppState};
use warden_core::presentation::stdio;
use warden_core::tools::builtin_policies;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TransportArg {
    Stdio,
    Http,
}

/// WARDEN - safe execution broker for security scanners
#[derive(Parser)]
#[command(name = "warden")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Transport to serve (overrides config)
    #[arg(long, value_enum)]
    transport: Option<TransportArg>,

    /// HTTP bind host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// HTTP bind port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Path to YAML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (equivalent to LOG_LEVEL=debug)
    #[arg(long)]
    debug: bool,
}

const EXIT_OK: i32 = 0;
const EXIT_STARTUP_FAILURE: i32 = 1;
const EXIT_CONFIG_INVALID: i32 = 2;
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() {
    // .env before clap so env-backed settings resolve from it.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    if let Err(err) = init_logging(cli.debug) {
        eprintln!("{} {}", "failed to initialize logging:".red(), err);
        std::process::exit(EXIT_STARTUP_FAILURE);
    }

    let config = match resolve_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{} {:#}", "invalid configuration:".red(), err);
            std::process::exit(EXIT_CONFIG_INVALID);
        }
    };

    let code = match serve(config, cli.config.clone()).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {:#}", "startup failed:".red(), err);
            EXIT_STARTUP_FAILURE
        }
    };
    std::process::exit(code);
}

/// Resolve configuration and fold CLI overrides on top.
fn resolve_config(cli: &Cli) -> Result<ServerConfig> {
    let mut config = ServerConfig::load(cli.config.as_deref())?;
    if let Some(transport) = cli.transport {
        config.server.transport = match transport {
            TransportArg::Stdio => Transport::Stdio,
            TransportArg::Http => Transport::Http,
        };
    }
    if let Some(host) = &cli.host {
        config.server.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    config.validate()?;
    Ok(config)
}

async fn serve(config: ServerConfig, config_path: Option<PathBuf>) -> Result<i32> {
    let transport = config.server.transport;
    let shutdown_grace = config.server.shutdown_grace;
    let config_handle = ConfigHandle::new(config.clone());

    let metrics = MetricsHandle::install(config.metrics.enabled)
        .context("failed to install metrics recorder")?;

    let registry = Arc::new(ToolRegistry::from_policies(
        builtin_policies(&config),
        &config.tools,
    ));
    let enabled: Vec<String> = registry
        .list()
        .into_iter()
        .filter(|t| t.enabled)
        .map(|t| t.name)
        .collect();
    println!(
        "{} {} tools enabled: {}",
        "WARDEN".green().bold(),
        enabled.len(),
        enabled.join(", ")
    );

    let shutdown = CancellationToken::new();
    let events = EventBus::with_default_capacity();
    let spawner = Spawner::new();

    let heartbeat = ProcessLivenessCheck::new_heartbeat();
    ProcessLivenessCheck::spawn_ticker(heartbeat.clone(), shutdown.clone());
    let health = Arc::new(HealthMonitor::new(standard_checks(
        config.health.clone(),
        registry.clone(),
        heartbeat,
    )));
    tokio::spawn(health.clone().run_loop(
        config.health.check_interval,
        events.clone(),
        shutdown.clone(),
    ));

    let state = Arc::new(AppState {
        env: ExecutionEnv {
            config: config_handle.clone(),
            limiter: Arc::new(SemaphoreRegistry::new()),
            spawner: spawner.clone(),
            events: events.clone(),
            scheduler: SchedulerId::new("main"),
            cancel: shutdown.clone(),
        },
        registry,
        health,
        metrics,
    });

    let interrupted = Arc::new(AtomicBool::new(false));
    spawn_signal_handlers(shutdown.clone(), interrupted.clone(), config_handle, config_path);

    match transport {
        Transport::Http => {
            let addr = format!("{}:{}", config.server.host, config.server.port);
            let listener = TcpListener::bind(&addr)
                .await
                .with_context(|| format!("failed to bind {}", addr))?;
            println!("{} listening on http://{}", "WARDEN".green().bold(), addr);
            http::serve(state.clone(), listener, shutdown.clone()).await?;
        }
        Transport::Stdio => {
            stdio::run(state.clone(), shutdown.clone()).await?;
            shutdown.cancel();
        }
    }

    // Drain: pending acquires are already cancelled via the token; live
    // process groups get SIGTERM, a grace period, then SIGKILL.
    info!("shutting down, draining live executions");
    spawner.process_table().terminate_all(shutdown_grace).await;

    if interrupted.load(Ordering::Relaxed) {
        Ok(EXIT_INTERRUPTED)
    } else {
        Ok(EXIT_OK)
    }
}

fn spawn_signal_handlers(
    shutdown: CancellationToken,
    interrupted: Arc<AtomicBool>,
    config_handle: ConfigHandle,
    config_path: Option<PathBuf>,
) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(err) => {
                    warn!(error = %err, "failed to install SIGTERM handler");
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    interrupted.store(true, Ordering::Relaxed);
                    info!("interrupt received, beginning graceful shutdown");
                }
                _ = sigterm.recv() => {
                    info!("SIGTERM received, beginning graceful shutdown");
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            interrupted.store(true, Ordering::Relaxed);
        }
        shutdown.cancel();
    });

    // SIGHUP: re-resolve configuration and swap the snapshot.
    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        let Ok(mut sighup) = signal(SignalKind::hangup()) else {
            return;
        };
        while sighup.recv().await.is_some() {
            match ServerConfig::load(config_path.as_deref()) {
                Ok(config) => {
                    config_handle.replace(config);
                    info!("configuration reloaded on SIGHUP");
                }
                Err(err) => warn!(error = %err, "SIGHUP reload failed, keeping current config"),
            }
        }
    });
    #[cfg(not(unix))]
    let _ = (config_handle, config_path);
}

/// Initialize the tracing subscriber. `--debug` wins over `LOG_LEVEL`.
fn init_logging(debug: bool) -> Result<()> {
    let filter = if debug {
        tracing_subscriber::EnvFilter::try_new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_env("LOG_LEVEL")
            .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))
    }
    .context("failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
