//! content-proxy: HTTP reverse proxy that rewrites request bodies
//!
//! Request bodies pass through an ordered, hot-reloadable rule set before
//! being forwarded to one or more upstream targets.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use proxy::{shutdown_channel, Forwarder, ProxyHandler, ProxyServer};
use rules::{RuleEngine, RuleWatcher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

mod logging;

#[derive(Parser)]
#[command(name = "content-proxy")]
#[command(author, version, about = "HTTP reverse proxy that rewrites request bodies")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Log level, overrides [logging] level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Test configuration and exit
    #[arg(short, long)]
    test: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the proxy
    Run {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Validate configuration and rule files
    Validate {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config_path, validate_only) = match cli.command {
        Some(Commands::Validate { config }) => (config, true),
        Some(Commands::Run { config }) => (config, false),
        None => (cli.config, cli.test),
    };

    let config = Config::from_file(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    logging::init_logging(level, &config.logging.format)?;

    config
        .validate()
        .with_context(|| format!("Invalid configuration in {:?}", config_path))?;

    if validate_only {
        validate_config(&config)
    } else {
        run_server(config)
    }
}

fn validate_config(config: &Config) -> Result<()> {
    let rule_paths = config.rules.paths();
    let rules = rules::load_rules(&rule_paths).context("Failed to load rules")?;
    Forwarder::new(&config.target).context("Invalid target configuration")?;

    println!("Configuration is valid!");
    println!("  Listen: {}", config.address());
    println!("  Strategy: {}", config.target.strategy);
    for url in config.target.target_urls() {
        println!("  Target: {}", url);
    }
    for path in &rule_paths {
        println!("  Rule file: {}", path.display());
    }

    let enabled = rules.iter().filter(|r| r.is_enabled()).count();
    println!("  Rules: {} ({} enabled)", rules.len(), enabled);
    for rule in &rules {
        println!("    - {}", rule.describe());
    }

    Ok(())
}

fn run_server(config: Config) -> Result<()> {
    info!("Starting content-proxy");
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(serve(config))
}

async fn serve(config: Config) -> Result<()> {
    let rule_paths = config.rules.paths();
    let engine = Arc::new(
        RuleEngine::from_paths(&rule_paths)
            .context("Failed to load rules")?
            .with_match_logging(config.debug.should_show_rule_matches()),
    );

    let stats = engine.stats();
    info!(
        files = rule_paths.len(),
        total = stats.total,
        enabled = stats.enabled,
        "Rules loaded"
    );
    for rule in engine.rules() {
        debug!(rule = %rule.describe(), "Rule");
    }

    let forwarder =
        Arc::new(Forwarder::new(&config.target).context("Failed to initialize forwarder")?);

    let probe_timeout = config.target.health_check.timeout();
    if forwarder.is_healthy(probe_timeout).await {
        info!(upstream = %forwarder.primary_target(), "Upstream is healthy");
    } else {
        warn!(upstream = %forwarder.primary_target(), "Upstream is not healthy, starting anyway");
    }

    let watcher = if config.rules.auto_reload {
        let handle = RuleWatcher::new(&rule_paths, Arc::clone(&engine))
            .on_reload(|result| match result {
                Ok(rules) => info!(rules = rules.len(), "Rule set reloaded"),
                Err(e) => warn!(error = %e, "Rule reload rejected"),
            })
            .start()
            .context("Failed to start rule watcher")?;
        Some(handle)
    } else {
        info!("Rule auto-reload disabled");
        None
    };

    let max_body_size = usize::try_from(config.server.max_body_size).unwrap_or(usize::MAX);
    let handler = Arc::new(
        ProxyHandler::new(Arc::clone(&engine), forwarder)
            .with_max_body_size(max_body_size)
            .with_health_path(config.server.health_path.clone(), probe_timeout)
            .with_debug(config.debug.clone()),
    );

    let address = config.address();
    let server = ProxyServer::bind(&address, handler)
        .await
        .with_context(|| format!("Failed to bind {}", address))?
        .with_grace_period(Duration::from_secs(config.server.grace_period))
        .with_header_read_timeout(config.server.read_timeout());

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let mut server_task = tokio::spawn(server.serve(shutdown_rx));

    info!(address = %address, "content-proxy started");

    tokio::select! {
        _ = wait_for_signal() => {
            info!(
                grace_period_secs = config.server.grace_period,
                "Received shutdown signal, initiating graceful shutdown"
            );
        }
        result = &mut server_task => {
            if let Some(watcher) = watcher {
                watcher.stop().await;
            }
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e).context("Proxy server failed"),
                Err(e) => Err(e).context("Proxy server task panicked"),
            };
        }
    }

    if let Some(watcher) = watcher {
        watcher.stop().await;
    }

    let _ = shutdown_tx.send(true);
    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Proxy server failed during shutdown"),
        Err(e) => error!(error = %e, "Proxy server task panicked"),
    }

    engine.stop();
    info!("Shutdown complete");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
