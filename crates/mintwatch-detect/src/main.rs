//! mintwatch detection daemon.
//!
//! Watches Solana for newly created SPL token mints through two paths at once:
//! an HTTP webhook fed by an indexer (Helius style `TOKEN_MINT` notifications)
//! and a fallback poll of the token program's recent signatures over JSON-RPC.
//! Each mint is admitted at most once and handed to the configured action sink.
//!
//! # Usage
//!
//! ```bash
//! # Dry run against mainnet, webhook on :3000, metrics on :9090
//! mintwatch
//!
//! # Custom RPC, authenticated webhook, real executor
//! SOLANA_RPC_URL=https://my-node.example/rpc \
//! mintwatch \
//!     --webhook-token s3cret \
//!     --executor-url http://127.0.0.1:8080/execute \
//!     --auto-action
//! ```
//!
//! # Graceful Shutdown
//!
//! The daemon handles SIGINT (Ctrl+C) and SIGTERM:
//! 1. Stops the webhook listener and the poll loop
//! 2. Waits (bounded) for admissions already in flight
//! 3. Prints a summary and exits

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use mintwatch_core::TOKEN_PROGRAM_ID;
use mintwatch_core::metrics::{init_metrics, start_metrics_server};
use mintwatch_detect::{
    ActionSink, Coordinator, DetectionLog, DryRunSink, GateConfig, HttpActionSink, MintPolicyGate,
    PipelineConfig, RpcConfig, RpcLedger, SinkConfig, TracingObserver, WebhookConfig,
    WebhookServer,
};
use tracing_subscriber::EnvFilter;

/// New token mint detection daemon.
#[derive(Parser, Debug)]
#[command(name = "mintwatch")]
#[command(about = "Detect new SPL token mints via webhook and RPC polling")]
#[command(version)]
struct Args {
    /// Solana JSON-RPC endpoint
    #[arg(long, env = "SOLANA_RPC_URL", default_value = "https://api.mainnet-beta.solana.com")]
    rpc_url: String,

    /// RPC request timeout in seconds
    #[arg(long, env = "MINTWATCH_RPC_TIMEOUT_SECS", default_value = "10")]
    rpc_timeout_secs: u64,

    /// Address to scan for mint creation
    #[arg(long, env = "MINTWATCH_AUTHORITY", default_value = TOKEN_PROGRAM_ID)]
    authority: String,

    /// Webhook listen address
    #[arg(long, env = "MINTWATCH_WEBHOOK_ADDR", default_value = "0.0.0.0:3000")]
    webhook_addr: String,

    /// Shared secret expected in the webhook Authorization header
    #[arg(long, env = "MINTWATCH_WEBHOOK_TOKEN")]
    webhook_token: Option<String>,

    /// Run without the webhook listener (polling only)
    #[arg(long, env = "MINTWATCH_NO_WEBHOOK")]
    no_webhook: bool,

    /// Delay between poll cycles in milliseconds
    #[arg(long, env = "MINTWATCH_POLL_INTERVAL_MS", default_value = "1000")]
    poll_interval_ms: u64,

    /// Delay after a failed poll cycle in milliseconds
    #[arg(long, env = "MINTWATCH_ERROR_BACKOFF_MS", default_value = "5000")]
    error_backoff_ms: u64,

    /// Signatures fetched per poll cycle
    #[arg(long, env = "MINTWATCH_ACTIVITY_WINDOW", default_value = "10")]
    activity_window: usize,

    /// Signature cache size that triggers compaction
    #[arg(long, env = "MINTWATCH_CACHE_CAPACITY", default_value = "1000")]
    cache_capacity: usize,

    /// Signatures kept after compaction
    #[arg(long, env = "MINTWATCH_CACHE_RETAIN", default_value = "500")]
    cache_retain: usize,

    /// Execute the action for admitted mints
    #[arg(long, env = "MINTWATCH_AUTO_ACTION")]
    auto_action: bool,

    /// External executor URL (dry run when unset)
    #[arg(long, env = "MINTWATCH_EXECUTOR_URL")]
    executor_url: Option<String>,

    /// Amount per trade, in SOL
    #[arg(long, env = "MINTWATCH_TRADE_AMOUNT", default_value = "0.1")]
    trade_amount: f64,

    /// Maximum slippage, in percent
    #[arg(long, env = "MINTWATCH_MAX_SLIPPAGE", default_value = "5.0")]
    max_slippage: f64,

    /// Admit mints that still have a freeze authority
    #[arg(long, env = "MINTWATCH_ALLOW_FREEZE_AUTHORITY")]
    allow_freeze_authority: bool,

    /// Admit mints whose account could not be fetched
    #[arg(long, env = "MINTWATCH_ALLOW_MISSING_METADATA")]
    allow_missing_metadata: bool,

    /// Highest decimals value admitted
    #[arg(long, env = "MINTWATCH_MAX_DECIMALS", default_value = "9")]
    max_decimals: u8,

    /// Detections, log lines and action attempts kept in memory
    #[arg(long, env = "MINTWATCH_HISTORY_SIZE", default_value = "100")]
    history_size: usize,

    /// Seconds to wait for the webhook and in-flight admissions on shutdown
    #[arg(long, env = "MINTWATCH_SHUTDOWN_GRACE_SECS", default_value = "5")]
    shutdown_grace_secs: u64,

    /// Metrics HTTP server port (0 to disable)
    #[arg(long, env = "MINTWATCH_METRICS_PORT", default_value = "9090")]
    metrics_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before parsing so it can feed clap's env fallbacks
    if let Ok(path) = dotenvy::dotenv() {
        eprintln!("Loaded environment from {}", path.display());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,mintwatch=debug,mintwatch_detect=debug")),
        )
        .init();

    let args = Args::parse();

    tracing::info!("mintwatch detection daemon starting...");

    if args.metrics_port > 0 {
        let handle = init_metrics().context("Failed to install metrics recorder")?;
        start_metrics_server(args.metrics_port, handle)
            .await
            .with_context(|| format!("Failed to bind metrics port {}", args.metrics_port))?;
    }

    let grace = Duration::from_secs(args.shutdown_grace_secs);
    let config = PipelineConfig {
        authority: args.authority.clone(),
        poll_interval: Duration::from_millis(args.poll_interval_ms),
        error_backoff: Duration::from_millis(args.error_backoff_ms),
        activity_window: args.activity_window,
        cache_capacity: args.cache_capacity,
        cache_retain: args.cache_retain,
        auto_action: args.auto_action,
        shutdown_grace: grace,
    };
    config.validate().context("Invalid pipeline configuration")?;

    let ledger = Arc::new(
        RpcLedger::new(RpcConfig {
            url: args.rpc_url.clone(),
            timeout: Duration::from_secs(args.rpc_timeout_secs),
            ..Default::default()
        })
        .context("Failed to build RPC client")?,
    );

    let gate = MintPolicyGate::new(GateConfig {
        require_metadata: !args.allow_missing_metadata,
        reject_freeze_authority: !args.allow_freeze_authority,
        max_decimals: args.max_decimals,
    });

    let sink_config = SinkConfig {
        trade_amount: args.trade_amount,
        max_slippage_pct: args.max_slippage,
        history_size: args.history_size,
    };
    let sink: Arc<dyn ActionSink> = match &args.executor_url {
        Some(url) => Arc::new(
            HttpActionSink::new(url.clone(), sink_config, Duration::from_secs(30))
                .context("Failed to build executor client")?,
        ),
        None => Arc::new(DryRunSink::new(sink_config)),
    };

    let history = Arc::new(DetectionLog::new(args.history_size));

    let mut builder = Coordinator::builder(ledger)
        .config(config)
        .gate(Arc::new(gate))
        .action_sink(sink)
        .observer(Arc::new(TracingObserver))
        .observer(history.clone());

    if !args.no_webhook {
        builder = builder.transport(Arc::new(WebhookServer::new(WebhookConfig {
            bind_addr: args.webhook_addr.clone(),
            auth_token: args.webhook_token.clone(),
            shutdown_grace: grace,
        })));
    }

    tracing::info!("Configuration:");
    tracing::info!("  RPC: {}", args.rpc_url);
    tracing::info!("  Authority: {}", args.authority);
    tracing::info!(
        "  Webhook: {}",
        if args.no_webhook { "disabled" } else { args.webhook_addr.as_str() }
    );
    tracing::info!(
        "  Poll: every {}ms, window {}, backoff {}ms",
        args.poll_interval_ms,
        args.activity_window,
        args.error_backoff_ms
    );
    tracing::info!(
        "  Action: {} ({})",
        if args.auto_action { "enabled" } else { "disabled" },
        args.executor_url.as_deref().unwrap_or("dry run")
    );

    let coordinator = builder.build();
    coordinator
        .start()
        .await
        .context("Failed to start detection pipeline")?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, stopping gracefully...");

    coordinator.stop().await;
    if tokio::time::timeout(grace, coordinator.wait_idle())
        .await
        .is_err()
    {
        tracing::warn!("Admissions still in flight after {:?}, exiting anyway", grace);
    }

    let admissions = coordinator.stats();
    let cache = coordinator.cache_stats();
    let push = coordinator.push_stats();
    let poll = coordinator.poll_stats();

    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("SHUTDOWN COMPLETE");
    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("Push notifications:   {}", push.total_events);
    tracing::info!("Push malformed:       {}", push.malformed_events);
    tracing::info!(
        "Poll cycles:          {} ({} failed)",
        poll.source_metadata.poll_cycles.unwrap_or(0),
        poll.source_metadata.failed_cycles.unwrap_or(0)
    );
    tracing::info!("Events submitted:     {}", admissions.submitted);
    tracing::info!("Duplicates:           {}", admissions.duplicates);
    tracing::info!("Admitted:             {}", admissions.admitted);
    tracing::info!("Rejected:             {}", admissions.rejected);
    tracing::info!(
        "Actions:              {} ok, {} failed",
        admissions.actions_succeeded,
        admissions.actions_failed
    );
    tracing::info!(
        "Signature cache:      {} entries, {} compactions",
        cache.entries,
        cache.compactions
    );
    for event in history.recent().iter().take(10) {
        tracing::info!("  {} {} via {}", event.observed_at, event.resource_id, event.source);
    }
    tracing::info!("Recent activity:");
    for line in history.recent_logs().iter().take(10).rev() {
        tracing::info!("  {}", line);
    }

    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
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
