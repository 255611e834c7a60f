use std::sync::Arc;

use advisor::{Advisor, HeuristicAdvisor, LlmAdvisor, LlmConfig, RuleBasedAdvisor};
use anyhow::{Context, Result};
use portfolio_manager::{PortfolioLedger, SqliteRepository};
use tokio::signal::unix::SignalKind;
use trading_agent::{
    AdvisorMode, AgentConfig, CsvMarketData, JobRun, Mode, ScanTrigger, Scheduler, TradingAgent,
};
use trading_core::{Balances, MarketDataSource, Repository};

fn build_advisor(config: &AgentConfig) -> Result<Arc<dyn Advisor>> {
    let llm = || -> Result<Arc<dyn Advisor>> {
        let advisor = LlmAdvisor::new(LlmConfig {
            api_key: config.openai_api_key.clone(),
            model: config.advisor_model.clone(),
            base_url: config.advisor_base_url.clone(),
            timeout: config.external_timeout(),
            ..Default::default()
        })?;
        Ok(Arc::new(advisor))
    };

    let advisor: Arc<dyn Advisor> = match config.advisor_mode {
        AdvisorMode::Rules => Arc::new(RuleBasedAdvisor),
        AdvisorMode::Heuristic => Arc::new(HeuristicAdvisor),
        AdvisorMode::Llm => llm()?,
        AdvisorMode::Auto if config.openai_api_key.is_some() => llm()?,
        AdvisorMode::Auto => Arc::new(RuleBasedAdvisor),
    };
    Ok(advisor)
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load .env, init tracing
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    // Panic hook: log panic info before crashing
    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting SignalDesk trading agent");

    // 2. Load configuration
    let config = AgentConfig::from_env().context("invalid configuration")?;
    tracing::info!("Configuration loaded and validated");
    tracing::info!("  Mode: {}", config.mode);
    tracing::info!(
        "  Scan every {}s on {} ({} symbols), monitor every {}s",
        config.scan_interval_seconds,
        config.scan_timeframe,
        config.universe.len(),
        config.monitor_interval_seconds
    );
    tracing::info!(
        "  Allocation: spot {:.0}% / futures {:.0}%, max {} positions, leverage {}x",
        config.spot_allocation_pct * 100.0,
        config.futures_allocation_pct * 100.0,
        config.max_positions,
        config.max_leverage
    );
    tracing::info!("  Min confidence: {:.0}%", config.confidence_threshold * 100.0);
    tracing::info!("  Strategy: {}", config.strategy.name);
    tracing::info!("  Auto trade: {}", config.auto_trade);

    // 3. Safety gate: live needs explicit approval and a wired-in gateway
    if config.mode == Mode::Live {
        let approved = std::env::var("LIVE_TRADING_APPROVED")
            .map(|v| v.eq_ignore_ascii_case("yes"))
            .unwrap_or(false);
        if !approved {
            tracing::error!("MODE=live requires LIVE_TRADING_APPROVED=yes");
        } else {
            tracing::error!(
                "MODE=live needs an exchange gateway; this binary ships none. \
                 Run with MODE=paper or embed TradingAgent with a gateway."
            );
        }
        std::process::exit(1);
    }

    // 4. Store and balances
    let repo = Arc::new(
        SqliteRepository::new(&config.database_url)
            .await
            .with_context(|| format!("failed to open {}", config.database_url))?,
    );
    check_database(&repo).await?;
    let repo_dyn: Arc<dyn Repository> = repo.clone();
    let ledger = Arc::new(
        PortfolioLedger::open(
            repo_dyn,
            Balances::new(config.initial_spot_balance, config.initial_futures_balance),
        )
        .await?,
    );
    let balances = ledger.balances().await;
    tracing::info!(
        "Balances: spot {:.2}, futures {:.2}",
        balances.spot,
        balances.futures
    );

    // 5. Market data and advisor
    let source: Arc<dyn MarketDataSource> = Arc::new(CsvMarketData::new(&config.data_dir));
    tracing::info!("Market data from {}/ (synthetic fallback)", config.data_dir);

    let advisor = build_advisor(&config)?;
    let agent = Arc::new(TradingAgent::new(config.clone(), source, ledger).with_advisor(advisor));
    tracing::info!("Advisor: {}", agent.advisor_name());

    // Baseline of the active strategy on the regime reference symbol
    if let Err(e) = agent.backtest(&config.regime_symbol).await {
        tracing::warn!("Startup backtest skipped: {}", e);
    }

    // 6. Jobs
    let mut scheduler = Scheduler::new();

    let scan_agent = Arc::clone(&agent);
    scheduler.add_periodic_task("scan", config.scan_interval(), move || {
        let agent = Arc::clone(&scan_agent);
        async move {
            match agent.run_scan(ScanTrigger::Scheduled).await {
                JobRun::Completed(Ok(_)) => {}
                JobRun::Completed(Err(e)) => tracing::error!("Scan job failed: {}", e),
                JobRun::Skipped => tracing::warn!("Scan tick skipped, previous scan still running"),
            }
        }
    });

    let monitor_agent = Arc::clone(&agent);
    scheduler.add_periodic_task("monitor", config.monitor_interval(), move || {
        let agent = Arc::clone(&monitor_agent);
        async move {
            match agent.run_monitor().await {
                JobRun::Completed(Ok(report)) => {
                    if !report.closed.is_empty() {
                        tracing::info!(
                            "Monitor closed {} of {} positions",
                            report.closed.len(),
                            report.checked
                        );
                    }
                }
                JobRun::Completed(Err(e)) => tracing::error!("Monitor job failed: {}", e),
                JobRun::Skipped => tracing::debug!("Monitor tick skipped"),
            }
        }
    });

    tracing::info!("Agent is now running. Press Ctrl+C to stop.");

    // 7. Wait for SIGINT / SIGTERM
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT");
        }
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
    }

    tracing::info!("Shutdown signal received, waiting for running jobs...");
    scheduler.shutdown().await;
    agent.metrics().await.log_metrics();

    tracing::info!("Trading agent shut down.");
    Ok(())
}

/// Startup connectivity check
async fn check_database(repo: &SqliteRepository) -> Result<()> {
    repo.recent_alerts(1)
        .await
        .context("Database connectivity check failed")?;
    tracing::info!("Startup check: database OK");
    Ok(())
}
