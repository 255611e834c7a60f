use std::collections::HashSet;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use signal_engine::{StrategyParams, StrategyPreset};

pub const DEFAULT_UNIVERSE: [&str; 12] = [
    "BTCUSDT", "ETHUSDT", "BNBUSDT", "XRPUSDT", "ADAUSDT", "DOGEUSDT", "SOLUSDT", "MATICUSDT",
    "DOTUSDT", "LTCUSDT", "TRXUSDT", "LINKUSDT",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Live,
    Paper,
    DryRun,
}

impl Mode {
    /// Paper and dry-run never reach a gateway
    pub fn is_simulated(&self) -> bool {
        !matches!(self, Mode::Live)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Live => "live",
            Mode::Paper => "paper",
            Mode::DryRun => "dryrun",
        })
    }
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "live" => Ok(Mode::Live),
            "paper" => Ok(Mode::Paper),
            "dryrun" | "dry-run" | "dry_run" => Ok(Mode::DryRun),
            other => bail!("unknown MODE '{}' (expected live|paper|dryrun)", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdvisorMode {
    /// LLM when an API key is configured, rule-based otherwise
    Auto,
    Rules,
    Heuristic,
    Llm,
}

impl FromStr for AdvisorMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(AdvisorMode::Auto),
            "rules" => Ok(AdvisorMode::Rules),
            "heuristic" => Ok(AdvisorMode::Heuristic),
            "llm" => Ok(AdvisorMode::Llm),
            other => bail!("unknown ADVISOR_MODE '{}'", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub mode: Mode,
    pub database_url: String,

    // Scheduling
    pub scan_interval_seconds: u64,
    pub monitor_interval_seconds: u64,

    // Capital
    pub spot_allocation_pct: f64,
    pub futures_allocation_pct: f64,
    pub max_leverage: f64,
    pub risk_per_trade_pct: f64,
    pub confidence_threshold: f64,
    pub max_positions: usize,
    pub auto_trade: bool,
    pub initial_spot_balance: f64,
    pub initial_futures_balance: f64,

    // Universe
    pub universe: Vec<String>,
    pub scan_timeframe: String,
    pub regime_symbol: String,
    pub regime_timeframe: String,
    pub futures_symbols: Vec<String>,
    pub candle_limit: usize,
    pub external_timeout_seconds: u64,
    pub persist_market_data: bool,
    pub data_dir: String,

    // Strategy
    pub strategy: StrategyParams,

    // Advisor
    pub advisor_mode: AdvisorMode,
    pub openai_api_key: Option<String>,
    pub advisor_model: String,
    pub advisor_base_url: String,

    pub metrics_log_interval_cycles: u64,
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var_or(key, default)
        .trim()
        .parse()
        .with_context(|| format!("invalid value for {}", key))
}

fn list_var(key: &str, default: &str) -> Vec<String> {
    var_or(key, default)
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        let preset: StrategyPreset = var_or("STRATEGY_PRESET", "BalancedDefault")
            .parse()
            .context("invalid STRATEGY_PRESET")?;
        let mut strategy = preset.params();
        if let Ok(raw) = env::var("STRATEGY_PARAMS_JSON") {
            let overrides: serde_json::Value =
                serde_json::from_str(&raw).context("STRATEGY_PARAMS_JSON is not valid JSON")?;
            strategy = strategy
                .with_overrides(&overrides)
                .context("invalid STRATEGY_PARAMS_JSON")?;
        }

        let config = Self {
            mode: var_or("MODE", "paper").parse()?,
            database_url: var_or("DATABASE_URL", "sqlite:trader.db"),

            scan_interval_seconds: parse_var("SCAN_INTERVAL_SECONDS", "300")?,
            monitor_interval_seconds: parse_var("MONITOR_INTERVAL_SECONDS", "10")?,

            spot_allocation_pct: parse_var("SPOT_ALLOCATION_PCT", "0.6")?,
            futures_allocation_pct: parse_var("FUTURES_ALLOCATION_PCT", "0.4")?,
            max_leverage: parse_var("MAX_LEVERAGE", "3")?,
            risk_per_trade_pct: parse_var("RISK_PER_TRADE_PCT", "0.0075")?,
            confidence_threshold: parse_var("CONFIDENCE_THRESHOLD", "0.65")?,
            max_positions: parse_var("MAX_POSITIONS", "5")?,
            auto_trade: parse_var("AUTO_TRADE", "false")?,
            initial_spot_balance: parse_var("INITIAL_SPOT_BALANCE", "10000")?,
            initial_futures_balance: parse_var("INITIAL_FUTURES_BALANCE", "5000")?,

            universe: list_var("UNIVERSE", &DEFAULT_UNIVERSE.join(",")),
            scan_timeframe: var_or("SCAN_TIMEFRAME", "1h"),
            regime_symbol: var_or("REGIME_SYMBOL", "BTCUSDT").to_uppercase(),
            regime_timeframe: var_or("REGIME_TIMEFRAME", "4h"),
            futures_symbols: list_var("FUTURES_SYMBOLS", "BTCUSDT,ETHUSDT,SOLUSDT"),
            candle_limit: parse_var("CANDLE_LIMIT", "400")?,
            external_timeout_seconds: parse_var("EXTERNAL_TIMEOUT_SECONDS", "10")?,
            persist_market_data: parse_var("PERSIST_MARKET_DATA", "false")?,
            data_dir: var_or("DATA_DIR", "data"),

            strategy,

            advisor_mode: var_or("ADVISOR_MODE", "auto").parse()?,
            openai_api_key: env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            advisor_model: var_or("ADVISOR_MODEL", "gpt-4o-mini"),
            advisor_base_url: var_or("ADVISOR_BASE_URL", "https://api.openai.com/v1"),

            metrics_log_interval_cycles: parse_var("METRICS_LOG_INTERVAL_CYCLES", "10")?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Fail fast on values that would make the loop misbehave
    pub fn validate(&self) -> Result<()> {
        for (key, pct) in [
            ("SPOT_ALLOCATION_PCT", self.spot_allocation_pct),
            ("FUTURES_ALLOCATION_PCT", self.futures_allocation_pct),
            ("CONFIDENCE_THRESHOLD", self.confidence_threshold),
        ] {
            if !(0.0..=1.0).contains(&pct) {
                bail!("{} must be within [0, 1], got {}", key, pct);
            }
        }
        if self.spot_allocation_pct + self.futures_allocation_pct > 1.0 + 1e-9 {
            bail!(
                "allocation percentages sum to {:.3}, must not exceed 1",
                self.spot_allocation_pct + self.futures_allocation_pct
            );
        }
        if !(0.0..=1.0).contains(&self.risk_per_trade_pct) {
            bail!("RISK_PER_TRADE_PCT must be within [0, 1]");
        }
        if self.scan_interval_seconds == 0 || self.monitor_interval_seconds == 0 {
            bail!("scan and monitor intervals must be positive");
        }
        if self.external_timeout_seconds == 0 {
            bail!("EXTERNAL_TIMEOUT_SECONDS must be positive");
        }
        if self.max_leverage < 1.0 {
            bail!("MAX_LEVERAGE must be at least 1, got {}", self.max_leverage);
        }
        if self.universe.is_empty() {
            bail!("UNIVERSE is empty");
        }
        if self.initial_spot_balance < 0.0 || self.initial_futures_balance < 0.0 {
            bail!("initial balances must not be negative");
        }
        self.strategy.validate()?;
        Ok(())
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_seconds)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_seconds)
    }

    pub fn external_timeout(&self) -> Duration {
        Duration::from_secs(self.external_timeout_seconds)
    }

    pub fn futures_set(&self) -> HashSet<String> {
        self.futures_symbols.iter().cloned().collect()
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Paper,
            database_url: "sqlite::memory:".to_string(),
            scan_interval_seconds: 300,
            monitor_interval_seconds: 10,
            spot_allocation_pct: 0.6,
            futures_allocation_pct: 0.4,
            max_leverage: 3.0,
            risk_per_trade_pct: 0.0075,
            confidence_threshold: 0.65,
            max_positions: 5,
            auto_trade: false,
            initial_spot_balance: 10_000.0,
            initial_futures_balance: 5_000.0,
            universe: DEFAULT_UNIVERSE.iter().map(|s| s.to_string()).collect(),
            scan_timeframe: "1h".to_string(),
            regime_symbol: "BTCUSDT".to_string(),
            regime_timeframe: "4h".to_string(),
            futures_symbols: vec!["BTCUSDT".into(), "ETHUSDT".into(), "SOLUSDT".into()],
            candle_limit: 400,
            external_timeout_seconds: 10,
            persist_market_data: false,
            data_dir: "data".to_string(),
            strategy: StrategyParams::default(),
            advisor_mode: AdvisorMode::Auto,
            openai_api_key: None,
            advisor_model: "gpt-4o-mini".to_string(),
            advisor_base_url: "https://api.openai.com/v1".to_string(),
            metrics_log_interval_cycles: 10,
        }
    }
}
