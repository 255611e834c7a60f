use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};
use trading_core::{Candle, MarketDataSource, TradingError, TradingResult};

/// Timeframe used for last-price lookups
const PRICE_TIMEFRAME: &str = "1h";

/// Candles from `{data_dir}/{symbol}_{timeframe}.csv`, falling back to a
/// deterministic random walk when no file exists.
///
/// CSV columns: ts, open, high, low, close, volume. `ts` may be RFC 3339 or
/// `YYYY-MM-DD HH:MM:SS` (UTC).
pub struct CsvMarketData {
    data_dir: PathBuf,
    synthetic_fallback: bool,
}

impl CsvMarketData {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            synthetic_fallback: true,
        }
    }

    /// Only serve what is on disk
    pub fn without_synthetic(mut self) -> Self {
        self.synthetic_fallback = false;
        self
    }

    fn path_for(&self, symbol: &str, timeframe: &str) -> PathBuf {
        self.data_dir.join(format!("{}_{}.csv", symbol, timeframe))
    }

    fn load_csv(path: &Path, symbol: &str, timeframe: &str) -> TradingResult<Vec<Candle>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)
            .map_err(|e| TradingError::DataUnavailable(format!("{}: {}", path.display(), e)))?;

        let mut candles = Vec::new();
        for (line, result) in reader.records().enumerate() {
            let record = result.map_err(|e| TradingError::DataUnavailable(e.to_string()))?;
            let field = |i: usize| -> TradingResult<f64> {
                record
                    .get(i)
                    .unwrap_or("")
                    .trim()
                    .parse()
                    .map_err(|_| TradingError::DataUnavailable(format!("{} row {}: bad column {}", path.display(), line + 2, i)))
            };
            let Some(open_time) = record.get(0).and_then(parse_timestamp) else {
                warn!("{} row {}: unparseable timestamp, skipped", path.display(), line + 2);
                continue;
            };

            candles.push(Candle {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
                open_time,
                open: field(1)?,
                high: field(2)?,
                low: field(3)?,
                close: field(4)?,
                volume: field(5)?,
            });
        }

        candles.sort_by_key(|c| c.open_time);
        candles.dedup_by_key(|c| c.open_time);
        Ok(candles)
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Bar length for `15m`, `1h`, `4h`, `1d`; unknown suffixes count as one hour
pub fn timeframe_duration(timeframe: &str) -> Duration {
    let Some(unit) = timeframe.chars().last() else {
        return Duration::hours(1);
    };
    let Ok(n) = timeframe[..timeframe.len() - unit.len_utf8()].parse::<i64>() else {
        return Duration::hours(1);
    };
    let n = n.max(1);
    match unit {
        'm' => Duration::minutes(n),
        'h' => Duration::hours(n),
        'd' => Duration::days(n),
        'w' => Duration::weeks(n),
        _ => Duration::hours(1),
    }
}

/// Stable seed per (symbol, timeframe) so repeated scans see the same walk
fn walk_seed(symbol: &str, timeframe: &str) -> u64 {
    symbol
        .bytes()
        .chain(std::iter::once(b'_'))
        .chain(timeframe.bytes())
        .fold(0xcbf2_9ce4_8422_2325u64, |h, b| (h ^ b as u64).wrapping_mul(0x0100_0000_01b3))
}

/// Bars summed into each synthetic price level
const WALK_WINDOW: i64 = 256;

/// Uniform step in [-1, 1) for bar `index` of a walk
fn walk_step(seed: u64, index: i64) -> f64 {
    // splitmix64
    let mut z = seed.wrapping_add((index as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15));
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^= z >> 31;
    (z >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0
}

/// Random-walk series ending at the current bar.
///
/// The close of a bar depends only on its absolute bar index, so every
/// window length agrees on the closes it shares and the series keeps moving
/// as bars roll over.
pub fn synthetic_candles(symbol: &str, timeframe: &str, limit: usize) -> Vec<Candle> {
    let step = timeframe_duration(timeframe);
    let step_secs = step.num_seconds().max(1);
    let end_index = Utc::now().timestamp().div_euclid(step_secs);
    let seed = walk_seed(symbol, timeframe);
    let base = if symbol.ends_with("USDT") { 100.0 } else { 50.0 };

    let mut candles = Vec::with_capacity(limit);
    for index in end_index - limit as i64 + 1..=end_index {
        let level: f64 = (index - WALK_WINDOW + 1..=index).map(|k| walk_step(seed, k)).sum();
        let close = (base + level).max(1.0);

        let mut rng = StdRng::seed_from_u64(seed ^ index as u64);
        let open = (close + rng.gen_range(-0.5..0.5)).max(0.5);
        let high = close.max(open) + rng.gen::<f64>();
        let low = (close.min(open) - rng.gen::<f64>()).max(0.1);
        let Some(open_time) = DateTime::from_timestamp(index * step_secs, 0) else {
            continue;
        };
        candles.push(Candle {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            open_time,
            open,
            high,
            low,
            close,
            volume: rng.gen::<f64>() * 1000.0,
        });
    }
    candles
}

#[async_trait]
impl MarketDataSource for CsvMarketData {
    async fn get_candles(&self, symbol: &str, timeframe: &str, limit: usize) -> TradingResult<Vec<Candle>> {
        let path = self.path_for(symbol, timeframe);
        if path.exists() {
            let symbol_owned = symbol.to_string();
            let timeframe_owned = timeframe.to_string();
            let mut candles = tokio::task::spawn_blocking(move || {
                Self::load_csv(&path, &symbol_owned, &timeframe_owned)
            })
            .await
            .map_err(|e| TradingError::DataUnavailable(e.to_string()))??;

            let skip = candles.len().saturating_sub(limit);
            candles.drain(..skip);
            debug!(symbol, timeframe, count = candles.len(), "candles from csv");
            return Ok(candles);
        }

        if self.synthetic_fallback {
            debug!(symbol, timeframe, "no csv, using synthetic series");
            return Ok(synthetic_candles(symbol, timeframe, limit));
        }
        Ok(Vec::new())
    }

    async fn get_last_price(&self, symbol: &str) -> TradingResult<Option<f64>> {
        let candles = self.get_candles(symbol, PRICE_TIMEFRAME, 1).await?;
        Ok(candles.last().map(|c| c.close))
    }
}
