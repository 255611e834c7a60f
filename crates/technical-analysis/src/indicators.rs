//! Indicator series aligned to their input.
//!
//! Every function returns exactly one entry per input element. Warm-up
//! positions are `None` so callers can tell "not yet defined" from zero.

use trading_core::Candle;

/// Exponential Moving Average, seeded with the SMA of the first `period` values
pub fn ema(data: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut result = vec![None; data.len()];
    if period == 0 || data.len() < period {
        return result;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut prev = data[..period].iter().sum::<f64>() / period as f64;
    result[period - 1] = Some(prev);

    for i in period..data.len() {
        prev = (data[i] - prev) * multiplier + prev;
        result[i] = Some(prev);
    }
    result
}

/// EMA over a partially defined series. Leading `None`s are skipped and the
/// result keeps the same alignment as `data`.
pub fn ema_sparse(data: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let Some(start) = data.iter().position(|v| v.is_some()) else {
        return vec![None; data.len()];
    };
    let dense: Vec<f64> = data[start..].iter().map(|v| v.unwrap_or(f64::NAN)).collect();
    let mut result = vec![None; start];
    result.extend(ema(&dense, period).into_iter().map(|v| v.filter(|x| x.is_finite())));
    result
}

/// Relative Strength Index with Wilder smoothing. First value at index `period`.
pub fn rsi(data: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut result = vec![None; data.len()];
    if period == 0 || data.len() < period + 1 {
        return result;
    }

    let mut gains = Vec::with_capacity(data.len() - 1);
    let mut losses = Vec::with_capacity(data.len() - 1);

    for i in 1..data.len() {
        let change = data[i] - data[i - 1];
        if change > 0.0 {
            gains.push(change);
            losses.push(0.0);
        } else {
            gains.push(0.0);
            losses.push(change.abs());
        }
    }

    let mut avg_gain = gains[..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss = losses[..period].iter().sum::<f64>() / period as f64;
    result[period] = Some(rsi_from_averages(avg_gain, avg_loss));

    for i in period..gains.len() {
        avg_gain = (avg_gain * (period - 1) as f64 + gains[i]) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + losses[i]) / period as f64;
        result[i + 1] = Some(rsi_from_averages(avg_gain, avg_loss));
    }

    result
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            return 50.0;
        }
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

/// MACD (Moving Average Convergence Divergence)
pub struct MacdResult {
    pub macd_line: Vec<Option<f64>>,
    pub signal_line: Vec<Option<f64>>,
}

pub fn macd(data: &[f64], fast_period: usize, slow_period: usize, signal_period: usize) -> MacdResult {
    let empty = vec![None; data.len()];
    if fast_period == 0 || slow_period == 0 || signal_period == 0 || slow_period < fast_period {
        return MacdResult {
            macd_line: empty.clone(),
            signal_line: empty,
        };
    }

    let ema_fast = ema(data, fast_period);
    let ema_slow = ema(data, slow_period);

    let macd_line: Vec<Option<f64>> = ema_fast
        .iter()
        .zip(&ema_slow)
        .map(|(f, s)| match (f, s) {
            (Some(f), Some(s)) => Some(f - s),
            _ => None,
        })
        .collect();

    let signal_line = ema_sparse(&macd_line, signal_period);

    MacdResult {
        macd_line,
        signal_line,
    }
}

fn true_range(candles: &[Candle], i: usize) -> f64 {
    let high_low = candles[i].high - candles[i].low;
    let high_close = (candles[i].high - candles[i - 1].close).abs();
    let low_close = (candles[i].low - candles[i - 1].close).abs();
    high_low.max(high_close).max(low_close)
}

/// Average True Range (Wilder). First value at index `period`.
pub fn atr(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let mut result = vec![None; candles.len()];
    if period == 0 || candles.len() < period + 1 {
        return result;
    }

    let true_ranges: Vec<f64> = (1..candles.len()).map(|i| true_range(candles, i)).collect();

    let mut atr = true_ranges[..period].iter().sum::<f64>() / period as f64;
    result[period] = Some(atr);

    for i in period..true_ranges.len() {
        atr = (atr * (period - 1) as f64 + true_ranges[i]) / period as f64;
        result[i + 1] = Some(atr);
    }

    result
}

/// Average Directional Index, measures trend strength (0-100).
/// First value at index `2 * period - 1`.
pub fn adx(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let mut result = vec![None; candles.len()];
    if period == 0 || candles.len() < period * 2 {
        return result;
    }

    // +DM, -DM and TR, index k corresponds to candle k + 1
    let mut plus_dm = Vec::with_capacity(candles.len() - 1);
    let mut minus_dm = Vec::with_capacity(candles.len() - 1);
    let mut true_ranges = Vec::with_capacity(candles.len() - 1);

    for i in 1..candles.len() {
        let up_move = candles[i].high - candles[i - 1].high;
        let down_move = candles[i - 1].low - candles[i].low;

        plus_dm.push(if up_move > down_move && up_move > 0.0 { up_move } else { 0.0 });
        minus_dm.push(if down_move > up_move && down_move > 0.0 { down_move } else { 0.0 });
        true_ranges.push(true_range(candles, i));
    }

    let mut smoothed_plus_dm = plus_dm[..period].iter().sum::<f64>();
    let mut smoothed_minus_dm = minus_dm[..period].iter().sum::<f64>();
    let mut smoothed_tr = true_ranges[..period].iter().sum::<f64>();

    // DX is defined from candle `period` onwards
    let mut dx_values = Vec::with_capacity(candles.len() - period);
    dx_values.push(directional_index(smoothed_plus_dm, smoothed_minus_dm, smoothed_tr));

    for k in period..plus_dm.len() {
        smoothed_plus_dm = smoothed_plus_dm - smoothed_plus_dm / period as f64 + plus_dm[k];
        smoothed_minus_dm = smoothed_minus_dm - smoothed_minus_dm / period as f64 + minus_dm[k];
        smoothed_tr = smoothed_tr - smoothed_tr / period as f64 + true_ranges[k];
        dx_values.push(directional_index(smoothed_plus_dm, smoothed_minus_dm, smoothed_tr));
    }

    if dx_values.len() < period {
        return result;
    }

    let mut adx_val = dx_values[..period].iter().sum::<f64>() / period as f64;
    result[2 * period - 1] = Some(adx_val);

    for (j, dx) in dx_values.iter().enumerate().skip(period) {
        adx_val = (adx_val * (period - 1) as f64 + dx) / period as f64;
        result[period + j] = Some(adx_val);
    }

    result
}

fn directional_index(plus_dm: f64, minus_dm: f64, tr: f64) -> f64 {
    if tr <= 0.0 {
        return 0.0;
    }
    let pdi = 100.0 * plus_dm / tr;
    let mdi = 100.0 * minus_dm / tr;
    let di_sum = pdi + mdi;
    if di_sum > 0.0 {
        100.0 * (pdi - mdi).abs() / di_sum
    } else {
        0.0
    }
}

/// Maximum over the trailing `lookback` window, partial windows allowed
pub fn rolling_max(data: &[f64], lookback: usize) -> Vec<f64> {
    let window = lookback.max(1);
    (0..data.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            data[start..=i].iter().copied().fold(f64::NEG_INFINITY, f64::max)
        })
        .collect()
}

/// True where the close is at (or above) its trailing `lookback` high
pub fn breakout(closes: &[f64], lookback: usize) -> Vec<bool> {
    rolling_max(closes, lookback)
        .into_iter()
        .zip(closes)
        .map(|(max, close)| *close >= max)
        .collect()
}
