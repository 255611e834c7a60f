use serde::{Deserialize, Serialize};
use trading_core::{Candle, FeatureRow};

use crate::indicators::{adx, atr, breakout, ema, macd, rsi};

/// Indicator lengths used to derive a feature set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureParams {
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub rsi_length: usize,
    pub atr_length: usize,
    pub breakout_lookback: usize,
    pub adx_length: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
}

impl Default for FeatureParams {
    fn default() -> Self {
        Self {
            ema_fast: 20,
            ema_slow: 50,
            rsi_length: 14,
            atr_length: 14,
            breakout_lookback: 55,
            adx_length: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
        }
    }
}

impl FeatureParams {
    /// Shortest series that produces defined output
    pub fn min_candles(&self) -> usize {
        [
            self.ema_fast,
            self.ema_slow,
            self.rsi_length,
            self.atr_length,
            self.breakout_lookback,
            self.adx_length,
            self.macd_fast,
            self.macd_slow,
            self.macd_signal,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
            + 1
    }
}

/// Derives one [`FeatureRow`] per candle
#[derive(Debug, Clone, Default)]
pub struct FeatureEngine {
    params: FeatureParams,
}

impl FeatureEngine {
    pub fn new(params: FeatureParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &FeatureParams {
        &self.params
    }

    /// Compute the full feature set. A series shorter than
    /// [`FeatureParams::min_candles`] yields no rows.
    pub fn compute(&self, candles: &[Candle]) -> Vec<FeatureRow> {
        let p = &self.params;
        if candles.is_empty() || candles.len() < p.min_candles() {
            return Vec::new();
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

        let ema_fast = ema(&closes, p.ema_fast);
        let ema_slow = ema(&closes, p.ema_slow);
        let rsi = rsi(&closes, p.rsi_length);
        let macd = macd(&closes, p.macd_fast, p.macd_slow, p.macd_signal);
        let atr = atr(candles, p.atr_length);
        let adx = adx(candles, p.adx_length);
        let breakout = breakout(&closes, p.breakout_lookback);

        candles
            .iter()
            .enumerate()
            .map(|(i, candle)| {
                let atr_ratio = atr[i].and_then(|a| (candle.close > 0.0).then(|| a / candle.close));
                FeatureRow {
                    open_time: candle.open_time,
                    close: candle.close,
                    ema_fast: ema_fast[i],
                    ema_slow: ema_slow[i],
                    rsi: rsi[i],
                    macd: macd.macd_line[i],
                    macd_signal: macd.signal_line[i],
                    atr: atr[i],
                    atr_ratio,
                    adx: adx[i],
                    breakout: breakout[i],
                }
            })
            .collect()
    }

    /// Latest row only, `None` when the series is too short
    pub fn latest(&self, candles: &[Candle]) -> Option<FeatureRow> {
        self.compute(candles).pop()
    }
}
