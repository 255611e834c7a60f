#[cfg(test)]
mod tests {
    use super::super::features::*;
    use super::super::indicators::*;
    use chrono::{Duration, TimeZone, Utc};
    use trading_core::Candle;

    fn sample_prices() -> Vec<f64> {
        vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08,
            45.89, 46.03, 45.61, 46.28, 46.28, 46.00, 46.03, 46.41, 46.22, 45.64,
        ]
    }

    fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut prev = closes[0];
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| {
                let open = prev;
                prev = close;
                Candle {
                    symbol: "TESTUSDT".to_string(),
                    timeframe: "1h".to_string(),
                    open_time: start + Duration::hours(i as i64),
                    open,
                    high: open.max(close) + 0.5,
                    low: open.min(close) - 0.5,
                    close,
                    volume: 1000.0,
                }
            })
            .collect()
    }

    fn uptrend(len: usize) -> Vec<f64> {
        (0..len).map(|i| 100.0 + i as f64).collect()
    }

    #[test]
    fn test_ema_seeded_with_sma() {
        let data = vec![22.0, 24.0, 23.0, 25.0, 26.0];
        let result = ema(&data, 3);

        assert_eq!(result.len(), data.len());
        assert!(result[1].is_none());
        let first_sma = (22.0 + 24.0 + 23.0) / 3.0;
        assert!((result[2].unwrap() - first_sma).abs() < 0.01);
        // (25 - 23) * 0.5 + 23
        assert!((result[3].unwrap() - 24.0).abs() < 0.01);
    }

    #[test]
    fn test_ema_insufficient_data() {
        let result = ema(&[1.0, 2.0], 5);
        assert!(result.iter().all(|v| v.is_none()));
    }

    #[test]
    fn test_ema_increases_with_uptrend() {
        let data = uptrend(10);
        let result: Vec<f64> = ema(&data, 3).into_iter().flatten().collect();

        for i in 1..result.len() {
            assert!(result[i] > result[i - 1]);
        }
    }

    #[test]
    fn test_rsi_bounds_and_warmup() {
        let prices = sample_prices();
        let result = rsi(&prices, 14);

        assert_eq!(result.len(), prices.len());
        assert!(result[13].is_none());
        assert!(result[14].is_some());
        for value in result.into_iter().flatten() {
            assert!((0.0..=100.0).contains(&value));
        }
    }

    #[test]
    fn test_rsi_overbought_in_uptrend() {
        let result = rsi(&uptrend(20), 14);
        assert!(result.last().unwrap().unwrap() > 70.0);
    }

    #[test]
    fn test_rsi_flat_series_is_neutral() {
        let result = rsi(&[100.0; 20], 14);
        assert_eq!(result.last().copied().flatten(), Some(50.0));
    }

    #[test]
    fn test_macd_warmup() {
        let prices = uptrend(60);
        let result = macd(&prices, 12, 26, 9);

        assert!(result.macd_line[24].is_none());
        assert!(result.macd_line[25].is_some());
        assert!(result.signal_line[32].is_none());
        assert!(result.signal_line[33].is_some());

        assert_eq!(result.macd_line.len(), prices.len());
        assert_eq!(result.signal_line.len(), prices.len());
        assert!(result.macd_line[59].unwrap() > 0.0);
    }

    #[test]
    fn test_atr_constant_range() {
        // Every bar spans 1.0 around a flat close
        let candles = candles_from_closes(&[100.0; 30]);
        let result = atr(&candles, 14);

        assert!(result[13].is_none());
        assert!((result[14].unwrap() - 1.0).abs() < 1e-9);
        assert!((result[29].unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_adx_strong_trend() {
        let candles = candles_from_closes(&uptrend(60));
        let result = adx(&candles, 14);

        assert!(result[26].is_none());
        assert!(result[27].is_some());
        assert!(result[59].unwrap() > 25.0);
    }

    #[test]
    fn test_breakout_partial_window() {
        let closes = vec![5.0, 4.0, 6.0, 5.5, 7.0];
        let result = breakout(&closes, 3);

        // First bar compares against itself
        assert_eq!(result, vec![true, false, true, false, true]);
    }

    #[test]
    fn test_feature_engine_short_series_is_empty() {
        let engine = FeatureEngine::default();
        assert!(engine.compute(&[]).is_empty());

        let candles = candles_from_closes(&uptrend(55));
        assert!(engine.compute(&candles).is_empty());
        assert!(engine.latest(&candles).is_none());
    }

    #[test]
    fn test_feature_engine_rows_align_with_candles() {
        let engine = FeatureEngine::default();
        let candles = candles_from_closes(&uptrend(120));
        let rows = engine.compute(&candles);

        assert_eq!(rows.len(), candles.len());
        assert!(rows[0].ema_fast.is_none());
        assert!(rows[0].breakout);

        let last = rows.last().unwrap();
        assert_eq!(last.open_time, candles.last().unwrap().open_time);
        assert!(last.is_warm());
        assert!(last.ema_fast.unwrap() > last.ema_slow.unwrap());
        assert!(last.breakout);
        let ratio = last.atr_ratio.unwrap();
        assert!((ratio - last.atr.unwrap() / last.close).abs() < 1e-12);
    }
}
