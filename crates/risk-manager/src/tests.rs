#[cfg(test)]
mod overlay_tests {
    use crate::overlay::{RiskOverlay, MAX_BONUS, MAX_PENALTY};
    use chrono::Utc;
    use proptest::prelude::*;
    use trading_core::{Market, Regime, RegimeLabel, Side, Signal, SignalFeatures, VolatilityBucket};

    fn signal(side: Side) -> Signal {
        Signal {
            symbol: "BTCUSDT".to_string(),
            market: Market::Spot,
            timeframe: "1h".to_string(),
            timestamp: Utc::now(),
            confidence: 0.7,
            expected_return_pct: 3.6,
            suggested_leverage: None,
            entry: 100.0,
            tp: 103.6,
            sl: 98.0,
            side,
            rationale: String::new(),
            strategy_tag: "test".to_string(),
        }
    }

    fn regime(label: RegimeLabel) -> Regime {
        Regime {
            label,
            trend_strength: 0.0,
            volatility_bucket: VolatilityBucket::Med,
            rsi: None,
            atr_ratio: None,
        }
    }

    fn calm_features() -> SignalFeatures {
        SignalFeatures {
            price: 100.0,
            tp: 103.6,
            sl: 98.0,
            rr: Some(1.8),
            atr_ratio: Some(0.02),
            rsi: Some(55.0),
            trend_strength: Some(0.1),
            ..Default::default()
        }
    }

    #[test]
    fn test_calm_setup_is_neutral() {
        let adj = RiskOverlay::new().assess(&signal(Side::Buy), &calm_features(), &regime(RegimeLabel::Sideways));
        assert_eq!(adj.delta, 0.0);
        assert!(adj.reasons.is_empty());
    }

    #[test]
    fn test_penalties_accumulate_then_clamp() {
        let features = SignalFeatures {
            atr_ratio: Some(0.08),
            rsi: Some(85.0),
            rr: Some(1.0),
            ..calm_features()
        };
        let adj = RiskOverlay::new().assess(&signal(Side::Buy), &features, &regime(RegimeLabel::Bearish));

        // -0.10 - 0.08 - 0.03 - 0.05 = -0.26 before clamping
        assert_eq!(adj.delta, MAX_PENALTY);
        assert_eq!(adj.reasons, vec!["ATR high", "RSI overbought", "Bear regime", "RR weak"]);
    }

    #[test]
    fn test_bonuses_for_aligned_long() {
        let features = SignalFeatures {
            trend_strength: Some(0.5),
            breakout: true,
            rr: Some(3.0),
            ..calm_features()
        };
        let adj = RiskOverlay::new().assess(&signal(Side::Buy), &features, &regime(RegimeLabel::Bullish));

        assert!((adj.delta - 0.08).abs() < 1e-9);
        assert_eq!(adj.reasons, vec!["Trend aligned", "Breakout", "Bull regime", "RR strong"]);
    }

    #[test]
    fn test_regime_rules_ignore_shorts() {
        let features = SignalFeatures {
            trend_strength: Some(0.5),
            ..calm_features()
        };
        let adj = RiskOverlay::new().assess(&signal(Side::Sell), &features, &regime(RegimeLabel::Bearish));
        assert_eq!(adj.delta, 0.0);
    }

    #[test]
    fn test_elevated_band_boundaries() {
        let overlay = RiskOverlay::new();
        let sig = signal(Side::Buy);
        let reg = regime(RegimeLabel::Sideways);

        let at_six = SignalFeatures { atr_ratio: Some(0.06), ..calm_features() };
        assert!((overlay.assess(&sig, &at_six, &reg).delta + 0.05).abs() < 1e-9);

        let at_seventy = SignalFeatures { rsi: Some(70.0), ..calm_features() };
        assert!((overlay.assess(&sig, &at_seventy, &reg).delta + 0.04).abs() < 1e-9);

        let at_twenty_five = SignalFeatures { rsi: Some(25.0), ..calm_features() };
        assert!((overlay.assess(&sig, &at_twenty_five, &reg).delta + 0.05).abs() < 1e-9);
    }

    fn arb_features() -> impl Strategy<Value = SignalFeatures> {
        (
            proptest::option::of(0.0..0.5_f64),
            proptest::option::of(0.0..100.0_f64),
            proptest::option::of(-3.0..3.0_f64),
            proptest::option::of(0.0..6.0_f64),
            any::<bool>(),
        )
            .prop_map(|(atr_ratio, rsi, trend_strength, rr, breakout)| SignalFeatures {
                atr_ratio,
                rsi,
                trend_strength,
                rr,
                breakout,
                ..Default::default()
            })
    }

    fn arb_label() -> impl Strategy<Value = RegimeLabel> {
        prop_oneof![
            Just(RegimeLabel::Bullish),
            Just(RegimeLabel::Bearish),
            Just(RegimeLabel::Sideways),
            Just(RegimeLabel::Unknown),
        ]
    }

    proptest! {
        /// The summed delta stays in bounds however many rules fire.
        #[test]
        fn delta_always_bounded(
            features in arb_features(),
            label in arb_label(),
            buy in any::<bool>(),
        ) {
            let side = if buy { Side::Buy } else { Side::Sell };
            let adj = RiskOverlay::new().assess(&signal(side), &features, &regime(label));
            prop_assert!(adj.delta >= MAX_PENALTY && adj.delta <= MAX_BONUS);
        }
    }
}
