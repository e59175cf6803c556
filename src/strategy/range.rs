use rust_decimal::Decimal;
use tracing::debug;

use crate::config::RangeSettings;
use crate::types::{Candle, MarketRange};

/// Scans the trailing 5m window for a consolidation bracket. The bracket is
/// only valid when its size sits between the configured ATR multiples.
#[derive(Debug, Clone)]
pub struct RangeDetector {
    settings: RangeSettings,
}

impl RangeDetector {
    pub fn new(settings: RangeSettings) -> Self {
        Self { settings }
    }

    pub fn detect(&self, candles_5m: &[Candle], atr: Decimal) -> Option<MarketRange> {
        if candles_5m.len() < self.settings.window || atr.is_zero() {
            return None;
        }

        let window = &candles_5m[candles_5m.len() - self.settings.window..];
        let high = window.iter().map(|c| c.high).max()?;
        let low = window.iter().map(|c| c.low).min()?;
        let size = high - low;

        let min_size = self.settings.min_size_multiplier * atr;
        let max_size = self.settings.max_size_multiplier * atr;
        if size < min_size || size > max_size {
            debug!(
                "Range rejected: size {} outside [{}, {}]",
                size, min_size, max_size
            );
            return None;
        }

        let formed_at = window.last()?.close_time;
        Some(MarketRange::new(high, low, formed_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TimeFrame, TradingPair};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn candle(i: i64, high: Decimal, low: Decimal) -> Candle {
        let open_time = Utc.timestamp_opt(i * 300, 0).unwrap();
        Candle {
            pair: TradingPair::BTCUSDT,
            timeframe: TimeFrame::M5,
            open_time,
            close_time: open_time + chrono::Duration::minutes(5),
            open: (high + low) / dec!(2),
            high,
            low,
            close: (high + low) / dec!(2),
            volume: dec!(100),
            taker_buy_volume: None,
        }
    }

    fn detector() -> RangeDetector {
        RangeDetector::new(RangeSettings::default())
    }

    #[test]
    fn bracket_spans_window_extremes() {
        let mut candles: Vec<Candle> = (0..30).map(|i| candle(i, dec!(99), dec!(96))).collect();
        candles[10] = candle(10, dec!(100), dec!(96));
        candles[20] = candle(20, dec!(99), dec!(95));

        // size = 5, atr = 2 -> inside [2.4, 7].
        let range = detector().detect(&candles, dec!(2)).unwrap();
        assert_eq!(range.high, dec!(100));
        assert_eq!(range.low, dec!(95));
        assert_eq!(range.size(), dec!(5));
    }

    #[test]
    fn too_tight_bracket_is_rejected() {
        // size = 2 < 1.2 * atr with atr = 2.
        let candles: Vec<Candle> = (0..30).map(|i| candle(i, dec!(101), dec!(99))).collect();
        assert!(detector().detect(&candles, dec!(2)).is_none());
    }

    #[test]
    fn too_wide_bracket_is_rejected() {
        // size = 10 > 3.5 * atr with atr = 2.
        let mut candles: Vec<Candle> = (0..30).map(|i| candle(i, dec!(100), dec!(96))).collect();
        candles[5] = candle(5, dec!(104), dec!(94));
        assert!(detector().detect(&candles, dec!(2)).is_none());
    }

    #[test]
    fn short_window_or_zero_atr_is_rejected() {
        let candles: Vec<Candle> = (0..10).map(|i| candle(i, dec!(100), dec!(96))).collect();
        assert!(detector().detect(&candles, dec!(2)).is_none());

        let candles: Vec<Candle> = (0..30).map(|i| candle(i, dec!(100), dec!(96))).collect();
        assert!(detector().detect(&candles, Decimal::ZERO).is_none());
    }
}
