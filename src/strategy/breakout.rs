use rust_decimal::Decimal;
use tracing::debug;

use crate::config::BreakoutSettings;
use crate::types::{BreakoutSignal, Candle, Direction, MarketRange};

/// Tests a just-closed 5m candle against a frozen range. A break needs the
/// close beyond the boundary by an ATR margin, a dominant body and volume
/// above the moving average.
#[derive(Debug, Clone)]
pub struct BreakoutDetector {
    settings: BreakoutSettings,
}

impl BreakoutDetector {
    pub fn new(settings: BreakoutSettings) -> Self {
        Self { settings }
    }

    pub fn detect(
        &self,
        candle: &Candle,
        range: &MarketRange,
        atr: Decimal,
        volume_sma: Decimal,
    ) -> Option<BreakoutSignal> {
        let margin = self.settings.atr_multiplier * atr;

        let direction = if candle.close > range.high + margin {
            Direction::Long
        } else if candle.close < range.low - margin {
            Direction::Short
        } else {
            return None;
        };

        if candle.body_percentage() < self.settings.min_body_percent {
            debug!(
                "Breakout rejected: body {}% < {}%",
                candle.body_percentage(),
                self.settings.min_body_percent
            );
            return None;
        }
        if candle.volume <= self.settings.volume_multiplier * volume_sma {
            debug!(
                "Breakout rejected: volume {} <= {} * {}",
                candle.volume, self.settings.volume_multiplier, volume_sma
            );
            return None;
        }

        let boundary = range.boundary(direction);
        Some(BreakoutSignal {
            direction,
            impulse_size: (candle.close - boundary).abs(),
            impulse_high: candle.high,
            impulse_low: candle.low,
            break_time: candle.open_time,
            break_price: candle.close,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TimeFrame, TradingPair};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn candle(open: Decimal, high: Decimal, low: Decimal, close: Decimal, volume: Decimal) -> Candle {
        let open_time = Utc.timestamp_opt(9_000, 0).unwrap();
        Candle {
            pair: TradingPair::BTCUSDT,
            timeframe: TimeFrame::M5,
            open_time,
            close_time: open_time + chrono::Duration::minutes(5),
            open,
            high,
            low,
            close,
            volume,
            taker_buy_volume: None,
        }
    }

    fn range() -> MarketRange {
        MarketRange::new(dec!(100), dec!(95), Utc.timestamp_opt(8_700, 0).unwrap())
    }

    fn detector() -> BreakoutDetector {
        BreakoutDetector::new(BreakoutSettings::default())
    }

    #[test]
    fn long_break_with_body_and_volume() {
        // close 101 > 100 + 0.1 * 2; body 70% of bar; volume above 0.8 * sma.
        let c = candle(dec!(99), dec!(101.2), dec!(98.9), dec!(101), dec!(150));
        let signal = detector().detect(&c, &range(), dec!(2), dec!(100)).unwrap();
        assert_eq!(signal.direction, Direction::Long);
        assert_eq!(signal.impulse_size, dec!(1));
        assert_eq!(signal.break_price, dec!(101));
    }

    #[test]
    fn short_break_mirrors() {
        let c = candle(dec!(96), dec!(96.1), dec!(93.8), dec!(94), dec!(150));
        let signal = detector().detect(&c, &range(), dec!(2), dec!(100)).unwrap();
        assert_eq!(signal.direction, Direction::Short);
        assert_eq!(signal.impulse_size, dec!(1));
    }

    #[test]
    fn close_inside_margin_is_no_break() {
        // close 100.1 needs to clear 100 + 0.2.
        let c = candle(dec!(99), dec!(100.3), dec!(98.9), dec!(100.1), dec!(150));
        assert!(detector().detect(&c, &range(), dec!(2), dec!(100)).is_none());
    }

    #[test]
    fn weak_body_is_rejected() {
        // Body 1 out of a 4-point bar: 25% < 50%.
        let c = candle(dec!(100), dec!(102.9), dec!(98.9), dec!(101), dec!(150));
        assert!(detector().detect(&c, &range(), dec!(2), dec!(100)).is_none());
    }

    #[test]
    fn thin_volume_is_rejected() {
        let c = candle(dec!(99), dec!(101.2), dec!(98.9), dec!(101), dec!(50));
        assert!(detector().detect(&c, &range(), dec!(2), dec!(100)).is_none());
    }
}
