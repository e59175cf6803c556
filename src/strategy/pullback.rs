use rust_decimal::Decimal;
use tracing::debug;

use crate::config::PullbackSettings;
use crate::types::{BreakoutSignal, Candle, Direction, MarketRange};

/// Validates a retracement on the 1m stream: price must come back to the
/// broken level (or the session VWAP when it sits beyond it) without cutting
/// back through the boundary by more than the allowed share of the impulse.
#[derive(Debug, Clone)]
pub struct PullbackValidator {
    settings: PullbackSettings,
}

impl PullbackValidator {
    pub fn new(settings: PullbackSettings) -> Self {
        Self { settings }
    }

    /// Level the limit order anchors to: the broken boundary, or the session
    /// VWAP when it is the more conservative of the two.
    pub fn anchor(range: &MarketRange, direction: Direction, session_vwap: Decimal) -> Decimal {
        match direction {
            Direction::Long => {
                if session_vwap.is_zero() {
                    range.high
                } else {
                    range.high.max(session_vwap)
                }
            }
            Direction::Short => {
                if session_vwap.is_zero() {
                    range.low
                } else {
                    range.low.min(session_vwap)
                }
            }
        }
    }

    pub fn is_valid(
        &self,
        candle_1m: &Candle,
        breakout: &BreakoutSignal,
        range: &MarketRange,
        session_vwap: Decimal,
    ) -> bool {
        if breakout.impulse_size.is_zero() {
            return false;
        }
        let hundred = Decimal::from(100);

        // How far the 1m extreme cut back through the broken boundary,
        // as a share of the impulse. Staying outside the range is depth <= 0.
        let depth_pct = match breakout.direction {
            Direction::Long => (range.high - candle_1m.low) / breakout.impulse_size * hundred,
            Direction::Short => (candle_1m.high - range.low) / breakout.impulse_size * hundred,
        };
        if depth_pct > self.settings.max_depth_percent {
            debug!(
                "Pullback rejected: depth {:.1}% > {}%",
                depth_pct, self.settings.max_depth_percent
            );
            return false;
        }

        let anchor = Self::anchor(range, breakout.direction, session_vwap);
        if anchor.is_zero() {
            return false;
        }
        let distance_pct = (candle_1m.close - anchor).abs() / anchor * hundred;
        if distance_pct > self.settings.price_tolerance_percent {
            debug!(
                "Pullback rejected: close {:.4}% away from anchor {}",
                distance_pct, anchor
            );
            return false;
        }

        // Candle-shape confirmation is informational only.
        if Self::is_pinbar(candle_1m, breakout.direction) {
            debug!("Pullback candle prints a pinbar");
        } else if Self::is_engulfing_like(candle_1m) {
            debug!("Pullback candle prints an engulfing-sized body");
        }

        true
    }

    /// Rejection wick at least twice the body on the pullback side.
    pub fn is_pinbar(candle: &Candle, direction: Direction) -> bool {
        let body = candle.body_size();
        let wick = match direction {
            Direction::Long => candle.lower_wick(),
            Direction::Short => candle.upper_wick(),
        };
        wick > body * Decimal::from(2)
    }

    /// Coarse engulfing proxy: the body dominates the bar.
    pub fn is_engulfing_like(candle: &Candle) -> bool {
        candle.body_percentage() > Decimal::from(70)
    }
}
