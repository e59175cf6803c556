use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Direction, OrderKind, TradingPair};

/// Consolidation bracket frozen at setup time. Only a reset discards it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarketRange {
    pub high: Decimal,
    pub low: Decimal,
    pub formed_at: DateTime<Utc>,
}

impl MarketRange {
    pub fn new(high: Decimal, low: Decimal, formed_at: DateTime<Utc>) -> Self {
        Self {
            high,
            low,
            formed_at,
        }
    }

    pub fn size(&self) -> Decimal {
        self.high - self.low
    }

    pub fn boundary(&self, direction: Direction) -> Decimal {
        match direction {
            Direction::Long => self.high,
            Direction::Short => self.low,
        }
    }
}

/// Directional break of a frozen range, measured off the break candle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BreakoutSignal {
    pub direction: Direction,
    pub impulse_size: Decimal,
    pub impulse_high: Decimal,
    pub impulse_low: Decimal,
    pub break_time: DateTime<Utc>,
    pub break_price: Decimal,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SignalError {
    #[error("stop distance must be > 0")]
    ZeroStopDistance,
    #[error("stop loss is on the wrong side of the entry price")]
    StopOnWrongSide,
    #[error("take profit is on the wrong side of the entry price")]
    TargetOnWrongSide,
}

/// A fully specified order request emitted by the strategy. At most one per
/// symbol per tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingSignal {
    pub pair: TradingPair,
    pub direction: Direction,
    pub order_kind: OrderKind,
    pub price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub emitted_at: DateTime<Utc>,
    pub reason: String,
}

impl TradingSignal {
    pub fn stop_distance(&self) -> Decimal {
        (self.price - self.stop_loss).abs()
    }

    /// Long: stop < price < target. Short: target < price < stop.
    pub fn validate(&self) -> Result<(), SignalError> {
        if self.stop_distance() <= Decimal::ZERO {
            return Err(SignalError::ZeroStopDistance);
        }
        match self.direction {
            Direction::Long => {
                if self.stop_loss >= self.price {
                    return Err(SignalError::StopOnWrongSide);
                }
                if self.take_profit <= self.price {
                    return Err(SignalError::TargetOnWrongSide);
                }
            }
            Direction::Short => {
                if self.stop_loss <= self.price {
                    return Err(SignalError::StopOnWrongSide);
                }
                if self.take_profit >= self.price {
                    return Err(SignalError::TargetOnWrongSide);
                }
            }
        }
        Ok(())
    }

    pub fn risk_reward_ratio(&self) -> Option<Decimal> {
        let risk = self.stop_distance();
        if risk.is_zero() {
            return None;
        }
        Some((self.take_profit - self.price).abs() / risk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn long_signal() -> TradingSignal {
        TradingSignal {
            pair: TradingPair::BTCUSDT,
            direction: Direction::Long,
            order_kind: OrderKind::Limit,
            price: dec!(99.8),
            stop_loss: dec!(99.0),
            take_profit: dec!(101.8),
            emitted_at: Utc::now(),
            reason: "pullback to broken range high".to_string(),
        }
    }

    #[test]
    fn valid_long_signal() {
        let signal = long_signal();
        assert!(signal.validate().is_ok());
        assert_eq!(signal.stop_distance(), dec!(0.8));
        assert_eq!(signal.risk_reward_ratio(), Some(dec!(2.5)));
    }

    #[test]
    fn long_with_inverted_stop_is_rejected() {
        let mut signal = long_signal();
        signal.stop_loss = dec!(100.5);
        assert_eq!(signal.validate(), Err(SignalError::StopOnWrongSide));
    }

    #[test]
    fn long_with_target_below_entry_is_rejected() {
        let mut signal = long_signal();
        signal.take_profit = dec!(99.5);
        assert_eq!(signal.validate(), Err(SignalError::TargetOnWrongSide));
    }

    #[test]
    fn short_side_mirrors() {
        let signal = TradingSignal {
            pair: TradingPair::ETHUSDT,
            direction: Direction::Short,
            order_kind: OrderKind::Limit,
            price: dec!(95.2),
            stop_loss: dec!(96.0),
            take_profit: dec!(93.2),
            emitted_at: Utc::now(),
            reason: "pullback to broken range low".to_string(),
        };
        assert!(signal.validate().is_ok());
    }

    #[test]
    fn zero_stop_distance_is_rejected() {
        let mut signal = long_signal();
        signal.stop_loss = signal.price;
        assert_eq!(signal.validate(), Err(SignalError::ZeroStopDistance));
    }
}
