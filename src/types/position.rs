use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Direction, TradingPair, TradingSignal};

/// A signal captured by the execution engine and waiting for its fill bar.
/// Limit and market orders follow different fill rules, so the engine keeps
/// them in separate maps.
#[derive(Debug, Clone)]
pub struct PendingOrder {
    pub signal: TradingSignal,
    pub quantity: Decimal,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ActivePosition {
    pub pair: TradingPair,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub opened_at: DateTime<Utc>,
    pub entry_fee: Decimal,
    pub trade_id: String,
}

impl ActivePosition {
    /// Signed gross PnL at the given exit price.
    pub fn gross_pnl(&self, exit_price: Decimal) -> Decimal {
        self.direction.sign() * (exit_price - self.entry_price) * self.quantity
    }

    /// Forced-exit price for leverage L and maintenance margin m:
    /// long entry*(1 - 1/L + m), short entry*(1 + 1/L - m).
    pub fn liquidation_price(&self, leverage: Decimal, maintenance_margin: Decimal) -> Decimal {
        let inverse = Decimal::ONE / leverage;
        match self.direction {
            Direction::Long => self.entry_price * (Decimal::ONE - inverse + maintenance_margin),
            Direction::Short => self.entry_price * (Decimal::ONE + inverse - maintenance_margin),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Open,
    Closed,
    Cancelled,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Open => "Open",
            TradeStatus::Closed => "Closed",
            TradeStatus::Cancelled => "Cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Open" => Some(TradeStatus::Open),
            "Closed" => Some(TradeStatus::Closed),
            "Cancelled" => Some(TradeStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    Liquidated,
    Expired,
    Manual,
    EndOfBacktest,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "StopLoss",
            ExitReason::TakeProfit => "TakeProfit",
            ExitReason::Liquidated => "Liquidated",
            ExitReason::Expired => "Expired",
            ExitReason::Manual => "Manual",
            ExitReason::EndOfBacktest => "EndOfBacktest",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "StopLoss" => Some(ExitReason::StopLoss),
            "TakeProfit" => Some(ExitReason::TakeProfit),
            "Liquidated" => Some(ExitReason::Liquidated),
            "Expired" => Some(ExitReason::Expired),
            "Manual" => Some(ExitReason::Manual),
            "EndOfBacktest" => Some(ExitReason::EndOfBacktest),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persisted trade row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    pub pair: TradingPair,
    pub direction: Direction,
    pub entry_time: DateTime<Utc>,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_price: Option<Decimal>,
    pub exit_reason: Option<ExitReason>,
    pub pnl: Decimal,
    pub pnl_pct: Decimal,
    pub status: TradeStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeStats {
    pub total: u64,
    pub wins: u64,
    pub losses: u64,
    pub win_rate: Decimal,
    pub total_pnl: Decimal,
    pub profit_factor: Decimal,
}
