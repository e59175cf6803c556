#![allow(dead_code)]
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TradingPair {
    BTCUSDT,
    ETHUSDT,
    SOLUSDT,
    BNBUSDT,
    ADAUSDT,
    XRPUSDT,
}

impl TradingPair {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradingPair::BTCUSDT => "BTCUSDT",
            TradingPair::ETHUSDT => "ETHUSDT",
            TradingPair::SOLUSDT => "SOLUSDT",
            TradingPair::BNBUSDT => "BNBUSDT",
            TradingPair::ADAUSDT => "ADAUSDT",
            TradingPair::XRPUSDT => "XRPUSDT",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BTCUSDT" => Some(TradingPair::BTCUSDT),
            "ETHUSDT" => Some(TradingPair::ETHUSDT),
            "SOLUSDT" => Some(TradingPair::SOLUSDT),
            "BNBUSDT" => Some(TradingPair::BNBUSDT),
            "ADAUSDT" => Some(TradingPair::ADAUSDT),
            "XRPUSDT" => Some(TradingPair::XRPUSDT),
            _ => None,
        }
    }

    /// Default universe for the backtest command.
    pub fn default_universe() -> Vec<TradingPair> {
        vec![
            TradingPair::BTCUSDT,
            TradingPair::ETHUSDT,
            TradingPair::SOLUSDT,
        ]
    }
}

impl fmt::Display for TradingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeFrame {
    M1, // 1 minute
    M5, // 5 minutes
}

impl TimeFrame {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeFrame::M1 => "1m",
            TimeFrame::M5 => "5m",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(TimeFrame::M1),
            "5m" => Some(TimeFrame::M5),
            _ => None,
        }
    }

    pub fn to_minutes(&self) -> u64 {
        match self {
            TimeFrame::M1 => 1,
            TimeFrame::M5 => 5,
        }
    }

    pub fn to_milliseconds(&self) -> u64 {
        self.to_minutes() * 60 * 1000
    }

    pub fn duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.to_minutes() as i64)
    }
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Trade direction on the futures contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn opposite(&self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    /// +1 for long, -1 for short; multiplies (exit - entry) into signed PnL.
    pub fn sign(&self) -> rust_decimal::Decimal {
        match self {
            Direction::Long => rust_decimal::Decimal::ONE,
            Direction::Short => -rust_decimal::Decimal::ONE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Limit,
    Market,
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderKind::Limit => write!(f, "LIMIT"),
            OrderKind::Market => write!(f, "MARKET"),
        }
    }
}
