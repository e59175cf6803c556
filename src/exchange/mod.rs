pub mod binance;

pub use binance::*;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::types::{Candle, TimeFrame, TradingPair};

/// Market-data port the drivers pull from. The backtest driver uses it to
/// backfill the candle store; the live driver polls it every tick.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DataFeed: Send + Sync {
    /// Fetch up to `limit` (max 1000) candles, oldest first, optionally
    /// starting at `start_time`.
    async fn fetch_candles(
        &self,
        pair: TradingPair,
        timeframe: TimeFrame,
        limit: u32,
        start_time: Option<DateTime<Utc>>,
    ) -> Result<Vec<Candle>>;

    async fn current_price(&self, pair: TradingPair) -> Result<Decimal>;
}
