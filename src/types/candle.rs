#![allow(dead_code)]
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{TimeFrame, TradingPair};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub pair: TradingPair,
    pub timeframe: TimeFrame,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    /// Taker-buy base volume where the feed provides it.
    pub taker_buy_volume: Option<Decimal>,
}

impl Candle {
    pub fn body_size(&self) -> Decimal {
        (self.close - self.open).abs()
    }

    pub fn range(&self) -> Decimal {
        self.high - self.low
    }

    pub fn upper_wick(&self) -> Decimal {
        self.high - self.close.max(self.open)
    }

    pub fn lower_wick(&self) -> Decimal {
        self.close.min(self.open) - self.low
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    pub fn body_percentage(&self) -> Decimal {
        let range = self.range();
        if range.is_zero() {
            return Decimal::ZERO;
        }
        (self.body_size() / range) * Decimal::from(100)
    }

    pub fn typical_price(&self) -> Decimal {
        (self.high + self.low + self.close) / Decimal::from(3)
    }

    pub fn buy_volume(&self) -> Decimal {
        self.taker_buy_volume.unwrap_or(Decimal::ZERO)
    }

    pub fn sell_volume(&self) -> Decimal {
        match self.taker_buy_volume {
            Some(buy) => self.volume - buy,
            None => Decimal::ZERO,
        }
    }

    /// Signed taker delta: buy volume minus sell volume, zero without the split.
    pub fn delta(&self) -> Decimal {
        match self.taker_buy_volume {
            Some(buy) => buy - (self.volume - buy),
            None => Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CandleBuffer {
    pub candles: Vec<Candle>,
    pub max_size: usize,
}

impl CandleBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            candles: Vec::with_capacity(max_size),
            max_size,
        }
    }

    pub fn push(&mut self, candle: Candle) {
        if self.candles.len() >= self.max_size {
            self.candles.remove(0);
        }
        self.candles.push(candle);
    }

    /// Insert or replace by open time. The live feed re-sends the current bar
    /// until it closes, so a matching timestamp overwrites in place.
    pub fn upsert(&mut self, candle: Candle) {
        if let Some(last) = self.candles.last_mut() {
            if last.open_time == candle.open_time {
                *last = candle;
                return;
            }
            if candle.open_time < last.open_time {
                if let Some(slot) = self
                    .candles
                    .iter_mut()
                    .find(|c| c.open_time == candle.open_time)
                {
                    *slot = candle;
                }
                return;
            }
        }
        self.push(candle);
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn last_n(&self, n: usize) -> &[Candle] {
        let len = self.candles.len();
        if n >= len {
            &self.candles[..]
        } else {
            &self.candles[len - n..]
        }
    }

    pub fn as_slice(&self) -> &[Candle] {
        &self.candles
    }

    pub fn closes(&self) -> Vec<Decimal> {
        self.candles.iter().map(|c| c.close).collect()
    }

    pub fn volumes(&self) -> Vec<Decimal> {
        self.candles.iter().map(|c| c.volume).collect()
    }
}
