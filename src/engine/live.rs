use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::database::Database;
use crate::exchange::DataFeed;
use crate::strategy::RangeBreakStrategy;
use crate::types::{Candle, CandleBuffer, TimeFrame, TradingPair};

use super::{BotController, ExecutionEngine, PortfolioManager};

const BUFFER_CAPACITY: usize = 300;
const INITIAL_CANDLES: u32 = 300;
const LATEST_CANDLES: u32 = 2;

/// Polls the exchange on a fixed interval and funnels the latest closed 1m
/// bar through the same strategy/execution path the backtest uses. One tick
/// failing logs, backs off and keeps the loop alive.
pub struct LiveDriver {
    config: RuntimeConfig,
    pair: TradingPair,
    feed: Arc<dyn DataFeed>,
    controller: Arc<BotController>,
    strategy: RangeBreakStrategy,
    execution: ExecutionEngine,
    buffer_1m: CandleBuffer,
    buffer_5m: CandleBuffer,
    last_processed_1m: Option<DateTime<Utc>>,
}

impl LiveDriver {
    pub fn new(
        config: RuntimeConfig,
        pair: TradingPair,
        feed: Arc<dyn DataFeed>,
        controller: Arc<BotController>,
        db: Option<Arc<Database>>,
    ) -> Self {
        let portfolio = Arc::new(RwLock::new(PortfolioManager::new(
            config.general.initial_capital,
            config.risk.clone(),
        )));
        let execution = ExecutionEngine::new(&config, portfolio, db);
        let strategy = RangeBreakStrategy::new(config.clone());
        Self {
            config,
            pair,
            feed,
            controller,
            strategy,
            execution,
            buffer_1m: CandleBuffer::new(BUFFER_CAPACITY),
            buffer_5m: CandleBuffer::new(BUFFER_CAPACITY),
            last_processed_1m: None,
        }
    }

    /// Seeds both sliding buffers so the strategy can evaluate immediately
    /// instead of waiting hours for history to accumulate.
    pub async fn initialize(&mut self) -> Result<()> {
        for (timeframe, buffer) in [
            (TimeFrame::M1, &mut self.buffer_1m),
            (TimeFrame::M5, &mut self.buffer_5m),
        ] {
            let candles = self
                .feed
                .fetch_candles(self.pair, timeframe, INITIAL_CANDLES, None)
                .await?;
            for candle in candles {
                buffer.upsert(candle);
            }
            info!(
                "[{}] Loaded {} {} candles",
                self.pair,
                buffer.len(),
                timeframe
            );
        }
        Ok(())
    }

    pub async fn run(&mut self) -> Result<()> {
        self.initialize().await?;
        let tick_interval = std::time::Duration::from_millis(self.config.general.tick_interval_ms);
        info!(
            "[{}] Live loop started, tick every {:?}",
            self.pair, tick_interval
        );

        while self.controller.is_running() {
            match self.tick(Utc::now()).await {
                Ok(()) => tokio::time::sleep(tick_interval).await,
                Err(err) => {
                    warn!("[{}] Tick failed: {}", self.pair, err);
                    // Back off before retrying so a flapping feed does not
                    // hammer the API.
                    tokio::time::sleep(tick_interval * 2).await;
                }
            }
        }

        info!("[{}] Live loop stopped", self.pair);
        Ok(())
    }

    /// One poll cycle: refresh the buffers, advance the execution engine on
    /// the newest closed 1m bar, then let the strategy speak.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<()> {
        for (timeframe, buffer) in [
            (TimeFrame::M1, &mut self.buffer_1m),
            (TimeFrame::M5, &mut self.buffer_5m),
        ] {
            let latest = self
                .feed
                .fetch_candles(self.pair, timeframe, LATEST_CANDLES, None)
                .await?;
            for candle in latest {
                buffer.upsert(candle);
            }
        }

        let closed_1m = closed_prefix(self.buffer_1m.as_slice(), now);
        let current = match closed_1m.last() {
            Some(c) => c.clone(),
            None => return Ok(()),
        };
        if self.last_processed_1m == Some(current.open_time) {
            debug!("[{}] No new closed 1m bar", self.pair);
            return Ok(());
        }
        self.last_processed_1m = Some(current.open_time);

        self.execution.portfolio().write().await.reset_daily_stats(now);

        let events = self.execution.on_market_data(&current).await?;
        for event in &events {
            self.strategy.on_execution_event(event);
        }

        let window_5m = closed_prefix(self.buffer_5m.as_slice(), now);
        let window_1m = &closed_1m[..closed_1m.len() - 1];
        let signal = self
            .strategy
            .generate_signal(self.pair, window_5m, window_1m, now);
        if let Some(signal) = signal {
            if self.execution.place_order(signal).await? {
                self.strategy.on_order_placed(self.pair, now);
            }
        }

        let balance = self.execution.portfolio().read().await.balance();
        self.execution
            .portfolio()
            .write()
            .await
            .record_equity(now, balance);
        Ok(())
    }
}

/// Bars that had fully closed by `now`; the trailing in-progress candle from
/// the feed never reaches the pipeline.
fn closed_prefix(candles: &[Candle], now: DateTime<Utc>) -> &[Candle] {
    let end = candles.partition_point(|c| c.close_time <= now);
    &candles[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::MockDataFeed;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    fn flat_bar(timeframe: TimeFrame, minutes: i64) -> Candle {
        let open_time = t0() + Duration::minutes(minutes);
        Candle {
            pair: TradingPair::BTCUSDT,
            timeframe,
            open_time,
            close_time: open_time + timeframe.duration(),
            open: dec!(100),
            high: dec!(100.5),
            low: dec!(99.5),
            close: dec!(100),
            volume: dec!(10),
            taker_buy_volume: None,
        }
    }

    fn driver(feed: MockDataFeed) -> LiveDriver {
        LiveDriver::new(
            RuntimeConfig::default(),
            TradingPair::BTCUSDT,
            Arc::new(feed),
            Arc::new(BotController::new_running()),
            None,
        )
    }

    #[tokio::test]
    async fn initialize_seeds_both_buffers() {
        let mut feed = MockDataFeed::new();
        feed.expect_fetch_candles()
            .returning(|_, timeframe, limit, _| {
                Ok((0..limit as i64)
                    .map(|i| flat_bar(timeframe, i * timeframe.to_minutes() as i64))
                    .collect())
            });

        let mut driver = driver(feed);
        driver.initialize().await.unwrap();
        assert_eq!(driver.buffer_1m.len(), 300);
        assert_eq!(driver.buffer_5m.len(), 300);
    }

    #[tokio::test]
    async fn tick_skips_an_already_processed_bar() {
        let mut feed = MockDataFeed::new();
        feed.expect_fetch_candles()
            .returning(|_, timeframe, _, _| Ok(vec![flat_bar(timeframe, 0)]));

        let mut driver = driver(feed);
        let now = t0() + Duration::minutes(10);
        driver.tick(now).await.unwrap();
        assert_eq!(driver.last_processed_1m, Some(t0()));

        // Same bar again: nothing advances, nothing breaks.
        driver.tick(now).await.unwrap();
        assert_eq!(driver.last_processed_1m, Some(t0()));
    }

    #[tokio::test]
    async fn tick_ignores_the_in_progress_bar() {
        let now = t0() + Duration::minutes(1) + Duration::seconds(30);
        let mut feed = MockDataFeed::new();
        feed.expect_fetch_candles()
            .returning(|_, timeframe, _, _| {
                // Bar at minute 1 is still forming at `now`.
                Ok(vec![flat_bar(timeframe, 0), flat_bar(timeframe, 1)])
            });

        let mut driver = driver(feed);
        driver.tick(now).await.unwrap();
        // Only the closed minute-0 bar was consumed.
        assert_eq!(driver.last_processed_1m, Some(t0()));
    }

    #[tokio::test]
    async fn feed_error_propagates_for_the_loop_to_back_off() {
        let mut feed = MockDataFeed::new();
        feed.expect_fetch_candles()
            .returning(|_, _, _, _| Err(anyhow::anyhow!("boom")));

        let mut driver = driver(feed);
        assert!(driver.tick(t0()).await.is_err());
    }

    #[test]
    fn closed_prefix_splits_on_close_time() {
        let candles = vec![flat_bar(TimeFrame::M1, 0), flat_bar(TimeFrame::M1, 1)];
        let now = t0() + Duration::minutes(1) + Duration::seconds(10);
        assert_eq!(closed_prefix(&candles, now).len(), 1);
        let later = t0() + Duration::minutes(5);
        assert_eq!(closed_prefix(&candles, later).len(), 2);
        assert_eq!(closed_prefix(&candles, t0()).len(), 0);
    }
}
