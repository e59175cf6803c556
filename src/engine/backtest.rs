use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::database::Database;
use crate::exchange::DataFeed;
use crate::strategy::RangeBreakStrategy;
use crate::types::{Candle, ExitReason, TimeFrame, TradingPair};

use super::{BacktestReport, ExecutionEngine, ExecutionEvent, PortfolioManager};

/// Strategy warm-up before the clock starts ticking.
const WARMUP_5M_BARS: i64 = 200;
/// Store coverage below this share of the expected candle count triggers a
/// backfill from the data feed.
const COVERAGE_PCT: i64 = 95;

struct SymbolSeries {
    candles_1m: Vec<Candle>,
    candles_5m: Vec<Candle>,
    /// Index of the next unprocessed 1m candle.
    next_1m: usize,
    /// Number of 5m candles whose close time has passed the cursor.
    closed_5m: usize,
}

/// Replays history through the strategy and the execution simulator from a
/// single minute-granular clock. Every symbol's tick for a minute completes
/// before the next minute begins, and each component only ever sees bars
/// that had closed by the cursor.
pub struct BacktestDriver {
    config: RuntimeConfig,
    pairs: Vec<TradingPair>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    feed: Arc<dyn DataFeed>,
    db: Arc<Database>,
}

impl BacktestDriver {
    pub fn new(
        config: RuntimeConfig,
        pairs: Vec<TradingPair>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        feed: Arc<dyn DataFeed>,
        db: Arc<Database>,
    ) -> Self {
        Self {
            config,
            pairs,
            start,
            end,
            feed,
            db,
        }
    }

    pub async fn run(&mut self) -> Result<BacktestReport> {
        info!(
            "Backtest {} to {} over {:?}",
            self.start, self.end, self.pairs
        );

        for pair in self.pairs.clone() {
            for timeframe in [TimeFrame::M5, TimeFrame::M1] {
                self.ensure_coverage(pair, timeframe).await?;
            }
        }

        let mut series_map: HashMap<TradingPair, SymbolSeries> = HashMap::new();
        let mut min_time: Option<DateTime<Utc>> = None;
        let mut max_time: Option<DateTime<Utc>> = None;
        for pair in &self.pairs {
            let candles_1m = self
                .db
                .get_candles(*pair, TimeFrame::M1, self.start, self.end)
                .await?;
            let candles_5m = self
                .db
                .get_candles(*pair, TimeFrame::M5, self.start, self.end)
                .await?;
            for first in candles_1m.first().iter().chain(candles_5m.first().iter()) {
                min_time = Some(min_time.map_or(first.open_time, |t| t.min(first.open_time)));
            }
            if let Some(last) = candles_1m.last() {
                max_time = Some(max_time.map_or(last.open_time, |t| t.max(last.open_time)));
            }
            series_map.insert(
                *pair,
                SymbolSeries {
                    candles_1m,
                    candles_5m,
                    next_1m: 0,
                    closed_5m: 0,
                },
            );
        }

        let min_time = min_time.ok_or_else(|| anyhow!("no candle data in store"))?;
        let max_time = max_time.ok_or_else(|| anyhow!("no 1m candle data in store"))?;

        let warm_start = min_time + Duration::minutes(WARMUP_5M_BARS * 5);
        for series in series_map.values_mut() {
            series.next_1m = series
                .candles_1m
                .partition_point(|c| c.open_time < warm_start);
        }

        let portfolio = Arc::new(RwLock::new(PortfolioManager::new(
            self.config.general.initial_capital,
            self.config.risk.clone(),
        )));
        let mut execution = ExecutionEngine::new(
            &self.config,
            Arc::clone(&portfolio),
            Some(Arc::clone(&self.db)),
        );
        let mut strategy = RangeBreakStrategy::new(self.config.clone());

        let mut expired_setups = 0usize;
        let mut last_equity_day: Option<NaiveDate> = None;
        let mut t = warm_start;

        info!("Clock runs {} to {}", warm_start, max_time);
        while t <= max_time {
            portfolio.write().await.reset_daily_stats(t);

            for pair in &self.pairs {
                let series = match series_map.get_mut(pair) {
                    Some(series) => series,
                    None => continue,
                };

                while series.closed_5m < series.candles_5m.len()
                    && series.candles_5m[series.closed_5m].close_time <= t
                {
                    series.closed_5m += 1;
                }

                while series.next_1m < series.candles_1m.len()
                    && series.candles_1m[series.next_1m].open_time <= t
                {
                    let index = series.next_1m;
                    series.next_1m += 1;
                    let candle = series.candles_1m[index].clone();

                    let events = execution.on_market_data(&candle).await?;
                    for event in &events {
                        if matches!(event, ExecutionEvent::OrderExpired { .. }) {
                            expired_setups += 1;
                        }
                        strategy.on_execution_event(event);
                    }

                    // The strategy sees closed 5m bars and 1m bars strictly
                    // before the bar the engine just consumed.
                    let window_5m = &series.candles_5m[..series.closed_5m];
                    let window_1m = &series.candles_1m[..index];
                    if let Some(signal) = strategy.generate_signal(*pair, window_5m, window_1m, t)
                    {
                        if execution.place_order(signal).await? {
                            strategy.on_order_placed(*pair, t);
                        }
                    }
                }
            }

            let day = t.date_naive();
            if last_equity_day != Some(day) {
                let balance = portfolio.read().await.balance();
                portfolio.write().await.record_equity(t, balance);
                last_equity_day = Some(day);
            }

            t += Duration::minutes(1);
        }

        for pair in self.pairs.clone() {
            if let Some(event) = execution
                .force_close_position(pair, ExitReason::EndOfBacktest)
                .await?
            {
                strategy.on_execution_event(&event);
            }
        }
        {
            let balance = portfolio.read().await.balance();
            portfolio.write().await.record_equity(max_time, balance);
        }

        let portfolio = portfolio.read().await;
        let report = BacktestReport::from_run(
            self.start,
            self.end,
            self.config.general.initial_capital,
            portfolio.balance(),
            portfolio.max_drawdown_pct(),
            execution.closed_trades().to_vec(),
            expired_setups,
        );
        Ok(report)
    }

    /// Downloads the missing stretch when the store covers less than 95% of
    /// the expected candle count, resuming after the most recent stored
    /// candle. A feed failure stops the backfill; the run proceeds with
    /// whatever the store holds.
    async fn ensure_coverage(&self, pair: TradingPair, timeframe: TimeFrame) -> Result<()> {
        let expected = (self.end - self.start).num_minutes() / timeframe.to_minutes() as i64 + 1;
        if expected <= 0 {
            return Ok(());
        }
        let count = self
            .db
            .count_in_range(pair, timeframe, self.start, self.end)
            .await?;
        if count * 100 >= expected * COVERAGE_PCT {
            debug!(
                "{} {} coverage ok: {}/{} candles",
                pair, timeframe, count, expected
            );
            return Ok(());
        }

        info!(
            "Backfilling {} {}: {}/{} candles stored",
            pair, timeframe, count, expected
        );
        let mut cursor = match self.db.get_last_candle(pair, timeframe).await? {
            Some(last) if last.open_time >= self.start => last.open_time + timeframe.duration(),
            _ => self.start,
        };

        while cursor <= self.end {
            let batch = match self
                .feed
                .fetch_candles(pair, timeframe, 1000, Some(cursor))
                .await
            {
                Ok(batch) => batch,
                Err(err) => {
                    warn!("Backfill halted for {} {}: {}", pair, timeframe, err);
                    break;
                }
            };
            let batch_end = match batch.last() {
                Some(last) => last.open_time,
                None => break,
            };
            let keep: Vec<Candle> = batch
                .into_iter()
                .filter(|c| c.open_time <= self.end)
                .collect();
            self.db.save_candles(&keep).await?;
            if batch_end < cursor {
                break;
            }
            cursor = batch_end + timeframe.duration();
        }
        Ok(())
    }
}
