pub mod breakout;
pub mod pullback;
pub mod range;
pub mod regime;
pub mod state;

pub use breakout::*;
pub use pullback::*;
pub use range::*;
pub use regime::*;
pub use state::*;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::engine::ExecutionEvent;
use crate::indicators::{atr, ema, sma, vwap};
use crate::types::{
    BreakoutSignal, Candle, Direction, MarketRange, OrderKind, TradingPair, TradingSignal,
};

const ATR_PERIOD: usize = 14;
const TREND_EMA_PERIOD: usize = 200;
const STOP_ATR_MULTIPLIER: Decimal = dec!(0.4);
const STOP_MIN_PRICE_FRACTION: Decimal = dec!(0.005);
const LIMIT_OFFSET: Decimal = dec!(0.002);

#[derive(Debug, Clone, Copy, Default)]
pub struct IndicatorSnapshot {
    pub atr: Decimal,
    pub ema_trend: Decimal,
    pub volume_sma: Decimal,
}

/// Everything the orchestrator tracks for one symbol. No cross-symbol state
/// lives here.
#[derive(Debug, Clone)]
pub struct SymbolContext {
    machine: StateMachine,
    range: Option<MarketRange>,
    breakout: Option<BreakoutSignal>,
    snapshot: IndicatorSnapshot,
    last_processed_5m: Option<DateTime<Utc>>,
}

impl SymbolContext {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            machine: StateMachine::new(now),
            range: None,
            breakout: None,
            snapshot: IndicatorSnapshot::default(),
            last_processed_5m: None,
        }
    }

    fn reset(&mut self, now: DateTime<Utc>) {
        self.machine.force_reset(now);
        self.range = None;
        self.breakout = None;
    }
}

/// Session VWAP anchored to the current UTC day within the supplied 1m
/// window. The anchor never drifts across backtest reruns because it depends
/// only on the candles passed in.
pub fn session_vwap(candles_1m: &[Candle], now: DateTime<Utc>) -> Decimal {
    let today = now.date_naive();
    let start = candles_1m
        .iter()
        .position(|c| c.open_time.date_naive() == today);
    match start {
        Some(idx) => vwap(&candles_1m[idx..]),
        None => Decimal::ZERO,
    }
}

/// Per-symbol range-break pullback pipeline. Consumes the regime filter and
/// the three detectors, and emits at most one signal per symbol per tick.
pub struct RangeBreakStrategy {
    config: RuntimeConfig,
    regime: RegimeFilter,
    range_detector: RangeDetector,
    breakout_detector: BreakoutDetector,
    pullback_validator: PullbackValidator,
    contexts: HashMap<TradingPair, SymbolContext>,
}

impl RangeBreakStrategy {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            regime: RegimeFilter::new(config.regime.clone()),
            range_detector: RangeDetector::new(config.range.clone()),
            breakout_detector: BreakoutDetector::new(config.breakout.clone()),
            pullback_validator: PullbackValidator::new(config.pullback.clone()),
            config,
            contexts: HashMap::new(),
        }
    }

    pub fn state(&self, pair: TradingPair) -> StrategyState {
        self.contexts
            .get(&pair)
            .map(|ctx| ctx.machine.state())
            .unwrap_or(StrategyState::Idle)
    }

    pub fn frozen_range(&self, pair: TradingPair) -> Option<MarketRange> {
        self.contexts.get(&pair).and_then(|ctx| ctx.range)
    }

    /// Driver-initiated reset; clears all per-symbol context.
    pub fn force_reset(&mut self, pair: TradingPair, now: DateTime<Utc>) {
        if let Some(ctx) = self.contexts.get_mut(&pair) {
            ctx.reset(now);
        }
    }

    /// Called by the driver after the execution engine accepted the order.
    /// A rejected order leaves the machine in WAIT_PULLBACK.
    pub fn on_order_placed(&mut self, pair: TradingPair, now: DateTime<Utc>) {
        if let Some(ctx) = self.contexts.get_mut(&pair) {
            let _ = ctx.machine.transition(StrategyState::LimitOrderPlaced, now);
        }
    }

    /// Mirrors fills, expiries and closes from the execution engine into the
    /// per-symbol automaton.
    pub fn on_execution_event(&mut self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::OrderFilled { pair, time, .. } => {
                if let Some(ctx) = self.contexts.get_mut(pair) {
                    let _ = ctx.machine.transition(StrategyState::InPosition, *time);
                }
            }
            ExecutionEvent::OrderExpired { pair, time } => {
                info!("[{}] Limit order expired, abandoning setup", pair);
                self.force_reset(*pair, *time);
            }
            ExecutionEvent::PositionClosed {
                pair, reason, time, ..
            } => {
                if let Some(ctx) = self.contexts.get_mut(pair) {
                    debug!("[{}] Position closed ({}), cycling to idle", pair, reason);
                    let _ = ctx.machine.transition(StrategyState::Exit, *time);
                    ctx.reset(*time);
                }
            }
        }
    }

    /// One tick of the pipeline. `candles_5m` must contain only closed 5m
    /// bars and `candles_1m` only bars strictly before the bar the execution
    /// engine is processing; the drivers enforce both.
    pub fn generate_signal(
        &mut self,
        pair: TradingPair,
        candles_5m: &[Candle],
        candles_1m: &[Candle],
        now: DateTime<Utc>,
    ) -> Option<TradingSignal> {
        let ctx = self
            .contexts
            .entry(pair)
            .or_insert_with(|| SymbolContext::new(now));

        // Pullback wait expired: walk the setup back to idle.
        if ctx.machine.state() == StrategyState::WaitPullback {
            let waited = now - ctx.machine.entered_at();
            if waited > Duration::minutes(self.config.pullback.max_wait_minutes as i64) {
                info!(
                    "[{}] No pullback within {} minutes, abandoning setup",
                    pair, self.config.pullback.max_wait_minutes
                );
                ctx.reset(now);
                return None;
            }
        }

        // 5m housekeeping runs once per newly closed 5m bar.
        if let Some(last_5m) = candles_5m.last() {
            let is_new_bar = ctx
                .last_processed_5m
                .map_or(true, |t| last_5m.open_time > t);
            if is_new_bar {
                ctx.last_processed_5m = Some(last_5m.open_time);
                ctx.snapshot = IndicatorSnapshot {
                    atr: atr(candles_5m, ATR_PERIOD),
                    ema_trend: ema(
                        &candles_5m.iter().map(|c| c.close).collect::<Vec<_>>(),
                        TREND_EMA_PERIOD,
                    ),
                    volume_sma: sma(
                        &candles_5m.iter().map(|c| c.volume).collect::<Vec<_>>(),
                        self.config.breakout.volume_period,
                    ),
                };

                match ctx.machine.state() {
                    StrategyState::Idle => {
                        if self.regime.is_tradable(candles_5m) {
                            if let Some(range) =
                                self.range_detector.detect(candles_5m, ctx.snapshot.atr)
                            {
                                info!(
                                    "[{}] Range frozen: [{}, {}] size {}",
                                    pair,
                                    range.low,
                                    range.high,
                                    range.size()
                                );
                                ctx.range = Some(range);
                                let _ = ctx
                                    .machine
                                    .transition(StrategyState::RangeDefined, now);
                            }
                        }
                    }
                    StrategyState::RangeDefined => {
                        if let Some(range) = ctx.range {
                            if let Some(breakout) = self.breakout_detector.detect(
                                last_5m,
                                &range,
                                ctx.snapshot.atr,
                                ctx.snapshot.volume_sma,
                            ) {
                                if trend_confirms(
                                    breakout.direction,
                                    last_5m.close,
                                    ctx.snapshot.ema_trend,
                                ) {
                                    info!(
                                        "[{}] {} breakout at {} (impulse {})",
                                        pair,
                                        breakout.direction,
                                        breakout.break_price,
                                        breakout.impulse_size
                                    );
                                    ctx.breakout = Some(breakout);
                                    let _ = ctx
                                        .machine
                                        .transition(StrategyState::BreakoutDetected, now);
                                    let _ =
                                        ctx.machine.transition(StrategyState::WaitPullback, now);
                                } else {
                                    debug!(
                                        "[{}] Breakout against the trend EMA, ignored",
                                        pair
                                    );
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        // 1m evaluation: only the pullback hunt acts between 5m bars.
        if ctx.machine.state() != StrategyState::WaitPullback {
            return None;
        }
        let (range, breakout) = match (ctx.range, ctx.breakout) {
            (Some(r), Some(b)) => (r, b),
            _ => return None,
        };
        let current_1m = candles_1m.last()?;
        let vwap_now = session_vwap(candles_1m, now);

        if !self
            .pullback_validator
            .is_valid(current_1m, &breakout, &range, vwap_now)
        {
            return None;
        }

        let anchor = PullbackValidator::anchor(&range, breakout.direction, vwap_now);
        let limit = match breakout.direction {
            Direction::Long => anchor * (Decimal::ONE - LIMIT_OFFSET),
            Direction::Short => anchor * (Decimal::ONE + LIMIT_OFFSET),
        };
        let stop_distance =
            (ctx.snapshot.atr * STOP_ATR_MULTIPLIER).max(limit * STOP_MIN_PRICE_FRACTION);
        let (stop_loss, take_profit) = match breakout.direction {
            Direction::Long => (
                limit - stop_distance,
                limit + stop_distance * self.config.risk.rr_ratio,
            ),
            Direction::Short => (
                limit + stop_distance,
                limit - stop_distance * self.config.risk.rr_ratio,
            ),
        };

        let signal = TradingSignal {
            pair,
            direction: breakout.direction,
            order_kind: OrderKind::Limit,
            price: limit,
            stop_loss,
            take_profit,
            emitted_at: now,
            reason: format!(
                "pullback to {} after {} range break",
                anchor, breakout.direction
            ),
        };

        if let Err(err) = signal.validate() {
            warn!("[{}] Discarding malformed signal: {}", pair, err);
            ctx.reset(now);
            return None;
        }

        info!(
            "[{}] Signal: {} LIMIT @ {} SL {} TP {}",
            pair, signal.direction, signal.price, signal.stop_loss, signal.take_profit
        );
        Some(signal)
    }
}

/// EMA(200) trend gate: longs above, shorts below. An unavailable EMA fails
/// the gate rather than waving the breakout through.
fn trend_confirms(direction: Direction, close: Decimal, ema_trend: Decimal) -> bool {
    if ema_trend.is_zero() {
        return false;
    }
    match direction {
        Direction::Long => close > ema_trend,
        Direction::Short => close < ema_trend,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimeFrame;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    fn candle_5m(
        index: i64,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Candle {
        let open_time = t0() + Duration::minutes(index * 5);
        Candle {
            pair: TradingPair::BTCUSDT,
            timeframe: TimeFrame::M5,
            open_time,
            close_time: open_time + Duration::minutes(5),
            open,
            high,
            low,
            close,
            volume,
            taker_buy_volume: None,
        }
    }

    fn candle_1m(
        minutes_after: i64,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
    ) -> Candle {
        let open_time = t0() + Duration::minutes(minutes_after);
        Candle {
            pair: TradingPair::BTCUSDT,
            timeframe: TimeFrame::M1,
            open_time,
            close_time: open_time + Duration::minutes(1),
            open,
            high,
            low,
            close,
            volume: Decimal::ZERO,
            taker_buy_volume: None,
        }
    }

    /// 210 bars of a two-up-one-down zigzag around 500: ADX sits near 33,
    /// ATR near 4, and the trailing 30-bar bracket is ~2.3 ATRs wide, so the
    /// regime filter and the range detector both accept it.
    fn zigzag_history() -> Vec<Candle> {
        let mut base = dec!(500);
        (0..210)
            .map(|i| {
                base += if i % 3 == 2 { dec!(-0.5) } else { dec!(0.5) };
                candle_5m(i, base, base + dec!(2), base - dec!(2), base, dec!(100))
            })
            .collect()
    }

    fn strategy() -> RangeBreakStrategy {
        RangeBreakStrategy::new(RuntimeConfig::default())
    }

    fn drive_to_wait_pullback(
        strategy: &mut RangeBreakStrategy,
        candles: &mut Vec<Candle>,
    ) -> (MarketRange, Decimal) {
        let pair = TradingPair::BTCUSDT;
        let now = candles.last().unwrap().close_time;
        assert!(strategy.generate_signal(pair, candles, &[], now).is_none());
        assert_eq!(strategy.state(pair), StrategyState::RangeDefined);
        let range = strategy.frozen_range(pair).unwrap();

        // Breakout bar: dominant body, elevated volume, close well beyond
        // the boundary plus the ATR margin.
        let open = candles.last().unwrap().close;
        let close = range.high + dec!(1);
        let bar = candle_5m(
            candles.len() as i64,
            open,
            close + dec!(0.3),
            open - dec!(0.3),
            close,
            dec!(150),
        );
        let now = bar.close_time;
        candles.push(bar);
        assert!(strategy.generate_signal(pair, candles, &[], now).is_none());
        assert_eq!(strategy.state(pair), StrategyState::WaitPullback);
        (range, close)
    }

    #[test]
    fn breakout_pullback_emits_limit_signal() {
        let pair = TradingPair::BTCUSDT;
        let mut strategy = strategy();
        let mut candles = zigzag_history();
        let (range, break_close) = drive_to_wait_pullback(&mut strategy, &mut candles);
        let impulse = break_close - range.high;
        assert_eq!(impulse, dec!(1));

        // 1m pullback: close within 0.2% of the boundary, low keeps more
        // than half the impulse.
        let minutes = (candles.len() as i64) * 5;
        let close = range.high + range.high * dec!(0.001);
        let pullback = candle_1m(
            minutes,
            close + dec!(0.2),
            close + dec!(0.3),
            range.high - dec!(0.3),
            close,
        );
        let now = pullback.close_time;
        let signal = strategy
            .generate_signal(pair, &candles, &[pullback], now)
            .expect("pullback should produce a signal");

        assert_eq!(signal.direction, Direction::Long);
        assert_eq!(signal.order_kind, OrderKind::Limit);
        assert_eq!(signal.price, range.high * dec!(0.998));
        let expected_stop = (atr(&candles, ATR_PERIOD) * dec!(0.4)).max(signal.price * dec!(0.005));
        assert_eq!(signal.stop_loss, signal.price - expected_stop);
        assert_eq!(
            signal.take_profit,
            signal.price + expected_stop * dec!(2.5)
        );
        assert!(signal.validate().is_ok());

        // The machine only advances once the order is accepted.
        assert_eq!(strategy.state(pair), StrategyState::WaitPullback);
        strategy.on_order_placed(pair, now);
        assert_eq!(strategy.state(pair), StrategyState::LimitOrderPlaced);
    }

    #[test]
    fn dead_regime_keeps_the_machine_idle() {
        let pair = TradingPair::BTCUSDT;
        let mut strategy = strategy();
        // Flat bars: ADX ~ 0, below the minimum band.
        let candles: Vec<Candle> = (0..210)
            .map(|i| {
                candle_5m(i, dec!(500), dec!(501), dec!(499), dec!(500), dec!(100))
            })
            .collect();
        let now = candles.last().unwrap().close_time;
        assert!(strategy.generate_signal(pair, &candles, &[], now).is_none());
        assert_eq!(strategy.state(pair), StrategyState::Idle);
    }

    #[test]
    fn pullback_wait_times_out_to_idle() {
        let pair = TradingPair::BTCUSDT;
        let mut strategy = strategy();
        let mut candles = zigzag_history();
        drive_to_wait_pullback(&mut strategy, &mut candles);

        let later = candles.last().unwrap().close_time + Duration::minutes(121);
        assert!(strategy
            .generate_signal(pair, &candles, &[], later)
            .is_none());
        assert_eq!(strategy.state(pair), StrategyState::Idle);
        assert!(strategy.frozen_range(pair).is_none());
    }

    #[test]
    fn execution_events_cycle_the_machine() {
        let pair = TradingPair::BTCUSDT;
        let mut strategy = strategy();
        let mut candles = zigzag_history();
        drive_to_wait_pullback(&mut strategy, &mut candles);
        let now = candles.last().unwrap().close_time;
        strategy.on_order_placed(pair, now);

        strategy.on_execution_event(&ExecutionEvent::OrderFilled {
            pair,
            price: dec!(500),
            time: now,
        });
        assert_eq!(strategy.state(pair), StrategyState::InPosition);

        strategy.on_execution_event(&ExecutionEvent::PositionClosed {
            pair,
            reason: crate::types::ExitReason::TakeProfit,
            exit_price: dec!(505),
            net_pnl: dec!(10),
            time: now,
        });
        assert_eq!(strategy.state(pair), StrategyState::Idle);
        assert!(strategy.frozen_range(pair).is_none());
    }

    #[test]
    fn expired_order_resets_the_setup() {
        let pair = TradingPair::BTCUSDT;
        let mut strategy = strategy();
        let mut candles = zigzag_history();
        drive_to_wait_pullback(&mut strategy, &mut candles);
        let now = candles.last().unwrap().close_time;
        strategy.on_order_placed(pair, now);

        strategy.on_execution_event(&ExecutionEvent::OrderExpired { pair, time: now });
        assert_eq!(strategy.state(pair), StrategyState::Idle);
    }
}
