use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ExecutionSettings, RiskSettings, RuntimeConfig};
use crate::database::Database;
use crate::types::{
    ActivePosition, Candle, Direction, ExitReason, OrderKind, PendingOrder, TradeRecord,
    TradeStatus, TradingPair, TradingSignal,
};

use super::PortfolioManager;

/// What the engine did with a candle; the driver feeds these back into the
/// strategy so its automaton mirrors the order lifecycle.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    OrderFilled {
        pair: TradingPair,
        price: Decimal,
        time: DateTime<Utc>,
    },
    OrderExpired {
        pair: TradingPair,
        time: DateTime<Utc>,
    },
    PositionClosed {
        pair: TradingPair,
        reason: ExitReason,
        exit_price: Decimal,
        net_pnl: Decimal,
        time: DateTime<Utc>,
    },
}

/// Simulated order lifecycle against the candle stream: queued orders fill on
/// later bars only, positions are managed with liquidation taking precedence
/// over the stop, and every fee goes through the shared portfolio.
pub struct ExecutionEngine {
    execution: ExecutionSettings,
    risk: RiskSettings,
    portfolio: Arc<RwLock<PortfolioManager>>,
    db: Option<Arc<Database>>,
    pending_limit: HashMap<TradingPair, PendingOrder>,
    pending_market: HashMap<TradingPair, PendingOrder>,
    positions: HashMap<TradingPair, ActivePosition>,
    last_candles: HashMap<TradingPair, Candle>,
    closed_trades: Vec<TradeRecord>,
}

impl ExecutionEngine {
    pub fn new(
        config: &RuntimeConfig,
        portfolio: Arc<RwLock<PortfolioManager>>,
        db: Option<Arc<Database>>,
    ) -> Self {
        Self {
            execution: config.execution.clone(),
            risk: config.risk.clone(),
            portfolio,
            db,
            pending_limit: HashMap::new(),
            pending_market: HashMap::new(),
            positions: HashMap::new(),
            last_candles: HashMap::new(),
            closed_trades: Vec::new(),
        }
    }

    pub fn has_position(&self, pair: TradingPair) -> bool {
        self.positions.contains_key(&pair)
    }

    pub fn has_pending_order(&self, pair: TradingPair) -> bool {
        self.pending_limit.contains_key(&pair) || self.pending_market.contains_key(&pair)
    }

    pub fn position(&self, pair: TradingPair) -> Option<&ActivePosition> {
        self.positions.get(&pair)
    }

    pub fn closed_trades(&self) -> &[TradeRecord] {
        &self.closed_trades
    }

    pub fn portfolio(&self) -> Arc<RwLock<PortfolioManager>> {
        Arc::clone(&self.portfolio)
    }

    /// Queues an order for the signal. Returns false (with a logged warning)
    /// when the kill switch is active or the symbol already carries a
    /// position or a pending order; the caller must not advance its state.
    pub async fn place_order(&mut self, signal: TradingSignal) -> Result<bool> {
        let pair = signal.pair;

        if !self.portfolio.read().await.can_trade() {
            warn!("[{}] Order rejected: kill switch active", pair);
            return Ok(false);
        }
        if self.has_position(pair) {
            warn!("[{}] Order rejected: position already open", pair);
            return Ok(false);
        }
        if self.has_pending_order(pair) {
            warn!("[{}] Order rejected: order already pending", pair);
            return Ok(false);
        }

        let stop_distance = signal.stop_distance();
        if stop_distance <= Decimal::ZERO {
            warn!("[{}] Order rejected: zero stop distance", pair);
            return Ok(false);
        }

        // Fixed-fractional sizing off the current balance.
        let balance = self.portfolio.read().await.balance();
        let risk_amount = balance * self.risk.risk_per_trade_pct / Decimal::from(100);
        let quantity = risk_amount / stop_distance;
        if quantity <= Decimal::ZERO {
            warn!("[{}] Order rejected: non-positive size", pair);
            return Ok(false);
        }

        let order = PendingOrder {
            enqueued_at: signal.emitted_at,
            quantity,
            signal,
        };

        info!(
            "[{}] {} {} order queued: {} @ {} (SL {} TP {})",
            pair,
            order.signal.direction,
            order.signal.order_kind,
            order.quantity,
            order.signal.price,
            order.signal.stop_loss,
            order.signal.take_profit
        );

        match order.signal.order_kind {
            OrderKind::Limit => self.pending_limit.insert(pair, order),
            // Market orders wait for the next bar's open.
            OrderKind::Market => self.pending_market.insert(pair, order),
        };
        Ok(true)
    }

    /// Removes any pending order for the symbol.
    pub fn cancel_order(&mut self, pair: TradingPair) -> bool {
        let removed = self.pending_limit.remove(&pair).is_some()
            || self.pending_market.remove(&pair).is_some();
        if removed {
            info!("[{}] Pending order cancelled", pair);
        }
        removed
    }

    /// Advances the pipeline for the candle's symbol: deferred market fills,
    /// limit fills and expiries, then position management. The one-bar delay
    /// is enforced by strict timestamp comparison everywhere.
    pub async fn on_market_data(&mut self, candle: &Candle) -> Result<Vec<ExecutionEvent>> {
        let pair = candle.pair;
        let mut events = Vec::new();

        let market_due = self
            .pending_market
            .get(&pair)
            .map_or(false, |order| candle.open_time > order.enqueued_at);
        if market_due {
            if let Some(order) = self.pending_market.remove(&pair) {
                let fill_price = match order.signal.direction {
                    Direction::Long => candle.open * (Decimal::ONE + self.execution.slippage),
                    Direction::Short => candle.open * (Decimal::ONE - self.execution.slippage),
                };
                events.push(self.open_position(order, fill_price, candle.open_time).await?);
            }
        }

        enum LimitAction {
            Keep,
            Expire,
            Fill,
        }
        let action = match self.pending_limit.get(&pair) {
            Some(order) if candle.open_time > order.enqueued_at => {
                let age = candle.open_time - order.enqueued_at;
                if age > Duration::minutes(self.execution.order_ttl_minutes as i64) {
                    LimitAction::Expire
                } else {
                    let touched = match order.signal.direction {
                        Direction::Long => candle.low <= order.signal.price,
                        Direction::Short => candle.high >= order.signal.price,
                    };
                    if touched {
                        LimitAction::Fill
                    } else {
                        LimitAction::Keep
                    }
                }
            }
            _ => LimitAction::Keep,
        };
        match action {
            LimitAction::Keep => {}
            LimitAction::Expire => {
                self.pending_limit.remove(&pair);
                info!("[{}] Limit order expired unfilled", pair);
                events.push(ExecutionEvent::OrderExpired {
                    pair,
                    time: candle.open_time,
                });
            }
            LimitAction::Fill => {
                if let Some(order) = self.pending_limit.remove(&pair) {
                    let half_slippage = self.execution.slippage / Decimal::from(2);
                    let fill_price = match order.signal.direction {
                        Direction::Long => order.signal.price * (Decimal::ONE + half_slippage),
                        Direction::Short => order.signal.price * (Decimal::ONE - half_slippage),
                    };
                    events.push(self.open_position(order, fill_price, candle.open_time).await?);
                }
            }
        }

        let trigger = match self.positions.get(&pair) {
            Some(position) if candle.open_time > position.opened_at => {
                let liquidation = position
                    .liquidation_price(self.execution.leverage, self.execution.maintenance_margin);
                match position.direction {
                    Direction::Long => {
                        if candle.low <= liquidation {
                            Some((liquidation, ExitReason::Liquidated))
                        } else if candle.low <= position.stop_loss {
                            Some((position.stop_loss, ExitReason::StopLoss))
                        } else if candle.high >= position.take_profit {
                            Some((position.take_profit, ExitReason::TakeProfit))
                        } else {
                            None
                        }
                    }
                    Direction::Short => {
                        if candle.high >= liquidation {
                            Some((liquidation, ExitReason::Liquidated))
                        } else if candle.high >= position.stop_loss {
                            Some((position.stop_loss, ExitReason::StopLoss))
                        } else if candle.low <= position.take_profit {
                            Some((position.take_profit, ExitReason::TakeProfit))
                        } else {
                            None
                        }
                    }
                }
            }
            _ => None,
        };
        if let Some((level, reason)) = trigger {
            if let Some(position) = self.positions.remove(&pair) {
                events.push(
                    self.close_position(position, level, reason, candle.open_time)
                        .await?,
                );
            }
        }

        self.last_candles.insert(pair, candle.clone());
        Ok(events)
    }

    /// Closes at the last known close price. Does nothing when no candle has
    /// been seen for the symbol.
    pub async fn force_close_position(
        &mut self,
        pair: TradingPair,
        reason: ExitReason,
    ) -> Result<Option<ExecutionEvent>> {
        let last = match self.last_candles.get(&pair) {
            Some(c) => c.clone(),
            None => {
                if self.positions.contains_key(&pair) {
                    debug!("[{}] Force close skipped: no candle history", pair);
                }
                return Ok(None);
            }
        };
        let position = match self.positions.remove(&pair) {
            Some(p) => p,
            None => return Ok(None),
        };
        let event = self
            .close_position(position, last.close, reason, last.close_time)
            .await?;
        Ok(Some(event))
    }

    async fn open_position(
        &mut self,
        order: PendingOrder,
        fill_price: Decimal,
        time: DateTime<Utc>,
    ) -> Result<ExecutionEvent> {
        let pair = order.signal.pair;
        let entry_fee = fill_price * order.quantity * self.execution.taker_fee;
        self.portfolio.write().await.deduct_fee(entry_fee);

        let trade_id = Uuid::new_v4().to_string();
        let position = ActivePosition {
            pair,
            direction: order.signal.direction,
            entry_price: fill_price,
            quantity: order.quantity,
            stop_loss: order.signal.stop_loss,
            take_profit: order.signal.take_profit,
            opened_at: time,
            entry_fee,
            trade_id: trade_id.clone(),
        };

        if let Some(db) = &self.db {
            let record = TradeRecord {
                id: trade_id,
                pair,
                direction: position.direction,
                entry_time: time,
                entry_price: fill_price,
                quantity: position.quantity,
                stop_loss: position.stop_loss,
                take_profit: position.take_profit,
                exit_time: None,
                exit_price: None,
                exit_reason: None,
                pnl: Decimal::ZERO,
                pnl_pct: Decimal::ZERO,
                status: TradeStatus::Open,
            };
            db.save_trade(&record).await?;
        }

        info!(
            "[{}] Filled {} {} @ {} (fee {})",
            pair, position.direction, position.quantity, fill_price, entry_fee
        );
        self.positions.insert(pair, position);

        Ok(ExecutionEvent::OrderFilled {
            pair,
            price: fill_price,
            time,
        })
    }

    async fn close_position(
        &mut self,
        position: ActivePosition,
        level: Decimal,
        reason: ExitReason,
        time: DateTime<Utc>,
    ) -> Result<ExecutionEvent> {
        // Exits cross the spread except at the resting take-profit.
        let exit_price = match position.direction {
            Direction::Long => level * (Decimal::ONE - self.execution.slippage),
            Direction::Short => level * (Decimal::ONE + self.execution.slippage),
        };
        let fee_rate = if reason == ExitReason::TakeProfit {
            self.execution.maker_fee
        } else {
            self.execution.taker_fee
        };
        let exit_fee = exit_price * position.quantity * fee_rate;
        let gross_pnl = position.gross_pnl(exit_price);
        let total_fees = position.entry_fee + exit_fee;
        let net_pnl = gross_pnl - total_fees;

        {
            let mut portfolio = self.portfolio.write().await;
            portfolio.deduct_fee(exit_fee);
            portfolio.apply_trade_result(gross_pnl, total_fees);
        }

        // The persisted PnL stays gross of fees so its sign always matches
        // the direction of the move; fee accounting lives in the portfolio.
        let entry_value = position.entry_price * position.quantity;
        let pnl_pct = if entry_value.is_zero() {
            Decimal::ZERO
        } else {
            gross_pnl / entry_value * Decimal::from(100)
        };

        let record = TradeRecord {
            id: position.trade_id.clone(),
            pair: position.pair,
            direction: position.direction,
            entry_time: position.opened_at,
            entry_price: position.entry_price,
            quantity: position.quantity,
            stop_loss: position.stop_loss,
            take_profit: position.take_profit,
            exit_time: Some(time),
            exit_price: Some(exit_price),
            exit_reason: Some(reason),
            pnl: gross_pnl,
            pnl_pct,
            status: TradeStatus::Closed,
        };

        if let Some(db) = &self.db {
            db.close_trade(&position.trade_id, exit_price, time, reason).await?;
        }

        info!(
            "[{}] Closed {} @ {} ({}): net {}",
            position.pair, position.direction, exit_price, reason, net_pnl
        );
        self.closed_trades.push(record);

        Ok(ExecutionEvent::PositionClosed {
            pair: position.pair,
            reason,
            exit_price,
            net_pnl,
            time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimeFrame;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn candle(minutes: i64, open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Candle {
        let open_time = t0() + Duration::minutes(minutes);
        Candle {
            pair: TradingPair::BTCUSDT,
            timeframe: TimeFrame::M1,
            open_time,
            close_time: open_time + Duration::minutes(1),
            open,
            high,
            low,
            close,
            volume: dec!(10),
            taker_buy_volume: None,
        }
    }

    fn signal(direction: Direction, price: Decimal, sl: Decimal, tp: Decimal) -> TradingSignal {
        TradingSignal {
            pair: TradingPair::BTCUSDT,
            direction,
            order_kind: OrderKind::Limit,
            price,
            stop_loss: sl,
            take_profit: tp,
            emitted_at: t0(),
            reason: "test setup".to_string(),
        }
    }

    /// Slippage zeroed so fills land exactly on the configured levels.
    fn engine() -> ExecutionEngine {
        let mut config = RuntimeConfig::default();
        config.execution.slippage = Decimal::ZERO;
        let portfolio = Arc::new(RwLock::new(PortfolioManager::new(
            dec!(10000),
            config.risk.clone(),
        )));
        ExecutionEngine::new(&config, portfolio, None)
    }

    #[tokio::test]
    async fn limit_order_never_fills_on_its_own_bar() {
        let mut engine = engine();
        assert!(engine
            .place_order(signal(Direction::Long, dec!(99.8), dec!(99.0), dec!(101.8)))
            .await
            .unwrap());

        // Same timestamp as the signal: must not fill even though it touches.
        let events = engine
            .on_market_data(&candle(0, dec!(100), dec!(100.2), dec!(99.5), dec!(100)))
            .await
            .unwrap();
        assert!(events.is_empty());
        assert!(!engine.has_position(TradingPair::BTCUSDT));

        // Next bar touches the limit: fills at the limit price.
        let events = engine
            .on_market_data(&candle(1, dec!(100), dec!(100.1), dec!(99.7), dec!(100)))
            .await
            .unwrap();
        assert!(matches!(
            events.as_slice(),
            [ExecutionEvent::OrderFilled { price, .. }] if *price == dec!(99.8)
        ));
        assert!(engine.has_position(TradingPair::BTCUSDT));
    }

    #[tokio::test]
    async fn take_profit_closes_with_maker_fee_and_exact_balance_delta() {
        let mut engine = engine();
        // Stop distance 100 on a 10k balance at 1% risk: size is exactly 1.
        assert!(engine
            .place_order(signal(Direction::Long, dec!(100), dec!(0), dec!(102)))
            .await
            .unwrap());

        engine
            .on_market_data(&candle(1, dec!(100.5), dec!(100.6), dec!(100), dec!(100.2)))
            .await
            .unwrap();
        let position = engine.position(TradingPair::BTCUSDT).unwrap();
        assert_eq!(position.entry_price, dec!(100));
        // Entry fee prepaid at the taker rate.
        assert_eq!(position.entry_fee, dec!(0.05));

        let events = engine
            .on_market_data(&candle(2, dec!(101), dec!(102.5), dec!(100.9), dec!(102)))
            .await
            .unwrap();
        let net = match events.as_slice() {
            [ExecutionEvent::PositionClosed {
                reason: ExitReason::TakeProfit,
                net_pnl,
                exit_price,
                ..
            }] => {
                assert_eq!(*exit_price, dec!(102));
                *net_pnl
            }
            other => panic!("unexpected events: {:?}", other),
        };

        // Gross 2, entry fee 0.05, exit fee 102 * 0.0002 = 0.0204.
        assert_eq!(net, dec!(1.9296));
        let balance = engine.portfolio().read().await.balance();
        assert_eq!(balance, dec!(10000) + dec!(1.9296));
        assert_eq!(engine.closed_trades().len(), 1);
    }

    #[tokio::test]
    async fn liquidation_beats_the_stop() {
        let mut engine = engine();
        // Quantity sizing aside, what matters: SL 92 sits above the 10x
        // liquidation level 90.5.
        assert!(engine
            .place_order(signal(Direction::Long, dec!(100), dec!(92), dec!(120)))
            .await
            .unwrap());
        engine
            .on_market_data(&candle(1, dec!(100.2), dec!(100.4), dec!(100), dec!(100.1)))
            .await
            .unwrap();
        assert!(engine.has_position(TradingPair::BTCUSDT));

        // One bar crosses both levels.
        let events = engine
            .on_market_data(&candle(2, dec!(99), dec!(99.5), dec!(90), dec!(91)))
            .await
            .unwrap();
        match events.as_slice() {
            [ExecutionEvent::PositionClosed {
                reason,
                exit_price,
                net_pnl,
                ..
            }] => {
                assert_eq!(*reason, ExitReason::Liquidated);
                assert_eq!(*exit_price, dec!(90.500));
                assert!(*net_pnl < Decimal::ZERO);
            }
            other => panic!("unexpected events: {:?}", other),
        }

        // The loss feeds the kill-switch counters.
        assert_eq!(engine.portfolio().read().await.consecutive_losses(), 1);
    }

    #[tokio::test]
    async fn market_order_fills_at_next_bar_open() {
        let mut engine = engine();
        let mut s = signal(Direction::Short, dec!(100), dec!(101), dec!(97.5));
        s.order_kind = OrderKind::Market;
        assert!(engine.place_order(s).await.unwrap());

        // Bar stamped at the enqueue time is skipped.
        let events = engine
            .on_market_data(&candle(0, dec!(100), dec!(100.5), dec!(99.5), dec!(100)))
            .await
            .unwrap();
        assert!(events.is_empty());

        let events = engine
            .on_market_data(&candle(1, dec!(99.9), dec!(100.2), dec!(99.4), dec!(99.5)))
            .await
            .unwrap();
        assert!(matches!(
            events.as_slice(),
            [ExecutionEvent::OrderFilled { price, .. }] if *price == dec!(99.9)
        ));
    }

    #[tokio::test]
    async fn unfilled_limit_expires_after_its_ttl() {
        let mut engine = engine();
        assert!(engine
            .place_order(signal(Direction::Long, dec!(99.8), dec!(99.0), dec!(101.8)))
            .await
            .unwrap());

        // Price never comes back down; 121 minutes later the order dies.
        let events = engine
            .on_market_data(&candle(121, dec!(102), dec!(102.5), dec!(101.5), dec!(102)))
            .await
            .unwrap();
        assert!(matches!(
            events.as_slice(),
            [ExecutionEvent::OrderExpired { .. }]
        ));
        assert!(!engine.has_pending_order(TradingPair::BTCUSDT));
        assert!(!engine.has_position(TradingPair::BTCUSDT));
    }

    #[tokio::test]
    async fn kill_switch_rejects_new_orders() {
        let mut engine = engine();
        {
            let portfolio = engine.portfolio();
            let mut portfolio = portfolio.write().await;
            for _ in 0..10 {
                portfolio.apply_trade_result(dec!(-10), Decimal::ZERO);
            }
            assert!(!portfolio.can_trade());
        }
        assert!(!engine
            .place_order(signal(Direction::Long, dec!(99.8), dec!(99.0), dec!(101.8)))
            .await
            .unwrap());
        assert!(!engine.has_pending_order(TradingPair::BTCUSDT));
    }

    #[tokio::test]
    async fn duplicate_orders_and_positions_are_rejected() {
        let mut engine = engine();
        assert!(engine
            .place_order(signal(Direction::Long, dec!(99.8), dec!(99.0), dec!(101.8)))
            .await
            .unwrap());
        // Second order while one is pending.
        assert!(!engine
            .place_order(signal(Direction::Long, dec!(99.9), dec!(99.1), dec!(101.9)))
            .await
            .unwrap());

        engine
            .on_market_data(&candle(1, dec!(100), dec!(100.1), dec!(99.7), dec!(100)))
            .await
            .unwrap();
        assert!(engine.has_position(TradingPair::BTCUSDT));
        // Third order while in a position.
        assert!(!engine
            .place_order(signal(Direction::Long, dec!(99.9), dec!(99.1), dec!(101.9)))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn cancel_removes_the_pending_order() {
        let mut engine = engine();
        assert!(engine
            .place_order(signal(Direction::Long, dec!(99.8), dec!(99.0), dec!(101.8)))
            .await
            .unwrap());
        assert!(engine.cancel_order(TradingPair::BTCUSDT));
        assert!(!engine.has_pending_order(TradingPair::BTCUSDT));
        assert!(!engine.cancel_order(TradingPair::BTCUSDT));
    }

    #[tokio::test]
    async fn force_close_uses_the_last_close() {
        let mut engine = engine();
        assert!(engine
            .place_order(signal(Direction::Long, dec!(99.8), dec!(99.0), dec!(101.8)))
            .await
            .unwrap());
        engine
            .on_market_data(&candle(1, dec!(100), dec!(100.1), dec!(99.7), dec!(100.4)))
            .await
            .unwrap();

        let event = engine
            .force_close_position(TradingPair::BTCUSDT, ExitReason::Manual)
            .await
            .unwrap()
            .expect("position should close");
        match event {
            ExecutionEvent::PositionClosed {
                reason, exit_price, ..
            } => {
                assert_eq!(reason, ExitReason::Manual);
                assert_eq!(exit_price, dec!(100.4));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(!engine.has_position(TradingPair::BTCUSDT));
    }

    #[tokio::test]
    async fn force_close_without_history_is_a_noop() {
        let mut engine = engine();
        let result = engine
            .force_close_position(TradingPair::BTCUSDT, ExitReason::Manual)
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
