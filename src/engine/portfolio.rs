use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::RiskSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquitySnapshot {
    pub timestamp: DateTime<Utc>,
    pub equity: Decimal,
    pub drawdown_pct: Decimal,
}

/// The only cross-symbol mutable state in the system. Touched by the
/// execution engine (fees, trade results) and the driver (daily reset,
/// equity snapshots); single-threaded scheduling makes locking unnecessary.
#[derive(Debug, Clone)]
pub struct PortfolioManager {
    risk: RiskSettings,
    balance: Decimal,
    initial_capital: Decimal,
    daily_loss: Decimal,
    consecutive_losses: u32,
    last_day_processed: Option<NaiveDate>,
    peak_equity: Decimal,
    max_drawdown_pct: Decimal,
    equity_curve: Vec<EquitySnapshot>,
}

impl PortfolioManager {
    pub fn new(initial_capital: Decimal, risk: RiskSettings) -> Self {
        Self {
            risk,
            balance: initial_capital,
            initial_capital,
            daily_loss: Decimal::ZERO,
            consecutive_losses: 0,
            last_day_processed: None,
            peak_equity: initial_capital,
            max_drawdown_pct: Decimal::ZERO,
            equity_curve: Vec::new(),
        }
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn initial_capital(&self) -> Decimal {
        self.initial_capital
    }

    pub fn daily_loss(&self) -> Decimal {
        self.daily_loss
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.consecutive_losses
    }

    pub fn peak_equity(&self) -> Decimal {
        self.peak_equity
    }

    pub fn max_drawdown_pct(&self) -> Decimal {
        self.max_drawdown_pct
    }

    pub fn equity_curve(&self) -> &[EquitySnapshot] {
        &self.equity_curve
    }

    /// Kill switch: no new trades once the daily loss or the losing streak
    /// crosses its threshold. Stays off until the next UTC day.
    pub fn can_trade(&self) -> bool {
        if self.balance <= Decimal::ZERO {
            return false;
        }
        let daily_loss_pct = self.daily_loss / self.balance * Decimal::from(100);
        if daily_loss_pct >= self.risk.max_daily_loss_pct {
            return false;
        }
        if self.consecutive_losses >= self.risk.max_consecutive_losses {
            return false;
        }
        true
    }

    /// Zeroes the rolling counters when the UTC calendar day changes.
    pub fn reset_daily_stats(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        match self.last_day_processed {
            Some(day) if day == today => {}
            Some(_) => {
                if !self.can_trade() {
                    info!("Kill switch released for {}", today);
                }
                self.daily_loss = Decimal::ZERO;
                self.consecutive_losses = 0;
                self.last_day_processed = Some(today);
            }
            None => {
                self.last_day_processed = Some(today);
            }
        }
    }

    pub fn deduct_fee(&mut self, fee: Decimal) {
        self.balance -= fee;
    }

    /// Settles a closed trade. The gross PnL moves the balance (both fees
    /// were already taken through `deduct_fee`); the streak and daily-loss
    /// counters run on the net result.
    pub fn apply_trade_result(&mut self, gross_pnl: Decimal, total_fees: Decimal) {
        self.balance += gross_pnl;
        let net_pnl = gross_pnl - total_fees;
        if net_pnl < Decimal::ZERO {
            self.daily_loss += net_pnl.abs();
            self.consecutive_losses += 1;
            if !self.can_trade() {
                warn!(
                    "Kill switch engaged: daily loss {} streak {}",
                    self.daily_loss, self.consecutive_losses
                );
            }
        } else {
            self.consecutive_losses = 0;
        }
    }

    /// Tracks peak equity and drawdown, and appends to the equity curve.
    pub fn record_equity(&mut self, now: DateTime<Utc>, equity: Decimal) {
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        let drawdown_pct = if self.peak_equity.is_zero() {
            Decimal::ZERO
        } else {
            (self.peak_equity - equity) / self.peak_equity * Decimal::from(100)
        };
        if drawdown_pct > self.max_drawdown_pct {
            self.max_drawdown_pct = drawdown_pct;
        }
        self.equity_curve.push(EquitySnapshot {
            timestamp: now,
            equity,
            drawdown_pct,
        });
    }
}
