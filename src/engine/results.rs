use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{ExitReason, TradeRecord};

/// Summary of a finished backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub initial_capital: Decimal,
    pub final_balance: Decimal,
    pub total_return_pct: Decimal,
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate_pct: Decimal,
    pub profit_factor: Decimal,
    pub max_drawdown_pct: Decimal,
    pub liquidations: usize,
    pub expired_setups: usize,
    pub trades: Vec<TradeRecord>,
}

impl BacktestReport {
    pub fn from_run(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        initial_capital: Decimal,
        final_balance: Decimal,
        max_drawdown_pct: Decimal,
        trades: Vec<TradeRecord>,
        expired_setups: usize,
    ) -> Self {
        let total_trades = trades.len();
        let wins = trades.iter().filter(|t| t.pnl > Decimal::ZERO).count();
        let losses = total_trades - wins;
        let liquidations = trades
            .iter()
            .filter(|t| t.exit_reason == Some(ExitReason::Liquidated))
            .count();

        let win_rate_pct = if total_trades > 0 {
            Decimal::from(wins as u64) / Decimal::from(total_trades as u64) * Decimal::from(100)
        } else {
            Decimal::ZERO
        };

        let gross_wins: Decimal = trades
            .iter()
            .filter(|t| t.pnl > Decimal::ZERO)
            .map(|t| t.pnl)
            .sum();
        let gross_losses: Decimal = trades
            .iter()
            .filter(|t| t.pnl <= Decimal::ZERO)
            .map(|t| t.pnl.abs())
            .sum();
        let profit_factor = if gross_losses.is_zero() {
            gross_wins
        } else {
            gross_wins / gross_losses
        };

        let total_return_pct = if initial_capital.is_zero() {
            Decimal::ZERO
        } else {
            (final_balance - initial_capital) / initial_capital * Decimal::from(100)
        };

        Self {
            start,
            end,
            initial_capital,
            final_balance,
            total_return_pct,
            total_trades,
            wins,
            losses,
            win_rate_pct,
            profit_factor,
            max_drawdown_pct,
            liquidations,
            expired_setups,
            trades,
        }
    }

    pub fn print_summary(&self) {
        println!("\n=== Backtest Results ===");
        println!("Period:          {} to {}", self.start, self.end);
        println!("Initial Capital: ${:.2}", self.initial_capital);
        println!("Final Balance:   ${:.2}", self.final_balance);
        println!("Total Return:    {:.2}%", self.total_return_pct);
        println!(
            "Trades:          {} ({} wins / {} losses)",
            self.total_trades, self.wins, self.losses
        );
        println!("Win Rate:        {:.1}%", self.win_rate_pct);
        println!("Profit Factor:   {:.2}", self.profit_factor);
        println!("Max Drawdown:    {:.2}%", self.max_drawdown_pct);
        println!("Liquidations:    {}", self.liquidations);
        println!("Expired Setups:  {}", self.expired_setups);
    }
}
