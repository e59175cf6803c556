use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::info;

use crate::types::{
    Candle, Direction, ExitReason, TimeFrame, TradeRecord, TradeStats, TradeStatus, TradingPair,
};

/// SQLite-backed candle store and trade repository. Candle writes are
/// idempotent on (symbol, timeframe, open_time); trade rows key on the
/// engine-assigned id.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(db_path: &str) -> Result<Self> {
        info!("Initializing SQLite database at: {}", db_path);

        let options = SqliteConnectOptions::from_str(db_path)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.create_schema().await?;
        Ok(db)
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS candles (
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                open_time TEXT NOT NULL,
                close_time TEXT NOT NULL,
                open TEXT NOT NULL,
                high TEXT NOT NULL,
                low TEXT NOT NULL,
                close TEXT NOT NULL,
                volume TEXT NOT NULL,
                taker_buy_volume TEXT,
                PRIMARY KEY (symbol, timeframe, open_time)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_candles_lookup
                ON candles(symbol, timeframe, open_time)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                direction TEXT NOT NULL,
                entry_time TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                quantity TEXT NOT NULL,
                stop_loss TEXT NOT NULL,
                take_profit TEXT NOT NULL,
                exit_time TEXT,
                exit_price TEXT,
                exit_reason TEXT,
                pnl TEXT NOT NULL,
                pnl_pct TEXT NOT NULL,
                status TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol, entry_time)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ---- candle store ----

    pub async fn count_in_range(
        &self,
        pair: TradingPair,
        timeframe: TimeFrame,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) as count FROM candles
            WHERE symbol = ? AND timeframe = ? AND open_time >= ? AND open_time <= ?
            "#,
        )
        .bind(pair.as_str())
        .bind(timeframe.as_str())
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("count"))
    }

    pub async fn get_candles(
        &self,
        pair: TradingPair,
        timeframe: TimeFrame,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let rows = sqlx::query(
            r#"
            SELECT open_time, close_time, open, high, low, close, volume, taker_buy_volume
            FROM candles
            WHERE symbol = ? AND timeframe = ? AND open_time >= ? AND open_time <= ?
            ORDER BY open_time ASC
            "#,
        )
        .bind(pair.as_str())
        .bind(timeframe.as_str())
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| parse_candle_row(pair, timeframe, &row))
            .collect()
    }

    pub async fn get_last_candle(
        &self,
        pair: TradingPair,
        timeframe: TimeFrame,
    ) -> Result<Option<Candle>> {
        let row = sqlx::query(
            r#"
            SELECT open_time, close_time, open, high, low, close, volume, taker_buy_volume
            FROM candles
            WHERE symbol = ? AND timeframe = ?
            ORDER BY open_time DESC
            LIMIT 1
            "#,
        )
        .bind(pair.as_str())
        .bind(timeframe.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(parse_candle_row(pair, timeframe, &row)?)),
            None => Ok(None),
        }
    }

    pub async fn save_candles(&self, candles: &[Candle]) -> Result<()> {
        for candle in candles {
            sqlx::query(
                r#"
                INSERT INTO candles (
                    symbol, timeframe, open_time, close_time,
                    open, high, low, close, volume, taker_buy_volume
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(symbol, timeframe, open_time) DO UPDATE SET
                    close_time = excluded.close_time,
                    open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    volume = excluded.volume,
                    taker_buy_volume = excluded.taker_buy_volume
                "#,
            )
            .bind(candle.pair.as_str())
            .bind(candle.timeframe.as_str())
            .bind(candle.open_time.to_rfc3339())
            .bind(candle.close_time.to_rfc3339())
            .bind(candle.open.to_string())
            .bind(candle.high.to_string())
            .bind(candle.low.to_string())
            .bind(candle.close.to_string())
            .bind(candle.volume.to_string())
            .bind(candle.taker_buy_volume.map(|v| v.to_string()))
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    // ---- trade repository ----

    pub async fn save_trade(&self, trade: &TradeRecord) -> Result<String> {
        sqlx::query(
            r#"
            INSERT INTO trades (
                id, symbol, direction, entry_time, entry_price, quantity,
                stop_loss, take_profit, exit_time, exit_price, exit_reason,
                pnl, pnl_pct, status
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&trade.id)
        .bind(trade.pair.as_str())
        .bind(trade.direction.as_str())
        .bind(trade.entry_time.to_rfc3339())
        .bind(trade.entry_price.to_string())
        .bind(trade.quantity.to_string())
        .bind(trade.stop_loss.to_string())
        .bind(trade.take_profit.to_string())
        .bind(trade.exit_time.map(|t| t.to_rfc3339()))
        .bind(trade.exit_price.map(|p| p.to_string()))
        .bind(trade.exit_reason.map(|r| r.as_str().to_string()))
        .bind(trade.pnl.to_string())
        .bind(trade.pnl_pct.to_string())
        .bind(trade.status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(trade.id.clone())
    }

    /// Marks a trade closed, computing the gross PnL on this side so the
    /// stored sign always follows the direction of the move.
    pub async fn close_trade(
        &self,
        id: &str,
        exit_price: Decimal,
        exit_time: DateTime<Utc>,
        reason: ExitReason,
    ) -> Result<()> {
        let row = sqlx::query(
            r#"
            SELECT direction, entry_price, quantity FROM trades WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        let direction = parse_direction(row.get("direction"))?;
        let entry_price = Decimal::from_str(row.get("entry_price"))?;
        let quantity = Decimal::from_str(row.get("quantity"))?;

        let pnl = direction.sign() * (exit_price - entry_price) * quantity;
        let entry_value = entry_price * quantity;
        let pnl_pct = if entry_value.is_zero() {
            Decimal::ZERO
        } else {
            pnl / entry_value * Decimal::from(100)
        };

        sqlx::query(
            r#"
            UPDATE trades
            SET exit_time = ?, exit_price = ?, exit_reason = ?,
                pnl = ?, pnl_pct = ?, status = 'Closed'
            WHERE id = ?
            "#,
        )
        .bind(exit_time.to_rfc3339())
        .bind(exit_price.to_string())
        .bind(reason.as_str())
        .bind(pnl.to_string())
        .bind(pnl_pct.to_string())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_open_trades(&self, pair: TradingPair) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, symbol, direction, entry_time, entry_price, quantity,
                   stop_loss, take_profit, exit_time, exit_price, exit_reason,
                   pnl, pnl_pct, status
            FROM trades
            WHERE symbol = ? AND status = 'Open'
            ORDER BY entry_time ASC
            "#,
        )
        .bind(pair.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(parse_trade_row).collect()
    }

    pub async fn get_trade_history(&self, pair: TradingPair, limit: u32) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, symbol, direction, entry_time, entry_price, quantity,
                   stop_loss, take_profit, exit_time, exit_price, exit_reason,
                   pnl, pnl_pct, status
            FROM trades
            WHERE symbol = ?
            ORDER BY entry_time DESC
            LIMIT ?
            "#,
        )
        .bind(pair.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(parse_trade_row).collect()
    }

    pub async fn get_trade_stats(&self, pair: TradingPair) -> Result<TradeStats> {
        let rows = sqlx::query(
            r#"
            SELECT pnl FROM trades WHERE symbol = ? AND status = 'Closed'
            "#,
        )
        .bind(pair.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut stats = TradeStats::default();
        let mut gross_wins = Decimal::ZERO;
        let mut gross_losses = Decimal::ZERO;
        for row in rows {
            let pnl = Decimal::from_str(row.get("pnl"))?;
            stats.total += 1;
            stats.total_pnl += pnl;
            if pnl > Decimal::ZERO {
                stats.wins += 1;
                gross_wins += pnl;
            } else {
                stats.losses += 1;
                gross_losses += pnl.abs();
            }
        }

        if stats.total > 0 {
            stats.win_rate = Decimal::from(stats.wins) / Decimal::from(stats.total)
                * Decimal::from(100);
        }
        stats.profit_factor = if gross_losses.is_zero() {
            gross_wins
        } else {
            gross_wins / gross_losses
        };
        Ok(stats)
    }

    pub async fn clear_trades(&self) -> Result<()> {
        sqlx::query("DELETE FROM trades").execute(&self.pool).await?;
        Ok(())
    }
}

fn parse_candle_row(
    pair: TradingPair,
    timeframe: TimeFrame,
    row: &sqlx::sqlite::SqliteRow,
) -> Result<Candle> {
    Ok(Candle {
        pair,
        timeframe,
        open_time: DateTime::parse_from_rfc3339(row.get("open_time"))?.with_timezone(&Utc),
        close_time: DateTime::parse_from_rfc3339(row.get("close_time"))?.with_timezone(&Utc),
        open: Decimal::from_str(row.get("open"))?,
        high: Decimal::from_str(row.get("high"))?,
        low: Decimal::from_str(row.get("low"))?,
        close: Decimal::from_str(row.get("close"))?,
        volume: Decimal::from_str(row.get("volume"))?,
        taker_buy_volume: row
            .get::<Option<String>, _>("taker_buy_volume")
            .and_then(|s| Decimal::from_str(&s).ok()),
    })
}

fn parse_trade_row(row: &sqlx::sqlite::SqliteRow) -> Result<TradeRecord> {
    Ok(TradeRecord {
        id: row.get("id"),
        pair: parse_trading_pair(row.get("symbol"))?,
        direction: parse_direction(row.get("direction"))?,
        entry_time: DateTime::parse_from_rfc3339(row.get("entry_time"))?.with_timezone(&Utc),
        entry_price: Decimal::from_str(row.get("entry_price"))?,
        quantity: Decimal::from_str(row.get("quantity"))?,
        stop_loss: Decimal::from_str(row.get("stop_loss"))?,
        take_profit: Decimal::from_str(row.get("take_profit"))?,
        exit_time: row
            .get::<Option<String>, _>("exit_time")
            .map(|s| DateTime::parse_from_rfc3339(&s).map(|t| t.with_timezone(&Utc)))
            .transpose()?,
        exit_price: row
            .get::<Option<String>, _>("exit_price")
            .and_then(|s| Decimal::from_str(&s).ok()),
        exit_reason: row
            .get::<Option<String>, _>("exit_reason")
            .and_then(|s| ExitReason::from_str(&s)),
        pnl: Decimal::from_str(row.get("pnl"))?,
        pnl_pct: Decimal::from_str(row.get("pnl_pct"))?,
        status: TradeStatus::from_str(row.get("status"))
            .ok_or_else(|| anyhow::anyhow!("unknown trade status"))?,
    })
}

fn parse_trading_pair(s: &str) -> Result<TradingPair> {
    TradingPair::from_str(s).ok_or_else(|| anyhow::anyhow!("unknown trading pair: {}", s))
}

fn parse_direction(s: &str) -> Result<Direction> {
    match s {
        "LONG" => Ok(Direction::Long),
        "SHORT" => Ok(Direction::Short),
        _ => Err(anyhow::anyhow!("unknown direction: {}", s)),
    }
}
