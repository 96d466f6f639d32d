//! SQLite trade journal.
//!
//! One row per position: written on entry, completed on exit. Money columns
//! are stored as decimal text so values round-trip exactly.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::error::StoreError;

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS trades (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        exchange TEXT NOT NULL,
        symbol TEXT NOT NULL,
        side TEXT NOT NULL,
        qty TEXT NOT NULL,
        entry_price TEXT NOT NULL,
        exit_price TEXT,
        entry_time TEXT NOT NULL,
        exit_time TEXT,
        pnl_usd TEXT,
        fee_usd TEXT NOT NULL,
        meta_json TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol)",
    "CREATE INDEX IF NOT EXISTS idx_trades_exchange ON trades(exchange)",
];

/// Journal row.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TradeRow {
    /// Row id.
    pub id: i64,
    /// Venue name.
    pub exchange: String,
    /// Trading pair.
    pub symbol: String,
    /// Always `BUY` for long entries.
    pub side: String,
    /// Entry quantity.
    pub qty: Decimal,
    /// Slipped entry price.
    pub entry_price: Decimal,
    /// Exit price once closed.
    pub exit_price: Option<Decimal>,
    /// Entry time.
    pub entry_time: DateTime<Utc>,
    /// Exit time once closed.
    pub exit_time: Option<DateTime<Utc>>,
    /// Realized P&L once closed.
    pub pnl_usd: Option<Decimal>,
    /// Fees paid so far.
    pub fee_usd: Decimal,
    /// Free-form entry context.
    pub meta: serde_json::Value,
}

impl TradeRow {
    /// Whether the trade has been closed.
    pub fn is_closed(&self) -> bool {
        self.exit_time.is_some()
    }
}

/// Aggregate over closed trades.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct TradeSummary {
    /// Number of closed trades.
    pub closed: u64,
    /// Closed trades with positive P&L.
    pub wins: u64,
    /// Trades still open.
    pub open: u64,
    /// Sum of realized P&L.
    pub total_pnl: Decimal,
}

impl TradeSummary {
    /// Share of closed trades that won.
    pub fn win_rate(&self) -> f64 {
        if self.closed == 0 {
            0.0
        } else {
            self.wins as f64 / self.closed as f64
        }
    }
}

/// Async SQLite journal.
#[derive(Debug, Clone)]
pub struct TradeStore {
    pool: SqlitePool,
}

fn decimal_column(row: &SqliteRow, column: &'static str) -> Result<Decimal, StoreError> {
    let raw: String = row.try_get(column)?;
    Decimal::from_str(&raw).map_err(|_| StoreError::InvalidValue { column, value: raw })
}

fn optional_decimal_column(row: &SqliteRow, column: &'static str) -> Result<Option<Decimal>, StoreError> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|v| Decimal::from_str(&v).map_err(|_| StoreError::InvalidValue { column, value: v }))
        .transpose()
}

fn time_column(row: &SqliteRow, column: &'static str) -> Result<Option<DateTime<Utc>>, StoreError> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|v| {
        DateTime::parse_from_rfc3339(&v)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| StoreError::InvalidValue { column, value: v })
    })
    .transpose()
}

fn trade_from_row(row: &SqliteRow) -> Result<TradeRow, StoreError> {
    let meta_raw: String = row.try_get("meta_json")?;
    let entry_time = time_column(row, "entry_time")?.ok_or(StoreError::InvalidValue {
        column: "entry_time",
        value: String::new(),
    })?;

    Ok(TradeRow {
        id: row.try_get("id")?,
        exchange: row.try_get("exchange")?,
        symbol: row.try_get("symbol")?,
        side: row.try_get("side")?,
        qty: decimal_column(row, "qty")?,
        entry_price: decimal_column(row, "entry_price")?,
        exit_price: optional_decimal_column(row, "exit_price")?,
        entry_time,
        exit_time: time_column(row, "exit_time")?,
        pnl_usd: optional_decimal_column(row, "pnl_usd")?,
        fee_usd: decimal_column(row, "fee_usd")?,
        meta: serde_json::from_str(&meta_raw)?,
    })
}

impl TradeStore {
    /// Open (or create) the journal at `path`. `:memory:` gives a private in-memory database.
    pub async fn connect(path: &str) -> Result<Self, StoreError> {
        let pool = if path == ":memory:" {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?)
                .await?
        } else {
            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true);
            SqlitePoolOptions::new()
                .max_connections(4)
                .connect_with(options)
                .await?
        };

        debug!(path, "Trade journal connected");
        Ok(Self { pool })
    }

    /// Create the table and indexes.
    pub async fn init(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Trade journal ready");
        Ok(())
    }

    /// Record a new long entry and return its id.
    pub async fn insert_entry(
        &self,
        exchange: &str,
        symbol: &str,
        qty: Decimal,
        entry_price: Decimal,
        fee_usd: Decimal,
        meta: &serde_json::Value,
    ) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO trades (exchange, symbol, side, qty, entry_price, exit_price, entry_time, exit_time, pnl_usd, fee_usd, meta_json)
             VALUES (?, ?, 'BUY', ?, ?, NULL, ?, NULL, NULL, ?, ?)",
        )
        .bind(exchange)
        .bind(symbol)
        .bind(qty.to_string())
        .bind(entry_price.to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(fee_usd.to_string())
        .bind(serde_json::to_string(meta)?)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!(id, symbol, "Trade entry recorded");
        Ok(id)
    }

    /// Complete a trade: exit price, P&L, and `fee_add` added to the fees so far.
    pub async fn close_trade(
        &self,
        trade_id: i64,
        exit_price: Decimal,
        pnl_usd: Decimal,
        fee_add: Decimal,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT fee_usd FROM trades WHERE id = ?")
            .bind(trade_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound(trade_id))?;
        let fee = decimal_column(&row, "fee_usd")? + fee_add;

        sqlx::query("UPDATE trades SET exit_price = ?, exit_time = ?, pnl_usd = ?, fee_usd = ? WHERE id = ?")
            .bind(exit_price.to_string())
            .bind(Utc::now().to_rfc3339())
            .bind(pnl_usd.to_string())
            .bind(fee.to_string())
            .bind(trade_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(trade_id, %pnl_usd, "Trade closed");
        Ok(())
    }

    /// Fetch one trade.
    pub async fn get(&self, trade_id: i64) -> Result<Option<TradeRow>, StoreError> {
        sqlx::query("SELECT * FROM trades WHERE id = ?")
            .bind(trade_id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(trade_from_row)
            .transpose()
    }

    /// Most recent trades, newest first.
    pub async fn recent(&self, limit: u32) -> Result<Vec<TradeRow>, StoreError> {
        sqlx::query("SELECT * FROM trades ORDER BY id DESC LIMIT ?")
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(trade_from_row)
            .collect()
    }

    /// Closed count, wins, open count and total realized P&L.
    pub async fn summary(&self) -> Result<TradeSummary, StoreError> {
        let rows = sqlx::query("SELECT pnl_usd FROM trades WHERE exit_time IS NOT NULL")
            .fetch_all(&self.pool)
            .await?;
        let open: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trades WHERE exit_time IS NULL")
            .fetch_one(&self.pool)
            .await?;

        let mut summary = TradeSummary {
            open: open as u64,
            ..TradeSummary::default()
        };
        for row in &rows {
            let pnl = optional_decimal_column(row, "pnl_usd")?.unwrap_or(Decimal::ZERO);
            summary.closed += 1;
            if pnl > Decimal::ZERO {
                summary.wins += 1;
            }
            summary.total_pnl += pnl;
        }
        Ok(summary)
    }
}
