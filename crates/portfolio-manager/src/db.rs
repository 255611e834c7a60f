use std::str::FromStr;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Executor, FromRow};
use trading_core::{
    Alert, AlertLevel, Balances, Candle, ExitReason, FeatureSnapshot, Market, Order, OrderStatus,
    OrderType, PortfolioSnapshot, Position, PositionStatus, Repository, Side, Signal, TradingError,
    TradingResult,
};

fn db_err(e: sqlx::Error) -> TradingError {
    TradingError::Persistence(e.to_string())
}

/// Fixed-width UTC timestamps so TEXT ordering matches time ordering
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> TradingResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TradingError::Persistence(format!("bad timestamp '{}': {}", raw, e)))
}

fn parse_col<T: FromStr<Err = TradingError>>(raw: &str) -> TradingResult<T> {
    raw.parse()
        .map_err(|e: TradingError| TradingError::Persistence(e.to_string()))
}

#[derive(FromRow)]
struct OrderRow {
    id: String,
    exchange_order_id: Option<String>,
    symbol: String,
    market: String,
    side: String,
    order_type: String,
    qty: f64,
    price: f64,
    status: String,
    tp_price: Option<f64>,
    sl_price: Option<f64>,
    client_id: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<OrderRow> for Order {
    type Error = TradingError;

    fn try_from(row: OrderRow) -> TradingResult<Self> {
        Ok(Order {
            id: row.id,
            exchange_order_id: row.exchange_order_id,
            symbol: row.symbol,
            market: parse_col::<Market>(&row.market)?,
            side: parse_col::<Side>(&row.side)?,
            order_type: parse_col::<OrderType>(&row.order_type)?,
            qty: row.qty,
            price: row.price,
            status: parse_col::<OrderStatus>(&row.status)?,
            tp_price: row.tp_price,
            sl_price: row.sl_price,
            client_id: row.client_id,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[derive(FromRow)]
struct PositionRow {
    id: String,
    symbol: String,
    market: String,
    side: String,
    entry_price: f64,
    qty: f64,
    leverage: f64,
    sl: Option<f64>,
    tp: Option<f64>,
    realized_pnl: f64,
    unrealized_pnl: f64,
    status: String,
    opened_at: String,
    closed_at: Option<String>,
    exit_reason: Option<String>,
}

impl TryFrom<PositionRow> for Position {
    type Error = TradingError;

    fn try_from(row: PositionRow) -> TradingResult<Self> {
        Ok(Position {
            id: row.id,
            symbol: row.symbol,
            market: parse_col::<Market>(&row.market)?,
            side: parse_col::<Side>(&row.side)?,
            entry_price: row.entry_price,
            qty: row.qty,
            leverage: row.leverage,
            sl: row.sl,
            tp: row.tp,
            realized_pnl: row.realized_pnl,
            unrealized_pnl: row.unrealized_pnl,
            status: parse_col::<PositionStatus>(&row.status)?,
            opened_at: parse_ts(&row.opened_at)?,
            closed_at: row.closed_at.as_deref().map(parse_ts).transpose()?,
            exit_reason: row.exit_reason.as_deref().map(parse_col::<ExitReason>).transpose()?,
        })
    }
}

#[derive(FromRow)]
struct SnapshotRow {
    ts: String,
    equity: f64,
    cash_spot: f64,
    cash_futures: f64,
    margin_used: f64,
}

#[derive(FromRow)]
struct AlertRow {
    ts: String,
    level: String,
    message: String,
    context: String,
}

async fn upsert_order_on<'e, E>(exec: E, order: &Order) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO orders (id, exchange_order_id, symbol, market, side, order_type, qty, price,
                            status, tp_price, sl_price, client_id, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            exchange_order_id = excluded.exchange_order_id,
            qty = excluded.qty,
            price = excluded.price,
            status = excluded.status,
            tp_price = excluded.tp_price,
            sl_price = excluded.sl_price,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&order.id)
    .bind(&order.exchange_order_id)
    .bind(&order.symbol)
    .bind(order.market.as_str())
    .bind(order.side.as_str())
    .bind(order.order_type.as_str())
    .bind(order.qty)
    .bind(order.price)
    .bind(order.status.as_str())
    .bind(order.tp_price)
    .bind(order.sl_price)
    .bind(&order.client_id)
    .bind(ts(&order.created_at))
    .bind(ts(&order.updated_at))
    .execute(exec)
    .await?;
    Ok(())
}

/// Insert or update a position. A row that is already closed is left alone;
/// the returned count is 0 in that case.
async fn upsert_position_on<'e, E>(exec: E, position: &Position) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO positions (id, symbol, market, side, entry_price, qty, leverage, sl, tp,
                               realized_pnl, unrealized_pnl, status, opened_at, closed_at, exit_reason)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            sl = excluded.sl,
            tp = excluded.tp,
            realized_pnl = excluded.realized_pnl,
            unrealized_pnl = excluded.unrealized_pnl,
            status = excluded.status,
            closed_at = excluded.closed_at,
            exit_reason = excluded.exit_reason
        WHERE positions.status = 'open'
        "#,
    )
    .bind(&position.id)
    .bind(&position.symbol)
    .bind(position.market.as_str())
    .bind(position.side.as_str())
    .bind(position.entry_price)
    .bind(position.qty)
    .bind(position.leverage)
    .bind(position.sl)
    .bind(position.tp)
    .bind(position.realized_pnl)
    .bind(position.unrealized_pnl)
    .bind(position.status.as_str())
    .bind(ts(&position.opened_at))
    .bind(position.closed_at.as_ref().map(ts))
    .bind(position.exit_reason.map(|r| r.as_str()))
    .execute(exec)
    .await?;
    Ok(result.rows_affected())
}

fn already_closed(position: &Position) -> TradingError {
    TradingError::InvalidTransition {
        from: PositionStatus::Closed.as_str().to_string(),
        to: position.status.as_str().to_string(),
    }
}

async fn save_balance_on<'e, E>(exec: E, market: Market, amount: f64) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO balances (market, amount, updated_at) VALUES (?, ?, ?)
        ON CONFLICT(market) DO UPDATE SET amount = excluded.amount, updated_at = excluded.updated_at
        "#,
    )
    .bind(market.as_str())
    .bind(amount)
    .bind(ts(&Utc::now()))
    .execute(exec)
    .await?;
    Ok(())
}

/// SQLite-backed store for the trading loop
#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// Connect and apply the embedded schema
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // Every connection to an in-memory database is a separate database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.init_schema().await?;

        Ok(db)
    }

    async fn init_schema(&self) -> Result<()> {
        let schema = include_str!("../schema.sql");

        for statement in schema.split(';') {
            let stmt = statement.trim();
            if !stmt.is_empty() {
                sqlx::query(stmt).execute(&self.pool).await?;
            }
        }

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn candle_count(&self, symbol: &str, timeframe: &str) -> TradingResult<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM candles WHERE symbol = ? AND timeframe = ?")
                .bind(symbol)
                .bind(timeframe)
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(count)
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn save_candles(&self, candles: &[Candle]) -> TradingResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for c in candles {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO candles (symbol, timeframe, open_time, open, high, low, close, volume)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&c.symbol)
            .bind(&c.timeframe)
            .bind(ts(&c.open_time))
            .bind(c.open)
            .bind(c.high)
            .bind(c.low)
            .bind(c.close)
            .bind(c.volume)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)
    }

    async fn save_feature_snapshot(&self, snapshot: &FeatureSnapshot) -> TradingResult<()> {
        let payload = serde_json::to_string(&snapshot.row)
            .map_err(|e| TradingError::Persistence(e.to_string()))?;
        sqlx::query(
            "INSERT INTO feature_snapshots (symbol, timeframe, open_time, payload) VALUES (?, ?, ?, ?)",
        )
        .bind(&snapshot.symbol)
        .bind(&snapshot.timeframe)
        .bind(ts(&snapshot.row.open_time))
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn save_signals(&self, signals: &[Signal]) -> TradingResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for s in signals {
            sqlx::query(
                r#"
                INSERT INTO signals (symbol, market, timeframe, ts, confidence, expected_return_pct,
                                     suggested_leverage, entry, tp, sl, side, rationale, strategy_tag)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&s.symbol)
            .bind(s.market.as_str())
            .bind(&s.timeframe)
            .bind(ts(&s.timestamp))
            .bind(s.confidence)
            .bind(s.expected_return_pct)
            .bind(s.suggested_leverage)
            .bind(s.entry)
            .bind(s.tp)
            .bind(s.sl)
            .bind(s.side.as_str())
            .bind(&s.rationale)
            .bind(&s.strategy_tag)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)
    }

    async fn upsert_order(&self, order: &Order) -> TradingResult<()> {
        upsert_order_on(&self.pool, order).await.map_err(db_err)
    }

    async fn upsert_position(&self, position: &Position) -> TradingResult<()> {
        let updated = upsert_position_on(&self.pool, position).await.map_err(db_err)?;
        if updated == 0 {
            return Err(already_closed(position));
        }
        Ok(())
    }

    async fn commit_fill(&self, order: &Order, position: &Position, balances: &Balances) -> TradingResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        upsert_order_on(&mut *tx, order).await.map_err(db_err)?;
        upsert_position_on(&mut *tx, position).await.map_err(db_err)?;
        save_balance_on(&mut *tx, position.market, balances.get(position.market))
            .await
            .map_err(db_err)?;
        tx.commit().await.map_err(db_err)
    }

    async fn commit_close(&self, position: &Position, balances: &Balances) -> TradingResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        // Dropping the transaction rolls back; the balance row is never touched
        if upsert_position_on(&mut *tx, position).await.map_err(db_err)? == 0 {
            return Err(already_closed(position));
        }
        save_balance_on(&mut *tx, position.market, balances.get(position.market))
            .await
            .map_err(db_err)?;
        tx.commit().await.map_err(db_err)
    }

    async fn get_position(&self, id: &str) -> TradingResult<Option<Position>> {
        sqlx::query_as::<_, PositionRow>("SELECT * FROM positions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(Position::try_from)
            .transpose()
    }

    async fn open_positions(&self) -> TradingResult<Vec<Position>> {
        sqlx::query_as::<_, PositionRow>(
            "SELECT * FROM positions WHERE status = 'open' ORDER BY opened_at",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?
        .into_iter()
        .map(Position::try_from)
        .collect()
    }

    async fn recent_orders(&self, limit: usize) -> TradingResult<Vec<Order>> {
        sqlx::query_as::<_, OrderRow>("SELECT * FROM orders ORDER BY created_at DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?
            .into_iter()
            .map(Order::try_from)
            .collect()
    }

    async fn append_snapshot(&self, snapshot: &PortfolioSnapshot) -> TradingResult<()> {
        sqlx::query(
            "INSERT INTO portfolio_snapshots (ts, equity, cash_spot, cash_futures, margin_used) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(ts(&snapshot.timestamp))
        .bind(snapshot.equity)
        .bind(snapshot.cash_by_market.spot)
        .bind(snapshot.cash_by_market.futures)
        .bind(snapshot.margin_used)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn snapshots(&self, limit: usize) -> TradingResult<Vec<PortfolioSnapshot>> {
        let rows = sqlx::query_as::<_, SnapshotRow>(
            "SELECT ts, equity, cash_spot, cash_futures, margin_used FROM portfolio_snapshots ORDER BY id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut snapshots = rows
            .into_iter()
            .map(|r| {
                Ok(PortfolioSnapshot {
                    timestamp: parse_ts(&r.ts)?,
                    equity: r.equity,
                    cash_by_market: Balances::new(r.cash_spot, r.cash_futures),
                    margin_used: r.margin_used,
                })
            })
            .collect::<TradingResult<Vec<_>>>()?;
        snapshots.reverse();
        Ok(snapshots)
    }

    async fn append_alert(&self, alert: &Alert) -> TradingResult<()> {
        sqlx::query("INSERT INTO alerts (ts, level, message, context) VALUES (?, ?, ?, ?)")
            .bind(ts(&alert.timestamp))
            .bind(alert.level.as_str())
            .bind(&alert.message)
            .bind(alert.context.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn recent_alerts(&self, limit: usize) -> TradingResult<Vec<Alert>> {
        let rows = sqlx::query_as::<_, AlertRow>(
            "SELECT ts, level, message, context FROM alerts ORDER BY id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(|r| {
                Ok(Alert {
                    timestamp: parse_ts(&r.ts)?,
                    level: parse_col::<AlertLevel>(&r.level)?,
                    message: r.message,
                    context: serde_json::from_str(&r.context).unwrap_or(serde_json::Value::Null),
                })
            })
            .collect()
    }

    async fn load_balances(&self) -> TradingResult<Option<Balances>> {
        let rows: Vec<(String, f64)> = sqlx::query_as("SELECT market, amount FROM balances")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        if rows.is_empty() {
            return Ok(None);
        }
        let mut balances = Balances::default();
        for (market, amount) in rows {
            *balances.get_mut(parse_col::<Market>(&market)?) = amount;
        }
        Ok(Some(balances))
    }

    async fn save_balances(&self, balances: &Balances) -> TradingResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for market in [Market::Spot, Market::Futures] {
            save_balance_on(&mut *tx, market, balances.get(market)).await.map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)
    }
}
