//! SQLite persistence for positions, trades, price history and order state.
//!
//! The bot can crash, restart, and pick up exactly where it left off: open
//! positions, pending exchange orders and trigger orders all live here. The
//! store is the only cross-component source of truth for order and position
//! state. One connection behind an async mutex; each logical call is a single
//! statement or an explicit transaction, so concurrent workers serialize
//! cleanly.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::models::{
    AutoOrder, AutoOrderState, AutoOrderType, OrderSide, OrderStatus, Outcome, Position,
    PriceSnapshot, TradeRecord, TradeStats, TrackedOrder,
};

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("bad stored timestamp: {raw}"))
}

type PendingRow = (
    String,
    String,
    String,
    String,
    String,
    f64,
    f64,
    String,
    f64,
    f64,
    Option<String>,
    String,
);

fn map_pending_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PendingRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
    ))
}

/// Cheap to clone; all clones share the same connection.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open bot db")?;
        Self::init(conn)
    }

    /// In-memory store for tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory db")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS positions (
                id              TEXT PRIMARY KEY,
                token_id        TEXT NOT NULL,
                market_question TEXT NOT NULL,
                side            TEXT NOT NULL,
                size            REAL NOT NULL,
                avg_entry_price REAL NOT NULL,
                current_price   REAL DEFAULT 0,
                opened_at       TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS trades (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp       TEXT NOT NULL,
                token_id        TEXT NOT NULL,
                market_question TEXT NOT NULL,
                side            TEXT NOT NULL,
                action          TEXT NOT NULL,
                size            REAL NOT NULL,
                price           REAL NOT NULL,
                fee             REAL DEFAULT 0,
                order_id        TEXT,
                strategy        TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_trades_token
                ON trades(token_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_trades_timestamp
                ON trades(timestamp);

            CREATE TABLE IF NOT EXISTS price_snapshots (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                token_id    TEXT NOT NULL,
                timestamp   TEXT NOT NULL,
                price_yes   REAL NOT NULL,
                price_no    REAL NOT NULL,
                best_bid    REAL,
                best_ask    REAL
            );
            CREATE INDEX IF NOT EXISTS idx_snapshots_token_time
                ON price_snapshots(token_id, timestamp);

            CREATE TABLE IF NOT EXISTS bot_state (
                key         TEXT PRIMARY KEY,
                value       TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS auto_orders (
                id              TEXT PRIMARY KEY,
                token_id        TEXT NOT NULL,
                market_question TEXT NOT NULL,
                order_type      TEXT NOT NULL,
                side            TEXT NOT NULL,
                size            REAL NOT NULL,
                trigger_price   REAL NOT NULL,
                limit_price     REAL,
                trailing_percent REAL,
                highest_price   REAL DEFAULT 0,
                state           TEXT DEFAULT 'pending',
                created_at      TEXT NOT NULL,
                triggered_at    TEXT,
                executed_at     TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_auto_orders_state
                ON auto_orders(state);

            CREATE TABLE IF NOT EXISTS pending_orders (
                order_id        TEXT PRIMARY KEY,
                token_id        TEXT NOT NULL,
                market_question TEXT NOT NULL,
                side            TEXT NOT NULL,
                order_side      TEXT NOT NULL,
                size            REAL NOT NULL,
                limit_price     REAL NOT NULL,
                status          TEXT DEFAULT 'LIVE',
                filled_size     REAL DEFAULT 0,
                avg_fill_price  REAL DEFAULT 0,
                strategy        TEXT,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_pending_orders_status
                ON pending_orders(status);

            CREATE TABLE IF NOT EXISTS order_intents (
                intent_id   TEXT PRIMARY KEY,
                token_id    TEXT NOT NULL,
                side        TEXT NOT NULL,
                order_side  TEXT NOT NULL,
                limit_price REAL,
                size        REAL,
                strategy    TEXT,
                created_at  TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_order_intents_token
                ON order_intents(token_id, created_at);",
        )
        .context("init schema")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // ── Positions ─────────────────────────────────────────────

    pub async fn save_position(&self, pos: &Position) -> Result<()> {
        let key = Position::key(&pos.token_id, pos.side);
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO positions (id, token_id, market_question, side, size,
                                    avg_entry_price, current_price, opened_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                size = excluded.size,
                avg_entry_price = excluded.avg_entry_price,
                current_price = excluded.current_price,
                updated_at = excluded.updated_at",
            params![
                key,
                pos.token_id,
                pos.market_question,
                pos.side.as_str(),
                pos.size,
                pos.avg_entry_price,
                pos.current_price,
                pos.opened_at.to_rfc3339(),
                pos.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub async fn remove_position(&self, token_id: &str, side: Outcome) -> Result<()> {
        let key = Position::key(token_id, side);
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM positions WHERE id = ?1", params![key])?;
        Ok(())
    }

    pub async fn update_position_price(
        &self,
        token_id: &str,
        side: Outcome,
        current_price: f64,
    ) -> Result<()> {
        let key = Position::key(token_id, side);
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE positions SET current_price = ?1, updated_at = ?2 WHERE id = ?3",
            params![current_price, Utc::now().to_rfc3339(), key],
        )?;
        Ok(())
    }

    pub async fn load_positions(&self) -> Result<Vec<Position>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT token_id, market_question, side, size, avg_entry_price,
                    current_price, opened_at, updated_at
             FROM positions ORDER BY opened_at",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, f64>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut out = Vec::with_capacity(rows.len());
        for (token_id, question, side, size, avg, cur, opened, updated) in rows {
            let side = Outcome::parse(&side)
                .with_context(|| format!("bad stored position side: {side}"))?;
            out.push(Position {
                token_id,
                market_question: question,
                side,
                size,
                avg_entry_price: avg,
                current_price: cur,
                opened_at: parse_ts(&opened)?,
                updated_at: parse_ts(&updated)?,
            });
        }
        Ok(out)
    }

    // ── Trades ────────────────────────────────────────────────

    pub async fn record_trade(&self, trade: &TradeRecord) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO trades (timestamp, token_id, market_question, side,
                                 action, size, price, fee, order_id, strategy)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                trade.timestamp.to_rfc3339(),
                trade.token_id,
                trade.market_question,
                trade.side.as_str(),
                trade.action.as_str(),
                trade.size,
                trade.price,
                trade.fee,
                trade.order_id,
                trade.strategy,
            ],
        )?;
        Ok(())
    }

    pub async fn trade_history(
        &self,
        token_id: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<TradeRecord>> {
        let mut sql = String::from(
            "SELECT timestamp, token_id, market_question, side, action,
                    size, price, fee, order_id, strategy
             FROM trades WHERE 1=1",
        );
        let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        if let Some(token) = token_id {
            sql.push_str(" AND token_id = ?");
            args.push(Box::new(token.to_string()));
        }
        if let Some(since) = since {
            sql.push_str(" AND timestamp >= ?");
            args.push(Box::new(since.to_rfc3339()));
        }
        sql.push_str(" ORDER BY timestamp DESC LIMIT ?");
        args.push(Box::new(limit));

        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, f64>(5)?,
                    row.get::<_, f64>(6)?,
                    row.get::<_, f64>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, Option<String>>(9)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut out = Vec::with_capacity(rows.len());
        for (ts, token_id, question, side, action, size, price, fee, order_id, strategy) in rows {
            out.push(TradeRecord {
                timestamp: parse_ts(&ts)?,
                token_id,
                market_question: question,
                side: Outcome::parse(&side).context("bad stored trade side")?,
                action: OrderSide::parse(&action).context("bad stored trade action")?,
                size,
                price,
                fee,
                order_id,
                strategy,
            });
        }
        Ok(out)
    }

    /// Counts plus a win-rate heuristic: a SELL beats the latest prior BUY
    /// price on the same token/side.
    pub async fn trade_stats(&self) -> Result<TradeStats> {
        let conn = self.conn.lock().await;
        let total: u64 = conn.query_row("SELECT COUNT(*) FROM trades", [], |r| r.get(0))?;
        let buys: u64 = conn.query_row(
            "SELECT COUNT(*) FROM trades WHERE action = 'BUY'",
            [],
            |r| r.get(0),
        )?;
        let sells: u64 = conn.query_row(
            "SELECT COUNT(*) FROM trades WHERE action = 'SELL'",
            [],
            |r| r.get(0),
        )?;
        let wins: u64 = conn.query_row(
            "SELECT COUNT(*) FROM trades t1
             WHERE action = 'SELL'
             AND price > (
                 SELECT MAX(price) FROM trades t2
                 WHERE t2.token_id = t1.token_id
                   AND t2.side = t1.side
                   AND t2.action = 'BUY'
                   AND t2.timestamp < t1.timestamp
             )",
            [],
            |r| r.get(0),
        )?;

        Ok(TradeStats {
            total_trades: total,
            buys,
            sells,
            wins,
            losses: sells.saturating_sub(wins),
            win_rate: if sells > 0 {
                wins as f64 / sells as f64 * 100.0
            } else {
                0.0
            },
        })
    }

    // ── Price snapshots ───────────────────────────────────────

    pub async fn save_price_snapshot(&self, snap: &PriceSnapshot) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO price_snapshots (token_id, timestamp, price_yes,
                                          price_no, best_bid, best_ask)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                snap.token_id,
                snap.timestamp.to_rfc3339(),
                snap.price_yes,
                snap.price_no,
                snap.best_bid,
                snap.best_ask,
            ],
        )?;
        Ok(())
    }

    /// Ascending price history for a token within the last `hours`.
    pub async fn price_history(
        &self,
        token_id: &str,
        hours: i64,
        limit: u32,
    ) -> Result<Vec<PriceSnapshot>> {
        let since = (Utc::now() - Duration::hours(hours)).to_rfc3339();
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT token_id, timestamp, price_yes, price_no, best_bid, best_ask
             FROM price_snapshots
             WHERE token_id = ?1 AND timestamp >= ?2
             ORDER BY timestamp ASC
             LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![token_id, since, limit], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, Option<f64>>(4)?,
                    row.get::<_, Option<f64>>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut out = Vec::with_capacity(rows.len());
        for (token_id, ts, price_yes, price_no, best_bid, best_ask) in rows {
            out.push(PriceSnapshot {
                token_id,
                timestamp: parse_ts(&ts)?,
                price_yes,
                price_no,
                best_bid,
                best_ask,
            });
        }
        Ok(out)
    }

    /// Delete snapshots older than `days`. Returns the number removed.
    pub async fn cleanup_old_snapshots(&self, days: i64) -> Result<usize> {
        let cutoff = (Utc::now() - Duration::days(days)).to_rfc3339();
        let conn = self.conn.lock().await;
        let deleted = conn.execute(
            "DELETE FROM price_snapshots WHERE timestamp < ?1",
            params![cutoff],
        )?;
        Ok(deleted)
    }

    // ── Pending exchange orders ───────────────────────────────

    pub async fn save_pending_order(&self, order: &TrackedOrder) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO pending_orders
             (order_id, token_id, market_question, side, order_side,
              size, limit_price, status, filled_size, avg_fill_price,
              strategy, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                order.order_id,
                order.token_id,
                order.market_question,
                order.side.as_str(),
                order.order_side.as_str(),
                order.size,
                order.limit_price,
                order.status.as_str(),
                order.filled_size,
                order.avg_fill_price,
                order.strategy,
                order.created_at.to_rfc3339(),
                now,
            ],
        )?;
        Ok(())
    }

    pub async fn update_pending_order(
        &self,
        order_id: &str,
        status: OrderStatus,
        filled_size: f64,
        avg_fill_price: f64,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE pending_orders
             SET status = ?1, filled_size = ?2, avg_fill_price = ?3, updated_at = ?4
             WHERE order_id = ?5",
            params![
                status.as_str(),
                filled_size,
                avg_fill_price,
                Utc::now().to_rfc3339(),
                order_id,
            ],
        )?;
        Ok(())
    }

    /// Pending orders, optionally filtered by status. Without a filter,
    /// returns the non-terminal ones (LIVE / PARTIALLY_FILLED).
    pub async fn pending_orders(
        &self,
        status: Option<OrderStatus>,
        stale_after: Duration,
    ) -> Result<Vec<TrackedOrder>> {
        let conn = self.conn.lock().await;
        let sql = match status {
            Some(_) => {
                "SELECT order_id, token_id, market_question, side, order_side, size,
                        limit_price, status, filled_size, avg_fill_price, strategy, created_at
                 FROM pending_orders WHERE status = ?1 ORDER BY created_at"
            }
            None => {
                "SELECT order_id, token_id, market_question, side, order_side, size,
                        limit_price, status, filled_size, avg_fill_price, strategy, created_at
                 FROM pending_orders WHERE status IN ('LIVE', 'PARTIALLY_FILLED')
                 ORDER BY created_at"
            }
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = match status {
            Some(s) => stmt
                .query_map(params![s.as_str()], map_pending_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?,
            None => stmt
                .query_map([], map_pending_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?,
        };

        let mut out = Vec::with_capacity(rows.len());
        for (
            order_id,
            token_id,
            question,
            side,
            order_side,
            size,
            limit_price,
            status,
            filled,
            avg_fill,
            strategy,
            created_at,
        ) in rows
        {
            out.push(TrackedOrder {
                order_id,
                token_id,
                market_question: question,
                side: Outcome::parse(&side).context("bad stored order side")?,
                order_side: OrderSide::parse(&order_side).context("bad stored order_side")?,
                size,
                limit_price,
                filled_size: filled,
                avg_fill_price: avg_fill,
                status: OrderStatus::parse(&status).context("bad stored order status")?,
                created_at: parse_ts(&created_at)?,
                last_checked: None,
                stale_after,
                strategy,
            });
        }
        Ok(out)
    }

    pub async fn pending_order(&self, order_id: &str) -> Result<Option<(OrderStatus, f64, f64)>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT status, filled_size, avg_fill_price FROM pending_orders
                 WHERE order_id = ?1",
                params![order_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, f64>(2)?,
                    ))
                },
            )
            .optional()?;
        match row {
            Some((status, filled, avg)) => Ok(Some((
                OrderStatus::parse(&status).context("bad stored order status")?,
                filled,
                avg,
            ))),
            None => Ok(None),
        }
    }

    pub async fn has_live_order_for_token(&self, token_id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let n: u64 = conn.query_row(
            "SELECT COUNT(*) FROM pending_orders
             WHERE token_id = ?1 AND status IN ('LIVE', 'PARTIALLY_FILLED')",
            params![token_id],
            |r| r.get(0),
        )?;
        Ok(n > 0)
    }

    // ── Order intents (idempotency) ───────────────────────────

    /// Insert an intent unless it already exists. The primary-key constraint
    /// is what enforces idempotency; returns false on a duplicate.
    pub async fn create_intent_if_absent(
        &self,
        intent_id: &str,
        token_id: &str,
        side: &str,
        order_side: OrderSide,
        limit_price: Option<f64>,
        size: Option<f64>,
        strategy: Option<&str>,
    ) -> Result<bool> {
        let conn = self.conn.lock().await;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO order_intents
             (intent_id, token_id, side, order_side, limit_price, size, strategy, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                intent_id,
                token_id,
                side,
                order_side.as_str(),
                limit_price,
                size,
                strategy,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(inserted > 0)
    }

    pub async fn intent_exists(&self, intent_id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let n: u64 = conn.query_row(
            "SELECT COUNT(*) FROM order_intents WHERE intent_id = ?1",
            params![intent_id],
            |r| r.get(0),
        )?;
        Ok(n > 0)
    }

    pub async fn delete_intent(&self, intent_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM order_intents WHERE intent_id = ?1",
            params![intent_id],
        )?;
        Ok(())
    }

    pub async fn cleanup_old_intents(&self, older_than_seconds: i64) -> Result<usize> {
        let cutoff = (Utc::now() - Duration::seconds(older_than_seconds)).to_rfc3339();
        let conn = self.conn.lock().await;
        let deleted = conn.execute(
            "DELETE FROM order_intents WHERE created_at < ?1",
            params![cutoff],
        )?;
        Ok(deleted)
    }

    // ── Auto orders (TP / SL / trailing) ──────────────────────

    pub async fn save_auto_order(&self, order: &AutoOrder) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO auto_orders (id, token_id, market_question, order_type,
                                      side, size, trigger_price, limit_price,
                                      trailing_percent, highest_price, state, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(id) DO UPDATE SET
                state = excluded.state,
                trigger_price = excluded.trigger_price,
                highest_price = excluded.highest_price",
            params![
                order.id,
                order.token_id,
                order.market_question,
                order.order_type.as_str(),
                order.side.as_str(),
                order.size,
                order.trigger_price,
                order.limit_price,
                order.trailing_percent,
                order.highest_price,
                order.state.as_str(),
                order.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// State transition with a timestamp stamp for triggered/executed/failed.
    pub async fn update_auto_order_state(
        &self,
        order_id: &str,
        state: AutoOrderState,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().await;
        match state {
            AutoOrderState::Triggered => {
                conn.execute(
                    "UPDATE auto_orders SET state = ?1, triggered_at = ?2 WHERE id = ?3",
                    params![state.as_str(), now, order_id],
                )?;
            }
            AutoOrderState::Executed | AutoOrderState::Failed => {
                conn.execute(
                    "UPDATE auto_orders SET state = ?1, executed_at = ?2 WHERE id = ?3",
                    params![state.as_str(), now, order_id],
                )?;
            }
            _ => {
                conn.execute(
                    "UPDATE auto_orders SET state = ?1 WHERE id = ?2",
                    params![state.as_str(), order_id],
                )?;
            }
        }
        Ok(())
    }

    pub async fn active_auto_orders(&self) -> Result<Vec<AutoOrder>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, token_id, market_question, order_type, side, size,
                    trigger_price, limit_price, trailing_percent, highest_price,
                    state, created_at, triggered_at, executed_at
             FROM auto_orders WHERE state IN ('pending', 'active')
             ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, f64>(5)?,
                    row.get::<_, f64>(6)?,
                    row.get::<_, Option<f64>>(7)?,
                    row.get::<_, Option<f64>>(8)?,
                    row.get::<_, f64>(9)?,
                    row.get::<_, String>(10)?,
                    row.get::<_, String>(11)?,
                    row.get::<_, Option<String>>(12)?,
                    row.get::<_, Option<String>>(13)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut out = Vec::with_capacity(rows.len());
        for (
            id,
            token_id,
            question,
            order_type,
            side,
            size,
            trigger_price,
            limit_price,
            trailing_percent,
            highest_price,
            state,
            created_at,
            triggered_at,
            executed_at,
        ) in rows
        {
            out.push(AutoOrder {
                id,
                token_id,
                market_question: question,
                order_type: AutoOrderType::parse(&order_type)
                    .context("bad stored auto-order type")?,
                side: Outcome::parse(&side).context("bad stored auto-order side")?,
                size,
                trigger_price,
                limit_price,
                trailing_percent,
                highest_price,
                state: AutoOrderState::parse(&state).context("bad stored auto-order state")?,
                created_at: parse_ts(&created_at)?,
                triggered_at: triggered_at.as_deref().map(parse_ts).transpose()?,
                executed_at: executed_at.as_deref().map(parse_ts).transpose()?,
                execution_price: None,
                linked_order_id: None,
            });
        }
        Ok(out)
    }

    pub async fn update_trailing_high(&self, order_id: &str, highest_price: f64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE auto_orders SET highest_price = ?1 WHERE id = ?2",
            params![highest_price, order_id],
        )?;
        Ok(())
    }

    // ── Key-value state ───────────────────────────────────────

    pub async fn set_state(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO bot_state (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub async fn get_state(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        let value = conn
            .query_row(
                "SELECT value FROM bot_state WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    pub async fn get_state_f64(&self, key: &str, default: f64) -> Result<f64> {
        Ok(self
            .get_state(key)
            .await?
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(default))
    }

    pub async fn set_state_json<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.set_state(key, &serde_json::to_string(value)?).await
    }

    pub async fn get_state_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>> {
        match self.get_state(key).await? {
            Some(raw) => Ok(serde_json::from_str(&raw).ok()),
            None => Ok(None),
        }
    }

    // ── Diagnostics ───────────────────────────────────────────

    pub async fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock().await;
        let positions: u64 = conn.query_row("SELECT COUNT(*) FROM positions", [], |r| r.get(0))?;
        let trades: u64 = conn.query_row("SELECT COUNT(*) FROM trades", [], |r| r.get(0))?;
        let snapshots: u64 =
            conn.query_row("SELECT COUNT(*) FROM price_snapshots", [], |r| r.get(0))?;
        let active_auto_orders: u64 = conn.query_row(
            "SELECT COUNT(*) FROM auto_orders WHERE state IN ('pending', 'active')",
            [],
            |r| r.get(0),
        )?;
        let pending_orders: u64 = conn.query_row(
            "SELECT COUNT(*) FROM pending_orders WHERE status IN ('LIVE', 'PARTIALLY_FILLED')",
            [],
            |r| r.get(0),
        )?;
        Ok(StoreStats {
            positions,
            trades,
            snapshots,
            active_auto_orders,
            pending_orders,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub positions: u64,
    pub trades: u64,
    pub snapshots: u64,
    pub active_auto_orders: u64,
    pub pending_orders: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(token: &str, size: f64, avg: f64) -> Position {
        Position {
            token_id: token.to_string(),
            market_question: "Will it happen?".to_string(),
            side: Outcome::Yes,
            size,
            avg_entry_price: avg,
            current_price: 0.0,
            opened_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_position_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let pos = position("tok1", 100.0, 0.45);
        store.save_position(&pos).await.unwrap();

        let loaded = store.load_positions().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].token_id, "tok1");
        assert_eq!(loaded[0].size, 100.0);
        assert_eq!(loaded[0].avg_entry_price, 0.45);

        // Upsert replaces, not duplicates.
        store.save_position(&position("tok1", 150.0, 0.47)).await.unwrap();
        let loaded = store.load_positions().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].size, 150.0);

        store.remove_position("tok1", Outcome::Yes).await.unwrap();
        assert!(store.load_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_range_and_cleanup() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        for (i, price) in [0.42, 0.46, 0.50].iter().enumerate() {
            store
                .save_price_snapshot(&PriceSnapshot {
                    token_id: "tok".to_string(),
                    timestamp: now - Duration::hours(3 - i as i64),
                    price_yes: *price,
                    price_no: 1.0 - *price,
                    best_bid: None,
                    best_ask: None,
                })
                .await
                .unwrap();
        }
        // Old snapshot outside the window.
        store
            .save_price_snapshot(&PriceSnapshot {
                token_id: "tok".to_string(),
                timestamp: now - Duration::days(10),
                price_yes: 0.30,
                price_no: 0.70,
                best_bid: None,
                best_ask: None,
            })
            .await
            .unwrap();

        let history = store.price_history("tok", 4, 100).await.unwrap();
        assert_eq!(history.len(), 3);
        assert!(history[0].timestamp < history[2].timestamp);
        assert_eq!(history[0].price_yes, 0.42);

        let deleted = store.cleanup_old_snapshots(7).await.unwrap();
        assert_eq!(deleted, 1);
    }

    #[tokio::test]
    async fn test_intent_idempotency() {
        let store = Store::open_in_memory().unwrap();
        let first = store
            .create_intent_if_absent("abc", "tok", "YES", OrderSide::Buy, Some(0.5), Some(10.0), None)
            .await
            .unwrap();
        let second = store
            .create_intent_if_absent("abc", "tok", "YES", OrderSide::Buy, Some(0.5), Some(10.0), None)
            .await
            .unwrap();
        assert!(first);
        assert!(!second);
        assert!(store.intent_exists("abc").await.unwrap());

        store.delete_intent("abc").await.unwrap();
        assert!(!store.intent_exists("abc").await.unwrap());
    }

    #[tokio::test]
    async fn test_pending_order_queries() {
        let store = Store::open_in_memory().unwrap();
        let order = TrackedOrder {
            order_id: "ord1".to_string(),
            token_id: "tok".to_string(),
            market_question: "q".to_string(),
            side: Outcome::Yes,
            order_side: OrderSide::Buy,
            size: 50.0,
            limit_price: 0.4,
            filled_size: 0.0,
            avg_fill_price: 0.0,
            status: OrderStatus::Live,
            created_at: Utc::now(),
            last_checked: None,
            stale_after: Duration::minutes(30),
            strategy: Some("momentum".to_string()),
        };
        store.save_pending_order(&order).await.unwrap();

        assert!(store.has_live_order_for_token("tok").await.unwrap());
        assert!(!store.has_live_order_for_token("other").await.unwrap());

        let open = store
            .pending_orders(None, Duration::minutes(30))
            .await
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].strategy.as_deref(), Some("momentum"));

        store
            .update_pending_order("ord1", OrderStatus::Matched, 50.0, 0.41)
            .await
            .unwrap();
        assert!(store
            .pending_orders(None, Duration::minutes(30))
            .await
            .unwrap()
            .is_empty());
        let (status, filled, avg) = store.pending_order("ord1").await.unwrap().unwrap();
        assert_eq!(status, OrderStatus::Matched);
        assert_eq!(filled, 50.0);
        assert!((avg - 0.41).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_auto_order_state_stamps() {
        let store = Store::open_in_memory().unwrap();
        let order = AutoOrder {
            id: "auto1".to_string(),
            token_id: "tok".to_string(),
            market_question: "q".to_string(),
            order_type: AutoOrderType::TakeProfit,
            side: Outcome::Yes,
            size: 25.0,
            trigger_price: 0.7,
            limit_price: None,
            trailing_percent: None,
            highest_price: 0.0,
            state: AutoOrderState::Active,
            created_at: Utc::now(),
            triggered_at: None,
            executed_at: None,
            execution_price: None,
            linked_order_id: None,
        };
        store.save_auto_order(&order).await.unwrap();
        assert_eq!(store.active_auto_orders().await.unwrap().len(), 1);

        store
            .update_auto_order_state("auto1", AutoOrderState::Triggered)
            .await
            .unwrap();
        store
            .update_auto_order_state("auto1", AutoOrderState::Executed)
            .await
            .unwrap();
        assert!(store.active_auto_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_kv_state() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.get_state("pnl_day").await.unwrap().is_none());
        store.set_state("pnl_day", "2026-08-01").await.unwrap();
        assert_eq!(
            store.get_state("pnl_day").await.unwrap().as_deref(),
            Some("2026-08-01")
        );
        store.set_state("realized_pnl", "12.5").await.unwrap();
        assert_eq!(store.get_state_f64("realized_pnl", 0.0).await.unwrap(), 12.5);
        assert_eq!(store.get_state_f64("missing", 7.0).await.unwrap(), 7.0);
    }

    #[tokio::test]
    async fn test_trade_history_filters() {
        let store = Store::open_in_memory().unwrap();
        for (token, action, price) in [
            ("a", OrderSide::Buy, 0.40),
            ("a", OrderSide::Sell, 0.55),
            ("b", OrderSide::Buy, 0.30),
        ] {
            store
                .record_trade(&TradeRecord {
                    timestamp: Utc::now(),
                    token_id: token.to_string(),
                    market_question: "q".to_string(),
                    side: Outcome::Yes,
                    action,
                    size: 10.0,
                    price,
                    fee: 0.0,
                    order_id: None,
                    strategy: None,
                })
                .await
                .unwrap();
        }

        let all = store.trade_history(None, None, 100).await.unwrap();
        assert_eq!(all.len(), 3);
        let token_a = store.trade_history(Some("a"), None, 100).await.unwrap();
        assert_eq!(token_a.len(), 2);

        let stats = store.trade_stats().await.unwrap();
        assert_eq!(stats.total_trades, 3);
        assert_eq!(stats.buys, 2);
        assert_eq!(stats.sells, 1);
        assert_eq!(stats.wins, 1);
        assert_eq!(stats.win_rate, 100.0);
    }
}
