//! SQLite persistence for the projection.
//!
//! Every committed [`Transition`] is written inside one SQLite transaction
//! together with the event-log offset it was read up to, so a restart resumes
//! exactly after the last persisted event.

use anyhow::{anyhow, Context, Result};
use num_bigint::{BigInt, BigUint};
use rusqlite::{params, Connection, OptionalExtension};

use crate::engine::events::Cursor;
use crate::engine::state::{
    GlobalStats, Pool, PoolMembership, Position, ProjectionState, TokenId, TransactionRecord,
    Transition, TxType,
};
use crate::math::serde_big;

/// How far the log has been consumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub seq: u64,
    /// Byte offset into the event log.
    pub offset: u64,
    pub cursor: Option<Cursor>,
}

pub struct StateStore {
    conn: Connection,
}

fn uint(raw: &str) -> Result<BigUint> {
    serde_big::parse_uint(raw).ok_or_else(|| anyhow!("bad unsigned integer {raw:?}"))
}

fn int(raw: &str) -> Result<BigInt> {
    serde_big::parse_int(raw).ok_or_else(|| anyhow!("bad signed integer {raw:?}"))
}

fn tx_type(raw: &str) -> Result<TxType> {
    match raw {
        "Buy" => Ok(TxType::Buy),
        "Sell" => Ok(TxType::Sell),
        "AddLiquidity" => Ok(TxType::AddLiquidity),
        "RemoveLiquidity" => Ok(TxType::RemoveLiquidity),
        other => Err(anyhow!("unknown transaction type {other:?}")),
    }
}

impl StateStore {
    pub fn new(path: &str) -> Result<Self> {
        Ok(Self { conn: Connection::open(path)? })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn init(&mut self) -> Result<()> {
        self.conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS pools (
                id TEXT PRIMARY KEY,
                collateral_token TEXT NOT NULL,
                total_supply TEXT NOT NULL,
                liquidity_parameter TEXT NOT NULL,
                data TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS positions (
                id TEXT PRIMARY KEY,
                user TEXT NOT NULL,
                token TEXT NOT NULL,
                amount TEXT NOT NULL,
                avg_price TEXT NOT NULL,
                total_bought TEXT NOT NULL,
                realized_pnl TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS memberships (
                id TEXT PRIMARY KEY,
                pool TEXT NOT NULL,
                holder TEXT NOT NULL,
                amount TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                tx_type TEXT NOT NULL,
                ts INTEGER NOT NULL,
                market TEXT NOT NULL,
                actor TEXT NOT NULL,
                trade_amount TEXT NOT NULL,
                fee_amount TEXT NOT NULL,
                outcome_index INTEGER,
                outcome_token_amount TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS transactions_market ON transactions (market, ts);
            CREATE TABLE IF NOT EXISTS global_stats (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                data TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            COMMIT;",
        )?;
        Ok(())
    }

    /// Write a committed transition and the progress it brings, atomically.
    pub fn persist(&mut self, t: &Transition, progress: Progress) -> Result<()> {
        let tx = self.conn.transaction()?;

        if let Some(pool) = &t.pool {
            tx.execute(
                "INSERT OR REPLACE INTO pools (id, collateral_token, total_supply, liquidity_parameter, data)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    pool.id,
                    pool.collateral_token,
                    pool.total_supply.to_string(),
                    pool.liquidity_parameter.to_string(),
                    serde_json::to_string(pool)?,
                ],
            )?;
        }

        for p in &t.positions {
            tx.execute(
                "INSERT OR REPLACE INTO positions (id, user, token, amount, avg_price, total_bought, realized_pnl)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    p.key(),
                    p.user,
                    p.token.to_string(),
                    p.amount.to_string(),
                    p.avg_price.to_string(),
                    p.total_bought.to_string(),
                    p.realized_pnl.to_string(),
                ],
            )?;
        }

        for m in &t.memberships {
            tx.execute(
                "INSERT OR REPLACE INTO memberships (id, pool, holder, amount) VALUES (?1, ?2, ?3, ?4)",
                params![m.key(), m.pool, m.holder, m.amount.to_string()],
            )?;
        }

        if let Some(rec) = &t.transaction {
            tx.execute(
                "INSERT OR REPLACE INTO transactions
                 (id, tx_type, ts, market, actor, trade_amount, fee_amount, outcome_index, outcome_token_amount)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    rec.id,
                    rec.tx_type.as_str(),
                    rec.timestamp as i64,
                    rec.market,
                    rec.actor,
                    rec.trade_amount.to_string(),
                    rec.fee_amount.to_string(),
                    rec.outcome_index.map(|i| i as i64),
                    rec.outcome_token_amount.to_string(),
                ],
            )?;
        }

        if let Some(global) = &t.global {
            tx.execute(
                "INSERT OR REPLACE INTO global_stats (id, data) VALUES (1, ?1)",
                params![serde_json::to_string(global)?],
            )?;
        }

        write_progress(&tx, progress)?;
        tx.commit()?;
        Ok(())
    }

    /// Advance the offset past events that changed nothing.
    pub fn save_progress(&mut self, progress: Progress) -> Result<()> {
        let tx = self.conn.transaction()?;
        write_progress(&tx, progress)?;
        tx.commit()?;
        Ok(())
    }

    pub fn load_progress(&self) -> Result<Progress> {
        let seq = self.meta("seq")?.map(|v| v.parse::<u64>()).transpose()?.unwrap_or(0);
        let offset = self.meta("offset")?.map(|v| v.parse::<u64>()).transpose()?.unwrap_or(0);
        let cursor = match self.meta("cursor")? {
            Some(raw) => Some(serde_json::from_str(&raw)?),
            None => None,
        };
        Ok(Progress { seq, offset, cursor })
    }

    fn meta(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?)
    }

    /// Rebuild the in-memory projection from the tables.
    pub fn load_state(&self) -> Result<(ProjectionState, Progress)> {
        let mut state = ProjectionState::new();

        let mut stmt = self.conn.prepare("SELECT data FROM pools")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        for raw in rows {
            let pool: Pool = serde_json::from_str(&raw?).context("decoding stored pool")?;
            state.pools.insert(pool.id.clone(), pool);
        }

        let mut stmt = self.conn.prepare(
            "SELECT user, token, amount, avg_price, total_bought, realized_pnl FROM positions",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;
        for row in rows {
            let (user, token, amount, avg_price, total_bought, realized_pnl) = row?;
            let token: TokenId = token.parse().map_err(|e: String| anyhow!(e))?;
            let position = Position {
                user,
                token,
                amount: uint(&amount)?,
                avg_price: uint(&avg_price)?,
                total_bought: uint(&total_bought)?,
                realized_pnl: int(&realized_pnl)?,
            };
            state.positions.insert(position.key(), position);
        }

        let mut stmt = self.conn.prepare("SELECT pool, holder, amount FROM memberships")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?;
        for row in rows {
            let (pool, holder, amount) = row?;
            let membership = PoolMembership { pool, holder, amount: int(&amount)? };
            state.memberships.insert(membership.key(), membership);
        }

        let global: Option<String> = self
            .conn
            .query_row("SELECT data FROM global_stats WHERE id = 1", [], |row| row.get(0))
            .optional()?;
        if let Some(raw) = global {
            state.global = serde_json::from_str::<GlobalStats>(&raw)?;
        }

        let progress = self.load_progress()?;
        state.seq = progress.seq;
        state.cursor = progress.cursor;
        Ok((state, progress))
    }

    /// Transaction records of one market, oldest first.
    pub fn transactions_for(&self, market: &str) -> Result<Vec<TransactionRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, tx_type, ts, market, actor, trade_amount, fee_amount, outcome_index, outcome_token_amount
             FROM transactions WHERE market = ?1 ORDER BY ts, id",
        )?;
        let rows = stmt.query_map(params![market], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, Option<i64>>(7)?,
                row.get::<_, String>(8)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, kind, ts, market, actor, trade, fee, outcome_index, tokens) = row?;
            out.push(TransactionRecord {
                id,
                tx_type: tx_type(&kind)?,
                timestamp: ts as u64,
                market,
                actor,
                trade_amount: uint(&trade)?,
                fee_amount: uint(&fee)?,
                outcome_index: outcome_index.map(|i| i as usize),
                outcome_token_amount: uint(&tokens)?,
            });
        }
        Ok(out)
    }

    pub fn transaction_count(&self) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;
        Ok(n as u64)
    }
}

fn write_progress(tx: &rusqlite::Transaction<'_>, progress: Progress) -> Result<()> {
    let mut entries = vec![
        ("seq", progress.seq.to_string()),
        ("offset", progress.offset.to_string()),
    ];
    if let Some(cursor) = progress.cursor {
        entries.push(("cursor", serde_json::to_string(&cursor)?));
    }
    for (key, value) in entries {
        tx.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
    }
    Ok(())
}
