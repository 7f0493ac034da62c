//! SQLite Ledger Module
//!
//! Stores committed blocks and the current chain state in SQLite.
//!
//! # Storage
//! - `blocks(height, id, body)`: one row per committed block, JSON body
//! - `chain_state(id = 0, height, state)`: the single current state snapshot
//!
//! A commit inserts the block row and replaces the state row inside one SQL
//! transaction, so either both land or neither does.

use super::{Ledger, check_extends};
use crate::{Block, BlockHeader, LedgerError, state::ChainState};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

const SCHEMA: [&str; 2] = [
    "CREATE TABLE IF NOT EXISTS blocks (
        height INTEGER PRIMARY KEY,
        id TEXT NOT NULL,
        body TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS chain_state (
        id INTEGER PRIMARY KEY CHECK (id = 0),
        height INTEGER NOT NULL,
        state TEXT NOT NULL
    )",
];

/// SQLite-backed ledger
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Open (or create) the database at `url` and apply the schema
    ///
    /// # Arguments
    /// * `url` - Database URL, e.g. "sqlite://chain.db" or "sqlite::memory:"
    pub async fn connect(url: &str) -> Result<Self, LedgerError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        // A single connection keeps `sqlite::memory:` to one database and
        // serializes writers.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        info!("SQLite ledger ready at {}", url);

        Ok(Self { pool })
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn current_state(&self) -> Result<ChainState, LedgerError> {
        let row = sqlx::query_as::<_, (String,)>("SELECT state FROM chain_state WHERE id = 0")
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some((state,)) => Ok(serde_json::from_str(&state)?),
            None => Ok(ChainState::default()),
        }
    }

    async fn initialize_if_empty(&self, genesis: &BlockHeader) -> Result<(), LedgerError> {
        let mut state = ChainState::default();
        state.apply_header(genesis.clone());

        sqlx::query("INSERT OR IGNORE INTO chain_state (id, height, state) VALUES (0, ?, ?)")
            .bind(genesis.height as i64)
            .bind(serde_json::to_string(&state)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn commit_block(&self, block: &Block, state: &ChainState) -> Result<(), LedgerError> {
        let body = serde_json::to_string(block)?;
        let snapshot = serde_json::to_string(state)?;

        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, (String,)>("SELECT state FROM chain_state WHERE id = 0")
            .fetch_optional(&mut *tx)
            .await?;
        let current: ChainState = match current {
            Some((state,)) => serde_json::from_str(&state)?,
            None => ChainState::default(),
        };
        check_extends(&current, block)?;

        sqlx::query("INSERT INTO blocks (height, id, body) VALUES (?, ?, ?)")
            .bind(block.height() as i64)
            .bind(format!("{:?}", block.id()))
            .bind(body)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE chain_state SET height = ?, state = ? WHERE id = 0")
            .bind(block.height() as i64)
            .bind(snapshot)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn block_at(&self, height: u64) -> Result<Option<Block>, LedgerError> {
        let row = sqlx::query_as::<_, (String,)>("SELECT body FROM blocks WHERE height = ?")
            .bind(height as i64)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some((body,)) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }
}
