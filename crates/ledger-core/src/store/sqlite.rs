//! SQLite persistence for the ledger.
//!
//! The schema mirrors the relational model: `blocks` with a unique height,
//! `transactions` owned by a block height, `outputs` keyed by
//! `(tx_id, position)`, and `inputs` keyed by `(tx_id, position)` with a
//! unique `(ref_tx_id, ref_position)` so an output can be consumed at most
//! once. Every child table cascades on delete, which is what makes
//! [`BlockStore::delete_after_height`] a single statement. Amounts are stored
//! as canonical decimal text and never pass through SQLite's REAL type.

use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::StoreError;
use crate::types::{Amount, BlockHeight, OutputRef, UnspentOutput};

use super::{
    AtomicScope, BlockRecord, BlockStore, LedgerSession, TransactionRecord, UnitOfWork,
    UnspentOutputIndex,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS blocks (
        id TEXT NOT NULL PRIMARY KEY,
        height INTEGER NOT NULL UNIQUE
    );
    CREATE TABLE IF NOT EXISTS transactions (
        id TEXT NOT NULL PRIMARY KEY,
        block_height INTEGER NOT NULL,
        FOREIGN KEY (block_height) REFERENCES blocks(height) ON DELETE CASCADE
    );
    CREATE TABLE IF NOT EXISTS outputs (
        tx_id TEXT NOT NULL,
        position INTEGER NOT NULL,
        address TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (tx_id, position),
        FOREIGN KEY (tx_id) REFERENCES transactions(id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS outputs_by_address ON outputs(address);
    CREATE TABLE IF NOT EXISTS inputs (
        ref_tx_id TEXT NOT NULL,
        ref_position INTEGER NOT NULL,
        tx_id TEXT NOT NULL,
        position INTEGER NOT NULL,
        PRIMARY KEY (tx_id, position),
        UNIQUE (ref_tx_id, ref_position),
        FOREIGN KEY (tx_id) REFERENCES transactions(id) ON DELETE CASCADE,
        FOREIGN KEY (ref_tx_id, ref_position) REFERENCES outputs(tx_id, position) ON DELETE CASCADE
    );
";

const DROP_SCHEMA: &str = "
    DROP TABLE IF EXISTS inputs;
    DROP TABLE IF EXISTS outputs;
    DROP TABLE IF EXISTS transactions;
    DROP TABLE IF EXISTS blocks;
";

const RESOLVE_UNSPENT: &str = "
    SELECT o.address, o.value FROM outputs o
    LEFT JOIN inputs i ON i.ref_tx_id = o.tx_id AND i.ref_position = o.position
    WHERE o.tx_id = ?1 AND o.position = ?2 AND i.tx_id IS NULL";

const UNSPENT_BY_ADDRESS: &str = "
    SELECT o.tx_id, o.position, o.value FROM outputs o
    LEFT JOIN inputs i ON i.ref_tx_id = o.tx_id AND i.ref_position = o.position
    WHERE o.address = ?1 AND i.tx_id IS NULL
    ORDER BY o.tx_id, o.position";

/// Ledger storage backed by a single SQLite connection.
///
/// Reads and deletes run on tokio's blocking pool so a slow disk never stalls
/// a runtime worker. Commits run on the calling task because the unit of work
/// borrows the caller's records; each is one short transaction.
pub struct SqliteLedger {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLedger {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Drop every ledger table and recreate an empty schema.
    pub fn reset(&self) -> Result<(), StoreError> {
        let conn = lock_connection(&self.conn)?;
        conn.execute_batch(DROP_SCHEMA)?;
        conn.execute_batch(SCHEMA)?;
        debug!("sqlite ledger: schema reset");
        Ok(())
    }

    /// Run `query` against the locked connection on the blocking pool.
    async fn blocking<T, F>(&self, query: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = lock_connection(&conn)?;
            query(&guard)
        })
        .await
        .map_err(|err| StoreError::Backend(format!("sqlite worker failed: {err}")))?
    }

    fn commit(&self, work: UnitOfWork<'_>) -> Result<(), StoreError> {
        let mut conn = lock_connection(&self.conn)?;
        let tx = conn.transaction()?;
        work(&mut SqliteSession { tx: &tx })?;
        tx.commit()?;
        Ok(())
    }
}

fn lock_connection(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StoreError> {
    conn.lock()
        .map_err(|_| StoreError::Backend("connection mutex poisoned".to_string()))
}

// ==============================================================================
// Queries
// ==============================================================================

fn query_current_height(conn: &Connection) -> Result<BlockHeight, StoreError> {
    let max: Option<i64> = conn.query_row("SELECT MAX(height) FROM blocks", [], |row| {
        row.get(0)
    })?;
    match max {
        Some(height) => Ok(BlockHeight(from_sql_height(height)?)),
        None => Ok(BlockHeight::EMPTY),
    }
}

fn delete_blocks_after(conn: &Connection, height: BlockHeight) -> Result<u64, StoreError> {
    let removed = conn.execute(
        "DELETE FROM blocks WHERE height > ?1",
        params![to_sql_height(height)?],
    )?;
    Ok(removed as u64)
}

fn query_resolve(conn: &Connection, refs: &[OutputRef]) -> Result<Vec<UnspentOutput>, StoreError> {
    let mut stmt = conn.prepare_cached(RESOLVE_UNSPENT)?;
    let mut seen = HashSet::new();
    let mut resolved = Vec::with_capacity(refs.len());

    for reference in refs.iter().filter(|reference| seen.insert(*reference)) {
        let row = stmt
            .query_row(params![reference.tx_id, reference.index], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .optional()?;
        if let Some((address, value)) = row {
            resolved.push(UnspentOutput {
                address,
                value: parse_amount(&value)?,
                tx_id: reference.tx_id.clone(),
                index: reference.index,
            });
        }
    }
    Ok(resolved)
}

fn query_by_address(conn: &Connection, address: &str) -> Result<Vec<UnspentOutput>, StoreError> {
    let mut stmt = conn.prepare_cached(UNSPENT_BY_ADDRESS)?;
    let rows = stmt
        .query_map(params![address], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(tx_id, index, value)| {
            Ok(UnspentOutput {
                address: address.to_string(),
                value: parse_amount(&value)?,
                tx_id,
                index,
            })
        })
        .collect()
}

// ==============================================================================
// Session
// ==============================================================================

struct SqliteSession<'a> {
    tx: &'a rusqlite::Transaction<'a>,
}

impl LedgerSession for SqliteSession<'_> {
    fn save_block(&mut self, block: &BlockRecord) -> Result<(), StoreError> {
        self.tx.execute(
            "INSERT INTO blocks (id, height) VALUES (?1, ?2)",
            params![block.id, to_sql_height(block.height)?],
        )?;
        Ok(())
    }

    fn save_transactions(&mut self, transactions: &[TransactionRecord]) -> Result<(), StoreError> {
        let mut insert_tx = self
            .tx
            .prepare_cached("INSERT INTO transactions (id, block_height) VALUES (?1, ?2)")?;
        let mut insert_output = self.tx.prepare_cached(
            "INSERT INTO outputs (tx_id, position, address, value) VALUES (?1, ?2, ?3, ?4)",
        )?;
        let mut insert_input = self.tx.prepare_cached(
            "INSERT INTO inputs (ref_tx_id, ref_position, tx_id, position) VALUES (?1, ?2, ?3, ?4)",
        )?;

        for transaction in transactions {
            insert_tx.execute(params![
                transaction.id,
                to_sql_height(transaction.block_height)?
            ])?;
        }
        for output in transactions.iter().flat_map(|tx| &tx.outputs) {
            insert_output.execute(params![
                output.tx_id,
                output.index,
                output.address,
                output.value.to_string()
            ])?;
        }
        for input in transactions.iter().flat_map(|tx| &tx.inputs) {
            insert_input.execute(params![
                input.ref_tx_id,
                input.ref_index,
                input.tx_id,
                input.index
            ])?;
        }
        Ok(())
    }
}

fn to_sql_height(height: BlockHeight) -> Result<i64, StoreError> {
    i64::try_from(height.0)
        .map_err(|_| StoreError::Backend(format!("height {height} exceeds SQLite integer range")))
}

fn from_sql_height(height: i64) -> Result<u64, StoreError> {
    u64::try_from(height)
        .map_err(|_| StoreError::Backend(format!("negative height {height} in blocks table")))
}

fn parse_amount(text: &str) -> Result<Amount, StoreError> {
    Amount::from_str(text)
        .map_err(|e| StoreError::Backend(format!("invalid stored amount `{text}`: {e}")))
}

// ==============================================================================
// Capabilities
// ==============================================================================

#[async_trait]
impl BlockStore for SqliteLedger {
    async fn current_height(&self) -> Result<BlockHeight, StoreError> {
        self.blocking(query_current_height).await
    }

    async fn delete_after_height(&self, height: BlockHeight) -> Result<u64, StoreError> {
        let removed = self
            .blocking(move |conn| delete_blocks_after(conn, height))
            .await?;
        debug!(%height, removed, "sqlite ledger: deleted blocks");
        Ok(removed)
    }
}

#[async_trait]
impl UnspentOutputIndex for SqliteLedger {
    async fn resolve(&self, refs: &[OutputRef]) -> Result<Vec<UnspentOutput>, StoreError> {
        let refs = refs.to_vec();
        self.blocking(move |conn| query_resolve(conn, &refs)).await
    }

    async fn by_address(&self, address: &str) -> Result<Vec<UnspentOutput>, StoreError> {
        let address = address.to_string();
        self.blocking(move |conn| query_by_address(conn, &address))
            .await
    }
}

#[async_trait]
impl AtomicScope for SqliteLedger {
    async fn within_transaction(&self, work: UnitOfWork<'_>) -> Result<(), StoreError> {
        self.commit(work)
    }
}
