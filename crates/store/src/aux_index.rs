use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StorageError;

/// SQLite journal mode for the auxiliary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalMode {
    /// Write-ahead log; the recommended mode, allows concurrent readers
    /// during a write.
    Wal,
    /// Classic rollback journal.
    Delete,
}

impl JournalMode {
    const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "WAL",
            Self::Delete => "DELETE",
        }
    }
}

/// A previously-committed blueprint, as recorded in the `blueprints` table.
///
/// `block_hash` and `state_hash` extend the literal `blueprints` schema
/// (`number`, `payload`, `timestamp`) with the two identifiers
/// `evmnode-context` needs to support idempotent re-application and
/// `replay` without re-deriving them from the content store on every
/// lookup. `applied_events` captures any events drained from the
/// context's pending-events queue (`apply_evm_events`) at the moment this
/// blueprint was applied, so `replay` can feed the kernel an input
/// identical to the original run even though the queue itself is
/// in-memory and not otherwise persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlueprintRecord {
    /// The blueprint's opaque payload.
    pub payload: Vec<u8>,
    /// Timestamp assigned at production time.
    pub timestamp: i64,
    /// The block hash the kernel reported producing for this blueprint.
    pub block_hash: [u8; 32],
    /// The content-store hash of the state produced by this blueprint.
    pub state_hash: [u8; 32],
    /// Raw bytes of any events applied alongside the payload, in order.
    pub applied_events: Vec<Vec<u8>>,
}

/// The `sqlite.db` auxiliary index alongside the content store: fast
/// lookups by blueprint number and the small pieces of mutable state
/// (publisher high-water-mark, delayed-inbox cursors) that don't belong
/// in the content-addressed snapshot tree.
///
/// Four tables, matching the on-disk layout: `blueprints`,
/// `kernel_upgrades`, `publisher_state`, `delayed_inbox_cursor`.
#[derive(Debug)]
pub struct AuxIndex {
    conn: Connection,
}

const BLUEPRINTS_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS blueprints (
    number INTEGER PRIMARY KEY,
    payload BLOB NOT NULL,
    timestamp INTEGER NOT NULL,
    block_hash BLOB NOT NULL,
    state_hash BLOB NOT NULL,
    applied_events BLOB NOT NULL
);";

impl AuxIndex {
    /// Opens (creating and migrating if absent) the index at `path`.
    pub fn open(path: impl AsRef<std::path::Path>, journal_mode: JournalMode) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", journal_mode.pragma_value())?;
        conn.execute_batch(BLUEPRINTS_SCHEMA)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kernel_upgrades (
                number INTEGER PRIMARY KEY,
                payload BLOB NOT NULL
            );
            CREATE TABLE IF NOT EXISTS publisher_state (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                last_published INTEGER NOT NULL,
                last_seen_on_chain INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS delayed_inbox_cursor (
                source TEXT PRIMARY KEY,
                l1_level INTEGER NOT NULL
            );",
        )?;
        Ok(Self { conn })
    }

    /// Opens an in-memory index, used by tests.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(BLUEPRINTS_SCHEMA)?;
        conn.execute_batch(
            "CREATE TABLE kernel_upgrades (number INTEGER PRIMARY KEY, payload BLOB NOT NULL);
             CREATE TABLE publisher_state (id INTEGER PRIMARY KEY CHECK (id = 0), last_published INTEGER NOT NULL, last_seen_on_chain INTEGER NOT NULL);
             CREATE TABLE delayed_inbox_cursor (source TEXT PRIMARY KEY, l1_level INTEGER NOT NULL);",
        )?;
        Ok(Self { conn })
    }

    /// Records a committed blueprint, indexed by number.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_blueprint(
        &self,
        number: u64,
        payload: &[u8],
        timestamp: i64,
        block_hash: [u8; 32],
        state_hash: [u8; 32],
        applied_events: &[Vec<u8>],
    ) -> Result<(), StorageError> {
        let encoded_events = bincode::serialize(applied_events)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO blueprints
                (number, payload, timestamp, block_hash, state_hash, applied_events)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![number, payload, timestamp, block_hash.as_slice(), state_hash.as_slice(), encoded_events],
        )?;
        Ok(())
    }

    /// Fetches a previously-indexed blueprint record.
    pub fn get_blueprint(&self, number: u64) -> Result<Option<BlueprintRecord>, StorageError> {
        self.conn
            .query_row(
                "SELECT payload, timestamp, block_hash, state_hash, applied_events FROM blueprints WHERE number = ?1",
                params![number],
                |row| {
                    let payload: Vec<u8> = row.get(0)?;
                    let timestamp: i64 = row.get(1)?;
                    let block_hash_raw: Vec<u8> = row.get(2)?;
                    let state_hash_raw: Vec<u8> = row.get(3)?;
                    let events_raw: Vec<u8> = row.get(4)?;
                    Ok((payload, timestamp, block_hash_raw, state_hash_raw, events_raw))
                },
            )
            .optional()?
            .map(|(payload, timestamp, block_hash_raw, state_hash_raw, events_raw)| {
                let block_hash = array_from_slice(&block_hash_raw)?;
                let state_hash = array_from_slice(&state_hash_raw)?;
                let applied_events: Vec<Vec<u8>> = bincode::deserialize(&events_raw)?;
                Ok(BlueprintRecord { payload, timestamp, block_hash, state_hash, applied_events })
            })
            .transpose()
    }

    /// The number of committed blueprints, i.e. `next_blueprint_number`
    /// for a node that has only ever moved forward through `commit`.
    pub fn count_blueprints(&self) -> Result<u64, StorageError> {
        self.conn
            .query_row("SELECT COUNT(*) FROM blueprints", [], |row| row.get(0))
            .map_err(StorageError::from)
    }

    /// Records a kernel upgrade payload scheduled to take effect at
    /// blueprint `number`.
    pub fn insert_kernel_upgrade(&self, number: u64, payload: &[u8]) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO kernel_upgrades (number, payload) VALUES (?1, ?2)",
            params![number, payload],
        )?;
        Ok(())
    }

    /// Updates the publisher's crash-safe high-water-mark.
    pub fn set_publisher_state(&self, last_published: u64, last_seen_on_chain: u64) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO publisher_state (id, last_published, last_seen_on_chain) VALUES (0, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET last_published = excluded.last_published, last_seen_on_chain = excluded.last_seen_on_chain",
            params![last_published, last_seen_on_chain],
        )?;
        Ok(())
    }

    /// Reads the publisher's persisted high-water-mark, if any.
    pub fn get_publisher_state(&self) -> Result<Option<(u64, u64)>, StorageError> {
        self.conn
            .query_row(
                "SELECT last_published, last_seen_on_chain FROM publisher_state WHERE id = 0",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(StorageError::from)
    }

    /// Persists the monotonic per-source delayed-inbox cursor.
    pub fn set_delayed_inbox_cursor(&self, source: &str, l1_level: u64) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO delayed_inbox_cursor (source, l1_level) VALUES (?1, ?2)
             ON CONFLICT(source) DO UPDATE SET l1_level = excluded.l1_level",
            params![source, l1_level],
        )?;
        Ok(())
    }

    /// Reads the persisted cursor for `source`, if the follower has ever
    /// advanced past genesis for it.
    pub fn get_delayed_inbox_cursor(&self, source: &str) -> Result<Option<u64>, StorageError> {
        self.conn
            .query_row(
                "SELECT l1_level FROM delayed_inbox_cursor WHERE source = ?1",
                params![source],
                |row| row.get(0),
            )
            .optional()
            .map_err(StorageError::from)
    }
}

fn array_from_slice(bytes: &[u8]) -> Result<[u8; 32], StorageError> {
    bytes
        .try_into()
        .map_err(|_| StorageError::Corrupt(format!("expected 32 bytes, found {}", bytes.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blueprint_roundtrip() {
        let index = AuxIndex::open_in_memory().unwrap();
        index.insert_blueprint(3, b"payload", 1_700_000_000, [1u8; 32], [2u8; 32], &[b"event".to_vec()]).unwrap();
        let record = index.get_blueprint(3).unwrap().unwrap();
        assert_eq!(record.payload, b"payload");
        assert_eq!(record.timestamp, 1_700_000_000);
        assert_eq!(record.block_hash, [1u8; 32]);
        assert_eq!(record.state_hash, [2u8; 32]);
        assert_eq!(record.applied_events, vec![b"event".to_vec()]);
        assert!(index.get_blueprint(4).unwrap().is_none());
    }

    #[test]
    fn count_blueprints_tracks_inserts() {
        let index = AuxIndex::open_in_memory().unwrap();
        assert_eq!(index.count_blueprints().unwrap(), 0);
        index.insert_blueprint(0, b"a", 0, [0u8; 32], [0u8; 32], &[]).unwrap();
        index.insert_blueprint(1, b"b", 1, [0u8; 32], [0u8; 32], &[]).unwrap();
        assert_eq!(index.count_blueprints().unwrap(), 2);
    }

    #[test]
    fn publisher_state_upsert() {
        let index = AuxIndex::open_in_memory().unwrap();
        assert!(index.get_publisher_state().unwrap().is_none());
        index.set_publisher_state(5, 5).unwrap();
        index.set_publisher_state(9, 6).unwrap();
        assert_eq!(index.get_publisher_state().unwrap(), Some((9, 6)));
    }

    #[test]
    fn delayed_inbox_cursor_is_per_source() {
        let index = AuxIndex::open_in_memory().unwrap();
        index.set_delayed_inbox_cursor("l1", 100).unwrap();
        index.set_delayed_inbox_cursor("l1-fallback", 50).unwrap();
        assert_eq!(index.get_delayed_inbox_cursor("l1").unwrap(), Some(100));
        assert_eq!(index.get_delayed_inbox_cursor("l1-fallback").unwrap(), Some(50));
        assert!(index.get_delayed_inbox_cursor("unknown").unwrap().is_none());
    }
}
