use crate::storage::store::{Connector, Store, StoreError, StoreResult};
use crate::storage::value::{Row, SqlValue};
use once_cell::sync::OnceCell;
use rusqlite::{params_from_iter, Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

static MEMORY_DB_SEQ: AtomicUsize = AtomicUsize::new(0);

/// Apply per-connection PRAGMAs.
pub fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 5000;
        PRAGMA temp_store = MEMORY;
        ",
    )
}

/// A single rusqlite connection. The first write after a commit or rollback
/// opens an immediate (write-locked) transaction that stays open until the
/// next `commit`/`rollback`. Reads and schema statements outside a
/// transaction run in autocommit.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path).map_err(|e| StoreError::Open(e.to_string()))?;
        apply_pragmas(&conn).map_err(|e| StoreError::Open(e.to_string()))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Open(e.to_string()))?;
        Ok(Self { conn })
    }

    /// Open a named in-memory database shared by every connection in the
    /// process that uses the same `uri`.
    fn open_shared_memory(uri: &str) -> StoreResult<Self> {
        Ok(Self {
            conn: open_memory_connection(uri)?,
        })
    }

    fn begin_if_needed(&self) -> StoreResult<()> {
        if self.conn.is_autocommit() {
            self.conn
                .execute_batch("BEGIN IMMEDIATE")
                .map_err(|e| StoreError::Execute(e.to_string()))?;
        }
        Ok(())
    }
}

impl Store for SqliteStore {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> StoreResult<usize> {
        self.begin_if_needed()?;
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| StoreError::Execute(e.to_string()))?;
        stmt.execute(params_from_iter(params.iter()))
            .map_err(|e| StoreError::Execute(e.to_string()))
    }

    fn execute_ddl(&mut self, sql: &str) -> StoreResult<()> {
        self.conn
            .execute_batch(sql)
            .map_err(|e| StoreError::Execute(e.to_string()))
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> StoreResult<Vec<Row>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| StoreError::Execute(e.to_string()))?;
        let width = stmt.column_count();
        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                (0..width)
                    .map(|i| row.get_ref(i).map(SqlValue::from_value_ref))
                    .collect::<rusqlite::Result<Row>>()
            })
            .map_err(|e| StoreError::Execute(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<Row>>>()
            .map_err(|e| StoreError::Execute(e.to_string()))
    }

    fn commit(&mut self) -> StoreResult<()> {
        if !self.conn.is_autocommit() {
            self.conn
                .execute_batch("COMMIT")
                .map_err(|e| StoreError::Commit(e.to_string()))?;
        }
        Ok(())
    }

    fn rollback(&mut self) -> StoreResult<()> {
        if !self.conn.is_autocommit() {
            self.conn
                .execute_batch("ROLLBACK")
                .map_err(|e| StoreError::Rollback(e.to_string()))?;
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> StoreResult<()> {
        self.conn
            .close()
            .map_err(|(_, e)| StoreError::Close(e.to_string()))
    }
}

fn open_memory_connection(uri: &str) -> StoreResult<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn =
        Connection::open_with_flags(uri, flags).map_err(|e| StoreError::Open(e.to_string()))?;
    conn.execute_batch("PRAGMA busy_timeout = 5000;")
        .map_err(|e| StoreError::Open(e.to_string()))?;
    Ok(conn)
}

/// The `:memory:` database behind a connector. Lives in SQLite's `memdb` VFS
/// under a process-unique name and is kept alive by `anchor` until the
/// connector is dropped.
#[derive(Debug)]
struct MemoryDb {
    uri: String,
    anchor: OnceCell<Mutex<Connection>>,
}

impl MemoryDb {
    fn new() -> Self {
        let seq = MEMORY_DB_SEQ.fetch_add(1, Ordering::Relaxed);
        Self {
            uri: format!("file:/tally-mem-{}-{seq}?vfs=memdb", std::process::id()),
            anchor: OnceCell::new(),
        }
    }

    fn connect(&self) -> StoreResult<SqliteStore> {
        self.anchor
            .get_or_try_init(|| open_memory_connection(&self.uri).map(Mutex::new))?;
        SqliteStore::open_shared_memory(&self.uri)
    }
}

/// Opens a new SQLite connection per call. Every connection from one
/// `:memory:` connector sees the same database, which is discarded when the
/// connector is dropped.
#[derive(Debug)]
pub struct SqliteConnector {
    path: PathBuf,
    memory: Option<MemoryDb>,
}

impl SqliteConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let memory = (path.as_os_str() == ":memory:").then(MemoryDb::new);
        Self { path, memory }
    }
}

impl Connector for SqliteConnector {
    fn connect(&self) -> StoreResult<Box<dyn Store>> {
        let store = match &self.memory {
            Some(memory) => memory.connect()?,
            None => SqliteStore::open(&self.path)?,
        };
        Ok(Box::new(store))
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(store: &mut dyn Store) -> i64 {
        let rows = store.query("SELECT COUNT(*) FROM t", &[]).unwrap();
        rows[0][0].as_i64().unwrap()
    }

    #[test]
    fn test_commit_is_visible_to_other_connections() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let connector = SqliteConnector::new(tmp.path());

        let mut writer = connector.connect().unwrap();
        writer.execute("CREATE TABLE t (v TEXT NOT NULL)", &[]).unwrap();
        writer.commit().unwrap();
        writer
            .execute("INSERT INTO t (v) VALUES (?)", &[SqlValue::from("a")])
            .unwrap();
        writer.commit().unwrap();
        writer.close().unwrap();

        let mut reader = connector.connect().unwrap();
        assert_eq!(count(reader.as_mut()), 1);
        reader.close().unwrap();
    }

    #[test]
    fn test_rollback_discards_uncommitted_writes() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.execute("CREATE TABLE t (v TEXT NOT NULL)", &[]).unwrap();
        store.commit().unwrap();

        store
            .execute("INSERT INTO t (v) VALUES (?)", &[SqlValue::from("a")])
            .unwrap();
        store.rollback().unwrap();

        assert_eq!(count(&mut store), 0);
    }

    #[test]
    fn test_commit_and_rollback_without_transaction_are_noops() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.commit().unwrap();
        store.rollback().unwrap();
    }

    #[test]
    fn test_execute_reports_engine_error() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let err = store.execute("INSERT INTO missing () VALUES ()", &[]).unwrap_err();
        assert!(matches!(err, StoreError::Execute(_)));
        store.rollback().unwrap();
    }

    #[test]
    fn test_query_binds_parameters() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .execute("CREATE TABLE t (k TEXT NOT NULL, n INTEGER)", &[])
            .unwrap();
        let insert = "INSERT INTO t (k, n) VALUES (?, ?)";
        store
            .execute(insert, &[SqlValue::from("x"), SqlValue::from(1i64)])
            .unwrap();
        store
            .execute(insert, &[SqlValue::from("y"), SqlValue::Null])
            .unwrap();
        store.commit().unwrap();

        let rows = store
            .query("SELECT k, n FROM t WHERE k = ?", &[SqlValue::from("y")])
            .unwrap();
        assert_eq!(rows, vec![vec![SqlValue::Text("y".into()), SqlValue::Null]]);
    }

    #[test]
    fn test_memory_connector_shares_one_database() {
        let connector = SqliteConnector::new(":memory:");
        let mut a = connector.connect().unwrap();
        a.execute_ddl("CREATE TABLE t (v TEXT NOT NULL)").unwrap();
        a.execute("INSERT INTO t (v) VALUES (?)", &[SqlValue::from("a")]).unwrap();
        a.commit().unwrap();
        a.close().unwrap();

        let mut b = connector.connect().unwrap();
        assert_eq!(count(b.as_mut()), 1);
        b.close().unwrap();

        let mut other = SqliteConnector::new(":memory:").connect().unwrap();
        assert!(other.query("SELECT COUNT(*) FROM t", &[]).is_err());
    }

    #[test]
    fn test_execute_ddl_does_not_open_a_transaction() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .execute_ddl("CREATE TABLE IF NOT EXISTS t (v TEXT NOT NULL)")
            .unwrap();
        assert!(store.conn.is_autocommit());

        store
            .execute("INSERT INTO t (v) VALUES (?)", &[SqlValue::from("a")])
            .unwrap();
        assert!(!store.conn.is_autocommit());
        store
            .execute_ddl("CREATE TABLE IF NOT EXISTS t (v TEXT NOT NULL)")
            .unwrap();
        store.rollback().unwrap();
        assert_eq!(count(&mut store), 0);
    }

    #[test]
    fn test_schema_check_does_not_wait_for_writer() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let connector = SqliteConnector::new(tmp.path());
        let ddl = "CREATE TABLE IF NOT EXISTS t (v TEXT NOT NULL)";

        let mut writer = connector.connect().unwrap();
        writer.execute_ddl(ddl).unwrap();
        writer
            .execute("INSERT INTO t (v) VALUES (?)", &[SqlValue::from("a")])
            .unwrap();

        let mut reader = connector.connect().unwrap();
        let started = std::time::Instant::now();
        reader.execute_ddl(ddl).unwrap();
        assert_eq!(count(reader.as_mut()), 0);
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
        reader.close().unwrap();

        writer.commit().unwrap();
        writer.close().unwrap();
    }
}
