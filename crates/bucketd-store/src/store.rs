use crate::lock::StoreLock;
use crate::{KvBackend, StoreError};
use redb::{Database, ReadableTable, TableDefinition};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "kv";

/// How long [`Store::open`] waits for another process to release the file.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub path: PathBuf,
    pub namespace: String,
    pub lock_timeout: Duration,
}

impl StoreOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            namespace: DEFAULT_NAMESPACE.to_owned(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        namespace.clone_into(&mut self.namespace);
        self
    }

    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }
}

/// An open store file with one flat namespace.
///
/// Every operation is its own transaction. Read transactions see a consistent
/// snapshot and never wait for writers; write transactions are serialized by
/// redb and committed with immediate durability, so an acknowledged `put` or
/// `delete` survives a crash.
///
/// The handle is not `Clone`. Share it behind an `Arc` and call
/// [`close`](Self::close) once every borrower is gone.
pub struct Store {
    // Field order matters: the database must close before the lock is dropped.
    db: Database,
    options: StoreOptions,
    lock: StoreLock,
}

impl Store {
    /// Open or create the store file, waiting at most `options.lock_timeout`
    /// for the file lock.
    pub fn open(options: StoreOptions) -> Result<Self, StoreError> {
        if let Some(parent) = options.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let lock = StoreLock::acquire(&StoreLock::path_for(&options.path), options.lock_timeout)?;
        let db = Database::create(&options.path).map_err(open_error)?;
        info!(
            "opened store {} (namespace '{}')",
            options.path.display(),
            options.namespace
        );

        Ok(Self { db, options, lock })
    }

    pub fn path(&self) -> &Path {
        &self.options.path
    }

    pub fn namespace(&self) -> &str {
        &self.options.namespace
    }

    fn table(&self) -> TableDefinition<'_, &'static str, &'static str> {
        TableDefinition::new(&self.options.namespace)
    }

    /// Create the namespace if it does not exist. Safe to call on every start.
    pub fn ensure_namespace(&self) -> Result<(), StoreError> {
        let txn = self.db.begin_write()?;
        txn.open_table(self.table())?;
        txn.commit()?;
        debug!("namespace '{}' ready", self.options.namespace);
        Ok(())
    }

    /// Read `key` from a snapshot. Absent keys, and a namespace that was never
    /// created, both read as `None`.
    pub fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = match txn.open_table(self.table()) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let value = table.get(key)?.map(|guard| guard.value().to_owned());
        Ok(value)
    }

    pub fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(self.table())?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Remove `key`. A missing key commits an empty transaction and succeeds.
    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(self.table())?;
            table.remove(key)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Number of entries in the namespace.
    pub fn len(&self) -> Result<u64, StoreError> {
        let txn = self.db.begin_read()?;
        let table = match txn.open_table(self.table()) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut count = 0;
        for entry in table.iter()? {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Close the file and release the lock.
    ///
    /// Consumes the handle, so no transaction can be issued afterwards.
    pub fn close(self) -> Result<(), StoreError> {
        let Self { db, options, lock } = self;
        drop(db);
        lock.release()?;
        info!("closed store {}", options.path.display());
        Ok(())
    }
}

impl KvBackend for Store {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Store::get(self, key)
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        Store::put(self, key, value)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        Store::delete(self, key)
    }
}

fn open_error(e: redb::DatabaseError) -> StoreError {
    match e {
        redb::DatabaseError::Storage(redb::StorageError::Corrupted(msg)) => {
            StoreError::Corrupted(msg)
        }
        // redb reports a bad header or magic number as InvalidData.
        redb::DatabaseError::Storage(redb::StorageError::Io(io))
            if io.kind() == std::io::ErrorKind::InvalidData =>
        {
            StoreError::Corrupted(io.to_string())
        }
        redb::DatabaseError::Storage(redb::StorageError::Io(io)) => StoreError::Io(io),
        other => StoreError::Database(other),
    }
}
