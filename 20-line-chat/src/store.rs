//! Durable username/password storage.
//!
//! Credentials live in a single-file `redb` database with one table, `users`,
//! keyed by username. Every operation runs inside exactly one transaction:
//! lookups and listings use a read transaction, registration uses a write
//! transaction. `redb` admits one write transaction at a time, so two
//! registrations of the same username can never both observe it as absent.
//!
//! A write transaction that returns an error before `commit` is dropped,
//! which aborts it; the file on disk is left as it was.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use thiserror::Error;

const USERS: TableDefinition<&str, &str> = TableDefinition::new("users");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("credential store failure: {0}")]
    Storage(#[from] redb::Error),
    #[error("credential store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result of [`CredentialStore::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Created,
    AlreadyExists,
}

/// Shared handle to the credential database.
///
/// Cloning is cheap; every clone refers to the same open database, which is
/// closed when the last clone is dropped.
#[derive(Clone)]
pub struct CredentialStore {
    db: Arc<Database>,
    #[cfg(test)]
    faults: Arc<std::sync::atomic::AtomicBool>,
}

impl CredentialStore {
    /// Opens the database at `path`, creating the file and the `users` table
    /// when they do not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self {
            db: Arc::new(open_database(path.as_ref())?),
            #[cfg(test)]
            faults: Arc::default(),
        })
    }

    /// Makes every later operation on this store (and its clones) fail with
    /// an I/O error until switched off again.
    #[cfg(test)]
    pub(crate) fn fail_operations(&self, enabled: bool) {
        self.faults.store(enabled, std::sync::atomic::Ordering::SeqCst);
    }

    #[cfg(test)]
    fn injected_fault(&self) -> Result<(), StoreError> {
        if self.faults.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(redb::Error::Io(std::io::Error::other("injected storage fault")).into());
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn injected_fault(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Returns the stored password for `username`.
    pub fn lookup(&self, username: &str) -> Result<Option<String>, StoreError> {
        self.injected_fault()?;
        Ok(lookup_password(&self.db, username)?)
    }

    /// Inserts the record unless `username` is already taken.
    pub fn create(&self, username: &str, password: &str) -> Result<Registration, StoreError> {
        self.injected_fault()?;
        Ok(insert_if_absent(&self.db, username, password)?)
    }

    /// Lists every registered username in key order.
    pub fn usernames(&self) -> Result<Vec<String>, StoreError> {
        self.injected_fault()?;
        Ok(list_usernames(&self.db)?)
    }

    pub async fn lookup_async(&self, username: &str) -> Result<Option<String>, StoreError> {
        let store = self.clone();
        let username = username.to_owned();
        tokio::task::spawn_blocking(move || store.lookup(&username)).await?
    }

    pub async fn create_async(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Registration, StoreError> {
        let store = self.clone();
        let username = username.to_owned();
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || store.create(&username, &password)).await?
    }

    pub async fn usernames_async(&self) -> Result<Vec<String>, StoreError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.usernames()).await?
    }
}

fn open_database(path: &Path) -> Result<Database, redb::Error> {
    let db = Database::create(path)?;
    let txn = db.begin_write()?;
    txn.open_table(USERS)?;
    txn.commit()?;
    Ok(db)
}

fn lookup_password(db: &Database, username: &str) -> Result<Option<String>, redb::Error> {
    let txn = db.begin_read()?;
    let table = txn.open_table(USERS)?;
    let password = table.get(username)?.map(|guard| guard.value().to_string());
    Ok(password)
}

fn insert_if_absent(
    db: &Database,
    username: &str,
    password: &str,
) -> Result<Registration, redb::Error> {
    let txn = db.begin_write()?;
    let taken = {
        let mut table = txn.open_table(USERS)?;
        let taken = table.get(username)?.is_some();
        if !taken {
            table.insert(username, password)?;
        }
        taken
    };

    if taken {
        txn.abort()?;
        return Ok(Registration::AlreadyExists);
    }
    txn.commit()?;
    Ok(Registration::Created)
}

fn list_usernames(db: &Database) -> Result<Vec<String>, redb::Error> {
    let txn = db.begin_read()?;
    let table = txn.open_table(USERS)?;
    let mut usernames = Vec::new();
    for entry in table.iter()? {
        let (username, _) = entry?;
        usernames.push(username.value().to_string());
    }
    Ok(usernames)
}
