//! The dashboard store and its transaction-scoped session.
//!
//! Public operations live on [`DashboardStore`], spread over the submodules
//! by concern. Internals take a [`Session`] by parameter; nothing reaches for
//! a global connection.

mod alerts;
mod cascade;
mod ledger;
mod provisioning;
mod query;
mod resolver;
mod save;
mod tags;

use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::cancel::CancelToken;
use crate::config::StoreConfig;
use crate::db;
use crate::error::{StoreError, StoreResult};

pub use alerts::ReconcileSummary;
pub use cascade::{DeleteCommand, RecordRef};
pub use ledger::{RestoreCommand, VersionSnapshot};
pub use provisioning::{checksum_hex, ProvisioningBinding, SweepSummary};
pub use query::{GetRecordQuery, GetRecordsQuery, RecordRefView};
pub use tags::TagCount;

/// Owns one SQLite connection. Open one store per worker thread; the engine
/// serializes writers and the version check catches stale updates.
pub struct DashboardStore {
    conn: Connection,
    config: StoreConfig,
}

/// Transaction-scoped context handed to every internal operation.
pub(crate) struct Session<'a> {
    conn: &'a Connection,
    cancel: &'a CancelToken,
    config: &'a StoreConfig,
}

impl<'a> Session<'a> {
    pub(crate) fn conn(&self) -> &'a Connection {
        self.conn
    }

    pub(crate) fn config(&self) -> &'a StoreConfig {
        self.config
    }

    /// Fails with `Cancelled` once the caller has given up.
    pub(crate) fn checkpoint(&self) -> StoreResult<()> {
        self.cancel.check()
    }

    pub(crate) fn entity_events_enabled(&self) -> bool {
        self.config.features.entity_events
    }
}

impl DashboardStore {
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        db::ensure_parent_dir(&config.database.path).map_err(|err| {
            StoreError::ValidationFailed(format!(
                "cannot create directory for '{}': {}",
                config.database.path, err
            ))
        })?;
        let conn = db::open_connection(
            &config.database.path,
            Duration::from_millis(config.database.busy_timeout_ms),
        )?;
        tracing::debug!(path = %config.database.path, "dashboard store opened");
        Ok(Self { conn, config })
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::open(StoreConfig::in_memory())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Borrow the underlying connection for ad-hoc queries.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Runs `f` inside one `BEGIN IMMEDIATE` transaction. Any error, including
    /// cancellation observed before commit, rolls everything back.
    pub(crate) fn write<T, F>(&self, cancel: &CancelToken, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Session<'_>) -> StoreResult<T>,
    {
        self.run(cancel, TransactionBehavior::Immediate, f)
    }

    /// Runs `f` inside a deferred transaction so it reads one snapshot.
    pub(crate) fn read<T, F>(&self, cancel: &CancelToken, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Session<'_>) -> StoreResult<T>,
    {
        self.run(cancel, TransactionBehavior::Deferred, f)
    }

    fn run<T, F>(&self, cancel: &CancelToken, behavior: TransactionBehavior, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Session<'_>) -> StoreResult<T>,
    {
        cancel.check()?;
        let tx = Transaction::new_unchecked(&self.conn, behavior)?;
        let session = Session {
            conn: &tx,
            cancel,
            config: &self.config,
        };
        let value = f(&session)?;
        session.checkpoint()?;
        tx.commit()?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests;
