//! Bindings between records and the external sources that provision them.

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use super::cascade::{DeleteCommand, RecordRef};
use super::query::record_by_uid;
use super::{DashboardStore, Session};
use crate::cancel::CancelToken;
use crate::db::placeholders;
use crate::domain::record::Record;
use crate::error::{StoreError, StoreResult};

const BINDING_COLUMNS: &str = "id, dashboard_id, name, external_id, check_sum, updated";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProvisioningBinding {
    pub id: i64,
    pub dashboard_id: i64,
    /// Source (reader) name.
    pub name: String,
    /// Location of the record inside the source, e.g. a file path.
    pub external_id: String,
    pub check_sum: String,
    /// Unix seconds. Zero on input means "use the record's update time".
    pub updated: i64,
}

impl ProvisioningBinding {
    pub fn new(name: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            external_id: external_id.into(),
            ..Self::default()
        }
    }

    pub fn with_checksum(mut self, check_sum: impl Into<String>) -> Self {
        self.check_sum = check_sum.into();
        self
    }

    pub fn with_updated(mut self, updated: i64) -> Self {
        self.updated = updated;
        self
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            dashboard_id: row.get(1)?,
            name: row.get(2)?,
            external_id: row.get(3)?,
            check_sum: row.get(4)?,
            updated: row.get(5)?,
        })
    }
}

/// Hex SHA-256 of a provisioned source document.
pub fn checksum_hex(contents: &[u8]) -> String {
    format!("{:x}", Sha256::digest(contents))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    /// Records whose binding named an inactive source.
    pub orphaned: usize,
    pub deleted: usize,
    /// Orphans another caller removed first.
    pub already_gone: usize,
}

/// Inserts or refreshes the binding for `(record, binding.name)`.
pub(crate) fn upsert_binding(
    session: &Session<'_>,
    record: &Record,
    binding: &ProvisioningBinding,
) -> StoreResult<ProvisioningBinding> {
    let updated = if binding.updated == 0 {
        record.updated.unix_timestamp()
    } else {
        binding.updated
    };
    let conn = session.conn();
    conn.execute(
        "INSERT INTO dashboard_provisioning (dashboard_id, name, external_id, check_sum, updated) \
         VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT (dashboard_id, name) DO UPDATE SET \
             external_id = excluded.external_id, \
             check_sum = excluded.check_sum, \
             updated = excluded.updated",
        params![
            record.id,
            binding.name,
            binding.external_id,
            binding.check_sum,
            updated
        ],
    )?;
    let stored = conn.query_row(
        &format!("SELECT {BINDING_COLUMNS} FROM dashboard_provisioning WHERE dashboard_id = ?1 AND name = ?2"),
        params![record.id, binding.name],
        ProvisioningBinding::from_row,
    )?;
    Ok(stored)
}

impl DashboardStore {
    /// The record's binding, or `None` for a user-owned record.
    pub fn get_provisioning_by_record(
        &self,
        cancel: &CancelToken,
        dashboard_id: i64,
    ) -> StoreResult<Option<ProvisioningBinding>> {
        self.read(cancel, |session| {
            let binding = session
                .conn()
                .query_row(
                    &format!(
                        "SELECT {BINDING_COLUMNS} FROM dashboard_provisioning \
                         WHERE dashboard_id = ?1 ORDER BY id LIMIT 1"
                    ),
                    params![dashboard_id],
                    ProvisioningBinding::from_row,
                )
                .optional()?;
            Ok(binding)
        })
    }

    pub fn get_provisioning_by_uid(
        &self,
        cancel: &CancelToken,
        org_id: i64,
        uid: &str,
    ) -> StoreResult<ProvisioningBinding> {
        self.read(cancel, |session| {
            let conn = session.conn();
            let record = record_by_uid(conn, org_id, uid)?.ok_or(StoreError::NotFound)?;
            conn.query_row(
                &format!(
                    "SELECT {BINDING_COLUMNS} FROM dashboard_provisioning \
                     WHERE dashboard_id = ?1 ORDER BY id LIMIT 1"
                ),
                params![record.id],
                ProvisioningBinding::from_row,
            )
            .optional()?
            .ok_or(StoreError::ProvisionedRecordNotFound)
        })
    }

    /// Every binding written by one source.
    pub fn get_provisioning_by_name(
        &self,
        cancel: &CancelToken,
        name: &str,
    ) -> StoreResult<Vec<ProvisioningBinding>> {
        self.read(cancel, |session| {
            let mut stmt = session.conn().prepare(&format!(
                "SELECT {BINDING_COLUMNS} FROM dashboard_provisioning WHERE name = ?1 ORDER BY id"
            ))?;
            let bindings = stmt
                .query_map(params![name], ProvisioningBinding::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(bindings)
        })
    }

    /// Drops the binding only. The record stays, now user-owned.
    pub fn unprovision(&self, cancel: &CancelToken, dashboard_id: i64) -> StoreResult<usize> {
        self.write(cancel, |session| {
            let removed = session.conn().execute(
                "DELETE FROM dashboard_provisioning WHERE dashboard_id = ?1",
                params![dashboard_id],
            )?;
            info!(dashboard_id, removed, "dashboard unprovisioned");
            Ok(removed)
        })
    }

    /// Deletes every provisioned record whose source is not in `active_names`.
    /// Each record goes in its own transaction; records already gone are skipped.
    pub fn delete_orphaned_provisioned(
        &self,
        cancel: &CancelToken,
        active_names: &[String],
    ) -> StoreResult<SweepSummary> {
        let orphans = self.read(cancel, |session| {
            let mut values: Vec<Value> = Vec::new();
            let filter = if active_names.is_empty() {
                String::new()
            } else {
                values.extend(active_names.iter().cloned().map(Value::Text));
                format!("WHERE name NOT IN ({})", placeholders(active_names.len()))
            };
            let mut stmt = session.conn().prepare(&format!(
                "SELECT DISTINCT dashboard_id FROM dashboard_provisioning {filter} ORDER BY dashboard_id"
            ))?;
            let ids = stmt
                .query_map(params_from_iter(values.iter()), |row| row.get::<_, i64>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ids)
        })?;

        let mut summary = SweepSummary {
            orphaned: orphans.len(),
            ..SweepSummary::default()
        };
        for dashboard_id in orphans {
            let cmd = DeleteCommand {
                org_id: None,
                target: RecordRef::Id(dashboard_id),
            };
            match self.delete_record(cancel, &cmd) {
                Ok(()) => summary.deleted += 1,
                Err(err) if err.is_not_found() => {
                    warn!(dashboard_id, "orphaned provisioned dashboard already deleted");
                    summary.already_gone += 1;
                }
                Err(err) => return Err(err),
            }
        }
        info!(
            orphaned = summary.orphaned,
            deleted = summary.deleted,
            "provisioning sweep finished"
        );
        Ok(summary)
    }
}
