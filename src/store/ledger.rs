//! Append-only version history.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::{json, Value};
use time::OffsetDateTime;
use tracing::info;

use super::query::record_by_uid;
use super::save::save_in_session;
use super::DashboardStore;
use crate::cancel::CancelToken;
use crate::domain::record::{Record, SaveCommand};
use crate::error::{StoreError, StoreResult};

const SNAPSHOT_COLUMNS: &str =
    "id, dashboard_id, parent_version, restored_from, version, created, created_by, message, data";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionSnapshot {
    pub id: i64,
    pub dashboard_id: i64,
    pub parent_version: i64,
    pub restored_from: i64,
    pub version: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
    pub created_by: i64,
    pub message: String,
    pub data: Value,
}

impl VersionSnapshot {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let raw_data: String = row.get(8)?;
        let data = serde_json::from_str(&raw_data).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(err))
        })?;
        Ok(Self {
            id: row.get(0)?,
            dashboard_id: row.get(1)?,
            parent_version: row.get(2)?,
            restored_from: row.get(3)?,
            version: row.get(4)?,
            created: row.get(5)?,
            created_by: row.get(6)?,
            message: row.get(7)?,
            data,
        })
    }
}

/// Brings a record back to the payload of an earlier version, as a new version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreCommand {
    pub org_id: i64,
    pub uid: String,
    pub version: i64,
    pub user_id: i64,
}

pub(crate) struct SnapshotInput<'a> {
    pub dashboard_id: i64,
    pub parent_version: i64,
    pub restored_from: i64,
    pub version: i64,
    pub created_by: i64,
    pub message: &'a str,
    pub data: &'a Value,
}

/// Inserts one snapshot. The owning row must still exist.
pub(crate) fn append_snapshot(conn: &Connection, input: &SnapshotInput<'_>) -> StoreResult<()> {
    let data = serde_json::to_string(input.data)?;
    let inserted = conn.execute(
        "INSERT INTO dashboard_version \
         (dashboard_id, parent_version, restored_from, version, created, created_by, message, data) \
         SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8 \
         WHERE EXISTS (SELECT 1 FROM dashboard WHERE id = ?1)",
        params![
            input.dashboard_id,
            input.parent_version,
            input.restored_from,
            input.version,
            OffsetDateTime::now_utc(),
            input.created_by,
            input.message,
            data,
        ],
    )?;
    if inserted == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

fn snapshot(conn: &Connection, dashboard_id: i64, version: i64) -> StoreResult<VersionSnapshot> {
    conn.query_row(
        &format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM dashboard_version WHERE dashboard_id = ?1 AND version = ?2"
        ),
        params![dashboard_id, version],
        VersionSnapshot::from_row,
    )
    .optional()?
    .ok_or(StoreError::VersionNotFound)
}

impl DashboardStore {
    /// Newest first. `limit` below 1 uses the configured default page size;
    /// `start` skips that many snapshots.
    pub fn list_versions(
        &self,
        cancel: &CancelToken,
        dashboard_id: i64,
        limit: i64,
        start: i64,
    ) -> StoreResult<Vec<VersionSnapshot>> {
        self.read(cancel, |session| {
            let limit = if limit < 1 {
                session.config().search.default_limit
            } else {
                limit
            };
            let mut stmt = session.conn().prepare(&format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM dashboard_version WHERE dashboard_id = ?1 \
                 ORDER BY version DESC LIMIT ?2 OFFSET ?3"
            ))?;
            let snapshots = stmt
                .query_map(
                    params![dashboard_id, limit, start.max(0)],
                    VersionSnapshot::from_row,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(snapshots)
        })
    }

    pub fn get_version(
        &self,
        cancel: &CancelToken,
        dashboard_id: i64,
        version: i64,
    ) -> StoreResult<VersionSnapshot> {
        self.read(cancel, |session| snapshot(session.conn(), dashboard_id, version))
    }

    /// Saves the payload of `cmd.version` on top of the current version.
    pub fn restore_version(&self, cancel: &CancelToken, cmd: &RestoreCommand) -> StoreResult<Record> {
        self.write(cancel, |session| {
            let conn = session.conn();
            let current = record_by_uid(conn, cmd.org_id, &cmd.uid)?.ok_or(StoreError::NotFound)?;
            let old = snapshot(conn, current.id, cmd.version)?;

            let mut data = old.data;
            if let Some(object) = data.as_object_mut() {
                object.insert("id".to_string(), json!(current.id));
                object.insert("uid".to_string(), json!(current.uid));
                object.insert("version".to_string(), json!(current.version));
            }
            let mut save = SaveCommand::new(cmd.org_id, data)
                .by_user(cmd.user_id)
                .with_message(format!("Restored from version {}", cmd.version));
            save.folder_uid = current.folder_uid.clone();
            save.is_folder = current.is_folder;
            save.restored_from = cmd.version;

            let restored = save_in_session(session, &save)?;
            info!(
                uid = %restored.uid,
                from = cmd.version,
                version = restored.version,
                "dashboard version restored"
            );
            Ok(restored)
        })
    }
}
