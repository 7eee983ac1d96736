//! Create and update of records, one transaction per call.

use std::collections::HashSet;

use rusqlite::types::ToSql;
use rusqlite::params;
use time::OffsetDateTime;
use tracing::{debug, info};

use super::alerts::reconcile;
use super::ledger::{append_snapshot, SnapshotInput};
use super::provisioning::{upsert_binding, ProvisioningBinding};
use super::query::{record_by_id, record_by_uid};
use super::resolver::resolve;
use super::tags::replace as replace_tags;
use super::{DashboardStore, Session};
use crate::cancel::CancelToken;
use crate::domain::alert::extract_panel_alerts;
use crate::domain::record::{FieldValue, Record, SaveCommand, SYSTEM_USER_ID};
use crate::domain::uid::{generate_uid, validate_uid};
use crate::error::{StoreError, StoreResult};
use crate::events::{self, EntityEventType};

impl DashboardStore {
    /// Creates or updates one record and returns it as stored.
    pub fn save_record(&self, cancel: &CancelToken, cmd: &SaveCommand) -> StoreResult<Record> {
        self.write(cancel, |session| save_in_session(session, cmd))
    }

    /// Saves the record and binds it to `binding.name` in the same transaction.
    pub fn save_provisioned_record(
        &self,
        cancel: &CancelToken,
        cmd: &SaveCommand,
        binding: &ProvisioningBinding,
    ) -> StoreResult<Record> {
        self.write(cancel, |session| {
            let record = save_in_session(session, cmd)?;
            let stored = upsert_binding(session, &record, binding)?;
            info!(
                uid = %record.uid,
                source = %stored.name,
                external_id = %stored.external_id,
                "provisioned dashboard saved"
            );
            Ok(record)
        })
    }

    /// Runs every pre-save check without writing. Returns whether the parent
    /// folder of a dashboard changes.
    pub fn validate_before_save(&self, cancel: &CancelToken, cmd: &SaveCommand) -> StoreResult<bool> {
        let mut target = cmd.record_model();
        validate_model(&target)?;
        self.read(cancel, |session| {
            ensure_folder_exists(session, &target)?;
            let resolution = resolve(session, &mut target, cmd.overwrite)?;
            ensure_not_own_ancestor(session, &target)?;
            Ok(resolution.parent_folder_changed)
        })
    }
}

fn validate_model(record: &Record) -> StoreResult<()> {
    if record.title.is_empty() {
        return Err(StoreError::ValidationFailed(
            "dashboard title cannot be empty".to_string(),
        ));
    }
    if !record.uid.is_empty() {
        validate_uid(&record.uid).map_err(StoreError::ValidationFailed)?;
    }
    Ok(())
}

fn ensure_folder_exists(session: &Session<'_>, record: &Record) -> StoreResult<()> {
    let Some(folder_uid) = record.folder_uid.as_deref() else {
        return Ok(());
    };
    match record_by_uid(session.conn(), record.org_id, folder_uid)? {
        Some(folder) if folder.is_folder => Ok(()),
        _ => Err(StoreError::FolderNotFound),
    }
}

/// A folder cannot be placed under itself or any of its descendants. Walks
/// the parent chain upward from the requested parent.
fn ensure_not_own_ancestor(session: &Session<'_>, record: &Record) -> StoreResult<()> {
    if !record.is_folder || record.uid.is_empty() {
        return Ok(());
    }
    let mut seen = HashSet::new();
    let mut cursor = record.folder_uid.clone();
    while let Some(uid) = cursor {
        if uid == record.uid {
            return Err(StoreError::ValidationFailed(format!(
                "folder '{}' cannot be moved into itself or one of its subfolders",
                record.uid
            )));
        }
        if !seen.insert(uid.clone()) {
            break;
        }
        cursor = record_by_uid(session.conn(), record.org_id, &uid)?
            .and_then(|parent| parent.folder_uid);
    }
    Ok(())
}

pub(crate) fn save_in_session(session: &Session<'_>, cmd: &SaveCommand) -> StoreResult<Record> {
    let conn = session.conn();
    let mut target = cmd.record_model();
    validate_model(&target)?;
    ensure_folder_exists(session, &target)?;

    let resolution = resolve(session, &mut target, cmd.overwrite)?;
    ensure_not_own_ancestor(session, &target)?;
    session.checkpoint()?;

    if target.uid.is_empty() {
        let uid = generate_uid(|candidate| {
            record_by_uid(conn, target.org_id, candidate).map(|found| found.is_some())
        })?;
        target.set_uid(uid);
    }

    let actor = if cmd.user_id == 0 {
        SYSTEM_USER_ID
    } else {
        cmd.user_id
    };
    let now = OffsetDateTime::now_utc();

    let (parent_version, event_type) = match &resolution.existing {
        None => {
            target.set_version(1);
            target.created = now;
            target.updated = now;
            target.created_by = actor;
            target.updated_by = actor;
            insert_row(conn, &mut target)?;
            (0, EntityEventType::Create)
        }
        Some(existing) => {
            let parent_version = target.version;
            target.set_version(parent_version + 1);
            target.created = existing.created;
            target.created_by = existing.created_by;
            target.updated = cmd.updated_at.unwrap_or(now);
            target.updated_by = actor;
            let plugin_id = match cmd.plugin_id.as_deref() {
                None => FieldValue::Untouched,
                Some("") => FieldValue::Null,
                Some(plugin_id) => FieldValue::Set(plugin_id.to_string()),
            };
            update_row(conn, &target, &plugin_id)?;
            (parent_version, EntityEventType::Update)
        }
    };
    debug!(
        uid = %target.uid,
        version = target.version,
        parent_version,
        "dashboard row written"
    );

    append_snapshot(
        conn,
        &SnapshotInput {
            dashboard_id: target.id,
            parent_version,
            restored_from: cmd.restored_from,
            version: target.version,
            created_by: actor,
            message: &cmd.message,
            data: &target.data,
        },
    )?;

    replace_tags(conn, target.id, &target.tags())?;

    if cmd.sync_alerts {
        session.checkpoint()?;
        let definitions = extract_panel_alerts(&target.data)?;
        reconcile(session, &target, &definitions)?;
    }

    let saved = record_by_id(conn, Some(target.org_id), target.id)?.ok_or(StoreError::NotFound)?;
    if session.entity_events_enabled() {
        events::append(conn, &saved, event_type)?;
    }
    Ok(saved)
}

fn insert_row(conn: &rusqlite::Connection, target: &mut Record) -> StoreResult<()> {
    let data = serde_json::to_string(&target.data)?;
    conn.execute(
        "INSERT INTO dashboard (org_id, uid, folder_uid, is_folder, title, slug, data, version, \
         plugin_id, created, updated, created_by, updated_by) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            target.org_id,
            target.uid,
            target.folder_uid,
            target.is_folder,
            target.title,
            target.slug,
            data,
            target.version,
            target.plugin_id,
            target.created,
            target.updated,
            target.created_by,
            target.updated_by,
        ],
    )?;
    let id = conn.last_insert_rowid();
    target.set_id(id);
    conn.execute(
        "UPDATE dashboard SET data = ?1 WHERE id = ?2",
        params![serde_json::to_string(&target.data)?, id],
    )?;
    Ok(())
}

/// Writes the mutable columns. The folder is always written, `NULL` for
/// root; the owning plugin only when the command names one.
fn update_row(
    conn: &rusqlite::Connection,
    target: &Record,
    plugin_id: &FieldValue<String>,
) -> StoreResult<()> {
    let data = serde_json::to_string(&target.data)?;
    let folder_uid = FieldValue::from_option(target.folder_uid.clone());

    let mut columns = vec![
        "uid", "folder_uid", "title", "slug", "data", "version", "updated", "updated_by",
    ];
    let mut values: Vec<&dyn ToSql> = vec![
        &target.uid,
        &folder_uid,
        &target.title,
        &target.slug,
        &data,
        &target.version,
        &target.updated,
        &target.updated_by,
    ];
    if !plugin_id.is_untouched() {
        columns.push("plugin_id");
        values.push(plugin_id);
    }
    let assignments: Vec<String> = columns.iter().map(|column| format!("{column} = ?")).collect();
    values.push(&target.id);
    values.push(&target.org_id);

    let sql = format!(
        "UPDATE dashboard SET {} WHERE id = ? AND org_id = ?",
        assignments.join(", ")
    );
    let affected = conn.execute(&sql, values.as_slice())?;
    if affected == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}
