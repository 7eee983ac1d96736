//! Transactional removal of a record and everything that references it.
//!
//! Deletion is a fixed pipeline of [`CleanupStep`]s. Steps that look up the
//! owning row, or must be done before it disappears, come before
//! [`CleanupStep::OwningRow`].

use std::collections::HashSet;

use rusqlite::{params, Connection};
use tracing::{debug, info};

use super::alerts::{alerts_for, delete_alert, REASON_DASHBOARD_DELETED};
use super::query::{record_by_id, record_by_uid};
use super::{DashboardStore, Session};
use crate::cancel::CancelToken;
use crate::domain::record::{Record, RecordKind, RECORD_COLUMNS};
use crate::error::{StoreError, StoreResult};
use crate::events::{self, EntityEventType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordRef {
    Id(i64),
    Uid(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteCommand {
    /// `None` deletes by id across organizations; a uid always needs one.
    pub org_id: Option<i64>,
    pub target: RecordRef,
}

impl DeleteCommand {
    pub fn by_id(org_id: i64, id: i64) -> Self {
        Self {
            org_id: Some(org_id),
            target: RecordRef::Id(id),
        }
    }

    pub fn by_uid(org_id: i64, uid: impl Into<String>) -> Self {
        Self {
            org_id: Some(org_id),
            target: RecordRef::Uid(uid.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CleanupStep {
    SubEntities,
    ResourcePermissions,
    FolderChildren,
    Tags,
    Stars,
    OwningRow,
    PlaylistItems,
    Versions,
    Provisioning,
    AclEntries,
    Annotations,
}

const PIPELINE: [CleanupStep; 11] = [
    CleanupStep::SubEntities,
    CleanupStep::ResourcePermissions,
    CleanupStep::FolderChildren,
    CleanupStep::Tags,
    CleanupStep::Stars,
    CleanupStep::OwningRow,
    CleanupStep::PlaylistItems,
    CleanupStep::Versions,
    CleanupStep::Provisioning,
    CleanupStep::AclEntries,
    CleanupStep::Annotations,
];

/// Per-leaf statements for every dashboard directly inside a folder.
const FOLDER_LEAF_DELETES: [&str; 7] = [
    "DELETE FROM dashboard_tag WHERE dashboard_id IN \
     (SELECT id FROM dashboard WHERE org_id = ?1 AND folder_uid = ?2 AND is_folder = 0)",
    "DELETE FROM star WHERE dashboard_id IN \
     (SELECT id FROM dashboard WHERE org_id = ?1 AND folder_uid = ?2 AND is_folder = 0)",
    "DELETE FROM dashboard_provisioning WHERE dashboard_id IN \
     (SELECT id FROM dashboard WHERE org_id = ?1 AND folder_uid = ?2 AND is_folder = 0)",
    "DELETE FROM dashboard_version WHERE dashboard_id IN \
     (SELECT id FROM dashboard WHERE org_id = ?1 AND folder_uid = ?2 AND is_folder = 0)",
    "DELETE FROM dashboard_acl WHERE dashboard_id IN \
     (SELECT id FROM dashboard WHERE org_id = ?1 AND folder_uid = ?2 AND is_folder = 0)",
    "DELETE FROM annotation WHERE org_id = ?1 AND dashboard_id IN \
     (SELECT id FROM dashboard WHERE org_id = ?1 AND folder_uid = ?2 AND is_folder = 0)",
    "DELETE FROM playlist_item WHERE \
     (type = 'dashboard_by_id' AND value IN (SELECT CAST(id AS TEXT) FROM dashboard \
         WHERE org_id = ?1 AND folder_uid = ?2 AND is_folder = 0)) \
     OR (type = 'dashboard_by_uid' AND value IN (SELECT uid FROM dashboard \
         WHERE org_id = ?1 AND folder_uid = ?2 AND is_folder = 0))",
];

impl CleanupStep {
    /// True when the step must run while the owning row still exists.
    fn needs_owner_row(self) -> bool {
        matches!(
            self,
            CleanupStep::SubEntities | CleanupStep::ResourcePermissions | CleanupStep::FolderChildren
        )
    }

    fn run(
        self,
        session: &Session<'_>,
        record: &Record,
        visited: &mut HashSet<i64>,
    ) -> StoreResult<()> {
        let conn = session.conn();
        let id = record.id;
        match self {
            CleanupStep::SubEntities => delete_sub_entities(conn, id)?,
            CleanupStep::ResourcePermissions => {
                delete_resource_permissions(conn, record.org_id, &record.kind().scope_for(&record.uid))?
            }
            CleanupStep::FolderChildren => {
                if record.is_folder {
                    delete_folder_children(session, record, visited)?;
                }
            }
            CleanupStep::Tags => {
                conn.execute("DELETE FROM dashboard_tag WHERE dashboard_id = ?1", params![id])?;
            }
            CleanupStep::Stars => {
                conn.execute("DELETE FROM star WHERE dashboard_id = ?1", params![id])?;
            }
            CleanupStep::OwningRow => {
                conn.execute("DELETE FROM dashboard WHERE id = ?1", params![id])?;
            }
            CleanupStep::PlaylistItems => {
                conn.execute(
                    "DELETE FROM playlist_item WHERE (type = 'dashboard_by_id' AND value = ?1) \
                     OR (type = 'dashboard_by_uid' AND value = ?2)",
                    params![id.to_string(), record.uid],
                )?;
            }
            CleanupStep::Versions => {
                conn.execute("DELETE FROM dashboard_version WHERE dashboard_id = ?1", params![id])?;
            }
            CleanupStep::Provisioning => {
                conn.execute(
                    "DELETE FROM dashboard_provisioning WHERE dashboard_id = ?1",
                    params![id],
                )?;
            }
            CleanupStep::AclEntries => {
                conn.execute("DELETE FROM dashboard_acl WHERE dashboard_id = ?1", params![id])?;
            }
            CleanupStep::Annotations => {
                conn.execute(
                    "DELETE FROM annotation WHERE dashboard_id = ?1 AND org_id = ?2",
                    params![id, record.org_id],
                )?;
            }
        }
        Ok(())
    }
}

fn delete_sub_entities(conn: &Connection, dashboard_id: i64) -> rusqlite::Result<()> {
    for alert in alerts_for(conn, dashboard_id)? {
        delete_alert(conn, alert.id, REASON_DASHBOARD_DELETED)?;
    }
    Ok(())
}

fn delete_resource_permissions(conn: &Connection, org_id: i64, scope: &str) -> rusqlite::Result<()> {
    let removed = conn.execute(
        "DELETE FROM permission WHERE id IN (SELECT p.id FROM permission p \
         JOIN role r ON r.id = p.role_id WHERE p.scope = ?1 AND r.org_id = ?2)",
        params![scope, org_id],
    )?;
    if removed > 0 {
        debug!(scope, removed, "resource permissions removed");
    }
    Ok(())
}

fn children_of(conn: &Connection, folder: &Record) -> rusqlite::Result<Vec<Record>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECORD_COLUMNS} FROM dashboard WHERE org_id = ?1 AND folder_uid = ?2 ORDER BY id"
    ))?;
    let children = stmt
        .query_map(params![folder.org_id, folder.uid], Record::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(children)
}

/// Child folders go through the whole pipeline first, then the leaves.
/// Folders already on the way down are skipped, so a parent cycle ends.
fn delete_folder_children(
    session: &Session<'_>,
    folder: &Record,
    visited: &mut HashSet<i64>,
) -> StoreResult<()> {
    for child in children_of(session.conn(), folder)?
        .iter()
        .filter(|child| child.is_folder)
    {
        if visited.contains(&child.id) {
            debug!(folder = %folder.uid, child = %child.uid, "folder cycle skipped");
            continue;
        }
        session.checkpoint()?;
        delete_tree(session, child, visited)?;
    }
    delete_folder_leaves(session, folder)?;
    Ok(())
}

/// Removes every dashboard directly inside `folder`, keeping the folder.
fn delete_folder_leaves(session: &Session<'_>, folder: &Record) -> StoreResult<usize> {
    let conn = session.conn();
    let leaves: Vec<Record> = children_of(conn, folder)?
        .into_iter()
        .filter(|child| !child.is_folder)
        .collect();
    if leaves.is_empty() {
        return Ok(0);
    }

    for leaf in &leaves {
        session.checkpoint()?;
        delete_sub_entities(conn, leaf.id)?;
        delete_resource_permissions(conn, folder.org_id, &RecordKind::Dashboard.scope_for(&leaf.uid))?;
    }
    for statement in FOLDER_LEAF_DELETES {
        conn.execute(statement, params![folder.org_id, folder.uid])?;
    }
    let removed = conn.execute(
        "DELETE FROM dashboard WHERE org_id = ?1 AND folder_uid = ?2 AND is_folder = 0",
        params![folder.org_id, folder.uid],
    )?;
    debug!(folder = %folder.uid, removed, "folder dashboards removed");
    Ok(removed)
}

pub(crate) fn delete_in_session(session: &Session<'_>, record: &Record) -> StoreResult<()> {
    delete_tree(session, record, &mut HashSet::new())
}

fn delete_tree(
    session: &Session<'_>,
    record: &Record,
    visited: &mut HashSet<i64>,
) -> StoreResult<()> {
    visited.insert(record.id);
    for step in PIPELINE {
        session.checkpoint()?;
        step.run(session, record, visited)?;
    }
    if session.entity_events_enabled() {
        events::append(session.conn(), record, EntityEventType::Delete)?;
    }
    Ok(())
}

impl DashboardStore {
    pub fn delete_record(&self, cancel: &CancelToken, cmd: &DeleteCommand) -> StoreResult<()> {
        self.write(cancel, |session| {
            let conn = session.conn();
            let record = match (&cmd.target, cmd.org_id) {
                (RecordRef::Id(id), org_id) => record_by_id(conn, org_id, *id)?,
                (RecordRef::Uid(uid), Some(org_id)) => record_by_uid(conn, org_id, uid)?,
                (RecordRef::Uid(_), None) => return Err(StoreError::IdentifierNotSet),
            }
            .ok_or(StoreError::NotFound)?;
            delete_in_session(session, &record)?;
            info!(uid = %record.uid, kind = %record.kind(), "dashboard deleted");
            Ok(())
        })
    }

    /// Deletes the dashboards directly inside each folder; the folders stay.
    /// An unknown folder uid fails the whole call.
    pub fn delete_in_folders(
        &self,
        cancel: &CancelToken,
        org_id: i64,
        folder_uids: &[String],
    ) -> StoreResult<usize> {
        self.write(cancel, |session| {
            let mut removed = 0;
            for folder_uid in folder_uids {
                let folder = record_by_uid(session.conn(), org_id, folder_uid)?
                    .filter(|record| record.is_folder)
                    .ok_or(StoreError::FolderNotFound)?;
                removed += delete_folder_leaves(session, &folder)?;
            }
            info!(org_id, removed, "dashboards in folders deleted");
            Ok(removed)
        })
    }
}
