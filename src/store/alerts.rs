//! Reconciles a record's legacy panel alerts against incoming definitions.
//!
//! Existing and incoming rules are matched by panel id. Upserts run first in
//! definition order, then every stored rule whose panel is gone is deleted.

use std::collections::{HashMap, HashSet};

use rusqlite::{params, Connection};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::debug;

use super::query::record_by_id;
use super::{DashboardStore, Session};
use crate::cancel::CancelToken;
use crate::domain::alert::{ensure_unique_panels, Alert, AlertDefinition, AlertState, ALERT_COLUMNS};
use crate::domain::record::Record;
use crate::error::{StoreError, StoreResult};

pub(crate) const REASON_REMOVED_FROM_DASHBOARD: &str = "removed from dashboard";
pub(crate) const REASON_DASHBOARD_DELETED: &str = "dashboard deleted";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
}

pub(crate) fn alerts_for(conn: &Connection, dashboard_id: i64) -> rusqlite::Result<Vec<Alert>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {ALERT_COLUMNS} FROM alert WHERE dashboard_id = ?1 ORDER BY panel_id"
    ))?;
    let alerts = stmt
        .query_map(params![dashboard_id], Alert::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(alerts)
}

pub(crate) fn reconcile(
    session: &Session<'_>,
    record: &Record,
    definitions: &[AlertDefinition],
) -> StoreResult<ReconcileSummary> {
    ensure_unique_panels(definitions)?;
    let conn = session.conn();
    let existing: HashMap<i64, Alert> = alerts_for(conn, record.id)?
        .into_iter()
        .map(|alert| (alert.panel_id, alert))
        .collect();
    let mut summary = ReconcileSummary::default();

    for definition in definitions {
        session.checkpoint()?;
        let alert_id = match existing.get(&definition.panel_id) {
            Some(current) if current.contains_updates(definition) => {
                update_alert(conn, current.id, definition)?;
                debug!(name = %definition.name, id = current.id, "alert updated");
                summary.updated += 1;
                current.id
            }
            Some(current) => {
                summary.unchanged += 1;
                current.id
            }
            None => {
                let id = insert_alert(conn, record, definition)?;
                debug!(name = %definition.name, id, "alert inserted");
                summary.inserted += 1;
                id
            }
        };
        replace_rule_tags(conn, alert_id, &definition.rule_tags())?;
    }

    let incoming: HashSet<i64> = definitions.iter().map(|def| def.panel_id).collect();
    let mut missing: Vec<&Alert> = existing
        .values()
        .filter(|alert| !incoming.contains(&alert.panel_id))
        .collect();
    missing.sort_by_key(|alert| alert.panel_id);
    for alert in missing {
        session.checkpoint()?;
        delete_alert(conn, alert.id, REASON_REMOVED_FROM_DASHBOARD)?;
        summary.deleted += 1;
    }

    Ok(summary)
}

fn update_alert(conn: &Connection, alert_id: i64, definition: &AlertDefinition) -> StoreResult<()> {
    conn.execute(
        "UPDATE alert SET name = ?1, message = ?2, settings = ?3, frequency = ?4, \
         for_seconds = ?5, updated = ?6 WHERE id = ?7",
        params![
            definition.name,
            definition.message,
            serde_json::to_string(&definition.settings)?,
            definition.frequency,
            definition.for_seconds,
            OffsetDateTime::now_utc(),
            alert_id,
        ],
    )?;
    Ok(())
}

fn insert_alert(conn: &Connection, record: &Record, definition: &AlertDefinition) -> StoreResult<i64> {
    let now = OffsetDateTime::now_utc();
    conn.execute(
        "INSERT INTO alert (dashboard_id, panel_id, org_id, name, message, state, settings, \
         frequency, for_seconds, silenced, new_state_date, created, updated) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10, ?10, ?10)",
        params![
            record.id,
            definition.panel_id,
            record.org_id,
            definition.name,
            definition.message,
            AlertState::Unknown.as_str(),
            serde_json::to_string(&definition.settings)?,
            definition.frequency,
            definition.for_seconds,
            now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn replace_rule_tags(conn: &Connection, alert_id: i64, tags: &[(String, String)]) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM alert_rule_tag WHERE alert_id = ?1", params![alert_id])?;
    for tag_id in ensure_tags_exist(conn, tags)? {
        conn.execute(
            "INSERT OR IGNORE INTO alert_rule_tag (alert_id, tag_id) VALUES (?1, ?2)",
            params![alert_id, tag_id],
        )?;
    }
    Ok(())
}

fn ensure_tags_exist(conn: &Connection, tags: &[(String, String)]) -> rusqlite::Result<Vec<i64>> {
    let mut ids = Vec::with_capacity(tags.len());
    for (key, value) in tags {
        conn.execute(
            "INSERT OR IGNORE INTO tag (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        ids.push(conn.query_row(
            "SELECT id FROM tag WHERE key = ?1 AND value = ?2",
            params![key, value],
            |row| row.get(0),
        )?);
    }
    Ok(ids)
}

/// Deletes one alert and the rows that hang off it.
pub(crate) fn delete_alert(conn: &Connection, alert_id: i64, reason: &str) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM alert WHERE id = ?1", params![alert_id])?;
    conn.execute("DELETE FROM annotation WHERE alert_id = ?1", params![alert_id])?;
    conn.execute(
        "DELETE FROM alert_notification_state WHERE alert_id = ?1",
        params![alert_id],
    )?;
    conn.execute("DELETE FROM alert_rule_tag WHERE alert_id = ?1", params![alert_id])?;
    debug!(alert_id, reason, "alert deleted");
    Ok(())
}

impl DashboardStore {
    /// Reconciles the alerts of an existing record in one transaction.
    pub fn save_alerts(
        &self,
        cancel: &CancelToken,
        dashboard_id: i64,
        definitions: &[AlertDefinition],
    ) -> StoreResult<ReconcileSummary> {
        self.write(cancel, |session| {
            let record =
                record_by_id(session.conn(), None, dashboard_id)?.ok_or(StoreError::NotFound)?;
            reconcile(session, &record, definitions)
        })
    }

    pub fn get_alerts(&self, cancel: &CancelToken, dashboard_id: i64) -> StoreResult<Vec<Alert>> {
        self.read(cancel, |session| Ok(alerts_for(session.conn(), dashboard_id)?))
    }
}
