//! Read-side operations: lookups, search, quota counts and the event feed.

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::Serialize;

use super::tags::terms_for;
use super::DashboardStore;
use crate::cancel::CancelToken;
use crate::db::placeholders;
use crate::domain::record::{FieldValue, Record, RecordKind, RECORD_COLUMNS};
use crate::error::{StoreError, StoreResult};
use crate::events::{list_since, EntityEvent};
use crate::quota::{default_limits, QuotaMap, QuotaScope, QuotaTag};
use crate::search::{build, folder_clause, FindQuery, SearchHit};

/// Single-record lookup. Needs an id, a uid, or a title together with an
/// explicit parent folder (`Null` for root).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetRecordQuery {
    pub org_id: i64,
    pub id: i64,
    pub uid: String,
    pub title: Option<String>,
    pub folder_uid: FieldValue<String>,
}

impl GetRecordQuery {
    pub fn by_id(org_id: i64, id: i64) -> Self {
        Self {
            org_id,
            id,
            ..Self::default()
        }
    }

    pub fn by_uid(org_id: i64, uid: impl Into<String>) -> Self {
        Self {
            org_id,
            uid: uid.into(),
            ..Self::default()
        }
    }

    pub fn by_title(org_id: i64, title: impl Into<String>, folder_uid: Option<String>) -> Self {
        Self {
            org_id,
            title: Some(title.into()),
            folder_uid: FieldValue::from_option(folder_uid),
            ..Self::default()
        }
    }

    fn is_underspecified(&self) -> bool {
        self.id == 0
            && self.uid.is_empty()
            && (self.title.is_none() || self.folder_uid.is_untouched())
    }
}

/// Batch lookup. Ids win when both lists are given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetRecordsQuery {
    pub org_id: i64,
    pub ids: Vec<i64>,
    pub uids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordRefView {
    pub uid: String,
    pub slug: String,
}

pub(crate) fn record_by_id(
    conn: &Connection,
    org_id: Option<i64>,
    id: i64,
) -> rusqlite::Result<Option<Record>> {
    conn.query_row(
        &format!("SELECT {RECORD_COLUMNS} FROM dashboard WHERE id = ?1 AND (?2 IS NULL OR org_id = ?2)"),
        params![id, org_id],
        Record::from_row,
    )
    .optional()
}

pub(crate) fn record_by_uid(
    conn: &Connection,
    org_id: i64,
    uid: &str,
) -> rusqlite::Result<Option<Record>> {
    conn.query_row(
        &format!("SELECT {RECORD_COLUMNS} FROM dashboard WHERE org_id = ?1 AND uid = ?2"),
        params![org_id, uid],
        Record::from_row,
    )
    .optional()
}

/// First record with this title in the folder, of either kind.
pub(crate) fn record_by_title(
    conn: &Connection,
    org_id: i64,
    folder_uid: Option<&str>,
    title: &str,
) -> rusqlite::Result<Option<Record>> {
    conn.query_row(
        &format!(
            "SELECT {RECORD_COLUMNS} FROM dashboard \
             WHERE org_id = ?1 AND folder_uid IS ?2 AND title = ?3 ORDER BY id LIMIT 1"
        ),
        params![org_id, folder_uid, title],
        Record::from_row,
    )
    .optional()
}

impl DashboardStore {
    pub fn get_record(&self, cancel: &CancelToken, query: &GetRecordQuery) -> StoreResult<Record> {
        if query.is_underspecified() {
            return Err(StoreError::IdentifierNotSet);
        }

        let mut clauses = vec!["org_id = ?".to_string()];
        let mut values = vec![Value::Integer(query.org_id)];
        if query.id != 0 {
            clauses.push("id = ?".to_string());
            values.push(Value::Integer(query.id));
        }
        if !query.uid.is_empty() {
            clauses.push("uid = ?".to_string());
            values.push(Value::Text(query.uid.clone()));
        }
        if let Some(title) = &query.title {
            clauses.push("title = ?".to_string());
            values.push(Value::Text(title.clone()));
        }
        match &query.folder_uid {
            FieldValue::Set(folder_uid) => {
                clauses.push("folder_uid = ?".to_string());
                values.push(Value::Text(folder_uid.clone()));
            }
            FieldValue::Null => clauses.push("folder_uid IS NULL".to_string()),
            FieldValue::Untouched => {}
        }

        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM dashboard WHERE {} ORDER BY id LIMIT 1",
            clauses.join(" AND ")
        );
        self.read(cancel, |session| {
            session
                .conn()
                .query_row(&sql, params_from_iter(values.iter()), Record::from_row)
                .optional()?
                .ok_or(StoreError::NotFound)
        })
    }

    pub fn get_records(
        &self,
        cancel: &CancelToken,
        query: &GetRecordsQuery,
    ) -> StoreResult<Vec<Record>> {
        let mut values = vec![Value::Integer(query.org_id)];
        let filter = if !query.ids.is_empty() {
            values.extend(query.ids.iter().copied().map(Value::Integer));
            format!("id IN ({})", placeholders(query.ids.len()))
        } else if !query.uids.is_empty() {
            values.extend(query.uids.iter().cloned().map(Value::Text));
            format!("uid IN ({})", placeholders(query.uids.len()))
        } else {
            return Err(StoreError::ValidationFailed(
                "no dashboard ids or uids given".to_string(),
            ));
        };

        let sql =
            format!("SELECT {RECORD_COLUMNS} FROM dashboard WHERE org_id = ? AND {filter} ORDER BY id");
        self.read(cancel, |session| {
            let mut stmt = session.conn().prepare(&sql)?;
            let records = stmt
                .query_map(params_from_iter(values.iter()), Record::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(records)
        })
    }

    pub fn get_uid_by_id(
        &self,
        cancel: &CancelToken,
        org_id: i64,
        id: i64,
    ) -> StoreResult<RecordRefView> {
        self.read(cancel, |session| {
            session
                .conn()
                .query_row(
                    "SELECT uid, slug FROM dashboard WHERE id = ?1 AND org_id = ?2",
                    params![id, org_id],
                    |row| {
                        Ok(RecordRefView {
                            uid: row.get(0)?,
                            slug: row.get(1)?,
                        })
                    },
                )
                .optional()?
                .ok_or(StoreError::NotFound)
        })
    }

    /// Dashboards owned by a plugin. Folders are never plugin-owned.
    pub fn get_records_by_plugin(
        &self,
        cancel: &CancelToken,
        org_id: i64,
        plugin_id: &str,
    ) -> StoreResult<Vec<Record>> {
        self.read(cancel, |session| {
            let mut stmt = session.conn().prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM dashboard \
                 WHERE org_id = ?1 AND plugin_id = ?2 AND is_folder = 0 ORDER BY id"
            ))?;
            let records = stmt
                .query_map(params![org_id, plugin_id], Record::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(records)
        })
    }

    pub fn find_records(&self, cancel: &CancelToken, query: &FindQuery) -> StoreResult<Vec<SearchHit>> {
        let compiled = build(query, self.config().search.default_limit);
        self.read(cancel, |session| {
            let conn = session.conn();
            let mut stmt = conn.prepare(&compiled.sql)?;
            let mut hits = stmt
                .query_map(params_from_iter(compiled.params.iter()), |row| {
                    Ok(SearchHit {
                        id: row.get(0)?,
                        uid: row.get(1)?,
                        title: row.get(2)?,
                        slug: row.get(3)?,
                        kind: RecordKind::from_is_folder(row.get(4)?),
                        folder_uid: row.get(5)?,
                        folder_title: row.get(6)?,
                        tags: Vec::new(),
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let ids: Vec<i64> = hits.iter().map(|hit| hit.id).collect();
            let mut terms = terms_for(conn, &ids)?;
            for hit in &mut hits {
                hit.tags = terms.remove(&hit.id).unwrap_or_default();
            }
            Ok(hits)
        })
    }

    /// Dashboard usage for quota accounting: always the global count, plus
    /// the organization count when `org_id` is given. Folders do not count.
    pub fn count_records(&self, cancel: &CancelToken, org_id: Option<i64>) -> StoreResult<QuotaMap> {
        self.read(cancel, |session| {
            let conn = session.conn();
            let mut usage = QuotaMap::default();
            let global: i64 =
                conn.query_row("SELECT COUNT(*) FROM dashboard WHERE is_folder = 0", [], |row| {
                    row.get(0)
                })?;
            usage.set(QuotaTag::dashboards(QuotaScope::Global), global);
            if let Some(org_id) = org_id {
                let in_org: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM dashboard WHERE org_id = ?1 AND is_folder = 0",
                    params![org_id],
                    |row| row.get(0),
                )?;
                usage.set(QuotaTag::dashboards(QuotaScope::Org), in_org);
            }
            Ok(usage)
        })
    }

    pub fn default_quota_limits(&self) -> QuotaMap {
        default_limits(&self.config().quota)
    }

    /// Dashboards directly inside the given folders; `""` stands for root.
    pub fn count_in_folders(
        &self,
        cancel: &CancelToken,
        org_id: i64,
        folder_uids: &[String],
    ) -> StoreResult<i64> {
        if folder_uids.is_empty() {
            return Ok(0);
        }
        let mut values = vec![Value::Integer(org_id)];
        let clause = folder_clause("folder_uid", folder_uids, &mut values);
        let sql = format!("SELECT COUNT(*) FROM dashboard WHERE org_id = ? AND is_folder = 0 AND {clause}");
        self.read(cancel, |session| {
            let count = session
                .conn()
                .query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))?;
            Ok(count)
        })
    }

    /// Change events with an id above `after_id`, oldest first.
    pub fn events_since(&self, cancel: &CancelToken, after_id: i64) -> StoreResult<Vec<EntityEvent>> {
        self.read(cancel, |session| Ok(list_since(session.conn(), after_id)?))
    }
}
