//! Composable search predicates compiled to one SQL statement.
//!
//! Filters are joined with `AND`. List filters with no entries are ignored,
//! except [`Filter::Permission`], where an empty role set matches nothing.

use rusqlite::types::Value;
use serde::Serialize;

use crate::db::placeholders;
use crate::domain::record::RecordKind;

pub const SEARCH_TYPE_FOLDER: &str = "dash-folder";
pub const SEARCH_TYPE_DASHBOARD: &str = "dash-db";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Org(i64),
    /// Every listed tag must be present.
    Tags(Vec<String>),
    /// Case-insensitive substring of the title.
    Title(String),
    Kind(RecordKind),
    /// Parent folder uids; an empty string selects root-level records.
    FolderUids(Vec<String>),
    Uids(Vec<String>),
    Ids(Vec<i64>),
    Permission { role_ids: Vec<i64>, action: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    AlphaAsc,
    AlphaDesc,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindQuery {
    pub filters: Vec<Filter>,
    pub sort: SortOrder,
    /// Values below 1 fall back to the configured default.
    pub limit: i64,
    /// 1-based; values below 1 mean the first page.
    pub page: i64,
}

impl FindQuery {
    pub fn new(filters: Vec<Filter>) -> Self {
        Self {
            filters,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub id: i64,
    pub uid: String,
    pub title: String,
    pub slug: String,
    pub kind: RecordKind,
    pub folder_uid: Option<String>,
    pub folder_title: Option<String>,
    pub tags: Vec<String>,
}

pub fn parse_search_type(raw: &str) -> Option<RecordKind> {
    match raw.trim() {
        SEARCH_TYPE_FOLDER | "folder" => Some(RecordKind::Folder),
        SEARCH_TYPE_DASHBOARD | "dashboard" => Some(RecordKind::Dashboard),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SqlQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Filter {
    fn push_where(&self, clauses: &mut Vec<String>, params: &mut Vec<Value>) {
        match self {
            Filter::Org(org_id) => {
                clauses.push("d.org_id = ?".to_string());
                params.push(Value::Integer(*org_id));
            }
            Filter::Tags(tags) if !tags.is_empty() => {
                clauses.push(format!(
                    "d.id IN (SELECT dashboard_id FROM dashboard_tag WHERE term IN ({}) \
                     GROUP BY dashboard_id HAVING COUNT(DISTINCT term) = ?)",
                    placeholders(tags.len())
                ));
                params.extend(tags.iter().cloned().map(Value::Text));
                let mut distinct = tags.clone();
                distinct.sort();
                distinct.dedup();
                params.push(Value::Integer(distinct.len() as i64));
            }
            Filter::Title(title) if !title.trim().is_empty() => {
                clauses.push("d.title LIKE ? ESCAPE '\\'".to_string());
                params.push(Value::Text(format!("%{}%", escape_like(title.trim()))));
            }
            Filter::Kind(kind) => {
                clauses.push("d.is_folder = ?".to_string());
                params.push(Value::Integer(i64::from(kind.is_folder())));
            }
            Filter::FolderUids(uids) if !uids.is_empty() => {
                clauses.push(folder_clause("d.folder_uid", uids, params));
            }
            Filter::Uids(uids) if !uids.is_empty() => {
                clauses.push(format!("d.uid IN ({})", placeholders(uids.len())));
                params.extend(uids.iter().cloned().map(Value::Text));
            }
            Filter::Ids(ids) if !ids.is_empty() => {
                clauses.push(format!("d.id IN ({})", placeholders(ids.len())));
                params.extend(ids.iter().copied().map(Value::Integer));
            }
            Filter::Permission { role_ids, action } => {
                if role_ids.is_empty() {
                    clauses.push("0 = 1".to_string());
                    return;
                }
                clauses.push(format!(
                    "EXISTS (SELECT 1 FROM permission p JOIN role r ON r.id = p.role_id \
                     WHERE r.org_id = d.org_id AND p.role_id IN ({}) AND p.action = ? AND ( \
                     (d.is_folder = 0 AND (p.scope = 'dashboards:*' OR p.scope = 'dashboards:uid:' || d.uid)) \
                     OR (d.is_folder = 1 AND (p.scope = 'folders:*' OR p.scope = 'folders:uid:' || d.uid)) \
                     OR (d.is_folder = 0 AND (p.scope = 'folders:*' OR p.scope = 'folders:uid:' || d.folder_uid))))",
                    placeholders(role_ids.len())
                ));
                params.extend(role_ids.iter().copied().map(Value::Integer));
                params.push(Value::Text(action.clone()));
            }
            Filter::Tags(_)
            | Filter::Title(_)
            | Filter::FolderUids(_)
            | Filter::Uids(_)
            | Filter::Ids(_) => {}
        }
    }
}

/// `(<column> IS NULL OR <column> IN (...))` for the given folder uids, where
/// `""` stands for root. Bound values are appended to `params`.
pub(crate) fn folder_clause(
    column: &str,
    folder_uids: &[String],
    params: &mut Vec<Value>,
) -> String {
    let named: Vec<&String> = folder_uids.iter().filter(|uid| !uid.is_empty()).collect();
    let mut alternatives = Vec::new();
    if named.len() < folder_uids.len() {
        alternatives.push(format!("{column} IS NULL"));
    }
    if !named.is_empty() {
        alternatives.push(format!("{column} IN ({})", placeholders(named.len())));
        params.extend(named.into_iter().cloned().map(Value::Text));
    }
    format!("({})", alternatives.join(" OR "))
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

pub(crate) fn build(query: &FindQuery, default_limit: i64) -> SqlQuery {
    let mut clauses = Vec::new();
    let mut params = Vec::new();
    for filter in &query.filters {
        filter.push_where(&mut clauses, &mut params);
    }

    let where_sql = if clauses.is_empty() {
        "1 = 1".to_string()
    } else {
        clauses.join(" AND ")
    };
    let direction = match query.sort {
        SortOrder::AlphaAsc => "ASC",
        SortOrder::AlphaDesc => "DESC",
    };
    let limit = if query.limit < 1 {
        default_limit
    } else {
        query.limit
    };
    let offset = query.page.max(1).saturating_sub(1).saturating_mul(limit);

    let sql = format!(
        "SELECT d.id, d.uid, d.title, d.slug, d.is_folder, d.folder_uid, f.title \
         FROM dashboard d \
         LEFT JOIN dashboard f ON f.org_id = d.org_id AND f.uid = d.folder_uid AND f.is_folder = 1 \
         WHERE {where_sql} \
         ORDER BY d.title COLLATE NOCASE {direction}, d.id ASC \
         LIMIT ? OFFSET ?"
    );
    params.push(Value::Integer(limit));
    params.push(Value::Integer(offset));
    SqlQuery { sql, params }
}
