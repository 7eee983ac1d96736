use std::collections::HashMap;

use rusqlite::{params, params_from_iter, Connection};
use serde::Serialize;

use super::DashboardStore;
use crate::cancel::CancelToken;
use crate::db::placeholders;
use crate::error::StoreResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagCount {
    pub term: String,
    pub count: i64,
}

/// Replaces every tag row of the record. Never diffed.
pub(crate) fn replace(conn: &Connection, dashboard_id: i64, terms: &[String]) -> rusqlite::Result<()> {
    conn.execute(
        "DELETE FROM dashboard_tag WHERE dashboard_id = ?1",
        params![dashboard_id],
    )?;
    let mut insert =
        conn.prepare_cached("INSERT INTO dashboard_tag (dashboard_id, term) VALUES (?1, ?2)")?;
    for term in terms {
        insert.execute(params![dashboard_id, term])?;
    }
    Ok(())
}

/// Terms per record id, each list sorted.
pub(crate) fn terms_for(
    conn: &Connection,
    dashboard_ids: &[i64],
) -> rusqlite::Result<HashMap<i64, Vec<String>>> {
    let mut terms: HashMap<i64, Vec<String>> = HashMap::new();
    if dashboard_ids.is_empty() {
        return Ok(terms);
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT dashboard_id, term FROM dashboard_tag WHERE dashboard_id IN ({}) \
         ORDER BY dashboard_id, term",
        placeholders(dashboard_ids.len())
    ))?;
    let mut rows = stmt.query(params_from_iter(dashboard_ids.iter()))?;
    while let Some(row) = rows.next()? {
        terms.entry(row.get(0)?).or_default().push(row.get(1)?);
    }
    Ok(terms)
}

impl DashboardStore {
    /// Tag cloud for one organization, ordered by term.
    pub fn get_tags(&self, cancel: &CancelToken, org_id: i64) -> StoreResult<Vec<TagCount>> {
        self.read(cancel, |session| {
            let mut stmt = session.conn().prepare(
                "SELECT t.term, COUNT(*) FROM dashboard d \
                 JOIN dashboard_tag t ON t.dashboard_id = d.id \
                 WHERE d.org_id = ?1 GROUP BY t.term ORDER BY t.term",
            )?;
            let counts = stmt
                .query_map(params![org_id], |row| {
                    Ok(TagCount {
                        term: row.get(0)?,
                        count: row.get(1)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(counts)
        })
    }
}
