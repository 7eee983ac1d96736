use rusqlite::{params, Connection};
use serde::Serialize;
use time::OffsetDateTime;

use crate::domain::record::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityEventType {
    Create,
    Update,
    Delete,
}

impl EntityEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityEventType::Create => "create",
            EntityEventType::Update => "update",
            EntityEventType::Delete => "delete",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "create" => Some(EntityEventType::Create),
            "update" => Some(EntityEventType::Update),
            "delete" => Some(EntityEventType::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityEvent {
    pub id: i64,
    pub event_type: EntityEventType,
    pub entity_id: String,
    /// Unix seconds.
    pub created: i64,
}

/// `database/<org>/<dashboard|folder>/<uid>`
pub fn entity_id(record: &Record) -> String {
    format!(
        "database/{}/{}/{}",
        record.org_id,
        record.kind().as_str(),
        record.uid
    )
}

pub(crate) fn append(
    conn: &Connection,
    record: &Record,
    event_type: EntityEventType,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO entity_event (event_type, entity_id, created) VALUES (?1, ?2, ?3)",
        params![
            event_type.as_str(),
            entity_id(record),
            OffsetDateTime::now_utc().unix_timestamp()
        ],
    )?;
    Ok(())
}

pub(crate) fn list_since(conn: &Connection, after_id: i64) -> rusqlite::Result<Vec<EntityEvent>> {
    let mut stmt = conn.prepare(
        "SELECT id, event_type, entity_id, created FROM entity_event WHERE id > ?1 ORDER BY id",
    )?;
    let mut rows = stmt.query(params![after_id])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        let raw_type: String = row.get(1)?;
        let Some(event_type) = EntityEventType::parse(&raw_type) else {
            tracing::warn!(event_type = %raw_type, "skipping entity event of unknown type");
            continue;
        };
        result.push(EntityEvent {
            id: row.get(0)?,
            event_type,
            entity_id: row.get(2)?,
            created: row.get(3)?,
        });
    }
    Ok(result)
}
