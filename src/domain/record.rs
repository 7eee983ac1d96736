use std::fmt;

use rusqlite::types::{ToSql, ToSqlOutput};
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use time::OffsetDateTime;

use super::uid::slugify;

/// Recorded as creator/updater when the acting user id is 0.
pub const SYSTEM_USER_ID: i64 = -1;

pub(crate) const RECORD_COLUMNS: &str = "id, org_id, uid, folder_uid, is_folder, title, slug, data, \
     version, plugin_id, created, updated, created_by, updated_by";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Dashboard,
    Folder,
}

impl RecordKind {
    pub fn from_is_folder(is_folder: bool) -> Self {
        if is_folder {
            RecordKind::Folder
        } else {
            RecordKind::Dashboard
        }
    }

    pub fn is_folder(self) -> bool {
        self == RecordKind::Folder
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Dashboard => "dashboard",
            RecordKind::Folder => "folder",
        }
    }

    /// Resource scope of the access-control permissions attached to this kind.
    pub fn scope_for(self, uid: &str) -> String {
        match self {
            RecordKind::Dashboard => format!("dashboards:uid:{uid}"),
            RecordKind::Folder => format!("folders:uid:{uid}"),
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Presence-aware value for a column at the write boundary.
///
/// `Untouched` leaves the stored column alone, `Null` clears it and `Set`
/// writes the value. A root-level record writes `Null` for its folder, which
/// is not the same as leaving the folder untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FieldValue<T> {
    #[default]
    Untouched,
    Null,
    Set(T),
}

impl<T> FieldValue<T> {
    pub fn from_option(value: Option<T>) -> Self {
        match value {
            Some(value) => FieldValue::Set(value),
            None => FieldValue::Null,
        }
    }

    pub fn is_untouched(&self) -> bool {
        matches!(self, FieldValue::Untouched)
    }

    pub fn as_option(&self) -> Option<&T> {
        match self {
            FieldValue::Set(value) => Some(value),
            FieldValue::Untouched | FieldValue::Null => None,
        }
    }
}

impl<T: ToSql> ToSql for FieldValue<T> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            FieldValue::Set(value) => value.to_sql(),
            FieldValue::Untouched | FieldValue::Null => Ok(ToSqlOutput::from(rusqlite::types::Null)),
        }
    }
}

/// A dashboard or folder row. The JSON payload mirrors `id`, `uid`, `title`
/// and `version`; the setters keep both in step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub id: i64,
    pub org_id: i64,
    pub uid: String,
    pub folder_uid: Option<String>,
    pub is_folder: bool,
    pub title: String,
    pub slug: String,
    pub data: Value,
    pub version: i64,
    pub plugin_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated: OffsetDateTime,
    pub created_by: i64,
    pub updated_by: i64,
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        RecordKind::from_is_folder(self.is_folder)
    }

    pub fn set_id(&mut self, id: i64) {
        self.id = id;
        self.put_field("id", json!(id));
    }

    pub fn set_uid(&mut self, uid: impl Into<String>) {
        self.uid = uid.into();
        let uid = self.uid.clone();
        self.put_field("uid", json!(uid));
    }

    pub fn set_version(&mut self, version: i64) {
        self.version = version;
        self.put_field("version", json!(version));
    }

    /// Terms from the payload's `tags` array, trimmed, without blanks or repeats.
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = Vec::new();
        let Some(raw) = self.data.get("tags").and_then(Value::as_array) else {
            return tags;
        };
        for term in raw.iter().filter_map(Value::as_str).map(str::trim) {
            if !term.is_empty() && !tags.iter().any(|existing| existing == term) {
                tags.push(term.to_string());
            }
        }
        tags
    }

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let raw_data: String = row.get(7)?;
        let data: Value = serde_json::from_str(&raw_data).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(err))
        })?;
        let mut record = Record {
            id: row.get(0)?,
            org_id: row.get(1)?,
            uid: row.get(2)?,
            folder_uid: row.get(3)?,
            is_folder: row.get(4)?,
            title: row.get(5)?,
            slug: row.get(6)?,
            data,
            version: row.get(8)?,
            plugin_id: row.get(9)?,
            created: row.get(10)?,
            updated: row.get(11)?,
            created_by: row.get(12)?,
            updated_by: row.get(13)?,
        };
        let (id, uid, version) = (record.id, record.uid.clone(), record.version);
        record.set_id(id);
        record.set_uid(uid);
        record.set_version(version);
        Ok(record)
    }

    fn put_field(&mut self, key: &str, value: Value) {
        if !self.data.is_object() {
            self.data = json!({});
        }
        if let Some(object) = self.data.as_object_mut() {
            object.insert(key.to_string(), value);
        }
    }
}

/// Everything needed to create or update one record.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveCommand {
    /// Full JSON payload; `id`, `uid`, `title` and `version` are read from it.
    pub dashboard: Value,
    pub org_id: i64,
    /// Acting user; 0 is the system and is recorded as [`SYSTEM_USER_ID`].
    pub user_id: i64,
    pub folder_uid: Option<String>,
    pub is_folder: bool,
    pub overwrite: bool,
    pub message: String,
    pub restored_from: i64,
    pub plugin_id: Option<String>,
    pub updated_at: Option<OffsetDateTime>,
    /// Reconcile legacy panel alerts from the payload in the same transaction.
    pub sync_alerts: bool,
}

impl SaveCommand {
    pub fn new(org_id: i64, dashboard: Value) -> Self {
        Self {
            dashboard,
            org_id,
            user_id: 0,
            folder_uid: None,
            is_folder: false,
            overwrite: false,
            message: String::new(),
            restored_from: 0,
            plugin_id: None,
            updated_at: None,
            sync_alerts: false,
        }
    }

    pub fn folder(org_id: i64, dashboard: Value) -> Self {
        Self {
            is_folder: true,
            ..Self::new(org_id, dashboard)
        }
    }

    pub fn in_folder(mut self, folder_uid: impl Into<String>) -> Self {
        let folder_uid = folder_uid.into();
        self.folder_uid = if folder_uid.is_empty() {
            None
        } else {
            Some(folder_uid)
        };
        self
    }

    pub fn by_user(mut self, user_id: i64) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// The record this command would write, before identity resolution.
    pub fn record_model(&self) -> Record {
        let data = if self.dashboard.is_object() {
            self.dashboard.clone()
        } else {
            json!({})
        };
        let title = data
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();
        let mut record = Record {
            id: 0,
            org_id: self.org_id,
            uid: String::new(),
            folder_uid: self.folder_uid.clone().filter(|uid| !uid.is_empty()),
            is_folder: self.is_folder,
            slug: slugify(&title),
            title: title.clone(),
            data,
            version: 0,
            plugin_id: self.plugin_id.clone().filter(|id| !id.is_empty()),
            created: OffsetDateTime::UNIX_EPOCH,
            updated: OffsetDateTime::UNIX_EPOCH,
            created_by: 0,
            updated_by: 0,
        };
        record.put_field("title", json!(title));
        let id = json_integer(record.data.get("id"));
        let version = json_integer(record.data.get("version"));
        let uid = record
            .data
            .get("uid")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();
        record.set_id(id);
        record.set_uid(uid);
        record.set_version(version);
        record
    }
}

fn json_integer(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(number)) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|raw| raw as i64))
            .unwrap_or(0),
        _ => 0,
    }
}
