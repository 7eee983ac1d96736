use std::path::Path;
use std::time::Duration;

use rusqlite::{params, Connection, DatabaseName, OptionalExtension, Result, TransactionBehavior};
use time::OffsetDateTime;

pub const CURRENT_SCHEMA_VERSION: i64 = 2;
pub const IN_MEMORY_PATH: &str = ":memory:";

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: [Migration; 2] = [
    Migration {
        version: 1,
        name: "dashboard_schema_v1",
        sql: r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS dashboard (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    org_id INTEGER NOT NULL,
    uid TEXT NOT NULL,
    folder_uid TEXT,
    is_folder INTEGER NOT NULL DEFAULT 0,
    title TEXT NOT NULL,
    slug TEXT NOT NULL,
    data TEXT NOT NULL,
    version INTEGER NOT NULL,
    plugin_id TEXT,
    created TEXT NOT NULL,
    updated TEXT NOT NULL,
    created_by INTEGER NOT NULL,
    updated_by INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS dashboard_tag (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    dashboard_id INTEGER NOT NULL,
    term TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS dashboard_version (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    dashboard_id INTEGER NOT NULL,
    parent_version INTEGER NOT NULL,
    restored_from INTEGER NOT NULL DEFAULT 0,
    version INTEGER NOT NULL,
    created TEXT NOT NULL,
    created_by INTEGER NOT NULL,
    message TEXT NOT NULL DEFAULT '',
    data TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS dashboard_provisioning (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    dashboard_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    external_id TEXT NOT NULL,
    check_sum TEXT NOT NULL DEFAULT '',
    updated INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS dashboard_acl (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    org_id INTEGER NOT NULL,
    dashboard_id INTEGER NOT NULL,
    user_id INTEGER,
    team_id INTEGER,
    role TEXT,
    permission INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS star (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    dashboard_id INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS playlist_item (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    playlist_id INTEGER NOT NULL,
    type TEXT NOT NULL,
    value TEXT NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    sort_order INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS annotation (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    org_id INTEGER NOT NULL,
    dashboard_id INTEGER,
    panel_id INTEGER,
    alert_id INTEGER,
    text TEXT NOT NULL DEFAULT '',
    epoch INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS role (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    org_id INTEGER NOT NULL,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS permission (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    role_id INTEGER NOT NULL,
    action TEXT NOT NULL,
    scope TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS entity_event (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    created INTEGER NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS ux_dashboard_org_uid ON dashboard(org_id, uid);
CREATE INDEX IF NOT EXISTS idx_dashboard_org_folder_title ON dashboard(org_id, folder_uid, title);
CREATE INDEX IF NOT EXISTS idx_dashboard_plugin ON dashboard(org_id, plugin_id);
CREATE INDEX IF NOT EXISTS idx_dashboard_tag_dashboard ON dashboard_tag(dashboard_id);
CREATE INDEX IF NOT EXISTS idx_dashboard_tag_term ON dashboard_tag(term);
CREATE UNIQUE INDEX IF NOT EXISTS ux_dashboard_version_dashboard_version
    ON dashboard_version(dashboard_id, version);
CREATE UNIQUE INDEX IF NOT EXISTS ux_dashboard_provisioning_dashboard_name
    ON dashboard_provisioning(dashboard_id, name);
CREATE INDEX IF NOT EXISTS idx_dashboard_provisioning_name ON dashboard_provisioning(name);
CREATE INDEX IF NOT EXISTS idx_dashboard_acl_dashboard ON dashboard_acl(dashboard_id);
CREATE INDEX IF NOT EXISTS idx_star_dashboard ON star(dashboard_id);
CREATE INDEX IF NOT EXISTS idx_annotation_dashboard ON annotation(org_id, dashboard_id);
CREATE INDEX IF NOT EXISTS idx_annotation_alert ON annotation(alert_id);
CREATE INDEX IF NOT EXISTS idx_permission_scope ON permission(scope);
"#,
    },
    Migration {
        version: 2,
        name: "legacy_alert_v1",
        sql: r#"
CREATE TABLE IF NOT EXISTS alert (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    dashboard_id INTEGER NOT NULL,
    panel_id INTEGER NOT NULL,
    org_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    message TEXT NOT NULL DEFAULT '',
    state TEXT NOT NULL,
    settings TEXT NOT NULL,
    frequency INTEGER NOT NULL,
    for_seconds INTEGER NOT NULL DEFAULT 0,
    silenced INTEGER NOT NULL DEFAULT 0,
    new_state_date TEXT NOT NULL,
    created TEXT NOT NULL,
    updated TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS alert_notification_state (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    org_id INTEGER NOT NULL,
    alert_id INTEGER NOT NULL,
    notifier_id INTEGER NOT NULL,
    state TEXT NOT NULL,
    updated_at INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS tag (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS alert_rule_tag (
    alert_id INTEGER NOT NULL,
    tag_id INTEGER NOT NULL,
    PRIMARY KEY (alert_id, tag_id)
);

CREATE UNIQUE INDEX IF NOT EXISTS ux_alert_dashboard_panel ON alert(dashboard_id, panel_id);
CREATE UNIQUE INDEX IF NOT EXISTS ux_tag_key_value ON tag(key, value);
CREATE INDEX IF NOT EXISTS idx_alert_notification_state_alert ON alert_notification_state(alert_id);
"#,
    },
];

pub fn open_connection(path: &str, busy_timeout: Duration) -> Result<Connection> {
    let mut conn = if path == IN_MEMORY_PATH {
        Connection::open_in_memory()?
    } else {
        Connection::open(path)?
    };
    configure_for_speed(&conn, busy_timeout)?;
    apply_migrations(&mut conn)?;
    Ok(conn)
}

fn configure_for_speed(conn: &Connection, busy_timeout: Duration) -> Result<()> {
    conn.pragma_update(None::<DatabaseName>, "journal_mode", "WAL")?;
    conn.pragma_update(None::<DatabaseName>, "synchronous", "NORMAL")?;
    conn.pragma_update(None::<DatabaseName>, "foreign_keys", "ON")?;
    conn.pragma_update(None::<DatabaseName>, "temp_store", "MEMORY")?;
    conn.busy_timeout(busy_timeout)?;
    Ok(())
}

fn apply_migrations(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL
);
"#,
    )?;

    for migration in MIGRATIONS {
        let already_applied: Option<i64> = tx
            .query_row(
                "SELECT version FROM schema_migrations WHERE version = ?1",
                params![migration.version],
                |row| row.get(0),
            )
            .optional()?;

        if already_applied.is_some() {
            continue;
        }

        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            params![migration.version, migration.name, OffsetDateTime::now_utc()],
        )?;
    }

    tx.execute(
        r#"
INSERT INTO meta (key, value)
VALUES ('schema_version', ?1)
ON CONFLICT(key) DO UPDATE SET value = excluded.value
"#,
        params![CURRENT_SCHEMA_VERSION.to_string()],
    )?;

    tx.commit()
}

pub fn ensure_parent_dir(path: &str) -> std::io::Result<()> {
    if path == IN_MEMORY_PATH {
        return Ok(());
    }
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

pub fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM meta WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

/// Builds `?, ?, ?` for an `IN (...)` list of `count` bound values.
pub fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}
