use super::save::save_in_session;
use super::{
    DashboardStore, DeleteCommand, GetRecordQuery, GetRecordsQuery, ProvisioningBinding,
    RestoreCommand,
};
use crate::cancel::CancelToken;
use crate::config::StoreConfig;
use crate::domain::alert::{AlertDefinition, AlertState};
use crate::domain::record::{Record, RecordKind, SaveCommand, SYSTEM_USER_ID};
use crate::error::StoreError;
use crate::events::EntityEventType;
use crate::quota::QuotaScope;
use crate::search::{Filter, FindQuery, SortOrder};
use rusqlite::params;
use serde_json::json;
use uuid::Uuid;

const ORG: i64 = 1;

fn open_store() -> DashboardStore {
    DashboardStore::open_in_memory().expect("in-memory store should open")
}

fn unique_db_path() -> String {
    std::env::temp_dir()
        .join(format!("dashstore-store-test-{}.sqlite", Uuid::now_v7()))
        .display()
        .to_string()
}

fn cleanup_db_files(path: &str) {
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{path}{suffix}"));
    }
}

fn save(store: &DashboardStore, cmd: &SaveCommand) -> Record {
    store
        .save_record(&CancelToken::new(), cmd)
        .expect("save should succeed")
}

fn dashboard(store: &DashboardStore, title: &str) -> Record {
    save(store, &SaveCommand::new(ORG, json!({ "title": title })))
}

fn folder(store: &DashboardStore, title: &str, parent: Option<&str>) -> Record {
    let mut cmd = SaveCommand::folder(ORG, json!({ "title": title }));
    cmd.folder_uid = parent.map(str::to_string);
    save(store, &cmd)
}

/// Command that resubmits `record` as stored, keeping its folder.
fn resubmit(record: &Record) -> SaveCommand {
    let mut cmd = SaveCommand::new(record.org_id, record.data.clone());
    cmd.folder_uid = record.folder_uid.clone();
    cmd.is_folder = record.is_folder;
    cmd
}

fn retitled(record: &Record, title: &str) -> SaveCommand {
    let mut cmd = resubmit(record);
    cmd.dashboard["title"] = json!(title);
    cmd
}

fn count_rows(store: &DashboardStore, sql: &str) -> i64 {
    store
        .connection()
        .query_row(sql, [], |row| row.get(0))
        .expect("count query should run")
}

fn get_by_id(store: &DashboardStore, id: i64) -> Record {
    store
        .get_record(&CancelToken::new(), &GetRecordQuery::by_id(ORG, id))
        .expect("record should exist")
}

#[test]
fn create_assigns_uid_first_version_and_ledger_entry() {
    let store = open_store();
    let created = dashboard(&store, "A");

    assert!(created.id > 0);
    assert!(!created.uid.is_empty());
    assert_eq!(created.version, 1);
    assert_eq!(created.data["uid"], json!(created.uid));
    assert_eq!(created.data["version"], json!(1));
    assert_eq!(created.created_by, SYSTEM_USER_ID);
    assert_eq!(created.updated_by, SYSTEM_USER_ID);

    let snapshot = store
        .get_version(&CancelToken::new(), created.id, 1)
        .expect("first snapshot should exist");
    assert_eq!(snapshot.parent_version, 0);
    assert_eq!(snapshot.created_by, SYSTEM_USER_ID);
}

#[test]
fn update_increments_version_and_chains_ledger() {
    let store = open_store();
    let created = dashboard(&store, "A");
    let updated = save(&store, &retitled(&created, "A2").by_user(7).with_message("rename"));

    assert_eq!(updated.id, created.id);
    assert_eq!(updated.uid, created.uid);
    assert_eq!(updated.version, 2);
    assert_eq!(updated.title, "A2");
    assert_eq!(updated.slug, "a2");
    assert_eq!(updated.created_by, SYSTEM_USER_ID);
    assert_eq!(updated.updated_by, 7);

    let versions = store
        .list_versions(&CancelToken::new(), created.id, 0, 0)
        .expect("versions should list");
    let chain: Vec<(i64, i64)> = versions
        .iter()
        .map(|snapshot| (snapshot.version, snapshot.parent_version))
        .collect();
    assert_eq!(chain, vec![(2, 1), (1, 0)]);
    assert_eq!(versions[0].message, "rename");

    let page = store
        .list_versions(&CancelToken::new(), created.id, 1, 1)
        .expect("second page should list");
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].version, 1);

    let missing = store.get_version(&CancelToken::new(), created.id, 9);
    assert!(matches!(missing, Err(StoreError::VersionNotFound)));
}

#[test]
fn explicit_update_timestamp_wins() {
    let store = open_store();
    let created = dashboard(&store, "A");
    let mut cmd = resubmit(&created);
    let stamp = time::OffsetDateTime::from_unix_timestamp(1_700_000_000).expect("valid timestamp");
    cmd.updated_at = Some(stamp);
    let updated = save(&store, &cmd);
    assert_eq!(updated.updated, stamp);
    assert_eq!(updated.created, created.created);
}

#[test]
fn stale_version_conflicts_and_leaves_row_unchanged() {
    let store = open_store();
    let created = dashboard(&store, "A");
    let current = save(&store, &retitled(&created, "B"));

    let stale = store.save_record(&CancelToken::new(), &retitled(&created, "C"));
    assert!(matches!(stale, Err(StoreError::VersionConflict)));

    let stored = get_by_id(&store, created.id);
    assert_eq!(stored.version, current.version);
    assert_eq!(stored.title, "B");
}

#[test]
fn overwrite_adopts_stored_version_then_increments() {
    let store = open_store();
    let mut record = dashboard(&store, "Busy");
    while record.version < 7 {
        record = save(&store, &resubmit(&record));
    }

    let mut cmd = retitled(&record, "Busy");
    cmd.dashboard["version"] = json!(3);
    let saved = save(&store, &cmd.overwrite(true));
    assert_eq!(saved.version, 8);

    let snapshot = store
        .get_version(&CancelToken::new(), saved.id, 8)
        .expect("snapshot should exist");
    assert_eq!(snapshot.parent_version, 7);
}

#[test]
fn folder_and_dashboard_cannot_swap_kind() {
    let store = open_store();
    let existing = folder(&store, "Ops", None);
    let mut cmd = resubmit(&existing);
    cmd.is_folder = false;

    let result = store.save_record(&CancelToken::new(), &cmd.overwrite(true));
    assert!(matches!(result, Err(StoreError::TypeMismatch)));
}

#[test]
fn title_shared_with_other_kind_conflicts_even_with_overwrite() {
    let store = open_store();
    folder(&store, "Ops", None);

    for overwrite in [false, true] {
        let cmd = SaveCommand::new(ORG, json!({"title": "Ops"})).overwrite(overwrite);
        let result = store.save_record(&CancelToken::new(), &cmd);
        assert!(matches!(
            result,
            Err(StoreError::NameKindConflict {
                existing: RecordKind::Folder
            })
        ));
    }
}

#[test]
fn duplicate_title_in_folder_needs_overwrite() {
    let store = open_store();
    let parent = folder(&store, "Team", None);
    let first = dashboard(&store, "CPU");

    let duplicate = store.save_record(
        &CancelToken::new(),
        &SaveCommand::new(ORG, json!({"title": "CPU"})),
    );
    assert!(matches!(duplicate, Err(StoreError::DuplicateTitle)));

    let elsewhere = save(
        &store,
        &SaveCommand::new(ORG, json!({"title": "CPU"})).in_folder(parent.uid.clone()),
    );
    assert_ne!(elsewhere.id, first.id);

    let replaced = save(
        &store,
        &SaveCommand::new(ORG, json!({"title": "CPU", "panels": []})).overwrite(true),
    );
    assert_eq!(replaced.id, first.id);
    assert_eq!(replaced.uid, first.uid);
    assert_eq!(replaced.version, 2);
}

#[test]
fn renaming_onto_taken_title_is_refused_after_identity_resolves() {
    let store = open_store();
    dashboard(&store, "A");
    let b = dashboard(&store, "B");

    let result = store.save_record(&CancelToken::new(), &retitled(&b, "A"));
    assert!(matches!(result, Err(StoreError::DuplicateTitle)));
}

#[test]
fn id_and_uid_of_different_records_is_duplicate_identity() {
    let store = open_store();
    let a = dashboard(&store, "A");
    let b = dashboard(&store, "B");

    let mut cmd = resubmit(&a);
    cmd.dashboard["uid"] = json!(b.uid);
    let result = store.save_record(&CancelToken::new(), &cmd);
    assert!(matches!(result, Err(StoreError::DuplicateIdentity)));
}

#[test]
fn uid_alone_resolves_existing_record() {
    let store = open_store();
    let created = dashboard(&store, "A");
    let cmd = SaveCommand::new(
        ORG,
        json!({"uid": created.uid, "title": "A", "version": created.version}),
    );
    let updated = save(&store, &cmd);
    assert_eq!(updated.id, created.id);
    assert_eq!(updated.version, 2);
}

#[test]
fn unknown_id_is_not_found() {
    let store = open_store();
    let result = store.save_record(
        &CancelToken::new(),
        &SaveCommand::new(ORG, json!({"id": 999, "title": "ghost"})),
    );
    assert!(matches!(result, Err(StoreError::NotFound)));
}

#[test]
fn plugin_dashboards_need_overwrite_and_keep_their_owner() {
    let store = open_store();
    let mut cmd = SaveCommand::new(ORG, json!({"title": "Plugin board"}));
    cmd.plugin_id = Some("acme-app".to_string());
    let created = save(&store, &cmd);

    let blocked = store.save_record(&CancelToken::new(), &resubmit(&created));
    match blocked {
        Err(StoreError::PluginOwned { plugin_id }) => assert_eq!(plugin_id, "acme-app"),
        other => panic!("expected PluginOwned, got {other:?}"),
    }

    let forced = save(&store, &resubmit(&created).overwrite(true));
    assert_eq!(forced.plugin_id.as_deref(), Some("acme-app"));

    let owned = store
        .get_records_by_plugin(&CancelToken::new(), ORG, "acme-app")
        .expect("plugin query should run");
    assert_eq!(owned.len(), 1);
    assert_eq!(owned[0].id, created.id);
}

#[test]
fn rejects_invalid_commands() {
    let store = open_store();
    let empty = store.save_record(&CancelToken::new(), &SaveCommand::new(ORG, json!({"title": " "})));
    assert!(matches!(empty, Err(StoreError::ValidationFailed(_))));

    let bad_uid = store.save_record(
        &CancelToken::new(),
        &SaveCommand::new(ORG, json!({"title": "x", "uid": "not a uid!"})),
    );
    assert!(matches!(bad_uid, Err(StoreError::ValidationFailed(_))));

    let missing_folder = store.save_record(
        &CancelToken::new(),
        &SaveCommand::new(ORG, json!({"title": "x"})).in_folder("nope"),
    );
    assert!(matches!(missing_folder, Err(StoreError::FolderNotFound)));
    assert_eq!(count_rows(&store, "SELECT COUNT(*) FROM dashboard"), 0);
}

#[test]
fn validate_before_save_reports_folder_move_without_writing() {
    let store = open_store();
    let parent = folder(&store, "Team", None);
    let board = dashboard(&store, "CPU");
    let cancel = CancelToken::new();

    let moved = store
        .validate_before_save(&cancel, &resubmit(&board).in_folder(parent.uid.clone()))
        .expect("validation should pass");
    assert!(moved);

    let stays = store
        .validate_before_save(&cancel, &resubmit(&board))
        .expect("validation should pass");
    assert!(!stays);

    let conflict = store.validate_before_save(&cancel, &SaveCommand::new(ORG, json!({"title": "Team"})));
    assert!(matches!(conflict, Err(StoreError::NameKindConflict { .. })));
    assert_eq!(get_by_id(&store, board.id).version, 1);
}

#[test]
fn tags_are_replaced_wholesale_and_counted() {
    let store = open_store();
    let created = save(
        &store,
        &SaveCommand::new(ORG, json!({"title": "A", "tags": ["a", "b"]})),
    );
    let mut cmd = resubmit(&created);
    cmd.dashboard["tags"] = json!(["b", "c", "c"]);
    save(&store, &cmd);
    save(
        &store,
        &SaveCommand::new(ORG, json!({"title": "B", "tags": ["c"]})),
    );

    let mut stmt = store
        .connection()
        .prepare("SELECT term FROM dashboard_tag WHERE dashboard_id = ?1 ORDER BY term")
        .expect("statement should prepare");
    let terms: Vec<String> = stmt
        .query_map(params![created.id], |row| row.get(0))
        .and_then(|rows| rows.collect())
        .expect("terms should load");
    drop(stmt);
    assert_eq!(terms, vec!["b".to_string(), "c".to_string()]);

    let cloud = store
        .get_tags(&CancelToken::new(), ORG)
        .expect("tag cloud should load");
    let cloud: Vec<(String, i64)> = cloud.into_iter().map(|tag| (tag.term, tag.count)).collect();
    assert_eq!(cloud, vec![("b".to_string(), 1), ("c".to_string(), 2)]);
}

#[test]
fn restore_saves_old_payload_as_new_version() {
    let store = open_store();
    let created = dashboard(&store, "One");
    save(&store, &retitled(&created, "Two"));

    let restored = store
        .restore_version(
            &CancelToken::new(),
            &RestoreCommand {
                org_id: ORG,
                uid: created.uid.clone(),
                version: 1,
                user_id: 3,
            },
        )
        .expect("restore should succeed");
    assert_eq!(restored.version, 3);
    assert_eq!(restored.title, "One");
    assert_eq!(restored.uid, created.uid);

    let snapshot = store
        .get_version(&CancelToken::new(), created.id, 3)
        .expect("restored snapshot should exist");
    assert_eq!(snapshot.restored_from, 1);
    assert_eq!(snapshot.parent_version, 2);
    assert_eq!(snapshot.message, "Restored from version 1");
    assert_eq!(snapshot.created_by, 3);
}

#[test]
fn get_record_needs_an_identifier() {
    let store = open_store();
    let parent = folder(&store, "Team", None);
    let board = save(
        &store,
        &SaveCommand::new(ORG, json!({"title": "CPU"})).in_folder(parent.uid.clone()),
    );
    let cancel = CancelToken::new();

    let empty = store.get_record(&cancel, &GetRecordQuery::default());
    assert!(matches!(empty, Err(StoreError::IdentifierNotSet)));

    let title_only = GetRecordQuery {
        org_id: ORG,
        title: Some("CPU".to_string()),
        ..GetRecordQuery::default()
    };
    assert!(matches!(
        store.get_record(&cancel, &title_only),
        Err(StoreError::IdentifierNotSet)
    ));

    let in_folder = store
        .get_record(
            &cancel,
            &GetRecordQuery::by_title(ORG, "CPU", Some(parent.uid.clone())),
        )
        .expect("lookup by title should work");
    assert_eq!(in_folder.id, board.id);

    let at_root = store.get_record(&cancel, &GetRecordQuery::by_title(ORG, "CPU", None));
    assert!(matches!(at_root, Err(StoreError::NotFound)));

    let by_uid = store
        .get_record(&cancel, &GetRecordQuery::by_uid(ORG, board.uid.clone()))
        .expect("lookup by uid should work");
    assert_eq!(by_uid.id, board.id);

    let other_org = store.get_record(&cancel, &GetRecordQuery::by_id(2, board.id));
    assert!(matches!(other_org, Err(StoreError::NotFound)));
}

#[test]
fn batch_lookup_and_uid_by_id() {
    let store = open_store();
    let a = dashboard(&store, "A");
    let b = dashboard(&store, "B");
    let cancel = CancelToken::new();

    let none = store.get_records(&cancel, &GetRecordsQuery { org_id: ORG, ..GetRecordsQuery::default() });
    assert!(matches!(none, Err(StoreError::ValidationFailed(_))));

    let by_uids = store
        .get_records(
            &cancel,
            &GetRecordsQuery {
                org_id: ORG,
                ids: Vec::new(),
                uids: vec![a.uid.clone(), b.uid.clone(), "missing".to_string()],
            },
        )
        .expect("batch lookup should work");
    assert_eq!(by_uids.len(), 2);

    let view = store
        .get_uid_by_id(&cancel, ORG, b.id)
        .expect("uid lookup should work");
    assert_eq!(view.uid, b.uid);
    assert_eq!(view.slug, "b");
}

#[test]
fn find_records_combines_filters() {
    let store = open_store();
    let infra = folder(&store, "Infra", None);
    let cpu = save(
        &store,
        &SaveCommand::new(ORG, json!({"title": "CPU Load", "tags": ["prod", "linux"]}))
            .in_folder(infra.uid.clone()),
    );
    save(
        &store,
        &SaveCommand::new(ORG, json!({"title": "Memory", "tags": ["prod"]})),
    );
    save(
        &store,
        &SaveCommand::new(2, json!({"title": "Elsewhere", "tags": ["prod"]})),
    );
    let cancel = CancelToken::new();
    let titles = |query: FindQuery| -> Vec<String> {
        store
            .find_records(&cancel, &query)
            .expect("search should run")
            .into_iter()
            .map(|hit| hit.title)
            .collect()
    };

    assert_eq!(
        titles(FindQuery::new(vec![
            Filter::Org(ORG),
            Filter::Tags(vec!["prod".to_string(), "linux".to_string()])
        ])),
        vec!["CPU Load".to_string()]
    );
    assert_eq!(
        titles(FindQuery::new(vec![Filter::Org(ORG), Filter::Title("cpu".to_string())])),
        vec!["CPU Load".to_string()]
    );
    assert_eq!(
        titles(FindQuery::new(vec![Filter::Org(ORG), Filter::Kind(RecordKind::Folder)])),
        vec!["Infra".to_string()]
    );
    assert_eq!(
        titles(FindQuery::new(vec![
            Filter::Org(ORG),
            Filter::FolderUids(vec![String::new()])
        ])),
        vec!["Infra".to_string(), "Memory".to_string()]
    );
    assert_eq!(
        titles(FindQuery {
            filters: vec![Filter::Org(ORG), Filter::Kind(RecordKind::Dashboard)],
            sort: SortOrder::AlphaDesc,
            ..FindQuery::default()
        }),
        vec!["Memory".to_string(), "CPU Load".to_string()]
    );

    let conn = store.connection();
    conn.execute("INSERT INTO role (org_id, name) VALUES (?1, 'viewer')", params![ORG])
        .expect("role insert");
    let role_id = conn.last_insert_rowid();
    conn.execute(
        "INSERT INTO permission (role_id, action, scope) VALUES (?1, 'dashboards:read', ?2)",
        params![role_id, format!("folders:uid:{}", infra.uid)],
    )
    .expect("permission insert");

    let permitted = store
        .find_records(
            &cancel,
            &FindQuery::new(vec![
                Filter::Kind(RecordKind::Dashboard),
                Filter::Permission {
                    role_ids: vec![role_id],
                    action: "dashboards:read".to_string(),
                },
            ]),
        )
        .expect("search should run");
    assert_eq!(permitted.len(), 1);
    assert_eq!(permitted[0].id, cpu.id);
    assert_eq!(permitted[0].folder_title.as_deref(), Some("Infra"));
    assert_eq!(permitted[0].tags, vec!["linux".to_string(), "prod".to_string()]);

    assert!(titles(FindQuery::new(vec![Filter::Permission {
        role_ids: Vec::new(),
        action: "dashboards:read".to_string(),
    }]))
    .is_empty());
}

#[test]
fn deleting_a_folder_removes_every_descendant_and_dependent_row() {
    let store = open_store();
    let top = folder(&store, "Top", None);
    let nested = folder(&store, "Nested", Some(top.uid.as_str()));

    let mut leaf_cmd = SaveCommand::new(
        ORG,
        json!({
            "title": "Leaf",
            "tags": ["prod"],
            "panels": [{"id": 1, "alert": {"name": "cpu", "alertRuleTags": {"team": "infra"}}}]
        }),
    )
    .in_folder(top.uid.clone());
    leaf_cmd.sync_alerts = true;
    let leaf = store
        .save_provisioned_record(
            &CancelToken::new(),
            &leaf_cmd,
            &ProvisioningBinding::new("files", "/etc/dash/leaf.json"),
        )
        .expect("provisioned save should work");
    let deep = save(
        &store,
        &SaveCommand::new(ORG, json!({"title": "Deep", "tags": ["prod"]})).in_folder(nested.uid.clone()),
    );
    let survivor = save(
        &store,
        &SaveCommand::new(ORG, json!({"title": "Survivor", "tags": ["prod"]})),
    );

    let conn = store.connection();
    conn.execute("INSERT INTO star (user_id, dashboard_id) VALUES (1, ?1)", params![leaf.id])
        .expect("star insert");
    conn.execute(
        "INSERT INTO playlist_item (playlist_id, type, value) VALUES (1, 'dashboard_by_id', ?1)",
        params![leaf.id.to_string()],
    )
    .expect("playlist insert");
    conn.execute(
        "INSERT INTO annotation (org_id, dashboard_id, text) VALUES (?1, ?2, 'deploy')",
        params![ORG, deep.id],
    )
    .expect("annotation insert");
    conn.execute(
        "INSERT INTO dashboard_acl (org_id, dashboard_id, role, permission) VALUES (?1, ?2, 'Viewer', 1)",
        params![ORG, leaf.id],
    )
    .expect("acl insert");
    conn.execute("INSERT INTO role (org_id, name) VALUES (?1, 'editor')", params![ORG])
        .expect("role insert");
    let role_id = conn.last_insert_rowid();
    for scope in [
        format!("folders:uid:{}", top.uid),
        format!("folders:uid:{}", nested.uid),
        format!("dashboards:uid:{}", leaf.uid),
        format!("dashboards:uid:{}", deep.uid),
    ] {
        conn.execute(
            "INSERT INTO permission (role_id, action, scope) VALUES (?1, 'dashboards:write', ?2)",
            params![role_id, scope],
        )
        .expect("permission insert");
    }
    assert_eq!(count_rows(&store, "SELECT COUNT(*) FROM alert"), 1);
    assert_eq!(count_rows(&store, "SELECT COUNT(*) FROM alert_rule_tag"), 1);

    store
        .delete_record(&CancelToken::new(), &DeleteCommand::by_uid(ORG, top.uid.clone()))
        .expect("folder delete should succeed");

    let mut stmt = store
        .connection()
        .prepare("SELECT id FROM dashboard ORDER BY id")
        .expect("statement should prepare");
    let remaining: Vec<i64> = stmt
        .query_map([], |row| row.get(0))
        .and_then(|rows| rows.collect())
        .expect("ids should load");
    drop(stmt);
    assert_eq!(remaining, vec![survivor.id]);

    for (table, expected) in [
        ("dashboard_tag", 1),
        ("dashboard_version", 1),
        ("dashboard_provisioning", 0),
        ("dashboard_acl", 0),
        ("star", 0),
        ("playlist_item", 0),
        ("annotation", 0),
        ("permission", 0),
        ("alert", 0),
        ("alert_rule_tag", 0),
    ] {
        assert_eq!(
            count_rows(&store, &format!("SELECT COUNT(*) FROM {table}")),
            expected,
            "{table} should be cleaned"
        );
    }

    let scoped = store
        .find_records(
            &CancelToken::new(),
            &FindQuery::new(vec![Filter::FolderUids(vec![top.uid.clone(), nested.uid.clone()])]),
        )
        .expect("search should run");
    assert!(scoped.is_empty());

    let again = store.delete_record(&CancelToken::new(), &DeleteCommand::by_id(ORG, top.id));
    assert!(matches!(again, Err(StoreError::NotFound)));
}

#[test]
fn delete_in_folders_keeps_folders_and_is_all_or_nothing() {
    let store = open_store();
    let team = folder(&store, "Team", None);
    for title in ["One", "Two"] {
        save(
            &store,
            &SaveCommand::new(ORG, json!({ "title": title })).in_folder(team.uid.clone()),
        );
    }
    dashboard(&store, "Root board");
    let cancel = CancelToken::new();

    assert_eq!(store.count_in_folders(&cancel, ORG, &[]).expect("count"), 0);
    assert_eq!(
        store.count_in_folders(&cancel, ORG, &[team.uid.clone()]).expect("count"),
        2
    );
    assert_eq!(
        store.count_in_folders(&cancel, ORG, &[String::new()]).expect("count"),
        1
    );

    let unknown = store.delete_in_folders(&cancel, ORG, &[team.uid.clone(), "missing".to_string()]);
    assert!(matches!(unknown, Err(StoreError::FolderNotFound)));
    assert_eq!(
        store.count_in_folders(&cancel, ORG, &[team.uid.clone()]).expect("count"),
        2
    );

    let removed = store
        .delete_in_folders(&cancel, ORG, &[team.uid.clone()])
        .expect("delete should succeed");
    assert_eq!(removed, 2);
    assert_eq!(
        store.count_in_folders(&cancel, ORG, &[team.uid.clone()]).expect("count"),
        0
    );
    assert_eq!(get_by_id(&store, team.id).kind(), RecordKind::Folder);
}

#[test]
fn folder_cannot_move_under_itself_or_a_descendant() {
    let store = open_store();
    let cancel = CancelToken::new();

    let lone = folder(&store, "Loop", None);
    let mut onto_self = resubmit(&lone);
    onto_self.folder_uid = Some(lone.uid.clone());
    assert!(matches!(
        store.validate_before_save(&cancel, &onto_self),
        Err(StoreError::ValidationFailed(_))
    ));
    assert!(matches!(
        store.save_record(&cancel, &onto_self),
        Err(StoreError::ValidationFailed(_))
    ));
    assert_eq!(get_by_id(&store, lone.id).folder_uid, None);

    let outer = folder(&store, "Outer", None);
    let inner = folder(&store, "Inner", Some(outer.uid.as_str()));
    let mut under_child = resubmit(&outer);
    under_child.folder_uid = Some(inner.uid.clone());
    assert!(matches!(
        store.save_record(&cancel, &under_child),
        Err(StoreError::ValidationFailed(_))
    ));
    let stored = get_by_id(&store, outer.id);
    assert_eq!(stored.folder_uid, None);
    assert_eq!(stored.version, 1);

    let mut sideways = resubmit(&inner);
    sideways.folder_uid = Some(lone.uid.clone());
    let moved = save(&store, &sideways);
    assert_eq!(moved.folder_uid.as_deref(), Some(lone.uid.as_str()));
}

#[test]
fn deleting_folders_stored_in_a_cycle_terminates() {
    let store = open_store();
    let first = folder(&store, "First", None);
    let second = folder(&store, "Second", Some(first.uid.as_str()));
    let leaf = save(
        &store,
        &SaveCommand::new(ORG, json!({ "title": "Leaf" })).in_folder(second.uid.clone()),
    );
    let selfish = folder(&store, "Selfish", None);
    store
        .connection()
        .execute(
            "UPDATE dashboard SET folder_uid = ?1 WHERE id = ?2",
            params![second.uid, first.id],
        )
        .expect("cycle should be written");
    store
        .connection()
        .execute(
            "UPDATE dashboard SET folder_uid = uid WHERE id = ?1",
            params![selfish.id],
        )
        .expect("self parent should be written");
    let cancel = CancelToken::new();

    store
        .delete_record(&cancel, &DeleteCommand::by_id(ORG, first.id))
        .expect("cyclic delete should finish");
    for id in [first.id, second.id, leaf.id] {
        assert!(matches!(
            store.get_record(&cancel, &GetRecordQuery::by_id(ORG, id)),
            Err(StoreError::NotFound)
        ));
    }

    store
        .delete_record(&cancel, &DeleteCommand::by_id(ORG, selfish.id))
        .expect("self-parented delete should finish");
    assert_eq!(count_rows(&store, "SELECT COUNT(*) FROM dashboard"), 0);
    assert_eq!(count_rows(&store, "SELECT COUNT(*) FROM dashboard_version"), 0);
}

#[test]
fn huge_page_numbers_return_an_empty_page() {
    let store = open_store();
    dashboard(&store, "Only");
    let hits = store
        .find_records(
            &CancelToken::new(),
            &FindQuery {
                limit: 10,
                page: i64::MAX,
                ..FindQuery::default()
            },
        )
        .expect("search should run");
    assert!(hits.is_empty());
}

#[test]
fn quota_counts_only_dashboards() {
    let store = open_store();
    folder(&store, "Team", None);
    dashboard(&store, "A");
    dashboard(&store, "B");
    save(&store, &SaveCommand::new(2, json!({"title": "C"})));
    let cancel = CancelToken::new();

    let usage = store.count_records(&cancel, Some(ORG)).expect("count");
    assert_eq!(usage.get(QuotaScope::Global), Some(3));
    assert_eq!(usage.get(QuotaScope::Org), Some(2));

    let global_only = store.count_records(&cancel, None).expect("count");
    assert_eq!(global_only.len(), 1);

    let limits = store.default_quota_limits();
    assert_eq!(limits.get(QuotaScope::Global), Some(-1));
    assert_eq!(limits.get(QuotaScope::Org), Some(100));
}

#[test]
fn provisioned_save_binds_and_unprovision_keeps_record() {
    let store = open_store();
    let cancel = CancelToken::new();
    let cmd = SaveCommand::new(ORG, json!({"title": "From file"})).by_user(4);
    let record = store
        .save_provisioned_record(
            &cancel,
            &cmd,
            &ProvisioningBinding::new("files", "/dash/a.json").with_checksum("abc"),
        )
        .expect("provisioned save should work");

    let binding = store
        .get_provisioning_by_record(&cancel, record.id)
        .expect("lookup should work")
        .expect("binding should exist");
    assert_eq!(binding.updated, record.updated.unix_timestamp());
    assert_eq!(binding.check_sum, "abc");

    store
        .save_provisioned_record(
            &cancel,
            &resubmit(&record),
            &ProvisioningBinding::new("files", "/dash/a.json").with_updated(1234),
        )
        .expect("re-provision should work");
    let bindings = store
        .get_provisioning_by_name(&cancel, "files")
        .expect("lookup should work");
    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0].updated, 1234);

    assert_eq!(store.unprovision(&cancel, record.id).expect("unprovision"), 1);
    assert!(store
        .get_provisioning_by_record(&cancel, record.id)
        .expect("lookup should work")
        .is_none());
    let kept = get_by_id(&store, record.id);
    assert_eq!(kept.created_by, 4);

    let unbound = store.get_provisioning_by_uid(&cancel, ORG, &record.uid);
    assert!(matches!(unbound, Err(StoreError::ProvisionedRecordNotFound)));
    let unknown = store.get_provisioning_by_uid(&cancel, ORG, "nope");
    assert!(matches!(unknown, Err(StoreError::NotFound)));
}

#[test]
fn orphan_sweep_is_idempotent() {
    let store = open_store();
    let cancel = CancelToken::new();
    let provision = |title: &str, source: &str| {
        store
            .save_provisioned_record(
                &cancel,
                &SaveCommand::new(ORG, json!({ "title": title })),
                &ProvisioningBinding::new(source, format!("/{title}.json")),
            )
            .expect("provisioned save should work")
    };
    let kept = provision("kept", "reader-a");
    provision("orphan", "reader-b");
    let manual = dashboard(&store, "manual");

    let first = store
        .delete_orphaned_provisioned(&cancel, &["reader-a".to_string()])
        .expect("sweep should work");
    assert_eq!(first.deleted, 1);

    let second = store
        .delete_orphaned_provisioned(&cancel, &["reader-a".to_string()])
        .expect("sweep should work");
    assert_eq!(second.orphaned, 0);
    assert_eq!(second.deleted, 0);

    let everything = store
        .delete_orphaned_provisioned(&cancel, &[])
        .expect("sweep should work");
    assert_eq!(everything.deleted, 1);
    assert!(matches!(
        store.get_record(&cancel, &GetRecordQuery::by_id(ORG, kept.id)),
        Err(StoreError::NotFound)
    ));
    assert_eq!(get_by_id(&store, manual.id).title, "manual");
}

#[test]
fn reconcile_inserts_updates_and_deletes_by_panel() {
    let store = open_store();
    let cancel = CancelToken::new();
    let board = dashboard(&store, "Alerts");
    let initial: Vec<AlertDefinition> = (1..=3)
        .map(|panel| AlertDefinition::new(panel, format!("rule {panel}")))
        .collect();
    let first = store
        .save_alerts(&cancel, board.id, &initial)
        .expect("first reconcile should work");
    assert_eq!(first.inserted, 3);

    let alerts = store.get_alerts(&cancel, board.id).expect("alerts load");
    let panel_one = alerts.iter().find(|alert| alert.panel_id == 1).expect("panel 1");
    let conn = store.connection();
    conn.execute(
        "INSERT INTO annotation (org_id, alert_id, text) VALUES (?1, ?2, 'fired')",
        params![ORG, panel_one.id],
    )
    .expect("annotation insert");
    conn.execute(
        "UPDATE alert SET state = 'alerting' WHERE dashboard_id = ?1 AND panel_id IN (2, 3)",
        params![board.id],
    )
    .expect("state update");

    let incoming = vec![
        AlertDefinition::new(2, "rule 2"),
        AlertDefinition::new(3, "rule 3 renamed"),
        AlertDefinition::new(4, "rule 4").with_settings(json!({"alertRuleTags": {"team": "infra"}})),
    ];
    let summary = store
        .save_alerts(&cancel, board.id, &incoming)
        .expect("second reconcile should work");
    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.updated, 1);
    assert_eq!(summary.unchanged, 1);
    assert_eq!(summary.deleted, 1);

    let alerts = store.get_alerts(&cancel, board.id).expect("alerts load");
    let panels: Vec<(i64, AlertState, String)> = alerts
        .iter()
        .map(|alert| (alert.panel_id, alert.state, alert.name.clone()))
        .collect();
    assert_eq!(
        panels,
        vec![
            (2, AlertState::Alerting, "rule 2".to_string()),
            (3, AlertState::Alerting, "rule 3 renamed".to_string()),
            (4, AlertState::Unknown, "rule 4".to_string()),
        ]
    );
    assert_eq!(count_rows(&store, "SELECT COUNT(*) FROM annotation"), 0);
    assert_eq!(count_rows(&store, "SELECT COUNT(*) FROM alert_rule_tag"), 1);
    assert_eq!(count_rows(&store, "SELECT COUNT(*) FROM tag WHERE key = 'team'"), 1);

    let duplicate = store.save_alerts(
        &cancel,
        board.id,
        &[AlertDefinition::new(5, "a"), AlertDefinition::new(5, "b")],
    );
    assert!(matches!(duplicate, Err(StoreError::ValidationFailed(_))));
    assert_eq!(store.get_alerts(&cancel, board.id).expect("alerts load").len(), 3);

    let missing = store.save_alerts(&cancel, 999, &incoming);
    assert!(matches!(missing, Err(StoreError::NotFound)));
}

#[test]
fn entity_events_follow_saves_and_deletes() {
    let store = DashboardStore::open(StoreConfig::in_memory().with_entity_events(true))
        .expect("store should open");
    let cancel = CancelToken::new();
    let created = dashboard(&store, "Evented");
    save(&store, &resubmit(&created));
    store
        .delete_record(&cancel, &DeleteCommand::by_id(ORG, created.id))
        .expect("delete should work");

    let events = store.events_since(&cancel, 0).expect("events load");
    let kinds: Vec<EntityEventType> = events.iter().map(|event| event.event_type).collect();
    assert_eq!(
        kinds,
        vec![
            EntityEventType::Create,
            EntityEventType::Update,
            EntityEventType::Delete
        ]
    );
    assert_eq!(events[0].entity_id, format!("database/1/dashboard/{}", created.uid));

    let later = store.events_since(&cancel, events[0].id).expect("events load");
    assert_eq!(later.len(), 2);

    let quiet = open_store();
    dashboard(&quiet, "Silent");
    assert!(quiet.events_since(&cancel, 0).expect("events load").is_empty());
}

#[test]
fn cancellation_before_commit_rolls_back() {
    let store = open_store();
    let cancelled = CancelToken::new();
    cancelled.cancel();
    let early = store.save_record(&cancelled, &SaveCommand::new(ORG, json!({"title": "A"})));
    assert!(matches!(early, Err(StoreError::Cancelled)));

    let cancel = CancelToken::new();
    let cmd = SaveCommand::new(ORG, json!({"title": "B", "tags": ["x"]}));
    let late = store.write(&cancel, |session| {
        let record = save_in_session(session, &cmd)?;
        cancel.cancel();
        Ok(record)
    });
    assert!(matches!(late, Err(StoreError::Cancelled)));

    for table in ["dashboard", "dashboard_version", "dashboard_tag"] {
        assert_eq!(count_rows(&store, &format!("SELECT COUNT(*) FROM {table}")), 0);
    }
}

#[test]
fn concurrent_updates_of_one_version_let_exactly_one_win() {
    let path = unique_db_path();
    let config = StoreConfig::default().with_db_path(path.clone());
    let seed = DashboardStore::open(config.clone()).expect("store should open");
    let created = dashboard(&seed, "Shared");

    let results: Vec<Result<Record, StoreError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = ["left", "right"]
            .into_iter()
            .map(|title| {
                let config = config.clone();
                let cmd = retitled(&created, title);
                scope.spawn(move || {
                    let store = DashboardStore::open(config).expect("store should open");
                    store.save_record(&CancelToken::new(), &cmd)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("thread should finish"))
            .collect()
    });

    let wins = results.iter().filter(|result| result.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|result| matches!(result, Err(StoreError::VersionConflict)))
        .count();
    assert_eq!((wins, conflicts), (1, 1));
    assert_eq!(get_by_id(&seed, created.id).version, 2);

    drop(seed);
    cleanup_db_files(&path);
}
