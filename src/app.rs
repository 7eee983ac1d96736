use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use dashstore::domain::alert::Alert;
use dashstore::quota::QuotaMap;
use dashstore::search::{parse_search_type, Filter, FindQuery, SearchHit, SortOrder};
use dashstore::store::{
    checksum_hex, GetRecordQuery, RestoreCommand, SweepSummary, TagCount, VersionSnapshot,
};
use dashstore::{
    db, CancelToken, ConfigError, DashboardStore, DeleteCommand, ProvisioningBinding, Record,
    SaveCommand, StoreConfig, StoreError,
};

pub struct App {
    store: DashboardStore,
    cancel: CancelToken,
    org_id: i64,
    user_id: i64,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("cannot read '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid JSON in '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("output error: {0}")]
    Output(#[from] serde_json::Error),
    #[error("{0}")]
    InvalidArgument(String),
}

#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    pub folder_uid: Option<String>,
    pub as_folder: bool,
    pub overwrite: bool,
    pub message: String,
    pub plugin_id: Option<String>,
    pub sync_alerts: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub tags: Vec<String>,
    pub title: Option<String>,
    pub kind: Option<String>,
    pub folders: Vec<String>,
    pub limit: i64,
    pub page: i64,
    pub descending: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct InitReport {
    pub path: String,
    pub schema_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UnprovisionReport {
    pub uid: String,
    pub removed: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct QuotaReport {
    pub usage: QuotaMap,
    pub limits: QuotaMap,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FolderCountReport {
    pub folders: Vec<String>,
    pub count: i64,
}

impl App {
    pub fn open(
        config_path: Option<&Path>,
        db_path: Option<String>,
        org_id: i64,
        user_id: i64,
    ) -> Result<Self, AppError> {
        let mut config = match config_path {
            Some(path) => StoreConfig::load(path)?,
            None => StoreConfig::default(),
        };
        if let Some(db_path) = db_path {
            config = config.with_db_path(db_path);
        }
        let store = DashboardStore::open(config)?;
        Ok(Self {
            store,
            cancel: CancelToken::new(),
            org_id,
            user_id,
        })
    }

    pub fn init_report(&self) -> Result<InitReport, AppError> {
        let schema_version =
            db::get_meta(self.store.connection(), "schema_version").map_err(StoreError::from)?;
        Ok(InitReport {
            path: self.store.config().database.path.clone(),
            schema_version,
        })
    }

    pub fn save(&self, file: &Path, options: &SaveOptions) -> Result<Record, AppError> {
        let (dashboard, _) = read_document(file)?;
        let mut cmd = SaveCommand::new(self.org_id, dashboard)
            .by_user(self.user_id)
            .overwrite(options.overwrite)
            .with_message(options.message.clone());
        cmd.folder_uid = options.folder_uid.clone().filter(|uid| !uid.is_empty());
        cmd.is_folder = options.as_folder;
        cmd.plugin_id = options.plugin_id.clone();
        cmd.sync_alerts = options.sync_alerts;
        Ok(self.store.save_record(&self.cancel, &cmd)?)
    }

    /// Saves a source document as provisioned. Existing records with the same
    /// uid are overwritten; the binding remembers the file and its checksum.
    pub fn provision(
        &self,
        file: &Path,
        source: &str,
        folder_uid: Option<String>,
        sync_alerts: bool,
    ) -> Result<Record, AppError> {
        let (dashboard, raw) = read_document(file)?;
        let mut cmd = SaveCommand::new(self.org_id, dashboard)
            .by_user(self.user_id)
            .overwrite(true);
        cmd.folder_uid = folder_uid.filter(|uid| !uid.is_empty());
        cmd.sync_alerts = sync_alerts;
        let binding = ProvisioningBinding::new(source, file.display().to_string())
            .with_checksum(checksum_hex(&raw));
        Ok(self
            .store
            .save_provisioned_record(&self.cancel, &cmd, &binding)?)
    }

    pub fn show(&self, uid: Option<&str>, id: Option<i64>) -> Result<Record, AppError> {
        let query = GetRecordQuery {
            org_id: self.org_id,
            id: id.unwrap_or_default(),
            uid: uid.unwrap_or_default().to_string(),
            ..GetRecordQuery::default()
        };
        Ok(self.store.get_record(&self.cancel, &query)?)
    }

    pub fn list(&self, options: &ListOptions) -> Result<Vec<SearchHit>, AppError> {
        let query = list_query(self.org_id, options)?;
        Ok(self.store.find_records(&self.cancel, &query)?)
    }

    pub fn delete(&self, uid: &str) -> Result<(), AppError> {
        Ok(self
            .store
            .delete_record(&self.cancel, &DeleteCommand::by_uid(self.org_id, uid))?)
    }

    pub fn history(&self, uid: &str, limit: i64, start: i64) -> Result<Vec<VersionSnapshot>, AppError> {
        let record = self.show(Some(uid), None)?;
        Ok(self.store.list_versions(&self.cancel, record.id, limit, start)?)
    }

    pub fn restore(&self, uid: &str, version: i64) -> Result<Record, AppError> {
        let cmd = RestoreCommand {
            org_id: self.org_id,
            uid: uid.to_string(),
            version,
            user_id: self.user_id,
        };
        Ok(self.store.restore_version(&self.cancel, &cmd)?)
    }

    pub fn unprovision(&self, uid: &str) -> Result<UnprovisionReport, AppError> {
        let record = self.show(Some(uid), None)?;
        let removed = self.store.unprovision(&self.cancel, record.id)?;
        Ok(UnprovisionReport {
            uid: record.uid,
            removed,
        })
    }

    pub fn sweep(&self, active: &[String]) -> Result<SweepSummary, AppError> {
        Ok(self.store.delete_orphaned_provisioned(&self.cancel, active)?)
    }

    pub fn tags(&self) -> Result<Vec<TagCount>, AppError> {
        Ok(self.store.get_tags(&self.cancel, self.org_id)?)
    }

    pub fn quota(&self) -> Result<QuotaReport, AppError> {
        Ok(QuotaReport {
            usage: self.store.count_records(&self.cancel, Some(self.org_id))?,
            limits: self.store.default_quota_limits(),
        })
    }

    pub fn count_in_folders(&self, folders: &[String]) -> Result<FolderCountReport, AppError> {
        let count = self
            .store
            .count_in_folders(&self.cancel, self.org_id, folders)?;
        Ok(FolderCountReport {
            folders: folders.to_vec(),
            count,
        })
    }

    pub fn alerts(&self, uid: &str) -> Result<Vec<Alert>, AppError> {
        let record = self.show(Some(uid), None)?;
        Ok(self.store.get_alerts(&self.cancel, record.id)?)
    }
}

fn read_document(path: &Path) -> Result<(Value, Vec<u8>), AppError> {
    let raw = std::fs::read(path).map_err(|source| AppError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let value = serde_json::from_slice(&raw).map_err(|source| AppError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok((value, raw))
}

fn list_query(org_id: i64, options: &ListOptions) -> Result<FindQuery, AppError> {
    let mut filters = vec![Filter::Org(org_id)];
    if !options.tags.is_empty() {
        filters.push(Filter::Tags(options.tags.clone()));
    }
    if let Some(title) = &options.title {
        filters.push(Filter::Title(title.clone()));
    }
    if let Some(raw) = &options.kind {
        let kind = parse_search_type(raw).ok_or_else(|| {
            AppError::InvalidArgument(format!(
                "unknown record type '{raw}'; expected dash-db or dash-folder"
            ))
        })?;
        filters.push(Filter::Kind(kind));
    }
    if !options.folders.is_empty() {
        filters.push(Filter::FolderUids(options.folders.clone()));
    }
    Ok(FindQuery {
        filters,
        sort: if options.descending {
            SortOrder::AlphaDesc
        } else {
            SortOrder::AlphaAsc
        },
        limit: options.limit,
        page: options.page,
    })
}
