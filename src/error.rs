use thiserror::Error;

use crate::domain::alert::AlertParseError;
use crate::domain::record::RecordKind;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("dashboard not found")]
    NotFound,
    #[error("the dashboard has been changed by someone else")]
    VersionConflict,
    #[error("a folder cannot become a dashboard and a dashboard cannot become a folder")]
    TypeMismatch,
    #[error("a dashboard with the same uid already exists")]
    DuplicateIdentity,
    #[error("a dashboard with the same name in the folder already exists")]
    DuplicateTitle,
    #[error("a {existing} with the same name already exists in this folder")]
    NameKindConflict { existing: RecordKind },
    #[error("dashboard belongs to plugin '{plugin_id}'; use overwrite to update it")]
    PluginOwned { plugin_id: String },
    #[error("dashboard identifier not set")]
    IdentifierNotSet,
    #[error("folder not found")]
    FolderNotFound,
    #[error("provisioned dashboard not found")]
    ProvisionedRecordNotFound,
    #[error("dashboard version not found")]
    VersionNotFound,
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    #[error("operation cancelled before commit")]
    Cancelled,
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }
}

impl From<AlertParseError> for StoreError {
    fn from(value: AlertParseError) -> Self {
        StoreError::ValidationFailed(value.to_string())
    }
}
