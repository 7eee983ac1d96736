//! Transactional persistence for dashboards and the folders that contain them.
//!
//! [`DashboardStore`] is the entry point. Every public write runs inside one
//! SQLite transaction and keeps the dependent tables (tags, version ledger,
//! provisioning bindings, permissions, legacy alerts, annotations) consistent
//! with the record row.

pub mod cancel;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod events;
pub mod quota;
pub mod search;
pub mod store;

pub use cancel::CancelToken;
pub use config::{ConfigError, StoreConfig};
pub use domain::alert::{AlertDefinition, AlertState};
pub use domain::record::{FieldValue, Record, RecordKind, SaveCommand};
pub use error::{StoreError, StoreResult};
pub use store::{DashboardStore, DeleteCommand, ProvisioningBinding, RecordRef};
