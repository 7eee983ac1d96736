//! Identity, version, kind and title checks run before every save.
//!
//! Two phases, always both: identity by id/uid first, then the title-in-folder
//! collision check. The second phase runs even when the first already found
//! the target, so renaming onto an occupied title is still refused.

use tracing::debug;

use super::query::{record_by_id, record_by_title, record_by_uid};
use super::Session;
use crate::domain::record::Record;
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Resolution {
    /// The stored row this save will overwrite, if any.
    pub existing: Option<Record>,
    /// Set when a dashboard lands in a different folder than before, or is new.
    pub parent_folder_changed: bool,
}

/// Resolves `target` against stored rows, adopting id, uid and version where
/// the rules allow it.
pub(crate) fn resolve(
    session: &Session<'_>,
    target: &mut Record,
    overwrite: bool,
) -> StoreResult<Resolution> {
    let (existing, parent_folder_changed) = resolve_identity(session, target, overwrite)?;
    let (by_title, parent_folder_changed) =
        resolve_title(session, target, overwrite, parent_folder_changed)?;
    Ok(Resolution {
        existing: by_title.or(existing),
        parent_folder_changed,
    })
}

fn resolve_identity(
    session: &Session<'_>,
    target: &mut Record,
    overwrite: bool,
) -> StoreResult<(Option<Record>, bool)> {
    let conn = session.conn();

    let by_id = if target.id > 0 {
        let found =
            record_by_id(conn, Some(target.org_id), target.id)?.ok_or(StoreError::NotFound)?;
        if target.uid.is_empty() {
            target.set_uid(found.uid.clone());
        }
        Some(found)
    } else {
        None
    };

    let by_uid = if target.uid.is_empty() {
        None
    } else {
        record_by_uid(conn, target.org_id, &target.uid)?
    };

    let existing = match (by_id, by_uid) {
        (None, None) => return Ok((None, false)),
        (Some(by_id), Some(by_uid)) if by_id.id != by_uid.id => {
            return Err(StoreError::DuplicateIdentity)
        }
        (Some(by_id), _) => by_id,
        (None, Some(by_uid)) => {
            target.set_id(by_uid.id);
            target.set_uid(by_uid.uid.clone());
            by_uid
        }
    };

    if existing.is_folder != target.is_folder {
        return Err(StoreError::TypeMismatch);
    }

    let parent_folder_changed = !target.is_folder && target.folder_uid != existing.folder_uid;

    if target.version != existing.version {
        if overwrite {
            debug!(
                uid = %existing.uid,
                claimed = target.version,
                stored = existing.version,
                "overwrite adopts stored version"
            );
            target.set_version(existing.version);
        } else {
            return Err(StoreError::VersionConflict);
        }
    }

    if let Some(plugin_id) = existing.plugin_id.as_deref().filter(|id| !id.is_empty()) {
        if !overwrite {
            return Err(StoreError::PluginOwned {
                plugin_id: plugin_id.to_string(),
            });
        }
    }

    Ok((Some(existing), parent_folder_changed))
}

fn resolve_title(
    session: &Session<'_>,
    target: &mut Record,
    overwrite: bool,
    parent_folder_changed: bool,
) -> StoreResult<(Option<Record>, bool)> {
    let Some(existing) = record_by_title(
        session.conn(),
        target.org_id,
        target.folder_uid.as_deref(),
        &target.title,
    )?
    else {
        return Ok((None, parent_folder_changed));
    };
    if existing.id == target.id {
        return Ok((None, parent_folder_changed));
    }

    if existing.is_folder != target.is_folder {
        return Err(StoreError::NameKindConflict {
            existing: existing.kind(),
        });
    }

    let parent_folder_changed = parent_folder_changed
        || (!target.is_folder && (target.folder_uid != existing.folder_uid || target.id == 0));

    if !overwrite {
        return Err(StoreError::DuplicateTitle);
    }

    debug!(uid = %existing.uid, title = %existing.title, "overwrite adopts same-title record");
    target.set_id(existing.id);
    target.set_uid(existing.uid.clone());
    target.set_version(existing.version);
    Ok((Some(existing), parent_folder_changed))
}
