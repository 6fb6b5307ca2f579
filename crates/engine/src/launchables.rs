// SPDX-License-Identifier: MIT

//! Launchable manifests, maintained only by sync.
//!
//! Launchables arrive as reserved-type documents on the pull stream; their
//! icon assets ride the ordinary attachment machinery (an attachment named
//! `icon` on the manifest document).

use aiq_core::{Attachment, Event, Launchable};
use aiq_storage::{StorageError, Tx};
use serde_json::{Map, Value};

/// Attachment name carrying a launchable's icon asset.
pub(crate) const ICON_NAME: &str = "icon";

/// Apply a launchable manifest record.
pub(crate) fn ingest(
    tx: &Tx<'_>,
    id: &str,
    solution: &str,
    fields: &Map<String, Value>,
    events: &mut Vec<Event>,
) -> Result<(), StorageError> {
    let name = fields.get("name").and_then(Value::as_str).unwrap_or(id).to_string();
    let available = fields.get("available").and_then(Value::as_bool).unwrap_or(true);
    let existing = crate::shared::optional(tx.launchable(id))?;
    let launchable = Launchable {
        id: id.to_string(),
        name: name.clone(),
        solution: solution.to_string(),
        // icon survives manifest updates until a new asset downloads
        icon_path: existing.as_ref().and_then(|l| l.icon_path.clone()),
        available,
    };
    if existing.as_ref() == Some(&launchable) {
        return Ok(());
    }
    tx.put_launchable(&launchable)?;
    events.push(if existing.is_some() {
        Event::LaunchableUpdated { id: id.to_string(), name, solution: solution.to_string() }
    } else {
        Event::LaunchableInstalled { id: id.to_string(), name, solution: solution.to_string() }
    });
    Ok(())
}

/// Apply a launchable removal record.
pub(crate) fn remove(
    tx: &Tx<'_>,
    id: &str,
    events: &mut Vec<Event>,
) -> Result<(), StorageError> {
    let Some(existing) = crate::shared::optional(tx.launchable(id))? else {
        return Ok(());
    };
    tx.delete_launchable(id)?;
    events.push(Event::LaunchableUninstalled {
        id: existing.id,
        name: existing.name,
        solution: existing.solution,
    });
    Ok(())
}

/// Record a downloaded icon on its manifest. Returns the event to emit.
pub(crate) fn note_icon_available(
    tx: &Tx<'_>,
    attachment: &Attachment,
    icon_path: std::path::PathBuf,
) -> Result<Option<Event>, StorageError> {
    if attachment.doc_type != crate::sync::pull::LAUNCHABLE_TYPE || attachment.name != ICON_NAME {
        return Ok(None);
    }
    let Some(mut launchable) = crate::shared::optional(tx.launchable(&attachment.doc_id))? else {
        return Ok(None);
    };
    launchable.icon_path = Some(icon_path);
    tx.put_launchable(&launchable)?;
    Ok(Some(Event::LaunchableUpdated {
        id: launchable.id,
        name: launchable.name,
        solution: launchable.solution,
    }))
}

#[cfg(test)]
#[path = "launchables_tests.rs"]
mod tests;
