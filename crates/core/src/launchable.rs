// SPDX-License-Identifier: MIT

//! Launchable manifests: server-pushed descriptors of installable modules.
//!
//! Created and mutated only by sync; immutable to application code.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Launchable {
    pub id: String,
    pub name: String,
    pub solution: String,
    /// Local path of the downloaded icon asset, once fetched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_path: Option<PathBuf>,
    pub available: bool,
}
