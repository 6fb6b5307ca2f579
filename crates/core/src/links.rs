// SPDX-License-Identifier: MIT

//! Server-issued endpoint directory.
//!
//! The discovery response returned from authentication maps role names to
//! absolute URLs. Every subsequent request resolves through this directory;
//! the client has no hard-coded paths.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Roles the client consumes from the discovery response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkRole {
    Logout,
    CoMessage,
    Direct,
    StartDataSync,
    Download,
    Upload,
    Attachments,
    Push,
}

impl LinkRole {
    /// Wire name of the role in the discovery response.
    pub fn as_str(self) -> &'static str {
        match self {
            LinkRole::Logout => "logout",
            LinkRole::CoMessage => "comessage",
            LinkRole::Direct => "direct",
            LinkRole::StartDataSync => "startdatasync",
            LinkRole::Download => "download",
            LinkRole::Upload => "upload",
            LinkRole::Attachments => "attachments",
            LinkRole::Push => "push",
        }
    }
}

/// Named server endpoints, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkDirectory {
    links: IndexMap<String, String>,
}

impl LinkDirectory {
    /// Parse the `links` object of a discovery response.
    ///
    /// Non-string values are skipped; the server may advertise roles this
    /// client does not consume.
    pub fn from_value(value: &Value) -> Self {
        let mut links = IndexMap::new();
        if let Value::Object(map) = value {
            for (name, url) in map {
                if let Value::String(url) = url {
                    links.insert(name.clone(), url.clone());
                }
            }
        }
        Self { links }
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.links.get(name).map(String::as_str)
    }

    pub fn url(&self, role: LinkRole) -> Option<&str> {
        self.get(role.as_str())
    }
}

#[cfg(test)]
#[path = "links_tests.rs"]
mod tests;
