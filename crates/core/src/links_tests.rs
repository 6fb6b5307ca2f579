// SPDX-License-Identifier: MIT

use super::*;
use serde_json::json;

#[test]
fn parses_discovery_links() {
    let value = json!({
        "logout": "https://api.example.com/logout",
        "startdatasync": "https://api.example.com/sync",
        "upload": "https://api.example.com/upload",
    });
    let links = LinkDirectory::from_value(&value);
    assert_eq!(links.url(LinkRole::Logout), Some("https://api.example.com/logout"));
    assert_eq!(links.url(LinkRole::StartDataSync), Some("https://api.example.com/sync"));
    assert_eq!(links.url(LinkRole::Push), None);
}

#[test]
fn skips_non_string_values_and_keeps_unknown_roles() {
    let value = json!({
        "direct": "https://api.example.com/direct",
        "unknown-role": "https://api.example.com/other",
        "bogus": 42,
    });
    let links = LinkDirectory::from_value(&value);
    assert_eq!(links.get("unknown-role"), Some("https://api.example.com/other"));
    assert_eq!(links.get("bogus"), None);
}

#[test]
fn empty_on_non_object() {
    assert!(LinkDirectory::from_value(&json!("nope")).is_empty());
    assert!(LinkDirectory::from_value(&json!(null)).is_empty());
}

#[test]
fn roundtrips_through_serde() {
    let value = json!({"upload": "https://u", "download": "https://d"});
    let links = LinkDirectory::from_value(&value);
    let encoded = serde_json::to_string(&links).unwrap();
    let decoded: LinkDirectory = serde_json::from_str(&encoded).unwrap();
    assert_eq!(decoded, links);
}
