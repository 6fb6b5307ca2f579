// SPDX-License-Identifier: MIT

//! JSON pattern matching for message relevance and filtered iteration.
//!
//! A pattern is itself JSON:
//! - an object matches when every entry matches the candidate, recursively;
//! - an array matches when the candidate equals any element (disjunction);
//! - any other value matches by equality.

use serde_json::Value;

/// Whether `candidate` satisfies `pattern`.
pub fn matches(candidate: &Value, pattern: &Value) -> bool {
    match pattern {
        Value::Object(entries) => entries.iter().all(|(key, sub)| {
            candidate.get(key).map(|value| matches(value, sub)).unwrap_or(false)
        }),
        Value::Array(options) => options.iter().any(|option| matches(candidate, option)),
        scalar => candidate == scalar,
    }
}

#[cfg(test)]
#[path = "filter_tests.rs"]
mod tests;
