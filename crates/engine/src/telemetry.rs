// SPDX-License-Identifier: MIT

//! Log output configuration.
//!
//! Five levels map onto tracing: Error, Warn, Info, Debug and Verbose
//! (trace). A blacklist of module-path contexts suppresses noisy targets;
//! `RUST_LOG` still overrides everything when set.

use tracing_subscriber::filter::EnvFilter;

/// Initialize the global subscriber.
///
/// `level` is the default maximum ("error" … "trace"); each entry in
/// `blacklist` silences one target (module path prefix). Safe to call more
/// than once; later calls are no-ops.
pub fn init(level: &str, blacklist: &[&str]) {
    let mut directives = level.to_string();
    for context in blacklist {
        directives.push_str(&format!(",{context}=off"));
    }
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
