// SPDX-License-Identifier: MIT

//! ID generation abstractions.
//!
//! Documents and client-originated messages carry UUID identifiers. The
//! [`IdGen`] seam lets tests substitute a deterministic generator.

/// Generates identifiers for locally created entities.
///
/// Object-safe so the engine can hold `Arc<dyn IdGen>`.
pub trait IdGen: Send + Sync + 'static {
    fn next_id(&self) -> String;
}

/// Production generator: random v4 UUIDs, hyphenated lowercase.
#[derive(Clone, Copy, Default)]
pub struct UuidIdGen;

impl IdGen for UuidIdGen {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Deterministic generator for tests: `id-1`, `id-2`, ...
#[cfg(any(test, feature = "test-support"))]
#[derive(Clone, Default)]
pub struct SequentialIdGen {
    counter: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

#[cfg(any(test, feature = "test-support"))]
impl IdGen for SequentialIdGen {
    fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
        format!("id-{n}")
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
