// SPDX-License-Identifier: MIT

//! Context aggregation.
//!
//! Providers expose a dotted name and a JSON snapshot; whenever one
//! changes, the aggregator merges all providers (last registration wins on
//! duplicate names), persists the merged snapshot to a well-known local
//! document, and notifies observers of the names whose values changed.
//! Reads consult the client snapshot first, backend-supplied context
//! second.

use crate::bus::NotificationBus;
use crate::error::EngineError;
use crate::shared::optional;
use aiq_core::{Document, Event, SyncStatus, GLOBAL_SOLUTION};
use aiq_storage::DataStore;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::{Arc, Weak};

/// Reserved type of the client context document.
pub(crate) const CLIENT_CONTEXT_TYPE: &str = "_clientcontext";
/// Reserved type of backend-supplied context documents.
pub(crate) const BACKEND_CONTEXT_TYPE: &str = "_backendcontext";
/// Well-known id of the client context document.
const CLIENT_CONTEXT_ID: &str = "client-context";

/// A source of named context data.
///
/// Implementations call the callback handed to [`subscribe`] whenever
/// their data changes; the aggregator then re-reads [`data`].
///
/// [`subscribe`]: ContextProvider::subscribe
/// [`data`]: ContextProvider::data
pub trait ContextProvider: Send + Sync + 'static {
    /// Dotted namespace, e.g. `com.example.location`.
    fn name(&self) -> String;
    fn data(&self) -> Value;
    fn subscribe(&self, on_change: Box<dyn Fn() + Send + Sync>);
}

pub struct ContextAggregator {
    store: DataStore,
    bus: NotificationBus,
    providers: Mutex<Vec<Arc<dyn ContextProvider>>>,
    /// Application-written values, overlaid last.
    manual: Mutex<Map<String, Value>>,
}

impl ContextAggregator {
    pub(crate) fn new(store: DataStore, bus: NotificationBus) -> Arc<Self> {
        Arc::new(Self {
            store,
            bus,
            providers: Mutex::new(Vec::new()),
            manual: Mutex::new(Map::new()),
        })
    }

    /// Add a provider and fold its data into the snapshot.
    pub fn register(self: &Arc<Self>, provider: Arc<dyn ContextProvider>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        provider.subscribe(Box::new(move || {
            if let Some(aggregator) = weak.upgrade() {
                if let Err(err) = aggregator.refresh() {
                    tracing::warn!(error = %err, "context refresh failed");
                }
            }
        }));
        self.providers.lock().push(provider);
        if let Err(err) = self.refresh() {
            tracing::warn!(error = %err, "context refresh failed");
        }
    }

    /// Write an application-defined context value.
    pub fn set_value(&self, name: impl Into<String>, value: Value) -> Result<(), EngineError> {
        let name = name.into();
        if name.is_empty() {
            return Err(EngineError::InvalidArgument("context name must not be empty".into()));
        }
        self.manual.lock().insert(name, value);
        self.refresh()
    }

    /// Re-merge every provider and persist the snapshot. Emits one change
    /// event per name whose value differs from the stored snapshot.
    fn refresh(&self) -> Result<(), EngineError> {
        let mut merged = Map::new();
        for provider in self.providers.lock().iter() {
            merged.insert(provider.name(), provider.data());
        }
        for (name, value) in self.manual.lock().iter() {
            merged.insert(name.clone(), value.clone());
        }

        let changed = self.store.with_tx(|tx| {
            let previous = optional(tx.document(GLOBAL_SOLUTION, CLIENT_CONTEXT_ID))?
                .map(|doc| doc.fields)
                .unwrap_or_default();
            let doc = Document {
                id: CLIENT_CONTEXT_ID.to_string(),
                doc_type: CLIENT_CONTEXT_TYPE.to_string(),
                solution: GLOBAL_SOLUTION.to_string(),
                revision: None,
                status: SyncStatus::Synchronized,
                rejection_reason: None,
                fields: merged.clone(),
            };
            tx.put_local_document(&doc)?;
            let changed: Vec<(String, Value)> = merged
                .iter()
                .filter(|(name, value)| previous.get(*name) != Some(value))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();
            Ok(changed)
        })?;

        for (name, value) in changed {
            self.bus.emit(Event::ContextChanged { name, value });
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &DataStore {
        &self.store
    }

    /// The merged client snapshot, used for message relevance.
    pub fn snapshot(&self) -> Result<Value, EngineError> {
        let fields = self.store.with_tx(|tx| {
            Ok(optional(tx.document(GLOBAL_SOLUTION, CLIENT_CONTEXT_ID))?
                .map(|doc| doc.fields)
                .unwrap_or_default())
        })?;
        Ok(Value::Object(fields))
    }

    /// Read one context value: client first, then backend-supplied.
    pub fn value_for_name(&self, name: &str) -> Result<Value, EngineError> {
        let value = self.store.with_tx(|tx| {
            if let Some(doc) = optional(tx.document(GLOBAL_SOLUTION, CLIENT_CONTEXT_ID))? {
                if let Some(value) = doc.fields.get(name) {
                    return Ok(Some(value.clone()));
                }
            }
            let mut found = None;
            tx.documents_of_type(GLOBAL_SOLUTION, BACKEND_CONTEXT_TYPE, |doc| {
                if found.is_none() {
                    found = doc.fields.get(name).cloned();
                }
                Ok(())
            })?;
            Ok(found)
        })?;
        value.ok_or_else(|| EngineError::NameNotFound(name.to_string()))
    }

    /// Stream every known context name: client names, then backend names.
    pub fn names(
        &self,
        mut processor: impl FnMut(String) -> Result<(), EngineError>,
    ) -> Result<(), EngineError> {
        let names = self.store.with_tx(|tx| {
            let mut names = Vec::new();
            if let Some(doc) = optional(tx.document(GLOBAL_SOLUTION, CLIENT_CONTEXT_ID))? {
                names.extend(doc.fields.keys().cloned());
            }
            tx.documents_of_type(GLOBAL_SOLUTION, BACKEND_CONTEXT_TYPE, |doc| {
                names.extend(doc.fields.keys().cloned());
                Ok(())
            })?;
            Ok(names)
        })?;
        for name in names {
            processor(name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
