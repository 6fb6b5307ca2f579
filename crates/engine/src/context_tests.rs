// SPDX-License-Identifier: MIT

use super::*;
use aiq_storage::DataStore;
use serde_json::json;

struct StaticProvider {
    name: String,
    data: Mutex<Value>,
    callback: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl StaticProvider {
    fn new(name: &str, data: Value) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            data: Mutex::new(data),
            callback: Mutex::new(None),
        })
    }

    fn update(&self, data: Value) {
        *self.data.lock() = data;
        if let Some(callback) = self.callback.lock().as_ref() {
            callback();
        }
    }
}

impl ContextProvider for StaticProvider {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn data(&self) -> Value {
        self.data.lock().clone()
    }

    fn subscribe(&self, on_change: Box<dyn Fn() + Send + Sync>) {
        *self.callback.lock() = Some(on_change);
    }
}

fn aggregator() -> (Arc<ContextAggregator>, NotificationBus) {
    let store = DataStore::open_in_memory().expect("store");
    let bus = NotificationBus::start();
    (ContextAggregator::new(store, bus.clone()), bus)
}

#[tokio::test]
async fn registration_publishes_the_snapshot() {
    let (aggregator, bus) = aggregator();
    let mut events = bus.subscribe([aiq_core::EventKind::ContextChanged]);
    let provider = StaticProvider::new("com.example.location", json!({"zone": 1}));
    aggregator.register(provider);

    match events.recv().await {
        Some(Event::ContextChanged { name, value }) => {
            assert_eq!(name, "com.example.location");
            assert_eq!(value, json!({"zone": 1}));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(
        aggregator.value_for_name("com.example.location").unwrap(),
        json!({"zone": 1})
    );
}

#[tokio::test]
async fn provider_changes_re_merge_and_notify() {
    let (aggregator, bus) = aggregator();
    let provider = StaticProvider::new("com.example.location", json!({"zone": 1}));
    aggregator.register(Arc::clone(&provider) as Arc<dyn ContextProvider>);
    let mut events = bus.subscribe([aiq_core::EventKind::ContextChanged]);

    provider.update(json!({"zone": 2}));

    match events.recv().await {
        Some(Event::ContextChanged { value, .. }) => assert_eq!(value, json!({"zone": 2})),
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(aggregator.snapshot().unwrap()["com.example.location"], json!({"zone": 2}));
}

#[tokio::test]
async fn later_registration_wins_on_duplicate_names() {
    let (aggregator, _bus) = aggregator();
    aggregator.register(StaticProvider::new("com.example.x", json!(1)));
    aggregator.register(StaticProvider::new("com.example.x", json!(2)));
    assert_eq!(aggregator.value_for_name("com.example.x").unwrap(), json!(2));
}

#[tokio::test]
async fn manual_values_overlay_providers() {
    let (aggregator, _bus) = aggregator();
    aggregator.register(StaticProvider::new("com.example.x", json!("provider")));
    aggregator.set_value("com.example.x", json!("manual")).unwrap();
    assert_eq!(aggregator.value_for_name("com.example.x").unwrap(), json!("manual"));

    let err = aggregator.set_value("", json!(1)).unwrap_err();
    assert_eq!(err.kind(), aiq_core::ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn client_values_shadow_backend_context() {
    let (aggregator, _bus) = aggregator();
    // backend context arrives through sync as an ordinary document
    aggregator
        .store()
        .with_tx(|tx| {
            tx.put_document(&Document {
                id: "backend-1".into(),
                doc_type: BACKEND_CONTEXT_TYPE.into(),
                solution: GLOBAL_SOLUTION.into(),
                revision: Some("r1".into()),
                status: SyncStatus::Synchronized,
                rejection_reason: None,
                fields: match json!({"com.example.x": "backend", "com.example.only": "backend"}) {
                    Value::Object(map) => map,
                    _ => unreachable!(),
                },
            })
        })
        .unwrap();
    aggregator.register(StaticProvider::new("com.example.x", json!("client")));

    assert_eq!(aggregator.value_for_name("com.example.x").unwrap(), json!("client"));
    assert_eq!(aggregator.value_for_name("com.example.only").unwrap(), json!("backend"));

    let err = aggregator.value_for_name("com.example.missing").unwrap_err();
    assert_eq!(err.kind(), aiq_core::ErrorKind::NameNotFound);
}

#[tokio::test]
async fn names_cover_client_and_backend() {
    let (aggregator, _bus) = aggregator();
    aggregator.register(StaticProvider::new("com.example.client", json!(1)));
    aggregator
        .store()
        .with_tx(|tx| {
            tx.put_document(&Document {
                id: "backend-1".into(),
                doc_type: BACKEND_CONTEXT_TYPE.into(),
                solution: GLOBAL_SOLUTION.into(),
                revision: None,
                status: SyncStatus::Synchronized,
                rejection_reason: None,
                fields: match json!({"com.example.backend": 2}) {
                    Value::Object(map) => map,
                    _ => unreachable!(),
                },
            })
        })
        .unwrap();

    let mut names = Vec::new();
    aggregator
        .names(|name| {
            names.push(name);
            Ok(())
        })
        .unwrap();
    assert!(names.contains(&"com.example.client".to_string()));
    assert!(names.contains(&"com.example.backend".to_string()));
}
