// SPDX-License-Identifier: MIT

//! Notification fan-out.
//!
//! One dispatcher task per session drains an unbounded channel and copies
//! each event to every matching subscriber, so emitters never block and
//! per-entity ordering follows emit order. There is no process-global
//! notification center; observers hold a receiver tied to this session.

use aiq_core::{Event, EventKind};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

struct Subscriber {
    filter: Option<HashSet<EventKind>>,
    tx: mpsc::UnboundedSender<Event>,
}

#[derive(Default)]
struct BusState {
    subscribers: Vec<Subscriber>,
}

/// Handle to the session's event channel. Cheap to clone.
#[derive(Clone)]
pub struct NotificationBus {
    ingress: mpsc::UnboundedSender<Event>,
    state: Arc<Mutex<BusState>>,
}

impl NotificationBus {
    /// Create the bus and spawn its dispatcher task.
    ///
    /// The dispatcher exits when every bus handle is dropped.
    pub fn start() -> Self {
        let (ingress, mut rx) = mpsc::unbounded_channel::<Event>();
        let state = Arc::new(Mutex::new(BusState::default()));
        let dispatch_state = Arc::clone(&state);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let kind = event.kind();
                let mut state = dispatch_state.lock();
                state.subscribers.retain(|subscriber| {
                    let wanted = subscriber
                        .filter
                        .as_ref()
                        .map(|kinds| kinds.contains(&kind))
                        .unwrap_or(true);
                    if !wanted {
                        return !subscriber.tx.is_closed();
                    }
                    subscriber.tx.send(event.clone()).is_ok()
                });
            }
        });
        Self { ingress, state }
    }

    /// Receive every event.
    pub fn subscribe_all(&self) -> mpsc::UnboundedReceiver<Event> {
        self.subscribe_inner(None)
    }

    /// Receive only the named event kinds.
    pub fn subscribe(
        &self,
        kinds: impl IntoIterator<Item = EventKind>,
    ) -> mpsc::UnboundedReceiver<Event> {
        self.subscribe_inner(Some(kinds.into_iter().collect()))
    }

    fn subscribe_inner(&self, filter: Option<HashSet<EventKind>>) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().subscribers.push(Subscriber { filter, tx });
        rx
    }

    /// Queue an event for delivery. Never blocks.
    pub fn emit(&self, event: Event) {
        tracing::debug!(kind = ?event.kind(), "emit");
        // send fails only after the dispatcher stopped, which means the
        // session is tearing down; late events are dropped on purpose
        let _ = self.ingress.send(event);
    }

    /// Queue a batch in order.
    pub fn emit_all(&self, events: impl IntoIterator<Item = Event>) {
        for event in events {
            self.emit(event);
        }
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
