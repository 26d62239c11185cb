// Lifecycle event bus - an explicit subscriber list owned by the store,
// fired synchronously after commit. Consumers (e.g. a realtime notifier)
// subscribe callbacks; there is no global hook registry.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordAction {
    Created,
    Updated,
    Deleted,
}

impl fmt::Display for RecordAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordAction::Created => "created",
            RecordAction::Updated => "updated",
            RecordAction::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

/// A committed record change.
#[derive(Debug, Clone)]
pub struct RecordEvent {
    pub action: RecordAction,
    pub collection: String,
    pub record_id: String,
}

type Subscriber = Box<dyn Fn(&RecordEvent) + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<Subscriber>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus::default()
    }

    pub fn subscribe<F>(&mut self, callback: F)
    where
        F: Fn(&RecordEvent) + Send + Sync + 'static,
    {
        self.subscribers.push(Box::new(callback));
    }

    pub fn emit(&self, action: RecordAction, collection: &str, record_id: &str) {
        let event = RecordEvent {
            action,
            collection: collection.to_string(),
            record_id: record_id.to_string(),
        };
        for subscriber in &self.subscribers {
            subscriber(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_emit_reaches_every_subscriber() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();

        for _ in 0..2 {
            let seen = Arc::clone(&seen);
            bus.subscribe(move |event| {
                seen.lock()
                    .unwrap()
                    .push(format!("{} {}/{}", event.action, event.collection, event.record_id));
            });
        }

        bus.emit(RecordAction::Created, "posts", "abc");
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], "created posts/abc");
    }

    #[test]
    fn test_empty_bus_is_fine() {
        let bus = EventBus::new();
        bus.emit(RecordAction::Deleted, "posts", "abc");
    }
}
