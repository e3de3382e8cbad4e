use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::warn;

/// Change notification callback.
pub type ChangeHandler = Box<dyn Fn() + Send + 'static>;

/// What happened to a row of an entity type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChangeEvent {
    Insert,
    Delete,
    /// A single key was written through `update_value`.
    Update(String),
}

/// Per-entity-type lists of change handlers.
///
/// Handlers for one `(type, event)` run in registration order. A panicking
/// handler is logged and skipped; the remaining handlers still run.
#[derive(Default)]
pub struct ChangeRegistry {
    handlers: HashMap<(String, ChangeEvent), Vec<ChangeHandler>>,
}

impl ChangeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, type_name: &str, event: ChangeEvent, handler: ChangeHandler) {
        self.handlers
            .entry((type_name.to_string(), event))
            .or_default()
            .push(handler);
    }

    pub fn handler_count(&self, type_name: &str, event: &ChangeEvent) -> usize {
        self.handlers
            .get(&(type_name.to_string(), event.clone()))
            .map_or(0, Vec::len)
    }

    /// Run the handlers for `(type_name, event)`. Returns how many completed.
    pub fn notify(&self, type_name: &str, event: &ChangeEvent) -> usize {
        let Some(handlers) = self.handlers.get(&(type_name.to_string(), event.clone())) else {
            return 0;
        };

        let mut completed = 0;
        for (index, handler) in handlers.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| handler())) {
                Ok(()) => completed += 1,
                Err(_) => warn!(
                    entity = type_name,
                    event = ?event,
                    handler = index,
                    "Change handler panicked"
                ),
            }
        }
        completed
    }
}

impl std::fmt::Debug for ChangeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<String, usize> = self
            .handlers
            .iter()
            .map(|((ty, ev), hs)| (format!("{ty}:{ev:?}"), hs.len()))
            .collect();
        f.debug_struct("ChangeRegistry")
            .field("handlers", &counts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn handlers_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ChangeRegistry::new();
        for i in 0..3 {
            let log = Arc::clone(&log);
            registry.register("Album", ChangeEvent::Insert, Box::new(move || log.lock().unwrap().push(i)));
        }
        assert_eq!(registry.notify("Album", &ChangeEvent::Insert), 3);
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn events_and_types_are_isolated() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut registry = ChangeRegistry::new();
        let h = Arc::clone(&hits);
        registry.register(
            "Album",
            ChangeEvent::Update("title".into()),
            Box::new(move || {
                h.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert_eq!(registry.notify("Album", &ChangeEvent::Update("flags".into())), 0);
        assert_eq!(registry.notify("Track", &ChangeEvent::Update("title".into())), 0);
        assert_eq!(registry.notify("Album", &ChangeEvent::Delete), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        registry.notify("Album", &ChangeEvent::Update("title".into()));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(registry.handler_count("Album", &ChangeEvent::Update("title".into())), 1);
    }

    #[test]
    fn panicking_handler_does_not_stop_the_rest() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut registry = ChangeRegistry::new();
        registry.register("Album", ChangeEvent::Delete, Box::new(|| panic!("boom")));
        let h = Arc::clone(&hits);
        registry.register(
            "Album",
            ChangeEvent::Delete,
            Box::new(move || {
                h.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(registry.notify("Album", &ChangeEvent::Delete), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
