use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use serde_json::Value;

type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct EmitterState {
    next_id: u64,
    listeners: HashMap<String, Vec<(ListenerId, Listener)>>,
}

#[derive(Clone, Default)]
pub struct EventEmitter {
    state: Arc<Mutex<EmitterState>>,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter").finish_non_exhaustive()
    }
}

impl EventEmitter {
    pub fn on<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let mut g = match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        g.next_id += 1;
        let id = ListenerId(g.next_id);
        g.listeners
            .entry(event.to_owned())
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, event: &str, id: ListenerId) -> bool {
        let Ok(mut g) = self.state.lock() else {
            return false;
        };
        let Some(list) = g.listeners.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|(lid, _)| *lid != id);
        before != list.len()
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.state
            .lock()
            .map(|g| g.listeners.get(event).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// Calls every listener for `event`. A panicking listener is logged and
    /// does not stop the others. Returns how many listeners ran to completion.
    pub fn emit(&self, event: &str, value: &Value) -> usize {
        let listeners: Vec<Listener> = match self.state.lock() {
            Ok(g) => g
                .listeners
                .get(event)
                .map(|l| l.iter().map(|(_, f)| Arc::clone(f)).collect())
                .unwrap_or_default(),
            Err(_) => return 0,
        };
        let mut completed = 0;
        for listener in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(value))) {
                Ok(()) => completed += 1,
                Err(_) => tracing::warn!(event, "event listener panicked"),
            }
        }
        completed
    }
}
