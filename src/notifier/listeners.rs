use std::collections::HashMap;
use std::sync::Arc;

use super::events::Inbound;

pub type Handler = Arc<dyn Fn(&Inbound) + Send + Sync>;

/// Token returned by registration. Removal takes the token, so removing one
/// registration never disturbs another, even for the same handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Event name → handlers, in registration order.
#[derive(Default)]
pub struct Listeners {
    next_id: u64,
    by_event: HashMap<String, Vec<(ListenerId, Handler)>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registering the same handler twice yields two independent
    /// registrations; it is then invoked twice per event.
    pub fn add(&mut self, event: &str, handler: Handler) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.by_event
            .entry(event.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    pub fn remove(&mut self, event: &str, id: ListenerId) -> bool {
        let Some(handlers) = self.by_event.get_mut(event) else {
            return false;
        };

        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        let removed = handlers.len() != before;

        if handlers.is_empty() {
            self.by_event.remove(event);
        }

        removed
    }

    /// Snapshot so handlers run without the registry locked.
    pub fn handlers(&self, event: &str) -> Vec<Handler> {
        self.by_event
            .get(event)
            .map(|handlers| handlers.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default()
    }

    pub fn count(&self, event: &str) -> usize {
        self.by_event.get(event).map_or(0, Vec::len)
    }
}
