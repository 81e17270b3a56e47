use std::collections::HashMap;

/// Reference-counted department rooms.
///
/// Membership on the server is requested on the first subscribe and released
/// on the matching last unsubscribe.
#[derive(Debug, Default)]
pub struct Rooms {
    counts: HashMap<String, usize>,
}

impl Rooms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when this is the first interest in the room.
    pub fn subscribe(&mut self, department_id: &str) -> bool {
        let count = self.counts.entry(department_id.to_string()).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Returns `true` when the last interest was released. Unsubscribing a
    /// room that was never subscribed is a no-op.
    pub fn unsubscribe(&mut self, department_id: &str) -> bool {
        match self.counts.get_mut(department_id) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.counts.remove(department_id);
                true
            }
            None => false,
        }
    }

    pub fn count(&self, department_id: &str) -> usize {
        self.counts.get(department_id).copied().unwrap_or(0)
    }

    pub fn active(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self.counts.keys().cloned().collect();
        rooms.sort();
        rooms
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
