use crate::models::{Delivery, Message};
use std::collections::{HashSet, VecDeque};

/// Bounded, ordered chat window.
///
/// Ids are unique, the oldest line is evicted first, and at most one line is
/// pinned at a time.
#[derive(Debug, Clone)]
pub struct MessageBuffer {
    capacity: usize,
    messages: VecDeque<Message>,
    ids: HashSet<String>,
}

impl MessageBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            messages: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    /// Append at the tail. Returns false for a duplicate id.
    pub fn push(&mut self, message: Message) -> bool {
        if !self.ids.insert(message.id.clone()) {
            return false;
        }
        self.messages.push_back(message);
        while self.messages.len() > self.capacity {
            if let Some(evicted) = self.messages.pop_front() {
                self.ids.remove(&evicted.id);
            }
        }
        true
    }

    pub fn remove(&mut self, id: &str) -> Option<Message> {
        let index = self.messages.iter().position(|m| m.id == id)?;
        let removed = self.messages.remove(index)?;
        self.ids.remove(&removed.id);
        Some(removed)
    }

    /// Pin `id`, clearing every other pin. Unknown ids change nothing.
    pub fn pin(&mut self, id: &str) -> bool {
        if !self.contains(id) {
            return false;
        }
        for message in self.messages.iter_mut() {
            message.pinned = message.id == id;
        }
        true
    }

    pub fn unpin(&mut self) -> bool {
        let mut changed = false;
        for message in self.messages.iter_mut().filter(|m| m.pinned) {
            message.pinned = false;
            changed = true;
        }
        changed
    }

    pub fn pinned(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.pinned)
    }

    pub fn mark_deleted(&mut self, id: &str) -> bool {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                message.deleted = true;
                message.pinned = false;
                true
            }
            None => false,
        }
    }

    /// Pending entry awaiting this echo: by correlation id when the server
    /// returns one, else the oldest pending line with the same author and body.
    pub fn find_pending(
        &self,
        correlation_id: Option<&str>,
        author_id: &str,
        body: &str,
    ) -> Option<String> {
        let pending = || self.messages.iter().filter(|m| m.is_pending());
        match correlation_id {
            Some(correlation) => pending()
                .find(|m| m.correlation_id() == Some(correlation))
                .map(|m| m.id.clone()),
            None => pending()
                .find(|m| m.author.id == author_id && m.body == body)
                .map(|m| m.id.clone()),
        }
    }

    /// Swap a pending entry for its confirmed version, keeping its position.
    pub fn confirm(&mut self, temp_id: &str, confirmed: Message) -> bool {
        if self.contains(&confirmed.id) {
            return false;
        }
        let Some(slot) = self.messages.iter_mut().find(|m| m.id == temp_id) else {
            return false;
        };
        let pinned = slot.pinned;
        *slot = Message {
            pinned,
            delivery: Delivery::Confirmed,
            ..confirmed
        };
        self.ids.remove(temp_id);
        self.ids.insert(slot.id.clone());
        true
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.iter().cloned().collect()
    }
}
