use std::sync::{Arc, Mutex, MutexGuard};

use crate::{parse_line, AckToken, Message, Payload};

#[derive(Debug, Default)]
struct StoreInner {
    // Raw lines in arrival order; `messages.len()` of them are converted.
    received: Vec<String>,
    messages: Vec<Message>,
}

/// Thread-safe, insertion-ordered store of feedback messages.
///
/// Connection handlers push raw lines, the processing loop converts them
/// into [`Message`]s, tasks read. Sequence numbers are the insertion index,
/// so they always form the range `0..len()` since the last [`clear`].
///
/// [`clear`]: MessageStore::clear
#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        // A panicking reader cannot leave the vectors half-written.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push_raw(&self, line: String) {
        self.lock().received.push(line);
    }

    /// Number of raw lines not yet converted.
    pub fn pending(&self) -> usize {
        let inner = self.lock();
        inner.received.len() - inner.messages.len()
    }

    pub fn raw_len(&self) -> usize {
        self.lock().received.len()
    }

    /// Converts every raw line that has no message yet, in arrival order,
    /// and returns the new messages.
    pub fn process_pending(&self) -> Vec<Message> {
        let mut inner = self.lock();
        let start = inner.messages.len();
        let end = inner.received.len();
        let mut added = Vec::with_capacity(end - start);
        for index in start..end {
            let message = Message {
                sequence_number: index as u64,
                payload: parse_line(&inner.received[index]),
            };
            log::debug!(target: "message_store", "Adding message {}: {}", index, message.payload);
            inner.messages.push(message.clone());
            added.push(message);
        }
        added
    }

    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empties both the raw buffer and the messages. Only meaningful while no
    /// task is waiting on feedback.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.received.clear();
        inner.messages.clear();
    }

    pub fn get(&self, sequence_number: u64) -> Option<Message> {
        self.lock().messages.get(sequence_number as usize).cloned()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    pub fn payloads(&self) -> Vec<Payload> {
        self.lock()
            .messages
            .iter()
            .map(|m| m.payload.clone())
            .collect()
    }

    pub fn last(&self) -> Option<Message> {
        self.lock().messages.last().cloned()
    }

    pub fn contains(&self, token: &AckToken) -> bool {
        self.find(token, 0).is_some()
    }

    /// Sequence number of the first message at or after `from` matching `token`.
    pub fn find(&self, token: &AckToken, from: u64) -> Option<u64> {
        self.lock()
            .messages
            .iter()
            .skip(from as usize)
            .find(|m| token.matches(&m.payload))
            .map(|m| m.sequence_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(lines: &[&str]) -> MessageStore {
        let store = MessageStore::new();
        for line in lines {
            store.push_raw(line.to_string());
        }
        store
    }

    #[test]
    fn sequence_numbers_are_gap_free_from_zero() {
        let store = store_with(&["a", "[1,2]", "b"]);
        assert_eq!(store.pending(), 3);
        let added = store.process_pending();
        assert_eq!(added.len(), 3);
        store.push_raw("c".to_string());
        store.process_pending();

        let numbers: Vec<u64> = store.messages().iter().map(|m| m.sequence_number).collect();
        assert_eq!(numbers, vec![0, 1, 2, 3]);
        assert_eq!(store.len(), store.raw_len());
        assert_eq!(store.pending(), 0);
        assert_eq!(store.get(1).map(|m| m.payload), Some(Payload::numbers(&[1.0, 2.0])));
    }

    #[test]
    fn clear_is_idempotent_and_restarts_numbering() {
        let store = store_with(&["a", "b"]);
        store.process_pending();
        store.clear();
        assert!(store.is_empty());
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.raw_len(), 0);

        store.push_raw("c".to_string());
        let added = store.process_pending();
        assert_eq!(added[0].sequence_number, 0);
    }

    #[test]
    fn find_respects_start_position() {
        let store = store_with(&["x", "done", "y", "done"]);
        store.process_pending();
        let token = AckToken::exact("done");
        assert!(store.contains(&token));
        assert_eq!(store.find(&token, 0), Some(1));
        assert_eq!(store.find(&token, 2), Some(3));
        assert_eq!(store.find(&token, 4), None);
        assert!(!store.contains(&AckToken::exact("missing")));
    }

    #[test]
    fn clones_share_state() {
        let store = MessageStore::new();
        let producer = store.clone();
        producer.push_raw("shared".to_string());
        store.process_pending();
        assert_eq!(producer.last().map(|m| m.payload), Some(Payload::text("shared")));
    }
}
