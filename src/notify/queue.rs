use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingNotification {
    pub title: String,
    pub message: String,
    pub timeout: Duration,
}

/// FIFO of one-shot notifications waiting for the visible one to go away.
#[derive(Debug, Default)]
pub struct PendingQueue {
    entries: VecDeque<PendingNotification>,
}

impl PendingQueue {
    pub fn push(&mut self, entry: PendingNotification) {
        self.entries.push_back(entry);
    }

    pub fn pop(&mut self) -> Option<PendingNotification> {
        self.entries.pop_front()
    }

    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{PendingNotification, PendingQueue};
    use std::time::Duration;

    fn entry(message: &str) -> PendingNotification {
        PendingNotification {
            title: "ScreenCal".to_string(),
            message: message.to_string(),
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn pops_in_insertion_order() {
        let mut queue = PendingQueue::default();
        queue.push(entry("first"));
        queue.push(entry("second"));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().map(|e| e.message), Some("first".to_string()));
        assert_eq!(queue.pop().map(|e| e.message), Some("second".to_string()));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn clear_reports_dropped_entries() {
        let mut queue = PendingQueue::default();
        queue.push(entry("a"));
        queue.push(entry("b"));
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }
}
