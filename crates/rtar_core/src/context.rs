use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// One remembered comment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub sender: String,
    pub text: String,
}

/// Bounded FIFO of recent comments handed to the generator as context
#[derive(Debug)]
pub struct ContextWindow {
    entries: VecDeque<ContextEntry>,
    max_entries: usize,
}

impl ContextWindow {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_entries),
            max_entries,
        }
    }

    /// Append an entry, evicting the oldest ones beyond capacity
    pub fn push(&mut self, sender: impl Into<String>, text: impl Into<String>) {
        self.entries.push_back(ContextEntry {
            sender: sender.into(),
            text: text.into(),
        });
        while self.entries.len() > self.max_entries {
            self.entries.pop_front();
        }
    }

    /// Owned copy, unaffected by later pushes
    pub fn snapshot(&self) -> Vec<ContextEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_keeps_last_entries_in_order() {
        let mut window = ContextWindow::new(3);
        for i in 0..7 {
            window.push(format!("user{i}"), format!("msg{i}"));
        }

        let texts: Vec<_> = window.snapshot().into_iter().map(|e| e.text).collect();
        assert_eq!(texts, vec!["msg4", "msg5", "msg6"]);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut window = ContextWindow::new(5);
        window.push("a", "first");
        let snapshot = window.snapshot();
        window.push("b", "second");

        assert_eq!(snapshot.len(), 1);
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_zero_capacity_holds_nothing() {
        let mut window = ContextWindow::new(0);
        window.push("a", "b");
        assert!(window.is_empty());
    }
}
