//! Snapshot-based undo history with nestable batches.
//!
//! Every mutation outside a batch records one entry. Inside a batch the
//! snapshot is taken once at `begin` and committed as a single entry at the
//! matching `end`, so a multi-field edit undoes in one step. While
//! suspended nothing is recorded at all.

use std::collections::VecDeque;

use crate::Element;

/// Maximum retained undo entries per document.
pub const HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone)]
struct Batch {
    depth: usize,
    snapshot: Vec<Element>,
    dirty: bool,
}

#[derive(Debug, Clone, Default)]
pub struct History {
    undo: VecDeque<Vec<Element>>,
    redo: Vec<Vec<Element>>,
    batch: Option<Batch>,
    suspended: usize,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a batch, or deepen the one already open.
    pub fn begin_batch(&mut self, current: &[Element]) {
        match self.batch.as_mut() {
            Some(batch) => batch.depth += 1,
            None => {
                self.batch = Some(Batch {
                    depth: 1,
                    snapshot: current.to_vec(),
                    dirty: false,
                })
            }
        }
    }

    /// Close one level of batching. The outermost `end` commits the batch
    /// if anything was recorded inside it.
    pub fn end_batch(&mut self) {
        let Some(batch) = self.batch.as_mut() else {
            log::warn!("end_batch called without an open batch");
            return;
        };
        batch.depth -= 1;
        if batch.depth > 0 {
            return;
        }
        if let Some(batch) = self.batch.take() {
            if batch.dirty {
                self.push(batch.snapshot);
            }
        }
    }

    pub fn in_batch(&self) -> bool {
        self.batch.is_some()
    }

    /// Stop recording until the matching [`History::resume`]. Nests.
    pub fn suspend(&mut self) {
        self.suspended += 1;
    }

    pub fn resume(&mut self) {
        if self.suspended == 0 {
            log::warn!("resume called on active history");
            return;
        }
        self.suspended -= 1;
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended > 0
    }

    /// Record the state about to be mutated.
    pub fn record(&mut self, current: &[Element]) {
        if self.suspended > 0 {
            return;
        }
        match self.batch.as_mut() {
            Some(batch) => batch.dirty = true,
            None => self.push(current.to_vec()),
        }
    }

    fn push(&mut self, snapshot: Vec<Element>) {
        self.push_undo(snapshot);
        self.redo.clear();
    }

    fn push_undo(&mut self, snapshot: Vec<Element>) {
        if self.undo.len() == HISTORY_LIMIT {
            self.undo.pop_front();
        }
        self.undo.push_back(snapshot);
    }

    /// Swap `current` for the previous snapshot.
    pub fn undo(&mut self, current: &[Element]) -> Option<Vec<Element>> {
        let previous = self.undo.pop_back()?;
        self.redo.push(current.to_vec());
        Some(previous)
    }

    pub fn redo(&mut self, current: &[Element]) -> Option<Vec<Element>> {
        let next = self.redo.pop()?;
        self.push_undo(current.to_vec());
        Some(next)
    }

    /// Number of undoable steps.
    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
        self.batch = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ElementKind;

    #[test]
    fn test_unbatched_records_each_step() {
        let mut history = History::new();
        let elements = vec![Element::new("rect", ElementKind::Shape)];
        history.record(&elements);
        history.record(&elements);
        assert_eq!(history.undo_len(), 2);
    }

    #[test]
    fn test_nested_batch_commits_once() {
        let mut history = History::new();
        let elements = vec![Element::new("rect", ElementKind::Shape)];
        history.begin_batch(&elements);
        history.record(&elements);
        history.begin_batch(&elements);
        history.record(&elements);
        history.end_batch();
        assert_eq!(history.undo_len(), 0);
        history.end_batch();
        assert_eq!(history.undo_len(), 1);
        assert!(!history.in_batch());
    }

    #[test]
    fn test_empty_batch_records_nothing() {
        let mut history = History::new();
        history.begin_batch(&[]);
        history.end_batch();
        assert_eq!(history.undo_len(), 0);
    }

    #[test]
    fn test_undo_redo_swap_snapshots() {
        let mut history = History::new();
        let before = vec![Element::new("rect", ElementKind::Shape)];
        let after: Vec<Element> = Vec::new();
        history.record(&before);

        let restored = history.undo(&after).unwrap();
        assert_eq!(restored, before);
        assert_eq!(history.redo_len(), 1);

        let replayed = history.redo(&restored).unwrap();
        assert!(replayed.is_empty());
    }

    #[test]
    fn test_limit_drops_oldest() {
        let mut history = History::new();
        let mut elements = Vec::new();
        for _ in 0..(HISTORY_LIMIT + 5) {
            history.record(&elements);
            elements.push(Element::new("rect", ElementKind::Shape));
        }
        assert_eq!(history.undo_len(), HISTORY_LIMIT);

        let mut oldest = None;
        while let Some(snapshot) = history.undo(&elements) {
            oldest = Some(snapshot.len());
        }
        assert_eq!(oldest, Some(5));
        assert_eq!(history.redo_len(), HISTORY_LIMIT);
    }

    #[test]
    fn test_suspended_history_records_nothing() {
        let mut history = History::new();
        let elements = vec![Element::new("rect", ElementKind::Shape)];
        history.suspend();
        history.record(&elements);
        history.begin_batch(&elements);
        history.record(&elements);
        history.end_batch();
        history.resume();
        assert_eq!(history.undo_len(), 0);
        assert!(!history.is_suspended());

        history.record(&elements);
        assert_eq!(history.undo_len(), 1);
    }
}
