//! map iteration for read and write transactions
//!
//! A cursor walks one map in key order, visiting every duplicate of a key
//! before moving on. Cursors borrow their transaction and cannot outlive it.

use std::ops::Bound;

/// Uniform lookup surface over a snapshot (read txn) or a merged
/// overlay-plus-snapshot view (write txn).
pub(crate) trait ReadView {
    fn lookup(&self, map: u32, key: &[u8]) -> Option<&[Vec<u8>]>;
    fn next_key(&self, map: u32, from: Bound<&[u8]>) -> Option<(&[u8], &[Vec<u8>])>;
    fn last_key(&self, map: u32) -> Option<(&[u8], &[Vec<u8>])>;
}

/// Stateful iteration handle over one map.
pub struct Cursor<'t> {
    view: &'t dyn ReadView,
    map: u32,
    /// Current key and duplicate index, once positioned.
    pos: Option<(Vec<u8>, usize)>,
}

impl<'t> Cursor<'t> {
    pub(crate) fn new(view: &'t dyn ReadView, map: u32) -> Cursor<'t> {
        Cursor {
            view,
            map,
            pos: None,
        }
    }

    /// Positions at the first value of the first key.
    pub fn first(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
        let (key, values) = self.view.next_key(self.map, Bound::Unbounded)?;
        let item = (key.to_vec(), values[0].clone());
        self.pos = Some((item.0.clone(), 0));
        Some(item)
    }

    /// Positions at the last value of the last key.
    pub fn last(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
        let (key, values) = self.view.last_key(self.map)?;
        let index = values.len() - 1;
        let item = (key.to_vec(), values[index].clone());
        self.pos = Some((item.0.clone(), index));
        Some(item)
    }

    /// Positions at an exact key, on its first value.
    pub fn seek(&mut self, key: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
        let values = self.view.lookup(self.map, key)?;
        let item = (key.to_vec(), values[0].clone());
        self.pos = Some((item.0.clone(), 0));
        Some(item)
    }

    /// Advances one value: through the current key's duplicates, then on
    /// to the next key. Unpositioned cursors start at the first value.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
        let (key, index) = match &self.pos {
            None => return self.first(),
            Some((key, index)) => (key.clone(), *index),
        };
        if let Some(values) = self.view.lookup(self.map, &key) {
            if index + 1 < values.len() {
                let item = (key, values[index + 1].clone());
                self.pos = Some((item.0.clone(), index + 1));
                return Some(item);
            }
        }
        let (next, values) = self
            .view
            .next_key(self.map, Bound::Excluded(key.as_slice()))?;
        let item = (next.to_vec(), values[0].clone());
        self.pos = Some((item.0.clone(), 0));
        Some(item)
    }

    /// Advances to the next duplicate of the current key only.
    pub fn next_dup(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
        let (key, index) = match &self.pos {
            None => return None,
            Some((key, index)) => (key.clone(), *index),
        };
        let values = self.view.lookup(self.map, &key)?;
        if index + 1 >= values.len() {
            return None;
        }
        let item = (key, values[index + 1].clone());
        self.pos = Some((item.0.clone(), index + 1));
        Some(item)
    }
}
