//! K-way merge over multiple table iterators.
//!
//! Produces records in ascending key order. When the same key appears in
//! multiple inputs, only the record with the **greatest timestamp** is
//! emitted; a timestamp tie goes to the earlier input, so callers supply
//! inputs newest/shallowest first. This is the core primitive for
//! compaction.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::reader::TableIter;
use crate::SSTableError;

/// One buffered record from one input, ordered for the merge heap.
struct HeapEntry {
    key: Vec<u8>,
    value: Option<Vec<u8>>,
    ts: u64,
    /// Index into the `sources` array.
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.ts == other.ts && self.source == other.source
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; we want the smallest key first, and
        // among equal keys the greatest ts, then the lowest source index.
        other
            .key
            .cmp(&self.key)
            .then_with(|| self.ts.cmp(&other.ts))
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Merges N sorted table iterators into a single deduplicated stream.
pub struct MergeIterator {
    sources: Vec<TableIter>,
    heap: BinaryHeap<HeapEntry>,
}

impl MergeIterator {
    /// Builds a merge over `sources`, pulling the first record from each.
    /// Order the inputs newest-first: it decides equal-timestamp ties.
    pub fn new(sources: Vec<TableIter>) -> Result<Self, SSTableError> {
        let mut merge = Self {
            sources,
            heap: BinaryHeap::new(),
        };
        for i in 0..merge.sources.len() {
            merge.advance(i)?;
        }
        Ok(merge)
    }

    fn advance(&mut self, source: usize) -> Result<(), SSTableError> {
        if let Some((key, value, ts)) = self.sources[source].next_record()? {
            self.heap.push(HeapEntry {
                key,
                value,
                ts,
                source,
            });
        }
        Ok(())
    }

    /// Returns the next `(key, value, ts)` in ascending key order, or `None`
    /// when every input is exhausted. Exactly one record per key is emitted:
    /// the heap ordering guarantees the first entry popped for a key is the
    /// winner, and the losers are drained and dropped.
    pub fn next_entry(
        &mut self,
    ) -> Result<Option<(Vec<u8>, Option<Vec<u8>>, u64)>, SSTableError> {
        let Some(best) = self.heap.pop() else {
            return Ok(None);
        };
        self.advance(best.source)?;

        while let Some(peek) = self.heap.peek() {
            if peek.key != best.key {
                break;
            }
            let loser = self.heap.pop().expect("peeked entry");
            self.advance(loser.source)?;
        }

        Ok(Some((best.key, best.value, best.ts)))
    }
}
