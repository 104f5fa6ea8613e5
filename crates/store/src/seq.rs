//! Applied-sequence bookkeeping.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use wal::Seq;

/// Tracks which WAL sequences have been applied to the memtable and exposes
/// the highest **contiguous** watermark: every sequence at or below it has
/// been applied.
///
/// Applies can arrive out of order on the async path (inline fast-path
/// applies race the queue drain), so a plain max would overstate progress;
/// `wait_for_seq` and the WAL GC floor both need the contiguous property.
#[derive(Debug)]
pub(crate) struct SeqTracker {
    contiguous: Seq,
    /// Applied sequences above the watermark, smallest first. Bounded in
    /// practice by the apply queue depth.
    pending: BinaryHeap<Reverse<Seq>>,
}

impl SeqTracker {
    pub(crate) fn new(start: Seq) -> Self {
        Self {
            contiguous: start,
            pending: BinaryHeap::new(),
        }
    }

    /// Marks `seq` applied, advancing the watermark across any runs it
    /// completes.
    pub(crate) fn observe(&mut self, seq: Seq) {
        if seq <= self.contiguous {
            return;
        }
        self.pending.push(Reverse(seq));
        while let Some(&Reverse(next)) = self.pending.peek() {
            if next != self.contiguous + 1 {
                break;
            }
            self.pending.pop();
            self.contiguous = next;
        }
    }

    pub(crate) fn contiguous(&self) -> Seq {
        self.contiguous
    }
}

/// The seq lock of the store: the tracker plus a condvar for fencing.
#[derive(Debug)]
pub(crate) struct SeqState {
    tracker: Mutex<SeqTracker>,
    cond: Condvar,
}

impl SeqState {
    pub(crate) fn new(start: Seq) -> Self {
        Self {
            tracker: Mutex::new(SeqTracker::new(start)),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn observe(&self, seq: Seq) {
        let mut tracker = self.tracker.lock();
        tracker.observe(seq);
        self.cond.notify_all();
    }

    /// The `last_applied_seq` watermark.
    pub(crate) fn contiguous(&self) -> Seq {
        self.tracker.lock().contiguous()
    }

    /// Blocks until the watermark reaches `seq` or the timeout elapses
    /// (`None` = wait forever). A timed-out wait returns `false` without
    /// cancelling anything.
    pub(crate) fn wait_for(&self, seq: Seq, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut tracker = self.tracker.lock();
        while tracker.contiguous() < seq {
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut tracker, deadline).timed_out() {
                        return tracker.contiguous() >= seq;
                    }
                }
                None => self.cond.wait(&mut tracker),
            }
        }
        true
    }
}
