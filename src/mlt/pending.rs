use crate::clock::ticks_to_ms;
use crate::data::primitives::TriggerCandidate;
use crate::data::types::{Ticks, Timestamp};
use std::collections::HashMap;

/// Closed intervals `[a, b]` and `[c, d]` overlap iff `a <= d && c <= b`.
fn overlaps(a: Timestamp, b: Timestamp, c: Timestamp, d: Timestamp) -> bool {
    a <= d && c <= b
}

/// A decision under construction: the union readout interval of its
/// contributing candidates, held open until the wall-clock buffer timeout
/// lets latecomers join.
#[derive(Debug, Clone)]
pub struct PendingDecision {
    pub readout_start: Timestamp,
    pub readout_end: Timestamp,
    pub walltime_expiration_ms: u64,
    pub contributors: Vec<TriggerCandidate>,
}

impl PendingDecision {
    /// Trigger timestamp of the eventual decision: the first contributing
    /// candidate's time.
    pub fn trigger_timestamp(&self) -> Timestamp {
        self.contributors
            .first()
            .map(|tc| tc.time_candidate)
            .unwrap_or(0)
    }

    pub fn first_contributor(&self) -> Option<&TriggerCandidate> {
        self.contributors.first()
    }
}

/// The set of pending decisions, clustered by readout-interval overlap.
pub struct PendingDecisions {
    readout_windows: HashMap<u8, (Ticks, Ticks)>,
    buffer_timeout_ms: u64,
    clock_hz: u64,
    pending: Vec<PendingDecision>,
}

impl PendingDecisions {
    pub fn new(
        readout_windows: HashMap<u8, (Ticks, Ticks)>,
        buffer_timeout_ms: u64,
        clock_hz: u64,
    ) -> Self {
        Self {
            readout_windows,
            buffer_timeout_ms,
            clock_hz,
            pending: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn readout_interval(&self, tc: &TriggerCandidate) -> (Timestamp, Timestamp) {
        let (before, after) = self
            .readout_windows
            .get(&tc.kind.code())
            .copied()
            .unwrap_or((0, 0));
        (
            tc.time_candidate.saturating_sub(before),
            tc.time_candidate.saturating_add(after),
        )
    }

    fn expiration_for(&self, readout_end: Timestamp) -> u64 {
        ticks_to_ms(readout_end, self.clock_hz) + self.buffer_timeout_ms
    }

    /// Clusters an arriving candidate: the first pending decision whose
    /// readout interval overlaps absorbs it (interval extended to the
    /// union, expiration recomputed); otherwise a new decision is seeded.
    pub fn absorb(&mut self, tc: TriggerCandidate) {
        let (r_start, r_end) = self.readout_interval(&tc);
        let clock_hz = self.clock_hz;
        let buffer_timeout_ms = self.buffer_timeout_ms;
        for pending in &mut self.pending {
            if overlaps(pending.readout_start, pending.readout_end, r_start, r_end) {
                pending.readout_start = pending.readout_start.min(r_start);
                pending.readout_end = pending.readout_end.max(r_end);
                pending.walltime_expiration_ms =
                    ticks_to_ms(pending.readout_end, clock_hz) + buffer_timeout_ms;
                pending.contributors.push(tc);
                return;
            }
        }
        let walltime_expiration_ms = self.expiration_for(r_end);
        self.pending.push(PendingDecision {
            readout_start: r_start,
            readout_end: r_end,
            walltime_expiration_ms,
            contributors: vec![tc],
        });
    }

    /// Removes and returns the decisions whose buffer timeout has elapsed,
    /// in expiration order.
    pub fn take_expired(&mut self, now_ms: u64) -> Vec<PendingDecision> {
        let mut expired: Vec<PendingDecision> = Vec::new();
        let mut index = 0;
        while index < self.pending.len() {
            if self.pending[index].walltime_expiration_ms <= now_ms {
                expired.push(self.pending.remove(index));
            } else {
                index += 1;
            }
        }
        expired.sort_by_key(|pending| pending.walltime_expiration_ms);
        expired
    }

    /// Removes and returns everything, for the end-of-run flush.
    pub fn take_all(&mut self) -> Vec<PendingDecision> {
        std::mem::take(&mut self.pending)
    }
}
