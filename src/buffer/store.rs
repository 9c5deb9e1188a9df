use crate::data::primitives::TimeSliced;
use crate::data::types::Timestamp;
use std::collections::BTreeMap;

/// How a data request relates to the buffer's current time extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The window lies within buffered time: answer immediately.
    Success,
    /// The window ends before the earliest buffered time: the data has
    /// already been evicted (or never existed).
    Empty,
    /// The window extends beyond the latest buffered time: the data has
    /// not arrived yet.
    Late,
}

/// Time-sorted, capacity-bounded store of the most recent objects.
/// Insertion beyond capacity evicts the oldest objects.
pub struct LatencyStore<T> {
    objects: BTreeMap<Timestamp, Vec<T>>,
    stored: usize,
    capacity: usize,
}

impl<T: TimeSliced> LatencyStore<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "buffer capacity must be nonzero");
        Self {
            objects: BTreeMap::new(),
            stored: 0,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.stored
    }

    pub fn is_empty(&self) -> bool {
        self.stored == 0
    }

    pub fn earliest(&self) -> Option<Timestamp> {
        self.objects.keys().next().copied()
    }

    pub fn latest(&self) -> Option<Timestamp> {
        self.objects.keys().next_back().copied()
    }

    pub fn insert(&mut self, object: T) {
        while self.stored >= self.capacity {
            self.evict_oldest();
        }
        self.objects
            .entry(object.time_start())
            .or_default()
            .push(object);
        self.stored += 1;
    }

    fn evict_oldest(&mut self) {
        let Some(&oldest) = self.objects.keys().next() else {
            return;
        };
        let entry = self.objects.get_mut(&oldest).expect("key just observed");
        entry.remove(0);
        self.stored -= 1;
        if entry.is_empty() {
            self.objects.remove(&oldest);
        }
    }

    /// Classifies a request window against the buffered extent.
    pub fn classify(&self, window_begin: Timestamp, window_end: Timestamp) -> RequestOutcome {
        let (Some(earliest), Some(latest)) = (self.earliest(), self.latest()) else {
            // Nothing buffered yet: whatever the window is, it has not
            // arrived.
            return RequestOutcome::Late;
        };
        if window_end < earliest {
            return RequestOutcome::Empty;
        }
        if window_end > latest {
            return RequestOutcome::Late;
        }
        RequestOutcome::Success
    }

    /// All objects with `time_start` in `[window_begin, window_end]`.
    pub fn objects_in_window(&self, window_begin: Timestamp, window_end: Timestamp) -> Vec<T> {
        self.objects
            .range(window_begin..=window_end)
            .flat_map(|(_, bucket)| bucket.iter().cloned())
            .collect()
    }

    pub fn clear(&mut self) {
        self.objects.clear();
        self.stored = 0;
    }
}
