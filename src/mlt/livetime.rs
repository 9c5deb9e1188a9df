use crate::clock::{MonotonicClock, SystemClock};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Mutex;

/// Emission-eligibility state the trigger spends wall time in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LivetimeState {
    Live,
    Paused,
    Dead,
}

impl LivetimeState {
    pub fn name(self) -> &'static str {
        match self {
            LivetimeState::Live => "live",
            LivetimeState::Paused => "paused",
            LivetimeState::Dead => "dead",
        }
    }
}

struct LivetimeInner {
    state: LivetimeState,
    last_change_ms: u64,
    accumulated_ms: BTreeMap<LivetimeState, u64>,
    clock: Box<dyn MonotonicClock>,
}

impl LivetimeInner {
    /// Folds the time since the last transition into the current state.
    /// Callers hold the mutex.
    fn settle(&mut self) {
        let now = self.clock.now_ms();
        let delta = now.saturating_sub(self.last_change_ms);
        *self.accumulated_ms.entry(self.state).or_insert(0) += delta;
        self.last_change_ms = now;
    }
}

/// Integrates wall time spent live, paused, and dead across one run.
pub struct LivetimeCounter {
    inner: Mutex<LivetimeInner>,
}

impl LivetimeCounter {
    pub fn new(initial: LivetimeState) -> Self {
        Self::with_clock(initial, Box::new(SystemClock::new()))
    }

    pub fn with_clock(initial: LivetimeState, mut clock: Box<dyn MonotonicClock>) -> Self {
        let now = clock.now_ms();
        let mut accumulated_ms = BTreeMap::new();
        accumulated_ms.insert(LivetimeState::Live, 0);
        accumulated_ms.insert(LivetimeState::Paused, 0);
        accumulated_ms.insert(LivetimeState::Dead, 0);
        Self {
            inner: Mutex::new(LivetimeInner {
                state: initial,
                last_change_ms: now,
                accumulated_ms,
                clock,
            }),
        }
    }

    pub fn set_state(&self, state: LivetimeState) {
        let mut inner = self.inner.lock().unwrap();
        inner.settle();
        inner.state = state;
    }

    pub fn state(&self) -> LivetimeState {
        self.inner.lock().unwrap().state
    }

    /// Milliseconds accumulated in `state` so far.
    pub fn time_ms(&self, state: LivetimeState) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        inner.settle();
        inner.accumulated_ms.get(&state).copied().unwrap_or(0)
    }

    pub fn time_map_ms(&self) -> BTreeMap<LivetimeState, u64> {
        let mut inner = self.inner.lock().unwrap();
        inner.settle();
        inner.accumulated_ms.clone()
    }

    pub fn report_string(&self) -> String {
        let mut report = String::new();
        for (state, ms) in self.time_map_ms() {
            let _ = write!(report, "{}: {}ms ", state.name(), ms);
        }
        report.trim_end().to_string()
    }
}
