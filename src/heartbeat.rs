//! Per-stream heartbeat synthesis.
//!
//! An upstream region can stay silent for long stretches; downstream
//! mergers and slicers still need to make progress. The generator
//! extrapolates "now, in detector ticks" from the last payload seen and
//! the wall clock, and emits heartbeats at fixed interval multiples up to
//! that boundary (held back by a configurable offset so it never runs
//! ahead of real data).

use crate::clock::{ticks_per_ms, MonotonicClock, SystemClock};
use crate::config::{self, ConfigError, HeartbeatConfig};
use crate::data::primitives::TimeSliced;
use crate::data::slice::TimeSlice;
use crate::data::types::{RunNumber, StreamId, Timestamp};
use crate::observability::issue::{Issue, IssueLog};
use crate::runtime::queue::{
    BoundedQueue, RecvError, DEFAULT_RECV_TIMEOUT, DEFAULT_SEND_TIMEOUT,
};
use crate::runtime::worker::WorkerThread;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeartbeatError {
    /// Emitting a slice whose start time regresses would corrupt every
    /// consumer downstream; this is an unrecoverable internal error.
    #[error("heartbeat maker would regress from {previous} to {current}")]
    Monotonicity {
        previous: Timestamp,
        current: Timestamp,
    },
}

/// The synthesis state machine, separated from the worker so it can be
/// driven directly with a scripted clock.
pub struct HeartbeatEngine {
    cfg: HeartbeatConfig,
    run_number: RunNumber,
    origin: Option<StreamId>,
    last_seen_timestamp: Option<Timestamp>,
    last_seen_wall_ms: u64,
    last_sent_time: Option<Timestamp>,
    next_seqno: u64,
    clock: Box<dyn MonotonicClock>,
}

impl HeartbeatEngine {
    pub fn new(cfg: HeartbeatConfig, run_number: RunNumber, clock: Box<dyn MonotonicClock>) -> Self {
        Self {
            cfg,
            run_number,
            origin: None,
            last_seen_timestamp: None,
            last_seen_wall_ms: 0,
            last_sent_time: None,
            next_seqno: 0,
            clock,
        }
    }

    /// Interval multiples in `(after, upper]`; with no previous emission,
    /// only the aligned boundary at or below `upper`.
    fn owed_times(&self, upper: Timestamp) -> Vec<Timestamp> {
        let interval = self.cfg.heartbeat_interval;
        let mut times = Vec::new();
        let mut next = match self.last_sent_time {
            Some(last) => (last / interval + 1) * interval,
            None => (upper / interval) * interval,
        };
        while next <= upper {
            times.push(next);
            next += interval;
        }
        times
    }

    fn stamp<T>(&mut self, mut slice: TimeSlice<T>) -> TimeSlice<T> {
        slice.seqno = self.next_seqno;
        self.next_seqno += 1;
        self.last_sent_time = Some(slice.start_time);
        slice
    }

    /// A payload arrived: emit every outstanding heartbeat with a timestamp
    /// at or before its start time, then the payload itself.
    pub fn on_payload<T: TimeSliced>(
        &mut self,
        slice: TimeSlice<T>,
    ) -> Result<Vec<TimeSlice<T>>, HeartbeatError> {
        if let Some(previous) = self.last_sent_time {
            if slice.start_time < previous {
                return Err(HeartbeatError::Monotonicity {
                    previous,
                    current: slice.start_time,
                });
            }
        }
        if self.origin.is_none() {
            self.origin = Some(slice.origin);
        }
        let origin = self.origin.unwrap_or_default();

        let mut out = Vec::new();
        for time in self.owed_times(slice.start_time) {
            let heartbeat = TimeSlice::heartbeat(origin, self.run_number, time);
            out.push(self.stamp(heartbeat));
        }
        self.last_seen_timestamp = Some(slice.start_time);
        self.last_seen_wall_ms = self.clock.now_ms();
        out.push(self.stamp(slice));
        Ok(out)
    }

    /// No payload arrived: extrapolate detector time from the wall clock
    /// and emit the heartbeats that have come due.
    pub fn on_tick<T: TimeSliced>(&mut self) -> Vec<TimeSlice<T>> {
        let Some(last_seen) = self.last_seen_timestamp else {
            // Nothing seen yet; there is no basis for extrapolation.
            return Vec::new();
        };
        let origin = self.origin.unwrap_or_default();
        let tpms = ticks_per_ms(self.cfg.clock_frequency_hz);
        let now_ms = self.clock.now_ms();
        let elapsed_ms = now_ms.saturating_sub(self.last_seen_wall_ms);
        let now_ticks = last_seen.saturating_add(elapsed_ms.saturating_mul(tpms));
        let boundary =
            now_ticks.saturating_sub(self.cfg.heartbeat_send_offset_ms.saturating_mul(tpms));

        let mut out = Vec::new();
        for time in self.owed_times(boundary) {
            let heartbeat = TimeSlice::heartbeat(origin, self.run_number, time);
            out.push(self.stamp(heartbeat));
        }
        out
    }
}

#[derive(Debug, Default)]
pub struct HeartbeatMetrics {
    received: AtomicU64,
    sent: AtomicU64,
    heartbeats_sent: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatInfo {
    pub received: u64,
    pub sent: u64,
    pub heartbeats_sent: u64,
}

impl HeartbeatMetrics {
    fn snapshot(&self) -> HeartbeatInfo {
        HeartbeatInfo {
            received: self.received.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
        }
    }
}

/// Component wrapping a [`HeartbeatEngine`] between two slice queues.
pub struct HeartbeatMaker<T: TimeSliced> {
    name: String,
    cfg: Option<HeartbeatConfig>,
    input: Arc<BoundedQueue<TimeSlice<T>>>,
    output: Arc<BoundedQueue<TimeSlice<T>>>,
    issues: IssueLog,
    metrics: Arc<HeartbeatMetrics>,
    clock: Option<Box<dyn MonotonicClock>>,
    worker: Option<WorkerThread>,
}

impl<T: TimeSliced> HeartbeatMaker<T> {
    pub fn new(
        name: &str,
        input: Arc<BoundedQueue<TimeSlice<T>>>,
        output: Arc<BoundedQueue<TimeSlice<T>>>,
        issues: IssueLog,
    ) -> Self {
        Self {
            name: name.to_string(),
            cfg: None,
            input,
            output,
            issues,
            metrics: Arc::new(HeartbeatMetrics::default()),
            clock: None,
            worker: None,
        }
    }

    /// Installs a clock for the next run; tests use a scripted one.
    pub fn set_clock(&mut self, clock: Box<dyn MonotonicClock>) {
        self.clock = Some(clock);
    }

    pub fn configure(&mut self, params: &Value) -> Result<(), ConfigError> {
        let cfg: HeartbeatConfig = config::from_value(params)?;
        if cfg.heartbeat_interval == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat interval must be nonzero".into(),
            ));
        }
        self.cfg = Some(cfg);
        Ok(())
    }

    pub fn start(&mut self, run_number: RunNumber) -> Result<(), ConfigError> {
        let cfg = self
            .cfg
            .clone()
            .ok_or_else(|| ConfigError::Invalid("heartbeat maker is not configured".into()))?;
        self.metrics = Arc::new(HeartbeatMetrics::default());
        let clock = self
            .clock
            .take()
            .unwrap_or_else(|| Box::new(SystemClock::new()));

        let mut state = MakerState {
            name: self.name.clone(),
            engine: HeartbeatEngine::new(cfg, run_number, clock),
            input: self.input.clone(),
            output: self.output.clone(),
            issues: self.issues.clone(),
            metrics: self.metrics.clone(),
        };
        self.worker = Some(WorkerThread::spawn(&format!("{}-heartbeat", self.name), {
            move |running| state.run(running)
        }));
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }
        let info = self.metrics.snapshot();
        self.issues.record(
            &self.name,
            Issue::RunSummary {
                summary: format!(
                    "received {} slices, sent {} with {} synthesized heartbeats",
                    info.received, info.sent, info.heartbeats_sent
                ),
            },
        );
    }

    pub fn scrap(&mut self) {
        self.cfg = None;
    }

    pub fn info(&self) -> HeartbeatInfo {
        self.metrics.snapshot()
    }
}

struct MakerState<T: TimeSliced> {
    name: String,
    engine: HeartbeatEngine,
    input: Arc<BoundedQueue<TimeSlice<T>>>,
    output: Arc<BoundedQueue<TimeSlice<T>>>,
    issues: IssueLog,
    metrics: Arc<HeartbeatMetrics>,
}

impl<T: TimeSliced> MakerState<T> {
    fn run(&mut self, running: Arc<std::sync::atomic::AtomicBool>) {
        loop {
            match self.input.recv(DEFAULT_RECV_TIMEOUT) {
                Ok(slice) => {
                    self.metrics.received.fetch_add(1, Ordering::Relaxed);
                    match self.engine.on_payload(slice) {
                        Ok(slices) => self.send_all(slices, &running),
                        Err(HeartbeatError::Monotonicity { previous, current }) => {
                            self.issues.record(
                                &self.name,
                                Issue::MonotonicityViolation { previous, current },
                            );
                            return;
                        }
                    }
                }
                Err(RecvError::Timeout) | Err(RecvError::Closed) => {
                    if !running.load(Ordering::Relaxed) {
                        break;
                    }
                    let due = self.engine.on_tick();
                    self.send_all(due, &running);
                }
            }
        }
    }

    fn send_all(&self, slices: Vec<TimeSlice<T>>, running: &Arc<std::sync::atomic::AtomicBool>) {
        for slice in slices {
            let heartbeat = slice.is_heartbeat();
            let mut pending = slice;
            // Retry until delivered; dropping here would leave a hole in
            // the seqno stream.
            loop {
                match self.output.send(pending, DEFAULT_SEND_TIMEOUT) {
                    Ok(()) => {
                        if heartbeat {
                            self.metrics.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
                        } else {
                            self.metrics.sent.fetch_add(1, Ordering::Relaxed);
                        }
                        break;
                    }
                    Err(err) => {
                        self.issues.record(
                            &self.name,
                            Issue::SendTimeout {
                                target: "output".into(),
                                timeout_ms: DEFAULT_SEND_TIMEOUT.as_millis() as u64,
                            },
                        );
                        if !running.load(Ordering::Relaxed) {
                            return;
                        }
                        pending = err.into_inner();
                    }
                }
            }
        }
    }
}
