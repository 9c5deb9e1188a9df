//! Heartbeat-driven windowed set builder.
//!
//! Transforms the post-merge stream of per-region objects into uniform
//! fixed-duration windows. Objects may arrive in arbitrary (but not too
//! tardy) order inside a window; heartbeats guarantee progress when no
//! payload arrives.

use crate::config::{self, ConfigError, SlicerConfig};
use crate::data::primitives::TimeSliced;
use crate::data::slice::{SliceKind, TimeSlice};
use crate::data::types::{RunNumber, StreamId, Ticks, Timestamp};
use crate::observability::issue::{Issue, IssueLog};
use crate::runtime::queue::{
    BoundedQueue, RecvError, DEFAULT_RECV_TIMEOUT, DEFAULT_SEND_TIMEOUT,
};
use crate::runtime::worker::WorkerThread;
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct TimeKeyed<T> {
    time_start: Timestamp,
    seq: u64,
    object: T,
}

impl<T> PartialEq for TimeKeyed<T> {
    fn eq(&self, other: &Self) -> bool {
        self.time_start == other.time_start && self.seq == other.seq
    }
}

impl<T> Eq for TimeKeyed<T> {}

impl<T> PartialOrd for TimeKeyed<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for TimeKeyed<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.time_start
            .cmp(&other.time_start)
            .then(self.seq.cmp(&other.seq))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct HeartbeatEntry {
    start_time: Timestamp,
    origin: StreamId,
    run_number: RunNumber,
    seq: u64,
}

impl PartialOrd for HeartbeatEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeartbeatEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.start_time
            .cmp(&other.start_time)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Buffers out-of-order objects and queued heartbeats, emitting uniform
/// `[n*w, (n+1)*w)` windows once their grace period has passed.
pub struct TimeWindowBuffer<T> {
    name: String,
    buffer: BinaryHeap<Reverse<TimeKeyed<T>>>,
    heartbeats: BinaryHeap<Reverse<HeartbeatEntry>>,
    next_window_start: Option<Timestamp>,
    window_ticks: Ticks,
    buffer_ticks: Ticks,
    largest_time: Timestamp,
    next_seq: u64,
    issues: IssueLog,
}

impl<T: TimeSliced> TimeWindowBuffer<T> {
    pub fn new(name: &str, window_ticks: Ticks, buffer_ticks: Ticks, issues: IssueLog) -> Self {
        assert!(window_ticks > 0, "window size must be nonzero");
        Self {
            name: name.to_string(),
            buffer: BinaryHeap::new(),
            heartbeats: BinaryHeap::new(),
            next_window_start: None,
            window_ticks,
            buffer_ticks,
            largest_time: 0,
            next_seq: 0,
            issues,
        }
    }

    pub fn set_window_ticks(&mut self, window_ticks: Ticks) {
        assert!(window_ticks > 0, "window size must be nonzero");
        self.window_ticks = window_ticks;
        // Realign the pending window to the new multiple.
        if let Some(next) = self.next_window_start {
            self.next_window_start = Some((next / window_ticks) * window_ticks);
        }
    }

    pub fn set_buffer_ticks(&mut self, buffer_ticks: Ticks) {
        self.buffer_ticks = buffer_ticks;
    }

    /// Inserts objects. Objects predating the pending window are tardy:
    /// warned and discarded.
    pub fn buffer(&mut self, objects: Vec<T>) {
        if self.next_window_start.is_none() {
            if let Some(first) = objects.first() {
                self.next_window_start =
                    Some((first.time_start() / self.window_ticks) * self.window_ticks);
            }
        }
        let next_window_start = self.next_window_start.unwrap_or(0);
        for object in objects {
            let time_start = object.time_start();
            if time_start < next_window_start {
                self.issues.record(
                    &self.name,
                    Issue::TardyOutput {
                        time_start,
                        next_window_start,
                    },
                );
                continue;
            }
            self.largest_time = self.largest_time.max(time_start);
            let seq = self.next_seq;
            self.next_seq += 1;
            self.buffer.push(Reverse(TimeKeyed {
                time_start,
                seq,
                object,
            }));
        }
    }

    /// Queues a heartbeat. Heartbeat start times must sit on window
    /// boundaries; unaligned or tardy heartbeats are discarded.
    pub fn buffer_heartbeat(&mut self, heartbeat: &TimeSlice<T>) {
        if self.next_window_start.is_none() {
            self.next_window_start = Some(heartbeat.start_time);
        }
        let next_window_start = self.next_window_start.unwrap_or(0);
        if heartbeat.start_time < next_window_start {
            self.issues.record(
                &self.name,
                Issue::TardyOutput {
                    time_start: heartbeat.start_time,
                    next_window_start,
                },
            );
        } else if heartbeat.start_time % self.window_ticks != 0 {
            self.issues.record(
                &self.name,
                Issue::UnalignedHeartbeat {
                    start_time: heartbeat.start_time,
                    window_ticks: self.window_ticks,
                },
            );
        } else {
            self.largest_time = self.largest_time.max(heartbeat.start_time);
            let seq = self.next_seq;
            self.next_seq += 1;
            self.heartbeats.push(Reverse(HeartbeatEntry {
                start_time: heartbeat.start_time,
                origin: heartbeat.origin,
                run_number: heartbeat.run_number,
                seq,
            }));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty() && self.heartbeats.is_empty()
    }

    /// True once the grace period past the pending window has elapsed in
    /// data time, or a heartbeat sits exactly at the pending window start.
    pub fn ready(&self) -> bool {
        if self.is_empty() {
            return false;
        }
        let Some(next_window_start) = self.next_window_start else {
            return false;
        };
        if let Some(Reverse(hb)) = self.heartbeats.peek() {
            if hb.start_time == next_window_start {
                return true;
            }
        }
        self.largest_time > next_window_start + self.window_ticks + self.buffer_ticks
    }

    pub fn reset(&mut self) {
        self.next_window_start = None;
        self.largest_time = 0;
        self.buffer.clear();
        self.heartbeats.clear();
    }

    /// Emits the next slice. A heartbeat sitting at the pending window
    /// start is emitted first *without* advancing the window: payload for
    /// that same window follows on the next flush, preserving the
    /// heartbeat-before-payload ordering.
    pub fn flush(&mut self) -> TimeSlice<T> {
        let next_window_start = self.next_window_start.unwrap_or(0);

        let heartbeat_due = self
            .heartbeats
            .peek()
            .is_some_and(|Reverse(hb)| hb.start_time == next_window_start);
        if heartbeat_due {
            let Reverse(hb) = self.heartbeats.pop().expect("peeked above");
            return TimeSlice::heartbeat(hb.origin, hb.run_number, hb.start_time);
        }

        let start_time = next_window_start;
        let end_time = next_window_start + self.window_ticks;
        self.next_window_start = Some(end_time);

        let mut objects = Vec::new();
        while let Some(Reverse(entry)) = self.buffer.peek() {
            if entry.time_start >= end_time {
                break;
            }
            if entry.time_start < start_time {
                self.issues.record(&self.name, Issue::WindowlessOutput);
                self.buffer.pop();
                continue;
            }
            let Reverse(entry) = self.buffer.pop().unwrap();
            objects.push(entry.object);
        }
        TimeSlice::payload(StreamId::default(), 0, start_time, end_time, objects)
    }
}

#[derive(Debug, Default)]
pub struct SlicerMetrics {
    received: AtomicU64,
    sent: AtomicU64,
    heartbeats_sent: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlicerInfo {
    pub received: u64,
    pub sent: u64,
    pub heartbeats_sent: u64,
}

impl SlicerMetrics {
    fn snapshot(&self) -> SlicerInfo {
        SlicerInfo {
            received: self.received.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
        }
    }
}

/// Component wrapping a [`TimeWindowBuffer`]: consumes merged slices,
/// re-windows their objects, and emits uniform windows plus the heartbeats
/// that keep downstream consumers advancing.
pub struct WindowSlicer<T: TimeSliced> {
    name: String,
    cfg: Option<SlicerConfig>,
    input: Arc<BoundedQueue<TimeSlice<T>>>,
    output: Arc<BoundedQueue<TimeSlice<T>>>,
    issues: IssueLog,
    metrics: Arc<SlicerMetrics>,
    worker: Option<WorkerThread>,
}

impl<T: TimeSliced> WindowSlicer<T> {
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
            metrics: Arc::new(SlicerMetrics::default()),
            worker: None,
        }
    }

    pub fn configure(&mut self, params: &Value) -> Result<(), ConfigError> {
        let cfg: SlicerConfig = config::from_value(params)?;
        if cfg.window_ticks == 0 {
            return Err(ConfigError::Invalid("window size must be nonzero".into()));
        }
        self.cfg = Some(cfg);
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), ConfigError> {
        let cfg = self
            .cfg
            .clone()
            .ok_or_else(|| ConfigError::Invalid("slicer is not configured".into()))?;
        self.metrics = Arc::new(SlicerMetrics::default());

        let mut state = SlicerState {
            name: self.name.clone(),
            out_origin: StreamId::data_selection(cfg.region_id, cfg.element_id),
            buffer: TimeWindowBuffer::new(
                &self.name,
                cfg.window_ticks,
                cfg.buffer_ticks,
                self.issues.clone(),
            ),
            prev_start_time: None,
            run_number: 0,
            next_seqno: 0,
            input: self.input.clone(),
            output: self.output.clone(),
            issues: self.issues.clone(),
            metrics: self.metrics.clone(),
        };
        self.worker = Some(WorkerThread::spawn(&format!("{}-slice", self.name), {
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
                    "received {} slices, sent {} windows and {} heartbeats",
                    info.received, info.sent, info.heartbeats_sent
                ),
            },
        );
    }

    pub fn scrap(&mut self) {
        self.cfg = None;
    }

    pub fn info(&self) -> SlicerInfo {
        self.metrics.snapshot()
    }
}

struct SlicerState<T: TimeSliced> {
    name: String,
    out_origin: StreamId,
    buffer: TimeWindowBuffer<T>,
    prev_start_time: Option<Timestamp>,
    run_number: RunNumber,
    next_seqno: u64,
    input: Arc<BoundedQueue<TimeSlice<T>>>,
    output: Arc<BoundedQueue<TimeSlice<T>>>,
    issues: IssueLog,
    metrics: Arc<SlicerMetrics>,
}

impl<T: TimeSliced> SlicerState<T> {
    fn run(&mut self, running: Arc<std::sync::atomic::AtomicBool>) {
        loop {
            match self.input.recv(DEFAULT_RECV_TIMEOUT) {
                Ok(slice) => self.process(slice),
                Err(RecvError::Timeout) | Err(RecvError::Closed) => {
                    if !running.load(Ordering::Relaxed) {
                        break;
                    }
                }
            }
        }
        self.drain();
    }

    fn process(&mut self, slice: TimeSlice<T>) {
        self.metrics.received.fetch_add(1, Ordering::Relaxed);
        if let Some(previous) = self.prev_start_time {
            if slice.start_time < previous {
                self.issues.record(
                    &self.name,
                    Issue::OutOfOrderSlices {
                        previous,
                        current: slice.start_time,
                    },
                );
            }
        }
        self.prev_start_time = Some(slice.start_time);

        self.run_number = slice.run_number;
        match slice.kind {
            SliceKind::Payload => self.buffer.buffer(slice.objects),
            SliceKind::Heartbeat => self.buffer.buffer_heartbeat(&slice),
        }
        self.emit_ready();
    }

    fn emit_ready(&mut self) {
        while self.buffer.ready() {
            let slice = self.buffer.flush();
            self.send(slice);
        }
    }

    /// End of run: emit remaining windows even though their grace periods
    /// have not elapsed.
    fn drain(&mut self) {
        while !self.buffer.is_empty() {
            let slice = self.buffer.flush();
            self.send(slice);
        }
        self.buffer.reset();
    }

    fn send(&mut self, mut slice: TimeSlice<T>) {
        // Empty payload windows carry no information; heartbeats cover the
        // silent stretches.
        if slice.is_payload() && slice.objects.is_empty() {
            return;
        }
        if slice.is_payload() {
            slice.origin = self.out_origin;
            slice.run_number = self.run_number;
        }
        slice.seqno = self.next_seqno;
        self.next_seqno += 1;
        let heartbeat = slice.is_heartbeat();
        match self.output.send(slice, DEFAULT_SEND_TIMEOUT) {
            Ok(()) => {
                if heartbeat {
                    self.metrics.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.metrics.sent.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(err) => {
                let _ = err.into_inner();
                self.issues.record(
                    &self.name,
                    Issue::SendTimeout {
                        target: "output".into(),
                        timeout_ms: DEFAULT_SEND_TIMEOUT.as_millis() as u64,
                    },
                );
            }
        }
    }
}
