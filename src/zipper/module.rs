use super::merge::{Merge, Node};
use crate::config::{self, ConfigError, MergerConfig};
use crate::data::primitives::TimeSliced;
use crate::data::slice::TimeSlice;
use crate::data::types::{StreamId, Timestamp};
use crate::observability::issue::{Issue, IssueLog};
use crate::runtime::queue::{
    BoundedQueue, RecvError, DEFAULT_RECV_TIMEOUT, DEFAULT_SEND_TIMEOUT,
};
use crate::runtime::worker::WorkerThread;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Merge ordering key: heartbeats sort before payloads that share a start
/// time. A heartbeat at t means "everything before t has been seen", so the
/// downstream flush it provokes must happen before payload at t arrives.
pub fn merge_ordering<T>(slice: &TimeSlice<T>) -> u64 {
    (slice.start_time << 1) | u64::from(slice.is_payload())
}

/// Start time recovered from a merge ordering key.
pub fn ordering_start_time(ordering: u64) -> Timestamp {
    ordering >> 1
}

#[derive(Debug, Default)]
pub struct MergerMetrics {
    received: AtomicU64,
    sent: AtomicU64,
    tardy: AtomicU64,
    send_dropped: AtomicU64,
}

/// Counter snapshot exposed for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergerInfo {
    pub received: u64,
    pub sent: u64,
    pub tardy: u64,
    pub send_dropped: u64,
}

impl MergerMetrics {
    fn snapshot(&self) -> MergerInfo {
        MergerInfo {
            received: self.received.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            tardy: self.tardy.load(Ordering::Relaxed),
            send_dropped: self.send_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Merges per-region slice streams into one stream whose start times are
/// monotonically non-decreasing, within a configurable latency bound.
pub struct StreamMerger<T: TimeSliced> {
    name: String,
    cfg: Option<MergerConfig>,
    input: Arc<BoundedQueue<TimeSlice<T>>>,
    output: Arc<BoundedQueue<TimeSlice<T>>>,
    issues: IssueLog,
    metrics: Arc<MergerMetrics>,
    tardy_counts: Arc<Mutex<HashMap<StreamId, u64>>>,
    worker: Option<WorkerThread>,
}

impl<T: TimeSliced> StreamMerger<T> {
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
            metrics: Arc::new(MergerMetrics::default()),
            tardy_counts: Arc::new(Mutex::new(HashMap::new())),
            worker: None,
        }
    }

    pub fn configure(&mut self, params: &Value) -> Result<(), ConfigError> {
        let cfg: MergerConfig = config::from_value(params)?;
        if cfg.cardinality == 0 {
            return Err(ConfigError::Invalid(
                "merger cardinality must be nonzero".into(),
            ));
        }
        self.cfg = Some(cfg);
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), ConfigError> {
        let cfg = self
            .cfg
            .clone()
            .ok_or_else(|| ConfigError::Invalid("merger is not configured".into()))?;
        self.metrics = Arc::new(MergerMetrics::default());
        self.tardy_counts.lock().unwrap().clear();

        let mut state = MergerState {
            name: self.name.clone(),
            cfg,
            cache: HashMap::new(),
            next_cache_key: 0,
            merge: Merge::new(0, Duration::ZERO),
            next_seqno: 0,
            input: self.input.clone(),
            output: self.output.clone(),
            issues: self.issues.clone(),
            metrics: self.metrics.clone(),
            tardy_counts: self.tardy_counts.clone(),
        };
        state.merge.set_cardinality(state.cfg.cardinality);
        state
            .merge
            .set_max_latency(Duration::from_millis(state.cfg.max_latency_ms));

        self.worker = Some(WorkerThread::spawn(&format!("{}-merge", self.name), {
            move |running| state.run(running)
        }));
        Ok(())
    }

    /// Stops the worker; remaining buffered nodes are flushed to the output
    /// before the thread exits.
    pub fn stop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }
        let info = self.metrics.snapshot();
        self.issues.record(
            &self.name,
            Issue::RunSummary {
                summary: format!(
                    "received {} slices, sent {}, {} tardy",
                    info.received, info.sent, info.tardy
                ),
            },
        );
    }

    pub fn scrap(&mut self) {
        self.cfg = None;
    }

    pub fn info(&self) -> MergerInfo {
        self.metrics.snapshot()
    }

    pub fn tardy_counts(&self) -> HashMap<StreamId, u64> {
        self.tardy_counts.lock().unwrap().clone()
    }
}

struct MergerState<T: TimeSliced> {
    name: String,
    cfg: MergerConfig,
    cache: HashMap<u64, TimeSlice<T>>,
    next_cache_key: u64,
    merge: Merge<u64>,
    next_seqno: u64,
    input: Arc<BoundedQueue<TimeSlice<T>>>,
    output: Arc<BoundedQueue<TimeSlice<T>>>,
    issues: IssueLog,
    metrics: Arc<MergerMetrics>,
    tardy_counts: Arc<Mutex<HashMap<StreamId, u64>>>,
}

impl<T: TimeSliced> MergerState<T> {
    fn run(&mut self, running: Arc<std::sync::atomic::AtomicBool>) {
        loop {
            // After a stop, keep reading until the input is drained.
            if !self.proc_one() && !running.load(Ordering::Relaxed) {
                break;
            }
        }
        self.flush();
    }

    /// Receives and feeds one slice. Returns false on a receive timeout.
    fn proc_one(&mut self) -> bool {
        let slice = match self.input.recv(DEFAULT_RECV_TIMEOUT) {
            Ok(slice) => slice,
            Err(RecvError::Timeout) | Err(RecvError::Closed) => {
                self.drain();
                return false;
            }
        };
        self.metrics.received.fetch_add(1, Ordering::Relaxed);

        let ordering = merge_ordering(&slice);
        let identity = slice.origin.pack();
        let origin = slice.origin;
        let start_time = slice.start_time;

        let key = self.next_cache_key;
        self.next_cache_key += 1;
        self.cache.insert(key, slice);

        if !self.merge.feed(key, ordering, identity, Instant::now()) {
            self.metrics.tardy.fetch_add(1, Ordering::Relaxed);
            *self.tardy_counts.lock().unwrap().entry(origin).or_insert(0) += 1;
            self.issues.record(
                &self.name,
                Issue::TardyInputSlice {
                    origin,
                    start_time,
                    last_emitted: ordering_start_time(self.merge.origin()),
                },
            );
            self.cache.remove(&key);
        }
        self.drain();
        true
    }

    fn drain(&mut self) {
        let mut nodes = Vec::new();
        if self.cfg.max_latency_ms > 0 {
            self.merge.drain_prompt(Instant::now(), &mut nodes);
        } else {
            self.merge.drain_waiting(&mut nodes);
        }
        self.send_out(nodes);
    }

    fn flush(&mut self) {
        let mut nodes = Vec::new();
        self.merge.drain_full(&mut nodes);
        self.send_out(nodes);
        self.merge.clear();
        self.cache.clear();
    }

    fn send_out(&mut self, nodes: Vec<Node<u64>>) {
        for node in nodes {
            let Some(mut slice) = self.cache.remove(&node.payload) else {
                continue;
            };
            // Tell the consumer where the merged stream was produced.
            slice.origin = StreamId::data_selection(self.cfg.region_id, self.cfg.element_id);
            slice.seqno = self.next_seqno;
            self.next_seqno += 1;

            match self.output.send(slice, DEFAULT_SEND_TIMEOUT) {
                Ok(()) => {
                    self.metrics.sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    // Output stuffed: complain and drop.
                    let _ = err.into_inner();
                    self.metrics.send_dropped.fetch_add(1, Ordering::Relaxed);
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
}
