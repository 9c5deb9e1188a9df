use super::store::{LatencyStore, RequestOutcome};
use crate::config::{self, BufferConfig, ConfigError};
use crate::data::fragment::{Fragment, FragmentDispatch, ERROR_DATA_NOT_FOUND, ERROR_INCOMPLETE};
use crate::data::messages::DataRequest;
use crate::data::primitives::TimeSliced;
use crate::data::slice::TimeSlice;
use crate::data::types::{StreamId, Timestamp};
use crate::observability::issue::{Issue, IssueLog};
use crate::runtime::queue::{
    BoundedQueue, RecvError, SendError, DEFAULT_RECV_TIMEOUT, DEFAULT_SEND_TIMEOUT,
};
use crate::runtime::worker::WorkerThread;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct BufferMetrics {
    objects_added: AtomicU64,
    requests_received: AtomicU64,
    fragments_sent: AtomicU64,
    requests_on_hold: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub objects_added: u64,
    pub requests_received: u64,
    pub fragments_sent: u64,
    pub requests_on_hold: u64,
}

impl BufferMetrics {
    fn snapshot(&self) -> BufferInfo {
        BufferInfo {
            objects_added: self.objects_added.load(Ordering::Relaxed),
            requests_received: self.requests_received.load(Ordering::Relaxed),
            fragments_sent: self.fragments_sent.load(Ordering::Relaxed),
            requests_on_hold: self.requests_on_hold.load(Ordering::Relaxed),
        }
    }
}

/// Latency buffer plus data-request handler: keeps the most recent objects
/// of one stream indexed by time, answers requests for arbitrary windows,
/// and parks requests whose window has not fully arrived yet.
pub struct BufferModule<T: TimeSliced> {
    name: String,
    cfg: Option<BufferConfig>,
    slices: Arc<BoundedQueue<TimeSlice<T>>>,
    requests: Arc<BoundedQueue<DataRequest>>,
    fragments: Arc<BoundedQueue<FragmentDispatch>>,
    issues: IssueLog,
    metrics: Arc<BufferMetrics>,
    worker: Option<WorkerThread>,
}

impl<T: TimeSliced> BufferModule<T> {
    pub fn new(
        name: &str,
        slices: Arc<BoundedQueue<TimeSlice<T>>>,
        requests: Arc<BoundedQueue<DataRequest>>,
        fragments: Arc<BoundedQueue<FragmentDispatch>>,
        issues: IssueLog,
    ) -> Self {
        Self {
            name: name.to_string(),
            cfg: None,
            slices,
            requests,
            fragments,
            issues,
            metrics: Arc::new(BufferMetrics::default()),
            worker: None,
        }
    }

    pub fn configure(&mut self, params: &Value) -> Result<(), ConfigError> {
        let cfg: BufferConfig = config::from_value(params)?;
        if cfg.capacity == 0 {
            return Err(ConfigError::Invalid("buffer capacity must be nonzero".into()));
        }
        self.cfg = Some(cfg);
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), ConfigError> {
        let cfg = self
            .cfg
            .clone()
            .ok_or_else(|| ConfigError::Invalid("buffer is not configured".into()))?;
        self.metrics = Arc::new(BufferMetrics::default());

        let mut state = BufferState {
            name: self.name.clone(),
            element: StreamId::data_selection(cfg.region_id, cfg.element_id),
            store: LatencyStore::new(cfg.capacity),
            on_hold: Vec::new(),
            slices: self.slices.clone(),
            requests: self.requests.clone(),
            fragments: self.fragments.clone(),
            issues: self.issues.clone(),
            metrics: self.metrics.clone(),
        };
        self.worker = Some(WorkerThread::spawn(&format!("{}-buffer", self.name), {
            move |running| state.run(running)
        }));
        Ok(())
    }

    /// Stops the worker. Requests still on hold are flushed as incomplete
    /// (or data-not-found when nothing was collected), then the store is
    /// cleared.
    pub fn stop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }
        let info = self.metrics.snapshot();
        self.issues.record(
            &self.name,
            Issue::RunSummary {
                summary: format!(
                    "buffered {} objects, answered {} of {} requests",
                    info.objects_added, info.fragments_sent, info.requests_received
                ),
            },
        );
    }

    pub fn scrap(&mut self) {
        self.cfg = None;
    }

    pub fn info(&self) -> BufferInfo {
        self.metrics.snapshot()
    }
}

struct OnHoldRequest<T> {
    request: DataRequest,
    collected: Vec<T>,
}

struct BufferState<T: TimeSliced> {
    name: String,
    element: StreamId,
    store: LatencyStore<T>,
    on_hold: Vec<OnHoldRequest<T>>,
    slices: Arc<BoundedQueue<TimeSlice<T>>>,
    requests: Arc<BoundedQueue<DataRequest>>,
    fragments: Arc<BoundedQueue<FragmentDispatch>>,
    issues: IssueLog,
    metrics: Arc<BufferMetrics>,
}

impl<T: TimeSliced> BufferState<T> {
    fn run(&mut self, running: Arc<AtomicBool>) {
        loop {
            let mut idle = true;

            match self.slices.recv(DEFAULT_RECV_TIMEOUT) {
                Ok(slice) => {
                    idle = false;
                    self.ingest(slice, &running);
                }
                Err(RecvError::Timeout) | Err(RecvError::Closed) => {}
            }

            match self.requests.recv(Duration::ZERO) {
                Ok(request) => {
                    idle = false;
                    self.handle_request(request, &running);
                }
                Err(RecvError::Timeout) | Err(RecvError::Closed) => {}
            }

            if idle && !running.load(Ordering::Relaxed) {
                break;
            }
        }
        self.flush_on_hold(&running);
        self.store.clear();
    }

    fn ingest(&mut self, slice: TimeSlice<T>, running: &Arc<AtomicBool>) {
        if slice.is_heartbeat() {
            return;
        }
        let mut newest: Option<Timestamp> = None;
        for object in slice.objects {
            let time_start = object.time_start();
            newest = Some(newest.map_or(time_start, |n: Timestamp| n.max(time_start)));
            for held in &mut self.on_hold {
                if time_start >= held.request.window_begin && time_start <= held.request.window_end
                {
                    held.collected.push(object.clone());
                }
            }
            self.store.insert(object);
            self.metrics.objects_added.fetch_add(1, Ordering::Relaxed);
        }

        // Requests whose window closed before the newest arrival can be
        // answered in one pass.
        if let Some(newest) = newest {
            let mut index = 0;
            while index < self.on_hold.len() {
                if self.on_hold[index].request.window_end < newest {
                    let held = self.on_hold.remove(index);
                    let mut fragment =
                        Fragment::from_objects(&held.request, self.element, &held.collected);
                    if held.collected.is_empty() {
                        fragment.set_error_bit(ERROR_DATA_NOT_FOUND, true);
                    }
                    self.send_fragment(fragment, held.request.destination, running);
                } else {
                    index += 1;
                }
            }
        }
    }

    fn handle_request(&mut self, request: DataRequest, running: &Arc<AtomicBool>) {
        self.metrics.requests_received.fetch_add(1, Ordering::Relaxed);
        match self.store.classify(request.window_begin, request.window_end) {
            RequestOutcome::Success => {
                let objects = self
                    .store
                    .objects_in_window(request.window_begin, request.window_end);
                let fragment = Fragment::from_objects(&request, self.element, &objects);
                self.send_fragment(fragment, request.destination, running);
            }
            RequestOutcome::Empty => {
                let mut fragment = Fragment::from_objects(&request, self.element, &[] as &[T]);
                fragment.set_error_bit(ERROR_DATA_NOT_FOUND, true);
                self.send_fragment(fragment, request.destination, running);
            }
            RequestOutcome::Late => {
                // Keep whatever already overlaps; the rest arrives later
                // (or the run stops first).
                let collected = self
                    .store
                    .objects_in_window(request.window_begin, request.window_end);
                self.on_hold.push(OnHoldRequest { request, collected });
                self.metrics.requests_on_hold.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn flush_on_hold(&mut self, running: &Arc<AtomicBool>) {
        for held in std::mem::take(&mut self.on_hold) {
            let mut fragment = Fragment::from_objects(&held.request, self.element, &held.collected);
            if held.collected.is_empty() {
                fragment.set_error_bit(ERROR_DATA_NOT_FOUND, true);
            } else {
                fragment.set_error_bit(ERROR_INCOMPLETE, true);
            }
            self.send_fragment(fragment, held.request.destination, running);
        }
    }

    /// Fragments are never dropped: retry until the send lands or the
    /// queue disappears.
    fn send_fragment(&self, fragment: Fragment, destination: String, running: &Arc<AtomicBool>) {
        let mut dispatch = FragmentDispatch {
            fragment,
            destination,
        };
        loop {
            match self.fragments.send(dispatch, DEFAULT_SEND_TIMEOUT) {
                Ok(()) => {
                    self.metrics.fragments_sent.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(SendError::Closed(_)) => return,
                Err(SendError::Timeout { value, .. }) => {
                    self.issues.record(
                        &self.name,
                        Issue::SendTimeout {
                            target: "fragments".into(),
                            timeout_ms: DEFAULT_SEND_TIMEOUT.as_millis() as u64,
                        },
                    );
                    dispatch = value;
                    // Always make at least one more attempt after a stop so
                    // late fragments are not lost to an unlucky timeout.
                    if !running.load(Ordering::Relaxed) && self.fragments.len() >= self.fragments.capacity() {
                        return;
                    }
                }
            }
        }
    }
}
