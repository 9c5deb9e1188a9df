//! Hardware signal interface events converted to timing trigger candidates.

use crate::config::{self, ConfigError, HsiConfig};
use crate::data::messages::HsiEvent;
use crate::data::primitives::{CandidateAlgorithm, CandidateKind, TriggerCandidate};
use crate::data::types::Ticks;
use crate::observability::issue::{Issue, IssueLog};
use crate::runtime::queue::{
    BoundedQueue, RecvError, DEFAULT_RECV_TIMEOUT, DEFAULT_SEND_TIMEOUT,
};
use crate::runtime::worker::WorkerThread;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HsiError {
    #[error("signal type {0} is not configured")]
    UnknownSignal(u32),
    #[error("signal map {0:#x} carries bits above the low byte")]
    BadBitmask(u32),
}

/// Pure conversion rules: per-signal readout offsets, or the passthrough
/// window applied uniformly with the low-byte bitmask restriction.
pub struct HsiConverter {
    signal_windows: HashMap<u32, (Ticks, Ticks)>,
    passthrough: bool,
    passthrough_window: (Ticks, Ticks),
}

impl HsiConverter {
    pub fn from_config(cfg: &HsiConfig) -> Self {
        Self {
            signal_windows: cfg.signal_window_map(),
            passthrough: cfg.hsi_trigger_type_passthrough,
            passthrough_window: (cfg.s0.time_before, cfg.s0.time_after),
        }
    }

    pub fn convert(&self, event: &HsiEvent) -> Result<TriggerCandidate, HsiError> {
        let (before, after) = if self.passthrough {
            if event.signal_map & !0xff != 0 {
                return Err(HsiError::BadBitmask(event.signal_map));
            }
            self.passthrough_window
        } else {
            self.signal_windows
                .get(&event.signal_map)
                .copied()
                .ok_or(HsiError::UnknownSignal(event.signal_map))?
        };
        Ok(TriggerCandidate {
            time_start: event.timestamp.saturating_sub(before),
            time_end: event.timestamp.saturating_add(after),
            time_candidate: event.timestamp,
            detid: event.signal_map,
            kind: CandidateKind::Timing,
            algorithm: CandidateAlgorithm::HsiEventConversion,
            inputs: Vec::new(),
        })
    }
}

#[derive(Debug, Default)]
pub struct HsiMetrics {
    events_received: AtomicU64,
    candidates_sent: AtomicU64,
    signal_errors: AtomicU64,
    bitmask_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HsiInfo {
    pub events_received: u64,
    pub candidates_sent: u64,
    pub signal_errors: u64,
    pub bitmask_errors: u64,
}

impl HsiMetrics {
    fn snapshot(&self) -> HsiInfo {
        HsiInfo {
            events_received: self.events_received.load(Ordering::Relaxed),
            candidates_sent: self.candidates_sent.load(Ordering::Relaxed),
            signal_errors: self.signal_errors.load(Ordering::Relaxed),
            bitmask_errors: self.bitmask_errors.load(Ordering::Relaxed),
        }
    }
}

/// Component turning HSI events into timing candidates for the trigger.
/// Malformed events are counted and dropped; the loop keeps running.
pub struct HsiCandidateMaker {
    name: String,
    cfg: Option<HsiConfig>,
    input: Arc<BoundedQueue<HsiEvent>>,
    output: Arc<BoundedQueue<TriggerCandidate>>,
    issues: IssueLog,
    metrics: Arc<HsiMetrics>,
    worker: Option<WorkerThread>,
}

impl HsiCandidateMaker {
    pub fn new(
        name: &str,
        input: Arc<BoundedQueue<HsiEvent>>,
        output: Arc<BoundedQueue<TriggerCandidate>>,
        issues: IssueLog,
    ) -> Self {
        Self {
            name: name.to_string(),
            cfg: None,
            input,
            output,
            issues,
            metrics: Arc::new(HsiMetrics::default()),
            worker: None,
        }
    }

    pub fn configure(&mut self, params: &Value) -> Result<(), ConfigError> {
        self.cfg = Some(config::from_value::<HsiConfig>(params)?);
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), ConfigError> {
        let cfg = self
            .cfg
            .clone()
            .ok_or_else(|| ConfigError::Invalid("hsi maker is not configured".into()))?;
        self.metrics = Arc::new(HsiMetrics::default());

        let state = HsiState {
            name: self.name.clone(),
            converter: HsiConverter::from_config(&cfg),
            input: self.input.clone(),
            output: self.output.clone(),
            issues: self.issues.clone(),
            metrics: self.metrics.clone(),
        };
        self.worker = Some(WorkerThread::spawn(&format!("{}-hsi", self.name), {
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
                    "received {} events, sent {} candidates",
                    info.events_received, info.candidates_sent
                ),
            },
        );
    }

    pub fn scrap(&mut self) {
        self.cfg = None;
    }

    pub fn info(&self) -> HsiInfo {
        self.metrics.snapshot()
    }
}

struct HsiState {
    name: String,
    converter: HsiConverter,
    input: Arc<BoundedQueue<HsiEvent>>,
    output: Arc<BoundedQueue<TriggerCandidate>>,
    issues: IssueLog,
    metrics: Arc<HsiMetrics>,
}

impl HsiState {
    fn run(&self, running: Arc<std::sync::atomic::AtomicBool>) {
        loop {
            let event = match self.input.recv(DEFAULT_RECV_TIMEOUT) {
                Ok(event) => event,
                Err(RecvError::Timeout) | Err(RecvError::Closed) => {
                    if !running.load(Ordering::Relaxed) {
                        break;
                    }
                    continue;
                }
            };
            self.metrics.events_received.fetch_add(1, Ordering::Relaxed);

            let candidate = match self.converter.convert(&event) {
                Ok(candidate) => candidate,
                Err(HsiError::UnknownSignal(signal_map)) => {
                    self.metrics.signal_errors.fetch_add(1, Ordering::Relaxed);
                    self.issues
                        .record(&self.name, Issue::SignalTypeError { signal_map });
                    continue;
                }
                Err(HsiError::BadBitmask(signal_map)) => {
                    self.metrics.bitmask_errors.fetch_add(1, Ordering::Relaxed);
                    self.issues
                        .record(&self.name, Issue::BadTriggerBitmask { signal_map });
                    continue;
                }
            };

            let mut pending = candidate;
            loop {
                match self.output.send(pending, DEFAULT_SEND_TIMEOUT) {
                    Ok(()) => {
                        self.metrics.candidates_sent.fetch_add(1, Ordering::Relaxed);
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
