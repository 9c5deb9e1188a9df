use super::logging::{JsonLineLogger, LogLevel};
use crate::data::types::{RunNumber, StreamId, Timestamp, TriggerNumber};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Operational conditions reported by pipeline components. Transient
/// conditions are recorded here and counted; the offending message is
/// dropped so the worker loop can continue.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Issue {
    #[error("start of run {run_number}")]
    StartOfRun { run_number: RunNumber },
    #[error("end of run {run_number}")]
    EndOfRun { run_number: RunNumber },
    #[error("triggers are paused")]
    TriggerPaused,
    #[error("triggers are active")]
    TriggerActive,
    #[error("trigger is inhibited in run {run_number}")]
    TriggerInhibited { run_number: RunNumber },
    #[error(
        "tardy input slice from {origin}: start time {start_time}, last emitted {last_emitted}"
    )]
    TardyInputSlice {
        origin: StreamId,
        start_time: Timestamp,
        last_emitted: Timestamp,
    },
    #[error("tardy output at {time_start}, window already advanced to {next_window_start}")]
    TardyOutput {
        time_start: Timestamp,
        next_window_start: Timestamp,
    },
    #[error("heartbeat at {start_time} is not aligned to the {window_ticks}-tick window")]
    UnalignedHeartbeat {
        start_time: Timestamp,
        window_ticks: Timestamp,
    },
    #[error("object fell below its window and was dropped")]
    WindowlessOutput,
    #[error("slices out of order: previous {previous}, current {current}")]
    OutOfOrderSlices {
        previous: Timestamp,
        current: Timestamp,
    },
    #[error("send to {target} timed out after {timeout_ms} ms")]
    SendTimeout { target: String, timeout_ms: u64 },
    #[error("ready decision at {time_candidate} overlaps a recently sent decision")]
    TcOutOfTimeout { time_candidate: Timestamp },
    #[error("decision send to {endpoint} failed")]
    DecisionSendFailed { endpoint: String },
    #[error("signal type {signal_map} is not configured")]
    SignalTypeError { signal_map: u32 },
    #[error("signal map {signal_map:#x} carries bits above the low byte")]
    BadTriggerBitmask { signal_map: u32 },
    #[error("token received for unknown trigger {trigger_number}")]
    UnexpectedToken { trigger_number: TriggerNumber },
    #[error("open trigger decisions at shutdown: {trigger_numbers:?}")]
    OpenTriggerDecisions { trigger_numbers: Vec<TriggerNumber> },
    #[error("heartbeat maker regressed from {previous} to {current}")]
    MonotonicityViolation {
        previous: Timestamp,
        current: Timestamp,
    },
    #[error("{summary}")]
    RunSummary { summary: String },
}

impl Issue {
    pub fn severity(&self) -> LogLevel {
        match self {
            Issue::StartOfRun { .. }
            | Issue::EndOfRun { .. }
            | Issue::TriggerPaused
            | Issue::TriggerActive
            | Issue::RunSummary { .. } => LogLevel::Info,
            Issue::TriggerInhibited { .. }
            | Issue::TardyInputSlice { .. }
            | Issue::TardyOutput { .. }
            | Issue::UnalignedHeartbeat { .. }
            | Issue::WindowlessOutput
            | Issue::OutOfOrderSlices { .. }
            | Issue::SendTimeout { .. }
            | Issue::UnexpectedToken { .. }
            | Issue::OpenTriggerDecisions { .. } => LogLevel::Warn,
            Issue::TcOutOfTimeout { .. }
            | Issue::DecisionSendFailed { .. }
            | Issue::SignalTypeError { .. }
            | Issue::BadTriggerBitmask { .. }
            | Issue::MonotonicityViolation { .. } => LogLevel::Error,
        }
    }
}

/// One recorded issue with the component that raised it.
#[derive(Debug, Clone, PartialEq)]
pub struct IssueRecord {
    pub component: String,
    pub issue: Issue,
}

struct IssueLogInner {
    entries: Vec<IssueRecord>,
    logger: JsonLineLogger,
}

/// Thread-safe issue sink shared by every component. Records are kept for
/// diagnostics and tests, and mirrored into the JSON-line logger.
#[derive(Clone)]
pub struct IssueLog {
    inner: Arc<Mutex<IssueLogInner>>,
}

impl Default for IssueLog {
    fn default() -> Self {
        Self::with_logger(JsonLineLogger::default())
    }
}

impl IssueLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_logger(logger: JsonLineLogger) -> Self {
        Self {
            inner: Arc::new(Mutex::new(IssueLogInner {
                entries: Vec::new(),
                logger,
            })),
        }
    }

    pub fn record(&self, component: &str, issue: Issue) {
        let mut guard = self.inner.lock().unwrap();
        let _ = guard
            .logger
            .log(issue.severity(), component, &issue.to_string());
        guard.entries.push(IssueRecord {
            component: component.to_string(),
            issue,
        });
    }

    pub fn snapshot(&self) -> Vec<IssueRecord> {
        self.inner.lock().unwrap().entries.clone()
    }

    /// Number of recorded issues matching the predicate.
    pub fn count_matching(&self, predicate: impl Fn(&Issue) -> bool) -> usize {
        self.inner
            .lock()
            .unwrap()
            .entries
            .iter()
            .filter(|record| predicate(&record.issue))
            .count()
    }

    pub fn log_lines(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .logger
            .segments()
            .flat_map(|segment| segment.lines().to_vec())
            .collect()
    }
}
