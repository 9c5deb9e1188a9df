//! Real-time trigger decision pipeline core.
//!
//! Detector readout produces high-rate streams of trigger primitives,
//! progressively aggregated into activities and candidates. This crate
//! merges the partially-ordered per-region streams into one time-ordered
//! stream, re-windows it, keeps short-lived time-indexed buffers for data
//! requests, and assembles final trigger decisions gated by pause, inhibit
//! and token credit.

pub mod data {
    pub mod fragment;
    pub mod messages;
    pub mod primitives;
    pub mod slice;
    pub mod types;

    pub use fragment::*;
    pub use messages::*;
    pub use primitives::*;
    pub use slice::*;
    pub use types::*;
}

pub mod observability {
    pub mod issue;
    pub mod logging;

    pub use issue::*;
    pub use logging::*;
}

pub mod runtime {
    pub mod endpoint;
    pub mod queue;
    pub mod worker;

    pub use endpoint::*;
    pub use queue::*;
    pub use worker::*;
}

pub mod zipper {
    pub mod merge;
    pub mod module;

    pub use merge::*;
    pub use module::*;
}

pub mod buffer {
    pub mod module;
    pub mod store;

    pub use module::*;
    pub use store::*;
}

pub mod mlt {
    pub mod livetime;
    pub mod module;
    pub mod pending;
    pub mod tokens;

    pub use livetime::*;
    pub use module::*;
    pub use pending::*;
    pub use tokens::*;
}

pub mod clock;
pub mod config;
pub mod heartbeat;
pub mod hsi;
pub mod slicer;
pub mod wire;

pub use buffer::{BufferInfo, BufferModule, LatencyStore, RequestOutcome};
pub use clock::{ms_to_ticks, ticks_per_ms, ticks_to_ms, MonotonicClock, SystemClock};
pub use config::{
    BufferConfig, ConfigError, HeartbeatConfig, HsiConfig, HsiSignalWindow, LinkSpec, MergerConfig,
    MltConfig, ReadoutWindow, SlicerConfig,
};
pub use data::{
    CandidateAlgorithm, CandidateKind, ComponentRequest, DataRequest, Fragment, FragmentDispatch,
    FragmentHeader, FragmentKind, HsiEvent, PrimitiveKind, ReadoutKind, RunNumber, SequenceNumber,
    SliceKind, StreamId, SystemKind, Ticks, TimeSlice, TimeSliced, Timestamp, TriggerActivity,
    TriggerCandidate, TriggerDecision, TriggerDecisionToken, TriggerInhibit, TriggerNumber,
    TriggerPrimitive, DEFAULT_CLOCK_HZ, ERROR_DATA_NOT_FOUND, ERROR_INCOMPLETE,
    INVALID_TRIGGER_NUMBER, PRIMITIVE_ENCODED_LEN,
};
pub use heartbeat::{HeartbeatEngine, HeartbeatError, HeartbeatInfo, HeartbeatMaker};
pub use hsi::{HsiCandidateMaker, HsiConverter, HsiError, HsiInfo};
pub use mlt::{
    LivetimeCounter, LivetimeState, MltInfo, ModuleLevelTrigger, PendingDecision,
    PendingDecisions, TokenManager, OPEN_TRIGGER_GRACE_MS,
};
pub use observability::{
    Issue, IssueLog, IssueRecord, JsonLineLogger, LogLevel, LogRotationPolicy, LogSegment,
    LoggingError,
};
pub use runtime::{
    BoundedQueue, EndpointRegistry, RecvError, SendError, TransportError, WorkerThread,
    DEFAULT_MAILBOX_CAPACITY, DEFAULT_RECV_TIMEOUT, DEFAULT_SEND_TIMEOUT,
};
pub use slicer::{SlicerInfo, TimeWindowBuffer, WindowSlicer};
pub use wire::{FieldReader, FieldWriter, MessageKind, WireError, WireMessage};
pub use zipper::{merge_ordering, Merge, MergerInfo, Node, StreamMerger};
