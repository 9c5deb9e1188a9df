use super::types::{
    RunNumber, SequenceNumber, StreamId, Timestamp, TriggerNumber, INVALID_TRIGGER_NUMBER,
};

/// Request for every object whose `time_start` intersects
/// `[window_begin, window_end]`, answered with a [`super::fragment::Fragment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRequest {
    pub trigger_number: TriggerNumber,
    pub run_number: RunNumber,
    pub sequence_number: SequenceNumber,
    pub trigger_timestamp: Timestamp,
    pub component: StreamId,
    pub window_begin: Timestamp,
    pub window_end: Timestamp,
    pub destination: String,
}

/// Back-pressure signal from the downstream flow orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerInhibit {
    pub run_number: RunNumber,
    pub busy: bool,
}

/// Credit return from downstream. A token whose `trigger_number` is the
/// invalid sentinel grants initial credit without completing a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerDecisionToken {
    pub run_number: RunNumber,
    pub trigger_number: TriggerNumber,
}

impl TriggerDecisionToken {
    pub fn initial_credit(run_number: RunNumber) -> Self {
        Self {
            run_number,
            trigger_number: INVALID_TRIGGER_NUMBER,
        }
    }

    pub fn completes_trigger(&self) -> bool {
        self.trigger_number != INVALID_TRIGGER_NUMBER
    }
}

/// One readout component a decision asks data from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentRequest {
    pub component: StreamId,
    pub window_begin: Timestamp,
    pub window_end: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadoutKind {
    #[default]
    Localized,
    Extended,
}

impl ReadoutKind {
    pub fn code(self) -> u8 {
        match self {
            ReadoutKind::Localized => 1,
            ReadoutKind::Extended => 2,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            2 => ReadoutKind::Extended,
            _ => ReadoutKind::Localized,
        }
    }
}

/// Final emission of the module-level trigger: instructs readout to collect
/// the listed component windows for one accepted event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerDecision {
    pub trigger_number: TriggerNumber,
    pub run_number: RunNumber,
    pub trigger_timestamp: Timestamp,
    pub trigger_type: u16,
    pub readout_kind: ReadoutKind,
    pub components: Vec<ComponentRequest>,
}

/// Hardware signal interface event: an external/timing trigger input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HsiEvent {
    pub run_number: RunNumber,
    pub sequence: SequenceNumber,
    pub timestamp: Timestamp,
    pub signal_map: u32,
    pub header: u32,
}
