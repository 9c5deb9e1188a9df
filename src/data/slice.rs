use super::types::{RunNumber, SequenceNumber, StreamId, Timestamp};

/// Whether a slice carries payload objects or only marks progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SliceKind {
    #[default]
    Payload,
    Heartbeat,
}

/// Transport unit between streaming stages: a time window of objects from
/// one origin stream. A heartbeat slice carries no objects and has
/// `start_time == end_time`; it asserts that the producer has seen
/// everything earlier than `start_time`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimeSlice<T> {
    pub origin: StreamId,
    pub run_number: RunNumber,
    pub seqno: SequenceNumber,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub kind: SliceKind,
    pub objects: Vec<T>,
}

impl<T> TimeSlice<T> {
    pub fn payload(
        origin: StreamId,
        run_number: RunNumber,
        start_time: Timestamp,
        end_time: Timestamp,
        objects: Vec<T>,
    ) -> Self {
        Self {
            origin,
            run_number,
            seqno: 0,
            start_time,
            end_time,
            kind: SliceKind::Payload,
            objects,
        }
    }

    pub fn heartbeat(origin: StreamId, run_number: RunNumber, time: Timestamp) -> Self {
        Self {
            origin,
            run_number,
            seqno: 0,
            start_time: time,
            end_time: time,
            kind: SliceKind::Heartbeat,
            objects: Vec::new(),
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        self.kind == SliceKind::Heartbeat
    }

    pub fn is_payload(&self) -> bool {
        self.kind == SliceKind::Payload
    }
}
