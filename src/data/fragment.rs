use super::messages::DataRequest;
use super::primitives::TimeSliced;
use super::types::{RunNumber, SequenceNumber, StreamId, Timestamp, TriggerNumber};
use bytes::{Bytes, BytesMut};

/// Interpretation of a fragment payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FragmentKind {
    #[default]
    Unknown,
    /// Contiguous fixed-size primitive records.
    TriggerPrimitives,
    /// Self-delimited activity records.
    TriggerActivities,
    /// Self-delimited candidate records.
    TriggerCandidates,
}

impl FragmentKind {
    pub fn code(self) -> u8 {
        match self {
            FragmentKind::Unknown => 0,
            FragmentKind::TriggerPrimitives => 1,
            FragmentKind::TriggerActivities => 2,
            FragmentKind::TriggerCandidates => 3,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            1 => FragmentKind::TriggerPrimitives,
            2 => FragmentKind::TriggerActivities,
            3 => FragmentKind::TriggerCandidates,
            _ => FragmentKind::Unknown,
        }
    }
}

/// Requested window held no data (already evicted, or never seen).
pub const ERROR_DATA_NOT_FOUND: u32 = 1 << 0;
/// Request was answered at shutdown before its window fully arrived.
pub const ERROR_INCOMPLETE: u32 = 1 << 1;

/// Header describing a fragment's provenance and window.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FragmentHeader {
    pub trigger_number: TriggerNumber,
    pub trigger_timestamp: Timestamp,
    pub window_begin: Timestamp,
    pub window_end: Timestamp,
    pub run_number: RunNumber,
    pub element: StreamId,
    pub fragment_kind: FragmentKind,
    pub sequence_number: SequenceNumber,
    pub error_bits: u32,
}

/// Response to a data request: a header plus the packed payload of every
/// object overlapping the requested window.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub header: FragmentHeader,
    pub payload: Bytes,
}

impl Fragment {
    /// Builds a fragment for `request` from the objects that fall inside its
    /// window, stamped with the answering buffer's identity.
    pub fn from_objects<T: TimeSliced>(
        request: &DataRequest,
        element: StreamId,
        objects: &[T],
    ) -> Self {
        let mut payload = BytesMut::with_capacity(
            objects.iter().map(TimeSliced::encoded_len).sum::<usize>(),
        );
        for object in objects {
            object.encode(&mut payload);
        }
        Self {
            header: FragmentHeader {
                trigger_number: request.trigger_number,
                trigger_timestamp: request.trigger_timestamp,
                window_begin: request.window_begin,
                window_end: request.window_end,
                run_number: request.run_number,
                element,
                fragment_kind: T::FRAGMENT_KIND,
                sequence_number: request.sequence_number,
                error_bits: 0,
            },
            payload: payload.freeze(),
        }
    }

    pub fn set_error_bit(&mut self, bit: u32, on: bool) {
        if on {
            self.header.error_bits |= bit;
        } else {
            self.header.error_bits &= !bit;
        }
    }

    pub fn has_error_bit(&self, bit: u32) -> bool {
        self.header.error_bits & bit != 0
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Decodes the payload back into objects. Used by consumers and tests;
    /// returns `None` if the payload is malformed for the fragment kind.
    pub fn objects<T: TimeSliced>(&self) -> Option<Vec<T>> {
        let mut buf = self.payload.clone();
        let mut out = Vec::new();
        while !buf.is_empty() {
            out.push(T::decode(&mut buf)?);
        }
        Some(out)
    }
}

/// A fragment paired with the endpoint it should be delivered to.
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentDispatch {
    pub fragment: Fragment,
    pub destination: String,
}
