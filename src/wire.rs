//! Wire codec for everything that crosses a named endpoint.
//!
//! Messages use a simple self-describing binary format so that non-Rust
//! peers can parse them: a one-byte message kind, then a sequence of
//! length-prefixed fields. Each field is `id (u8) | len (u32 BE) | bytes`.
//! Decoders ignore unknown field ids, so fields can be added without
//! breaking older readers. Only the field *set* is part of the contract;
//! the ids are private to this codec.

use crate::data::fragment::{Fragment, FragmentHeader, FragmentKind};
use crate::data::messages::{
    ComponentRequest, DataRequest, HsiEvent, ReadoutKind, TriggerDecision, TriggerDecisionToken,
    TriggerInhibit,
};
use crate::data::primitives::TimeSliced;
use crate::data::slice::{SliceKind, TimeSlice};
use crate::data::types::{StreamId, SystemKind};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Message discriminants carried in the first byte of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    TimeSlice = 1,
    DataRequest = 2,
    TriggerInhibit = 3,
    TriggerDecisionToken = 4,
    TriggerDecision = 5,
    HsiEvent = 6,
    Fragment = 7,
}

impl MessageKind {
    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(MessageKind::TimeSlice),
            2 => Some(MessageKind::DataRequest),
            3 => Some(MessageKind::TriggerInhibit),
            4 => Some(MessageKind::TriggerDecisionToken),
            5 => Some(MessageKind::TriggerDecision),
            6 => Some(MessageKind::HsiEvent),
            7 => Some(MessageKind::Fragment),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("message truncated")]
    Truncated,
    #[error("unknown message kind {0}")]
    UnknownKind(u8),
    #[error("expected message kind {expected:?}, found {found:?}")]
    KindMismatch {
        expected: MessageKind,
        found: MessageKind,
    },
    #[error("missing field {0}")]
    MissingField(u8),
    #[error("field {field} has length {found}, expected {expected}")]
    BadFieldLength {
        field: u8,
        expected: usize,
        found: usize,
    },
    #[error("field {field} holds invalid enum value {value}")]
    BadEnum { field: u8, value: u64 },
    #[error("field {0} is not valid UTF-8")]
    BadUtf8(u8),
    #[error("object payload is malformed")]
    BadPayload,
}

/// Serializes fields into a frame body.
pub struct FieldWriter {
    buf: BytesMut,
}

impl FieldWriter {
    fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    pub fn put_u64(&mut self, id: u8, value: u64) {
        self.buf.put_u8(id);
        self.buf.put_u32(8);
        self.buf.put_u64(value);
    }

    pub fn put_u32(&mut self, id: u8, value: u32) {
        self.buf.put_u8(id);
        self.buf.put_u32(4);
        self.buf.put_u32(value);
    }

    pub fn put_u16(&mut self, id: u8, value: u16) {
        self.buf.put_u8(id);
        self.buf.put_u32(2);
        self.buf.put_u16(value);
    }

    pub fn put_u8(&mut self, id: u8, value: u8) {
        self.buf.put_u8(id);
        self.buf.put_u32(1);
        self.buf.put_u8(value);
    }

    pub fn put_bool(&mut self, id: u8, value: bool) {
        self.put_u8(id, value as u8);
    }

    pub fn put_str(&mut self, id: u8, value: &str) {
        self.buf.put_u8(id);
        self.buf.put_u32(value.len() as u32);
        self.buf.put_slice(value.as_bytes());
    }

    pub fn put_raw(&mut self, id: u8, value: &[u8]) {
        self.buf.put_u8(id);
        self.buf.put_u32(value.len() as u32);
        self.buf.put_slice(value);
    }
}

/// Parsed frame body: fields by id, repeats preserved in order.
pub struct FieldReader {
    fields: Vec<(u8, Bytes)>,
}

impl FieldReader {
    fn parse(mut body: Bytes) -> Result<Self, WireError> {
        let mut fields = Vec::new();
        while !body.is_empty() {
            if body.remaining() < 5 {
                return Err(WireError::Truncated);
            }
            let id = body.get_u8();
            let len = body.get_u32() as usize;
            if body.remaining() < len {
                return Err(WireError::Truncated);
            }
            fields.push((id, body.split_to(len)));
        }
        Ok(Self { fields })
    }

    fn first(&self, id: u8) -> Option<&Bytes> {
        self.fields.iter().find(|(fid, _)| *fid == id).map(|(_, b)| b)
    }

    /// All occurrences of a repeated field, in frame order.
    pub fn all(&self, id: u8) -> impl Iterator<Item = &Bytes> {
        self.fields
            .iter()
            .filter(move |(fid, _)| *fid == id)
            .map(|(_, b)| b)
    }

    fn fixed(&self, id: u8, expected: usize) -> Result<Bytes, WireError> {
        let bytes = self.first(id).ok_or(WireError::MissingField(id))?;
        if bytes.len() != expected {
            return Err(WireError::BadFieldLength {
                field: id,
                expected,
                found: bytes.len(),
            });
        }
        Ok(bytes.clone())
    }

    pub fn u64(&self, id: u8) -> Result<u64, WireError> {
        Ok(self.fixed(id, 8)?.get_u64())
    }

    pub fn u32(&self, id: u8) -> Result<u32, WireError> {
        Ok(self.fixed(id, 4)?.get_u32())
    }

    pub fn u16(&self, id: u8) -> Result<u16, WireError> {
        Ok(self.fixed(id, 2)?.get_u16())
    }

    pub fn u8(&self, id: u8) -> Result<u8, WireError> {
        Ok(self.fixed(id, 1)?.get_u8())
    }

    pub fn bool(&self, id: u8) -> Result<bool, WireError> {
        Ok(self.u8(id)? != 0)
    }

    pub fn str(&self, id: u8) -> Result<String, WireError> {
        let bytes = self.first(id).ok_or(WireError::MissingField(id))?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::BadUtf8(id))
    }

    pub fn raw(&self, id: u8) -> Result<Bytes, WireError> {
        self.first(id).cloned().ok_or(WireError::MissingField(id))
    }
}

/// A message that can cross an endpoint.
pub trait WireMessage: Sized {
    const KIND: MessageKind;

    fn write_fields(&self, w: &mut FieldWriter);
    fn read_fields(r: &FieldReader) -> Result<Self, WireError>;
}

/// Encodes a message into a complete frame.
pub fn encode<M: WireMessage>(message: &M) -> Bytes {
    let mut writer = FieldWriter::new();
    message.write_fields(&mut writer);
    let body = writer.buf;
    let mut frame = BytesMut::with_capacity(1 + 4 + body.len());
    frame.put_u8(M::KIND as u8);
    frame.put_u32(body.len() as u32);
    frame.put_slice(&body);
    frame.freeze()
}

/// Returns the kind of a frame without consuming it.
pub fn peek_kind(frame: &Bytes) -> Result<MessageKind, WireError> {
    let code = *frame.first().ok_or(WireError::Truncated)?;
    MessageKind::from_code(code).ok_or(WireError::UnknownKind(code))
}

/// Decodes a complete frame into the expected message type.
pub fn decode<M: WireMessage>(mut frame: Bytes) -> Result<M, WireError> {
    if frame.remaining() < 5 {
        return Err(WireError::Truncated);
    }
    let code = frame.get_u8();
    let found = MessageKind::from_code(code).ok_or(WireError::UnknownKind(code))?;
    if found != M::KIND {
        return Err(WireError::KindMismatch {
            expected: M::KIND,
            found,
        });
    }
    let len = frame.get_u32() as usize;
    if frame.remaining() < len {
        return Err(WireError::Truncated);
    }
    let reader = FieldReader::parse(frame.split_to(len))?;
    M::read_fields(&reader)
}

fn stream_id_from(packed: u64, field: u8) -> Result<StreamId, WireError> {
    let system = SystemKind::from_code((packed >> 48) as u8).ok_or(WireError::BadEnum {
        field,
        value: packed >> 48,
    })?;
    Ok(StreamId {
        system,
        region: (packed >> 32) as u16,
        element: packed as u32,
    })
}

mod field {
    pub const RUN_NUMBER: u8 = 1;
    pub const TRIGGER_NUMBER: u8 = 2;
    pub const SEQUENCE_NUMBER: u8 = 3;
    pub const TIMESTAMP: u8 = 4;
    pub const WINDOW_BEGIN: u8 = 5;
    pub const WINDOW_END: u8 = 6;
    pub const ORIGIN: u8 = 7;
    pub const DESTINATION: u8 = 8;
    pub const BUSY: u8 = 9;
    pub const TRIGGER_TYPE: u8 = 10;
    pub const READOUT_KIND: u8 = 11;
    pub const COMPONENT: u8 = 12;
    pub const SLICE_KIND: u8 = 13;
    pub const OBJECT_KIND: u8 = 14;
    pub const OBJECTS: u8 = 15;
    pub const START_TIME: u8 = 16;
    pub const END_TIME: u8 = 17;
    pub const SIGNAL_MAP: u8 = 18;
    pub const HEADER: u8 = 19;
    pub const ERROR_BITS: u8 = 20;
    pub const PAYLOAD: u8 = 21;
}

impl WireMessage for TriggerInhibit {
    const KIND: MessageKind = MessageKind::TriggerInhibit;

    fn write_fields(&self, w: &mut FieldWriter) {
        w.put_u32(field::RUN_NUMBER, self.run_number);
        w.put_bool(field::BUSY, self.busy);
    }

    fn read_fields(r: &FieldReader) -> Result<Self, WireError> {
        Ok(Self {
            run_number: r.u32(field::RUN_NUMBER)?,
            busy: r.bool(field::BUSY)?,
        })
    }
}

impl WireMessage for TriggerDecisionToken {
    const KIND: MessageKind = MessageKind::TriggerDecisionToken;

    fn write_fields(&self, w: &mut FieldWriter) {
        w.put_u32(field::RUN_NUMBER, self.run_number);
        w.put_u64(field::TRIGGER_NUMBER, self.trigger_number);
    }

    fn read_fields(r: &FieldReader) -> Result<Self, WireError> {
        Ok(Self {
            run_number: r.u32(field::RUN_NUMBER)?,
            trigger_number: r.u64(field::TRIGGER_NUMBER)?,
        })
    }
}

impl WireMessage for HsiEvent {
    const KIND: MessageKind = MessageKind::HsiEvent;

    fn write_fields(&self, w: &mut FieldWriter) {
        w.put_u32(field::RUN_NUMBER, self.run_number);
        w.put_u64(field::SEQUENCE_NUMBER, self.sequence);
        w.put_u64(field::TIMESTAMP, self.timestamp);
        w.put_u32(field::SIGNAL_MAP, self.signal_map);
        w.put_u32(field::HEADER, self.header);
    }

    fn read_fields(r: &FieldReader) -> Result<Self, WireError> {
        Ok(Self {
            run_number: r.u32(field::RUN_NUMBER)?,
            sequence: r.u64(field::SEQUENCE_NUMBER)?,
            timestamp: r.u64(field::TIMESTAMP)?,
            signal_map: r.u32(field::SIGNAL_MAP)?,
            header: r.u32(field::HEADER)?,
        })
    }
}

impl WireMessage for DataRequest {
    const KIND: MessageKind = MessageKind::DataRequest;

    fn write_fields(&self, w: &mut FieldWriter) {
        w.put_u64(field::TRIGGER_NUMBER, self.trigger_number);
        w.put_u32(field::RUN_NUMBER, self.run_number);
        w.put_u64(field::SEQUENCE_NUMBER, self.sequence_number);
        w.put_u64(field::TIMESTAMP, self.trigger_timestamp);
        w.put_u64(field::COMPONENT, self.component.pack());
        w.put_u64(field::WINDOW_BEGIN, self.window_begin);
        w.put_u64(field::WINDOW_END, self.window_end);
        w.put_str(field::DESTINATION, &self.destination);
    }

    fn read_fields(r: &FieldReader) -> Result<Self, WireError> {
        Ok(Self {
            trigger_number: r.u64(field::TRIGGER_NUMBER)?,
            run_number: r.u32(field::RUN_NUMBER)?,
            sequence_number: r.u64(field::SEQUENCE_NUMBER)?,
            trigger_timestamp: r.u64(field::TIMESTAMP)?,
            component: stream_id_from(r.u64(field::COMPONENT)?, field::COMPONENT)?,
            window_begin: r.u64(field::WINDOW_BEGIN)?,
            window_end: r.u64(field::WINDOW_END)?,
            destination: r.str(field::DESTINATION)?,
        })
    }
}

impl WireMessage for TriggerDecision {
    const KIND: MessageKind = MessageKind::TriggerDecision;

    fn write_fields(&self, w: &mut FieldWriter) {
        w.put_u64(field::TRIGGER_NUMBER, self.trigger_number);
        w.put_u32(field::RUN_NUMBER, self.run_number);
        w.put_u64(field::TIMESTAMP, self.trigger_timestamp);
        w.put_u16(field::TRIGGER_TYPE, self.trigger_type);
        w.put_u8(field::READOUT_KIND, self.readout_kind.code());
        for component in &self.components {
            let mut body = BytesMut::with_capacity(24);
            body.put_u64(component.component.pack());
            body.put_u64(component.window_begin);
            body.put_u64(component.window_end);
            w.put_raw(field::COMPONENT, &body);
        }
    }

    fn read_fields(r: &FieldReader) -> Result<Self, WireError> {
        let mut components = Vec::new();
        for entry in r.all(field::COMPONENT) {
            let mut body = entry.clone();
            if body.remaining() != 24 {
                return Err(WireError::BadFieldLength {
                    field: field::COMPONENT,
                    expected: 24,
                    found: body.remaining(),
                });
            }
            components.push(ComponentRequest {
                component: stream_id_from(body.get_u64(), field::COMPONENT)?,
                window_begin: body.get_u64(),
                window_end: body.get_u64(),
            });
        }
        Ok(Self {
            trigger_number: r.u64(field::TRIGGER_NUMBER)?,
            run_number: r.u32(field::RUN_NUMBER)?,
            trigger_timestamp: r.u64(field::TIMESTAMP)?,
            trigger_type: r.u16(field::TRIGGER_TYPE)?,
            readout_kind: ReadoutKind::from_code(r.u8(field::READOUT_KIND)?),
            components,
        })
    }
}

impl<T: TimeSliced> WireMessage for TimeSlice<T> {
    const KIND: MessageKind = MessageKind::TimeSlice;

    fn write_fields(&self, w: &mut FieldWriter) {
        w.put_u64(field::ORIGIN, self.origin.pack());
        w.put_u32(field::RUN_NUMBER, self.run_number);
        w.put_u64(field::SEQUENCE_NUMBER, self.seqno);
        w.put_u64(field::START_TIME, self.start_time);
        w.put_u64(field::END_TIME, self.end_time);
        w.put_u8(
            field::SLICE_KIND,
            matches!(self.kind, SliceKind::Heartbeat) as u8,
        );
        w.put_u8(field::OBJECT_KIND, T::FRAGMENT_KIND.code());
        let mut objects = BytesMut::with_capacity(
            self.objects.iter().map(TimeSliced::encoded_len).sum::<usize>(),
        );
        for object in &self.objects {
            object.encode(&mut objects);
        }
        w.put_raw(field::OBJECTS, &objects);
    }

    fn read_fields(r: &FieldReader) -> Result<Self, WireError> {
        let object_kind = r.u8(field::OBJECT_KIND)?;
        if FragmentKind::from_code(object_kind) != T::FRAGMENT_KIND {
            return Err(WireError::BadEnum {
                field: field::OBJECT_KIND,
                value: u64::from(object_kind),
            });
        }
        let mut raw = r.raw(field::OBJECTS)?;
        let mut objects = Vec::new();
        while !raw.is_empty() {
            objects.push(T::decode(&mut raw).ok_or(WireError::BadPayload)?);
        }
        Ok(Self {
            origin: stream_id_from(r.u64(field::ORIGIN)?, field::ORIGIN)?,
            run_number: r.u32(field::RUN_NUMBER)?,
            seqno: r.u64(field::SEQUENCE_NUMBER)?,
            start_time: r.u64(field::START_TIME)?,
            end_time: r.u64(field::END_TIME)?,
            kind: if r.u8(field::SLICE_KIND)? != 0 {
                SliceKind::Heartbeat
            } else {
                SliceKind::Payload
            },
            objects,
        })
    }
}

impl WireMessage for Fragment {
    const KIND: MessageKind = MessageKind::Fragment;

    fn write_fields(&self, w: &mut FieldWriter) {
        let header = &self.header;
        w.put_u64(field::TRIGGER_NUMBER, header.trigger_number);
        w.put_u64(field::TIMESTAMP, header.trigger_timestamp);
        w.put_u64(field::WINDOW_BEGIN, header.window_begin);
        w.put_u64(field::WINDOW_END, header.window_end);
        w.put_u32(field::RUN_NUMBER, header.run_number);
        w.put_u64(field::ORIGIN, header.element.pack());
        w.put_u8(field::OBJECT_KIND, header.fragment_kind.code());
        w.put_u64(field::SEQUENCE_NUMBER, header.sequence_number);
        w.put_u32(field::ERROR_BITS, header.error_bits);
        w.put_raw(field::PAYLOAD, &self.payload);
    }

    fn read_fields(r: &FieldReader) -> Result<Self, WireError> {
        Ok(Self {
            header: FragmentHeader {
                trigger_number: r.u64(field::TRIGGER_NUMBER)?,
                trigger_timestamp: r.u64(field::TIMESTAMP)?,
                window_begin: r.u64(field::WINDOW_BEGIN)?,
                window_end: r.u64(field::WINDOW_END)?,
                run_number: r.u32(field::RUN_NUMBER)?,
                element: stream_id_from(r.u64(field::ORIGIN)?, field::ORIGIN)?,
                fragment_kind: FragmentKind::from_code(r.u8(field::OBJECT_KIND)?),
                sequence_number: r.u64(field::SEQUENCE_NUMBER)?,
                error_bits: r.u32(field::ERROR_BITS)?,
            },
            payload: r.raw(field::PAYLOAD)?,
        })
    }
}
