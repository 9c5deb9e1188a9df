use super::fragment::FragmentKind;
use super::types::Timestamp;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Capability required of any object carried through the streaming stages
/// (mergers, slicers, latency buffers). Implemented by [`TriggerPrimitive`],
/// [`TriggerActivity`] and [`TriggerCandidate`].
pub trait TimeSliced: Clone + Send + 'static {
    /// Fragment payload kind stamped on headers built from this type.
    const FRAGMENT_KIND: FragmentKind;

    fn time_start(&self) -> Timestamp;

    /// Exact number of bytes `encode` will append.
    fn encoded_len(&self) -> usize;

    /// Appends the wire representation. Primitives are fixed-size records;
    /// activities and candidates are self-delimited.
    fn encode(&self, buf: &mut BytesMut);

    fn decode(buf: &mut Bytes) -> Option<Self>;
}

/// Kind of detector signal a primitive was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrimitiveKind {
    #[default]
    Unknown,
    Detector,
    PhotonDetector,
}

impl PrimitiveKind {
    pub fn code(self) -> u8 {
        match self {
            PrimitiveKind::Unknown => 0,
            PrimitiveKind::Detector => 1,
            PrimitiveKind::PhotonDetector => 2,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            1 => PrimitiveKind::Detector,
            2 => PrimitiveKind::PhotonDetector,
            _ => PrimitiveKind::Unknown,
        }
    }
}

/// Smallest detector-signal unit: one pulse above threshold on one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TriggerPrimitive {
    pub time_start: Timestamp,
    pub time_over_threshold: u64,
    pub time_peak: Timestamp,
    pub channel: u32,
    pub adc_integral: u32,
    pub adc_peak: u32,
    pub detid: u16,
    pub kind: PrimitiveKind,
}

/// Encoded size of one primitive; fragments pack them contiguously.
pub const PRIMITIVE_ENCODED_LEN: usize = 8 + 8 + 8 + 4 + 4 + 4 + 2 + 1;

impl TimeSliced for TriggerPrimitive {
    const FRAGMENT_KIND: FragmentKind = FragmentKind::TriggerPrimitives;

    fn time_start(&self) -> Timestamp {
        self.time_start
    }

    fn encoded_len(&self) -> usize {
        PRIMITIVE_ENCODED_LEN
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.time_start);
        buf.put_u64(self.time_over_threshold);
        buf.put_u64(self.time_peak);
        buf.put_u32(self.channel);
        buf.put_u32(self.adc_integral);
        buf.put_u32(self.adc_peak);
        buf.put_u16(self.detid);
        buf.put_u8(self.kind.code());
    }

    fn decode(buf: &mut Bytes) -> Option<Self> {
        if buf.remaining() < PRIMITIVE_ENCODED_LEN {
            return None;
        }
        Some(Self {
            time_start: buf.get_u64(),
            time_over_threshold: buf.get_u64(),
            time_peak: buf.get_u64(),
            channel: buf.get_u32(),
            adc_integral: buf.get_u32(),
            adc_peak: buf.get_u32(),
            detid: buf.get_u16(),
            kind: PrimitiveKind::from_code(buf.get_u8()),
        })
    }
}

/// Spatial/temporal cluster of primitives.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TriggerActivity {
    pub time_start: Timestamp,
    pub time_end: Timestamp,
    pub channel_start: u32,
    pub channel_end: u32,
    pub inputs: Vec<TriggerPrimitive>,
}

impl TimeSliced for TriggerActivity {
    const FRAGMENT_KIND: FragmentKind = FragmentKind::TriggerActivities;

    fn time_start(&self) -> Timestamp {
        self.time_start
    }

    fn encoded_len(&self) -> usize {
        4 + 8 + 8 + 4 + 4 + 4 + self.inputs.len() * PRIMITIVE_ENCODED_LEN
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32((self.encoded_len() - 4) as u32);
        buf.put_u64(self.time_start);
        buf.put_u64(self.time_end);
        buf.put_u32(self.channel_start);
        buf.put_u32(self.channel_end);
        buf.put_u32(self.inputs.len() as u32);
        for tp in &self.inputs {
            tp.encode(buf);
        }
    }

    fn decode(buf: &mut Bytes) -> Option<Self> {
        if buf.remaining() < 4 {
            return None;
        }
        let len = buf.get_u32() as usize;
        if buf.remaining() < len {
            return None;
        }
        let mut body = buf.split_to(len);
        let time_start = body.get_u64();
        let time_end = body.get_u64();
        let channel_start = body.get_u32();
        let channel_end = body.get_u32();
        let count = body.get_u32() as usize;
        let mut inputs = Vec::with_capacity(count);
        for _ in 0..count {
            inputs.push(TriggerPrimitive::decode(&mut body)?);
        }
        Some(Self {
            time_start,
            time_end,
            channel_start,
            channel_end,
            inputs,
        })
    }
}

/// Classification assigned to a trigger candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CandidateKind {
    #[default]
    Unknown,
    Timing,
    Activity,
    Supernova,
    Random,
}

impl CandidateKind {
    pub fn code(self) -> u8 {
        match self {
            CandidateKind::Unknown => 0,
            CandidateKind::Timing => 1,
            CandidateKind::Activity => 2,
            CandidateKind::Supernova => 3,
            CandidateKind::Random => 4,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            1 => CandidateKind::Timing,
            2 => CandidateKind::Activity,
            3 => CandidateKind::Supernova,
            4 => CandidateKind::Random,
            _ => CandidateKind::Unknown,
        }
    }
}

/// Algorithm that produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CandidateAlgorithm {
    #[default]
    Unknown,
    HsiEventConversion,
    ActivityWindow,
    Prescale,
}

impl CandidateAlgorithm {
    pub fn code(self) -> u8 {
        match self {
            CandidateAlgorithm::Unknown => 0,
            CandidateAlgorithm::HsiEventConversion => 1,
            CandidateAlgorithm::ActivityWindow => 2,
            CandidateAlgorithm::Prescale => 3,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            1 => CandidateAlgorithm::HsiEventConversion,
            2 => CandidateAlgorithm::ActivityWindow,
            3 => CandidateAlgorithm::Prescale,
            _ => CandidateAlgorithm::Unknown,
        }
    }
}

/// Event-of-interest candidate assembled from activities (or an HSI event).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TriggerCandidate {
    pub time_start: Timestamp,
    pub time_end: Timestamp,
    pub time_candidate: Timestamp,
    pub detid: u32,
    pub kind: CandidateKind,
    pub algorithm: CandidateAlgorithm,
    pub inputs: Vec<TriggerActivity>,
}

impl TimeSliced for TriggerCandidate {
    const FRAGMENT_KIND: FragmentKind = FragmentKind::TriggerCandidates;

    fn time_start(&self) -> Timestamp {
        self.time_start
    }

    fn encoded_len(&self) -> usize {
        4 + 8
            + 8
            + 8
            + 4
            + 1
            + 1
            + 4
            + self.inputs.iter().map(TriggerActivity::encoded_len).sum::<usize>()
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32((self.encoded_len() - 4) as u32);
        buf.put_u64(self.time_start);
        buf.put_u64(self.time_end);
        buf.put_u64(self.time_candidate);
        buf.put_u32(self.detid);
        buf.put_u8(self.kind.code());
        buf.put_u8(self.algorithm.code());
        buf.put_u32(self.inputs.len() as u32);
        for ta in &self.inputs {
            ta.encode(buf);
        }
    }

    fn decode(buf: &mut Bytes) -> Option<Self> {
        if buf.remaining() < 4 {
            return None;
        }
        let len = buf.get_u32() as usize;
        if buf.remaining() < len {
            return None;
        }
        let mut body = buf.split_to(len);
        let time_start = body.get_u64();
        let time_end = body.get_u64();
        let time_candidate = body.get_u64();
        let detid = body.get_u32();
        let kind = CandidateKind::from_code(body.get_u8());
        let algorithm = CandidateAlgorithm::from_code(body.get_u8());
        let count = body.get_u32() as usize;
        let mut inputs = Vec::with_capacity(count);
        for _ in 0..count {
            inputs.push(TriggerActivity::decode(&mut body)?);
        }
        Some(Self {
            time_start,
            time_end,
            time_candidate,
            detid,
            kind,
            algorithm,
            inputs,
        })
    }
}
