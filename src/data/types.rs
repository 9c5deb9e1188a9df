use serde::Deserialize;
use std::fmt;

/// Detector clock tick count. The nominal clock runs at 50 MHz.
pub type Timestamp = u64;

/// A span measured in detector ticks.
pub type Ticks = u64;

pub type RunNumber = u32;
pub type TriggerNumber = u64;
pub type SequenceNumber = u64;

/// Nominal detector clock frequency.
pub const DEFAULT_CLOCK_HZ: u64 = 50_000_000;

/// Sentinel carried by tokens that grant initial credit rather than
/// completing a specific trigger.
pub const INVALID_TRIGGER_NUMBER: TriggerNumber = TriggerNumber::MAX;

pub const INVALID_REGION_ID: u16 = u16::MAX;
pub const INVALID_ELEMENT_ID: u32 = u32::MAX;

/// Subsystem that produced (or consumes) a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemKind {
    #[default]
    Invalid,
    Detector,
    HardwareSignals,
    DataSelection,
}

impl SystemKind {
    pub fn code(self) -> u8 {
        match self {
            SystemKind::Invalid => 0,
            SystemKind::Detector => 1,
            SystemKind::HardwareSignals => 2,
            SystemKind::DataSelection => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(SystemKind::Invalid),
            1 => Some(SystemKind::Detector),
            2 => Some(SystemKind::HardwareSignals),
            3 => Some(SystemKind::DataSelection),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SystemKind::Invalid => "invalid",
            SystemKind::Detector => "detector",
            SystemKind::HardwareSignals => "hardware_signals",
            SystemKind::DataSelection => "data_selection",
        }
    }
}

impl fmt::Display for SystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one producer in a merger fan-in: `(system, region, element)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId {
    pub system: SystemKind,
    pub region: u16,
    pub element: u32,
}

impl StreamId {
    pub fn new(system: SystemKind, region: u16, element: u32) -> Self {
        Self {
            system,
            region,
            element,
        }
    }

    /// The identity stamped on merged and sliced output streams.
    pub fn data_selection(region: u16, element: u32) -> Self {
        Self::new(SystemKind::DataSelection, region, element)
    }

    /// Packs the triple into a single 64-bit merge-stream key:
    /// system in the top 16 bits, region in the next 16, element in the low 32.
    pub fn pack(&self) -> u64 {
        (u64::from(self.system.code()) << 48)
            | (u64::from(self.region) << 32)
            | u64::from(self.element)
    }

    pub fn is_valid(&self) -> bool {
        self.region != INVALID_REGION_ID && self.element != INVALID_ELEMENT_ID
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self {
            system: SystemKind::Invalid,
            region: INVALID_REGION_ID,
            element: INVALID_ELEMENT_ID,
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.system, self.region, self.element)
    }
}
