//! Component configuration. Lifecycle commands carry free-form JSON object
//! trees; each component decodes the tree into its typed config at `conf`
//! time. Missing or malformed parameters are fatal: the component refuses
//! to enter the configured state.

use crate::data::types::{StreamId, SystemKind, Ticks, DEFAULT_CLOCK_HZ};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed configuration: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Decodes a command payload into a typed config.
pub fn from_value<T: serde::de::DeserializeOwned>(value: &Value) -> Result<T, ConfigError> {
    Ok(serde_json::from_value(value.clone())?)
}

fn default_clock_hz() -> u64 {
    DEFAULT_CLOCK_HZ
}

fn default_window_ticks() -> Ticks {
    625_000
}

fn default_sent_window_size() -> usize {
    20
}

fn default_initial_tokens() -> i64 {
    10
}

/// Stream merger parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct MergerConfig {
    /// Zero disables the latency bound; the merger then waits for full
    /// cardinality before emitting.
    #[serde(default)]
    pub max_latency_ms: u64,
    pub cardinality: usize,
    pub region_id: u16,
    pub element_id: u32,
}

/// Window slicer parameters. `window_time`/`buffer_time` are accepted as
/// spellings for the same tick counts.
#[derive(Debug, Clone, Deserialize)]
pub struct SlicerConfig {
    #[serde(default = "default_window_ticks", alias = "window_time")]
    pub window_ticks: Ticks,
    #[serde(default, alias = "buffer_time")]
    pub buffer_ticks: Ticks,
    pub region_id: u16,
    pub element_id: u32,
}

/// Heartbeat generator parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_clock_hz")]
    pub clock_frequency_hz: u64,
    pub heartbeat_interval: Ticks,
    /// Held back from the extrapolated boundary so synthesized heartbeats
    /// never run ahead of real data.
    #[serde(default)]
    pub heartbeat_send_offset_ms: u64,
}

/// Latency buffer parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct BufferConfig {
    pub capacity: usize,
    pub region_id: u16,
    pub element_id: u32,
}

/// One readout component named in the MLT `links` table.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkSpec {
    pub system: String,
    pub region: u16,
    pub element: u32,
}

impl LinkSpec {
    pub fn to_stream_id(&self) -> Result<StreamId, ConfigError> {
        let system = match self.system.as_str() {
            "detector" => SystemKind::Detector,
            "hardware_signals" => SystemKind::HardwareSignals,
            "data_selection" => SystemKind::DataSelection,
            other => {
                return Err(ConfigError::Invalid(format!(
                    "unknown link system type {other:?}"
                )))
            }
        };
        Ok(StreamId::new(system, self.region, self.element))
    }
}

/// Per-candidate-type readout window: `[candidate - before, candidate + after]`.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ReadoutWindow {
    #[serde(default)]
    pub candidate_type: u8,
    #[serde(default)]
    pub time_before: Ticks,
    #[serde(default)]
    pub time_after: Ticks,
}

/// Module-level trigger parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct MltConfig {
    pub links: Vec<LinkSpec>,
    pub dfo_connection: String,
    pub dfo_busy_connection: String,
    pub token_connection: String,
    #[serde(default = "default_initial_tokens")]
    pub initial_tokens: i64,
    #[serde(default)]
    pub hsi_trigger_type_passthrough: bool,
    /// Wall-clock milliseconds a pending decision waits for late candidates.
    pub buffer_timeout: u64,
    /// Keep decisions that overlap a recently sent one instead of dropping.
    #[serde(default)]
    pub td_out_of_timeout: bool,
    #[serde(default = "default_clock_hz")]
    pub clock_frequency_hz: u64,
    #[serde(default = "default_sent_window_size")]
    pub sent_window_size: usize,
    #[serde(default)]
    pub c0: ReadoutWindow,
    #[serde(default)]
    pub c1: ReadoutWindow,
    #[serde(default)]
    pub c2: ReadoutWindow,
    #[serde(default)]
    pub c3: ReadoutWindow,
    #[serde(default)]
    pub c4: ReadoutWindow,
    #[serde(default)]
    pub c5: ReadoutWindow,
    #[serde(default)]
    pub c6: ReadoutWindow,
    #[serde(default)]
    pub c7: ReadoutWindow,
}

impl MltConfig {
    /// Builds the candidate-type → readout-window table from the `c0..c7`
    /// entries. Later entries win on duplicate candidate types.
    pub fn readout_window_map(&self) -> HashMap<u8, (Ticks, Ticks)> {
        let mut map = HashMap::new();
        for window in [
            self.c0, self.c1, self.c2, self.c3, self.c4, self.c5, self.c6, self.c7,
        ] {
            map.insert(window.candidate_type, (window.time_before, window.time_after));
        }
        map
    }

    pub fn resolved_links(&self) -> Result<Vec<StreamId>, ConfigError> {
        self.links.iter().map(LinkSpec::to_stream_id).collect()
    }
}

/// One HSI signal type with its readout offsets.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct HsiSignalWindow {
    #[serde(default)]
    pub signal_type: u32,
    #[serde(default)]
    pub time_before: Ticks,
    #[serde(default)]
    pub time_after: Ticks,
}

/// HSI candidate maker parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct HsiConfig {
    #[serde(default)]
    pub s0: HsiSignalWindow,
    #[serde(default)]
    pub s1: HsiSignalWindow,
    #[serde(default)]
    pub s2: HsiSignalWindow,
    #[serde(default)]
    pub hsi_trigger_type_passthrough: bool,
}

impl HsiConfig {
    pub fn signal_window_map(&self) -> HashMap<u32, (Ticks, Ticks)> {
        let mut map = HashMap::new();
        for window in [self.s0, self.s1, self.s2] {
            map.insert(window.signal_type, (window.time_before, window.time_after));
        }
        map
    }
}
