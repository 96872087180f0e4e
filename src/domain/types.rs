//! Shared types for the installation controller

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Number of joints on the arm
pub const AXES: usize = 6;

/// Overflow key used for any region with more than three people
pub const OVERFLOW_KEY: &str = "more-than-3";

/// Region ids in priority order (first occupied region wins)
pub const REGION_PRIORITY: [&str; 4] = ["1", "2", "3", "4"];

/// One 6-axis joint target in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JointPose(pub [f64; AXES]);

impl JointPose {
    /// Copy of this pose with the first axis replaced
    pub fn with_first_axis(mut self, j1: f64) -> Self {
        self.0[0] = j1;
        self
    }

    pub fn first_axis(&self) -> f64 {
        self.0[0]
    }
}

impl fmt::Display for JointPose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let j = &self.0;
        write!(f, "[{}, {}, {}, {}, {}, {}]", j[0], j[1], j[2], j[3], j[4], j[5])
    }
}

/// Newtype wrapper for move tickets used to correlate completion notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct MoveTicket(pub u64);

impl fmt::Display for MoveTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Interpolation mode passed with every joint move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MoveMode {
    #[default]
    Absolute,
    Relative,
}

impl MoveMode {
    /// Numeric code understood by the controller
    pub fn code(self) -> u8 {
        match self {
            MoveMode::Absolute => 0,
            MoveMode::Relative => 1,
        }
    }
}

/// Controller operation mode set once after connecting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    Manual,
    #[default]
    Auto,
}

impl OperationMode {
    pub fn code(self) -> u8 {
        match self {
            OperationMode::Manual => 0,
            OperationMode::Auto => 1,
        }
    }
}

/// Motion state reported by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionState {
    Idle,
    Moving,
    Paused,
    Fault,
}

impl MotionState {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => MotionState::Idle,
            2 => MotionState::Moving,
            3 => MotionState::Paused,
            _ => MotionState::Fault,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MotionState::Idle => "idle",
            MotionState::Moving => "moving",
            MotionState::Paused => "paused",
            MotionState::Fault => "fault",
        }
    }
}

/// A single digital output write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigitalOutput {
    pub channel: u16,
    pub value: bool,
}

/// When a toggle fires relative to its step's move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToggleTiming {
    Before,
    After,
}

/// Digital output event declared by a sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct IoToggle {
    /// Zero-based step index
    pub step: usize,
    pub timing: ToggleTiming,
    pub channel: u16,
    pub value: bool,
}

impl IoToggle {
    pub fn output(&self) -> DigitalOutput {
        DigitalOutput { channel: self.channel, value: self.value }
    }
}

/// Named motion sequence: pose templates with parallel per-step speeds
///
/// `speeds.len() == poses.len()` is checked when the sequence runs, not here.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionSequence {
    pub name: String,
    pub poses: Vec<JointPose>,
    pub speeds: Vec<u8>,
    pub toggles: Vec<IoToggle>,
    /// Pause after each confirmed step (ms)
    pub settle_ms: u64,
}

impl MotionSequence {
    pub fn new(name: impl Into<String>, poses: Vec<JointPose>, speeds: Vec<u8>) -> Self {
        Self { name: name.into(), poses, speeds, toggles: Vec::new(), settle_ms: 0 }
    }

    pub fn with_toggles(mut self, toggles: Vec<IoToggle>) -> Self {
        self.toggles = toggles;
        self
    }

    pub fn with_settle_ms(mut self, settle_ms: u64) -> Self {
        self.settle_ms = settle_ms;
        self
    }

    /// Toggles that fire at `step` with the given timing, in declaration order
    pub fn toggles_at(
        &self,
        step: usize,
        timing: ToggleTiming,
    ) -> impl Iterator<Item = &IoToggle> + '_ {
        self.toggles.iter().filter(move |t| t.step == step && t.timing == timing)
    }
}

// ============================================================================
// Occupancy reports (sensor wire format)
// ============================================================================

/// Bounding box of one detected person, carried but not interpreted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeoplePosition {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneEntry {
    #[serde(rename = "PeopleCount")]
    pub people_count: u32,
    #[serde(rename = "PeoplePosition", default, deserialize_with = "null_as_default")]
    pub people_position: Vec<PeoplePosition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSnapshot {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Zone", default, deserialize_with = "null_as_default")]
    pub zones: Vec<ZoneEntry>,
}

impl RegionSnapshot {
    /// People count of the first zone entry, 0 when there is none
    pub fn people_count(&self) -> u32 {
        self.zones.first().map(|z| z.people_count).unwrap_or(0)
    }
}

/// One datagram from the perception system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OccupancyReport {
    pub regions: Vec<RegionSnapshot>,
}

impl OccupancyReport {
    /// Decode a UTF-8 JSON datagram
    pub fn from_slice(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// First snapshot with the given region id
    pub fn region(&self, id: &str) -> Option<&RegionSnapshot> {
        self.regions.iter().find(|r| r.id == id)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ============================================================================
// Routing keys and cue codes
// ============================================================================

/// Zone letter mapped from a region id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ZoneLetter {
    A,
    B,
    C,
    D,
}

impl ZoneLetter {
    pub fn from_region_id(id: &str) -> Option<Self> {
        match id {
            "1" => Some(ZoneLetter::A),
            "2" => Some(ZoneLetter::B),
            "3" => Some(ZoneLetter::C),
            "4" => Some(ZoneLetter::D),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            ZoneLetter::A => 'A',
            ZoneLetter::B => 'B',
            ZoneLetter::C => 'C',
            ZoneLetter::D => 'D',
        }
    }

    fn index(self) -> u8 {
        match self {
            ZoneLetter::A => 0,
            ZoneLetter::B => 1,
            ZoneLetter::C => 2,
            ZoneLetter::D => 3,
        }
    }
}

/// Library key derived from an occupied region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequenceKey {
    Occupied { count: u8, zone: ZoneLetter },
    Overflow,
}

impl SequenceKey {
    /// Key for `count` people in `zone`; zero people yields no key
    pub fn derive(count: u32, zone: ZoneLetter) -> Option<Self> {
        match count {
            0 => None,
            1..=3 => Some(SequenceKey::Occupied { count: count as u8, zone }),
            _ => Some(SequenceKey::Overflow),
        }
    }

    /// Audio/lighting letter for this key
    pub fn cue(&self) -> CueCode {
        match *self {
            // 1 → C..F, 2 → G..J, 3 → K..N
            SequenceKey::Occupied { count, zone } => {
                CueCode((b'C' + (count - 1) * 4 + zone.index()) as char)
            }
            SequenceKey::Overflow => CueCode('O'),
        }
    }
}

impl fmt::Display for SequenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequenceKey::Occupied { count, zone } => write!(f, "{}-{}", count, zone.as_char()),
            SequenceKey::Overflow => f.write_str(OVERFLOW_KEY),
        }
    }
}

/// Single-letter cue sent to the audio and lighting machines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CueCode(pub char);

impl CueCode {
    pub const MODE_A: CueCode = CueCode('A');
    pub const MODE_B: CueCode = CueCode('B');

    pub fn for_mode(mode: Mode) -> Self {
        match mode {
            Mode::A => Self::MODE_A,
            Mode::B => Self::MODE_B,
        }
    }
}

impl fmt::Display for CueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Session modes
// ============================================================================

/// Behavioral mode of the installation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Autonomous drills with sampled first-axis variation
    #[default]
    A,
    /// Sensor-reactive sequences
    B,
}

impl Mode {
    pub fn next(self) -> Self {
        match self {
            Mode::A => Mode::B,
            Mode::B => Mode::A,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::A => "mode_a",
            Mode::B => "mode_b",
        }
    }
}
