use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigIssue, SimError, SimResult};
use crate::types::PinIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PinDirection {
    Sink,
    Source,
    Bidirectional,
}

impl PinDirection {
    /// Whether the owning component observes the net through this pin.
    pub fn reads(self) -> bool {
        matches!(self, PinDirection::Sink | PinDirection::Bidirectional)
    }

    /// Whether this pin contributes a driver to its net.
    pub fn drives(self) -> bool {
        matches!(self, PinDirection::Source | PinDirection::Bidirectional)
    }

    pub fn to_str(&self) -> &'static str {
        match self {
            PinDirection::Sink => "sink",
            PinDirection::Source => "source",
            PinDirection::Bidirectional => "bidirectional",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DriveStrength {
    HighZ = 0,
    Weak = 1,
    Strong = 2,
}

impl DriveStrength {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(DriveStrength::HighZ),
            1 => Some(DriveStrength::Weak),
            2 => Some(DriveStrength::Strong),
            _ => None,
        }
    }
}

/// What a component asserts on one of its output pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Drive {
    pub value: u64,
    pub strength: DriveStrength,
}

impl Drive {
    pub const fn strong(value: u64) -> Self {
        Drive {
            value,
            strength: DriveStrength::Strong,
        }
    }

    pub const fn weak(value: u64) -> Self {
        Drive {
            value,
            strength: DriveStrength::Weak,
        }
    }

    pub const fn high_z() -> Self {
        Drive {
            value: 0,
            strength: DriveStrength::HighZ,
        }
    }

    pub fn is_high_z(&self) -> bool {
        self.strength == DriveStrength::HighZ
    }
}

impl Default for Drive {
    fn default() -> Self {
        Drive::high_z()
    }
}

/// Resolved state of one bit of a net.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicState {
    HighZ,
    Weak0,
    Weak1,
    Strong0,
    Strong1,
    Contention,
}

impl LogicState {
    pub fn to_str(&self) -> &'static str {
        match self {
            LogicState::HighZ => "HighZ",
            LogicState::Weak0 => "Weak0",
            LogicState::Weak1 => "Weak1",
            LogicState::Strong0 => "Strong0",
            LogicState::Strong1 => "Strong1",
            LogicState::Contention => "Contention",
        }
    }

    pub fn to_char(&self) -> char {
        match self {
            LogicState::HighZ => 'Z',
            LogicState::Weak0 => 'L',
            LogicState::Weak1 => 'H',
            LogicState::Strong0 => '0',
            LogicState::Strong1 => '1',
            LogicState::Contention => 'X',
        }
    }

    pub fn from_drive(strength: DriveStrength, bit: bool) -> Self {
        match (strength, bit) {
            (DriveStrength::HighZ, _) => LogicState::HighZ,
            (DriveStrength::Weak, false) => LogicState::Weak0,
            (DriveStrength::Weak, true) => LogicState::Weak1,
            (DriveStrength::Strong, false) => LogicState::Strong0,
            (DriveStrength::Strong, true) => LogicState::Strong1,
        }
    }

    /// Strength class of a non-contended state.
    pub fn strength(&self) -> Option<DriveStrength> {
        match self {
            LogicState::HighZ => Some(DriveStrength::HighZ),
            LogicState::Weak0 | LogicState::Weak1 => Some(DriveStrength::Weak),
            LogicState::Strong0 | LogicState::Strong1 => Some(DriveStrength::Strong),
            LogicState::Contention => None,
        }
    }

    /// Logic level, if the bit is actually driven by a single value.
    pub fn to_bool(&self) -> Option<bool> {
        match self {
            LogicState::Weak0 | LogicState::Strong0 => Some(false),
            LogicState::Weak1 | LogicState::Strong1 => Some(true),
            LogicState::HighZ | LogicState::Contention => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            LogicState::HighZ => 0,
            LogicState::Weak0 => 1,
            LogicState::Weak1 => 2,
            LogicState::Strong0 => 3,
            LogicState::Strong1 => 4,
            LogicState::Contention => 5,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(LogicState::HighZ),
            1 => Some(LogicState::Weak0),
            2 => Some(LogicState::Weak1),
            3 => Some(LogicState::Strong0),
            4 => Some(LogicState::Strong1),
            5 => Some(LogicState::Contention),
            _ => None,
        }
    }
}

impl fmt::Display for LogicState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

/// Value and aggregate state of a net, as seen by readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signal {
    pub value: u64,
    pub state: LogicState,
}

impl Signal {
    pub fn floating() -> Self {
        Signal {
            value: 0,
            state: LogicState::HighZ,
        }
    }

    pub fn is_contended(&self) -> bool {
        self.state == LogicState::Contention
    }

    pub fn is_floating(&self) -> bool {
        self.state == LogicState::HighZ
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x} ({})", self.value, self.state)
    }
}

/// A named connection point. Pins carry no value; the net they belong to does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pin {
    name: String,
    direction: PinDirection,
    width: u8,
    multi_connect: bool,
    required: bool,
    index: PinIndex,
}

impl Pin {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> PinDirection {
        self.direction
    }

    pub fn width(&self) -> u8 {
        self.width
    }

    pub fn is_multi_connect(&self) -> bool {
        self.multi_connect
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn index(&self) -> PinIndex {
        self.index
    }
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {} bit)", self.name, self.direction.to_str(), self.width)?;
        if self.multi_connect {
            write!(f, " [multi]")?;
        }
        if !self.required {
            write!(f, " [optional]")?;
        }
        Ok(())
    }
}

/// Per-component pin table, addressable by name (wiring) and by index (fast paths).
///
/// Pins are required and single-peer unless marked otherwise. The table is
/// sealed by `Engine::init`; after that every mutator fails with
/// [`ConfigIssue::AfterInit`].
#[derive(Debug, Clone, Default)]
pub struct PinRegistry {
    owner: String,
    pins: Vec<Pin>,
    by_name: HashMap<String, PinIndex>,
    sealed: bool,
}

impl PinRegistry {
    pub fn new(owner: impl Into<String>) -> Self {
        PinRegistry {
            owner: owner.into(),
            ..Default::default()
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn add_sink(&mut self, name: &str) -> SimResult<PinIndex> {
        self.add_pin(name, PinDirection::Sink, 1)
    }

    pub fn add_source(&mut self, name: &str) -> SimResult<PinIndex> {
        self.add_pin(name, PinDirection::Source, 1)
    }

    pub fn add_bidirectional(&mut self, name: &str) -> SimResult<PinIndex> {
        self.add_pin(name, PinDirection::Bidirectional, 1)
    }

    /// Allocate a pin of any direction and width (1..=64 bits).
    pub fn add_pin(&mut self, name: &str, direction: PinDirection, width: u8) -> SimResult<PinIndex> {
        if self.sealed {
            return Err(self.error(name, ConfigIssue::AfterInit));
        }
        if width == 0 || width > 64 {
            return Err(self.error(name, ConfigIssue::UnsupportedWidth(width)));
        }
        if self.by_name.contains_key(name) {
            return Err(self.error(name, ConfigIssue::DuplicatePinName));
        }

        let index = PinIndex(self.pins.len() as u16);
        self.pins.push(Pin {
            name: name.to_string(),
            direction,
            width,
            multi_connect: false,
            required: true,
            index,
        });
        self.by_name.insert(name.to_string(), index);
        Ok(index)
    }

    pub fn set_multi_connect(&mut self, name: &str) -> SimResult<()> {
        let index = self.writable(name)?;
        self.pins[index.index()].multi_connect = true;
        Ok(())
    }

    pub fn set_optional(&mut self, name: &str) -> SimResult<()> {
        let index = self.writable(name)?;
        self.pins[index.index()].required = false;
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> SimResult<PinIndex> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| self.error(name, ConfigIssue::UnknownPin))
    }

    pub fn find(&self, name: &str) -> Option<&Pin> {
        self.by_name.get(name).map(|index| &self.pins[index.index()])
    }

    pub fn pin(&self, index: PinIndex) -> Option<&Pin> {
        self.pins.get(index.index())
    }

    pub fn name_of(&self, index: PinIndex) -> &str {
        self.pins.get(index.index()).map(Pin::name).unwrap_or("?")
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pin> {
        self.pins.iter()
    }

    /// Pins that contribute a driver to their net.
    pub fn outputs(&self) -> impl Iterator<Item = &Pin> {
        self.pins.iter().filter(|pin| pin.direction.drives())
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub(crate) fn seal(&mut self) {
        self.sealed = true;
    }

    fn writable(&self, name: &str) -> SimResult<PinIndex> {
        if self.sealed {
            return Err(self.error(name, ConfigIssue::AfterInit));
        }
        self.lookup(name)
    }

    fn error(&self, pin: &str, issue: ConfigIssue) -> SimError {
        SimError::config(&self.owner, Some(pin), issue)
    }
}
