//! # JSON System Description
//!
//! Boards, clock domains, parts and wiring described in a JSON file and turned
//! into a ready-to-run [`Engine`].
//!
//! ## Usage
//!
//! ```no_run
//! use pinvm::system_config::SystemFactory;
//!
//! let factory = SystemFactory::new();
//! let mut system = factory.create_from_json("configs/ring_oscillator.json").expect("valid system");
//! system.engine.init().expect("board wires up");
//! system.engine.run(16);
//! ```
//!
//! ## Configuration File Format
//!
//! ```json
//! {
//!   "name": "ring",
//!   "engine": {"iteration_bound": 64},
//!   "boards": [{
//!     "name": "main",
//!     "clocks": [{"name": "SYS", "period": 4, "phase": 2}],
//!     "components": [
//!       {"type": "gate", "name": "INV1", "properties": {"kind": "not", "delay": 1}}
//!     ],
//!     "connections": [
//!       {"source": {"component": "INV1", "pin": "Y"}, "targets": [{"component": "INV2", "pin": "A"}]}
//!     ],
//!     "watch": [{"component": "INV1", "pin": "Y"}],
//!     "stimulus": [{"component": "DRV", "pin": "OUT", "value": 1, "tick": 5}]
//!   }]
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::board::Board;
use crate::component::Component;
use crate::components::io::DEFAULT_HISTORY_LIMIT;
use crate::components::{Bus, ClockDriver, DFlipFlop, Driver, Gate, GateKind, Probe, Tie};
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::error::{ConfigIssue, SimError, SimResult};
use crate::pin::DriveStrength;
use crate::types::{BoardId, ClockDomainId, ComponentId, Tick};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub engine: EngineConfig,
    pub boards: Vec<BoardConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardConfig {
    pub name: String,
    #[serde(default)]
    pub clocks: Vec<ClockConfig>,
    #[serde(default)]
    pub components: Vec<ComponentConfig>,
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
    /// Pins whose transitions are traced.
    #[serde(default)]
    pub watch: Vec<PinReference>,
    /// Writes pushed into components at fixed ticks.
    #[serde(default)]
    pub stimulus: Vec<StimulusConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockConfig {
    pub name: String,
    pub period: Tick,
    #[serde(default)]
    pub phase: Tick,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentConfig {
    #[serde(rename = "type", alias = "component_type")]
    pub component_type: String,
    pub name: String,
    #[serde(default)]
    pub properties: HashMap<String, Value>,
}

impl ComponentConfig {
    fn number(&self, key: &str, default: u64) -> Result<u64, ConfigIssue> {
        match self.properties.get(key) {
            None => Ok(default),
            Some(value) => value.as_u64().ok_or_else(|| {
                ConfigIssue::Rejected(format!("property '{}' must be a non-negative integer", key))
            }),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigIssue> {
        match self.properties.get(key) {
            None => Ok(default),
            Some(Value::Bool(flag)) => Ok(*flag),
            Some(Value::Number(n)) => Ok(n.as_u64().is_some_and(|n| n != 0)),
            Some(_) => Err(ConfigIssue::Rejected(format!("property '{}' must be a boolean", key))),
        }
    }

    fn text(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|v| v.as_str())
    }

    fn width(&self) -> Result<u8, ConfigIssue> {
        let width = self.number("width", 1)?;
        u8::try_from(width)
            .ok()
            .filter(|w| (1..=64).contains(w))
            .ok_or(ConfigIssue::UnsupportedWidth(width.min(u8::MAX as u64) as u8))
    }

    fn domain(&self, board: &Board) -> Result<ClockDomainId, ConfigIssue> {
        let name = self
            .text("domain")
            .ok_or_else(|| ConfigIssue::MalformedBoard(format!("{} needs a 'domain' property", self.name)))?;
        board
            .clock_domain(name)
            .ok_or_else(|| ConfigIssue::MalformedBoard(format!("no clock domain '{}'", name)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub source: PinReference,
    pub targets: Vec<PinReference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinReference {
    pub component: String,
    pub pin: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StimulusConfig {
    pub component: String,
    pub pin: String,
    pub value: u64,
    pub tick: Tick,
}

/// Builds one component from its JSON description. The board is passed so
/// clocked parts can look up their domain by name.
pub type ComponentConstructor = fn(&ComponentConfig, &Board) -> Result<Box<dyn Component>, ConfigIssue>;

/// Registry from JSON type name to constructor.
#[derive(Debug, Clone)]
pub struct SystemFactory {
    component_registry: HashMap<String, ComponentConstructor>,
}

impl Default for SystemFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemFactory {
    pub fn new() -> Self {
        let mut factory = SystemFactory {
            component_registry: HashMap::new(),
        };
        factory.register_default_components();
        factory
    }

    /// Factory with no component types registered.
    pub fn empty() -> Self {
        SystemFactory {
            component_registry: HashMap::new(),
        }
    }

    pub fn register(&mut self, component_type: &str, constructor: ComponentConstructor) {
        self.component_registry
            .insert(component_type.to_string(), constructor);
    }

    pub fn is_registered(&self, component_type: &str) -> bool {
        self.component_registry.contains_key(component_type)
    }

    /// Registered type names, sorted.
    pub fn component_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.component_registry.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    fn register_default_components(&mut self) {
        self.register("tie", |config, _| {
            let width = config.width()?;
            let value = match config.text("level") {
                Some("high") => u64::MAX,
                Some("low") => 0,
                Some(other) => {
                    return Err(ConfigIssue::Rejected(format!("unknown tie level '{}'", other)))
                }
                None => config.number("value", 0)?,
            };
            Ok(Box::new(Tie::new(&config.name, width, value)))
        });

        self.register("driver", |config, _| {
            let strength = match config.text("strength") {
                None | Some("strong") => DriveStrength::Strong,
                Some("weak") => DriveStrength::Weak,
                Some(other) => {
                    return Err(ConfigIssue::Rejected(format!("unknown drive strength '{}'", other)))
                }
            };
            let driver = Driver::new(&config.name, config.width()?, config.number("value", 0)?)
                .with_strength(strength);
            Ok(Box::new(driver))
        });

        self.register("probe", |config, _| {
            let limit = config.number("history", DEFAULT_HISTORY_LIMIT as u64)?;
            Ok(Box::new(
                Probe::new(&config.name, config.width()?).with_history_limit(limit as usize),
            ))
        });

        self.register("gate", |config, _| {
            let kind = config.text("kind").unwrap_or("not");
            let kind = GateKind::from_str(kind)
                .ok_or_else(|| ConfigIssue::Rejected(format!("unknown gate kind '{}'", kind)))?;
            let gate = Gate::new(&config.name, kind, config.number("delay", 1)?)
                .with_initial(config.flag("initial", false)?);
            Ok(Box::new(gate))
        });

        self.register("dff", |config, board| {
            let dff = DFlipFlop::new(
                &config.name,
                config.width()?,
                config.domain(board)?,
                config.number("setup", 0)?,
                config.number("hold", 0)?,
            )
            .with_delay(config.number("delay", 0)?)
            .with_initial(config.number("initial", 0)?);
            Ok(Box::new(dff))
        });

        self.register("clock_driver", |config, board| {
            Ok(Box::new(ClockDriver::new(&config.name, config.domain(board)?)))
        });

        self.register("bus", |config, _| {
            let keeper = config.flag("keeper", true)?;
            let width = config.width()?;
            let bus: Box<dyn Component> = match (width, keeper) {
                (1, true) => Box::new(Bus::<1>::new(&config.name)),
                (1, false) => Box::new(Bus::<1>::new(&config.name).without_keeper()),
                (4, true) => Box::new(Bus::<4>::new(&config.name)),
                (4, false) => Box::new(Bus::<4>::new(&config.name).without_keeper()),
                (8, true) => Box::new(Bus::<8>::new(&config.name)),
                (8, false) => Box::new(Bus::<8>::new(&config.name).without_keeper()),
                (16, true) => Box::new(Bus::<16>::new(&config.name)),
                (16, false) => Box::new(Bus::<16>::new(&config.name).without_keeper()),
                (32, true) => Box::new(Bus::<32>::new(&config.name)),
                (32, false) => Box::new(Bus::<32>::new(&config.name).without_keeper()),
                (64, true) => Box::new(Bus::<64>::new(&config.name)),
                (64, false) => Box::new(Bus::<64>::new(&config.name).without_keeper()),
                (other, _) => return Err(ConfigIssue::UnsupportedWidth(other)),
            };
            Ok(bus)
        });
    }

    pub fn create_from_json<P: AsRef<Path>>(&self, path: P) -> SimResult<ConfiguredSystem> {
        let content = std::fs::read_to_string(path.as_ref())?;
        self.create_from_str(&content)
    }

    pub fn create_from_str(&self, json: &str) -> SimResult<ConfiguredSystem> {
        let config: SystemConfig = serde_json::from_str(json)?;
        self.build(config)
    }

    /// Build every board of `config` into a fresh engine. The engine is not
    /// initialized; watches and stimulus are already registered.
    pub fn build(&self, config: SystemConfig) -> SimResult<ConfiguredSystem> {
        config.engine.validate()?;
        let mut engine = Engine::new(config.engine.clone());
        let mut watched = Vec::new();

        for board_config in &config.boards {
            if engine.find_board(&board_config.name).is_some() {
                return Err(malformed(&board_config.name, format!("duplicate board '{}'", board_config.name)));
            }
            let board = self.build_board(board_config)?;
            let names: Vec<(String, ComponentId)> = board_config
                .components
                .iter()
                .filter_map(|c| board.find(&c.name).map(|id| (c.name.clone(), id)))
                .collect();
            let board_id = engine.add_board(board)?;

            for watch in &board_config.watch {
                let component = lookup(&names, &board_config.name, &watch.component)?;
                engine.enable_trace(board_id, component, &watch.pin)?;
                watched.push(WatchedPin {
                    board: board_id,
                    component,
                    label: format!("{}.{}", watch.component, watch.pin),
                    pin: watch.pin.clone(),
                });
            }

            for stimulus in &board_config.stimulus {
                let component = lookup(&names, &board_config.name, &stimulus.component)?;
                engine.schedule_write(board_id, component, &stimulus.pin, stimulus.value, stimulus.tick)?;
            }
        }

        info!(
            system = %config.name,
            boards = config.boards.len(),
            watched = watched.len(),
            "system built"
        );
        Ok(ConfiguredSystem {
            name: config.name,
            description: config.description,
            engine,
            watched,
        })
    }

    fn build_board(&self, config: &BoardConfig) -> SimResult<Board> {
        let mut board = Board::new(&config.name);
        for clock in &config.clocks {
            board.add_clock_domain(&clock.name, clock.period, clock.phase)?;
        }

        for component in &config.components {
            if board.find(&component.name).is_some() {
                return Err(SimError::config(
                    &component.name,
                    None,
                    ConfigIssue::MalformedBoard(format!("duplicate component name '{}'", component.name)),
                )
                .on_board(&config.name));
            }
            let constructor = self
                .component_registry
                .get(&component.component_type)
                .ok_or_else(|| {
                    SimError::config(
                        &component.name,
                        None,
                        ConfigIssue::MalformedBoard(format!(
                            "unknown component type '{}'",
                            component.component_type
                        )),
                    )
                    .on_board(&config.name)
                })?;
            let part = constructor(component, &board)
                .map_err(|issue| SimError::config(&component.name, None, issue).on_board(&config.name))?;
            board.add_boxed(part);
        }

        for connection in &config.connections {
            let source = find(&board, &connection.source.component)?;
            for target in &connection.targets {
                let target_id = find(&board, &target.component)?;
                debug!(
                    board = %config.name,
                    "wiring {}.{} -> {}.{}",
                    connection.source.component,
                    connection.source.pin,
                    target.component,
                    target.pin
                );
                board.connect(source, &connection.source.pin, target_id, &target.pin)?;
            }
        }
        Ok(board)
    }
}

fn malformed(board: &str, reason: String) -> SimError {
    SimError::config(board, None, ConfigIssue::MalformedBoard(reason)).on_board(board)
}

fn find(board: &Board, component: &str) -> SimResult<ComponentId> {
    board
        .find(component)
        .ok_or_else(|| malformed(board.name(), format!("no component named '{}'", component)))
}

fn lookup(names: &[(String, ComponentId)], board: &str, component: &str) -> SimResult<ComponentId> {
    names
        .iter()
        .find(|(name, _)| name == component)
        .map(|(_, id)| *id)
        .ok_or_else(|| malformed(board, format!("no component named '{}'", component)))
}

/// A pin traced on behalf of the front-end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedPin {
    pub board: BoardId,
    pub component: ComponentId,
    pub label: String,
    pub pin: String,
}

/// An engine built from a [`SystemConfig`], with the pins the file asked to watch.
pub struct ConfiguredSystem {
    pub name: String,
    pub description: String,
    pub engine: Engine,
    pub watched: Vec<WatchedPin>,
}

impl std::fmt::Debug for ConfiguredSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfiguredSystem")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("watched", &self.watched)
            .finish_non_exhaustive()
    }
}

impl ConfiguredSystem {
    pub fn get_system_info(&self) -> SystemInfo {
        SystemInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            board_count: self.engine.boards().count(),
            component_count: self.engine.boards().map(|(_, board)| board.len()).sum(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInfo {
    pub name: String,
    pub description: String,
    pub board_count: usize,
    pub component_count: usize,
}
