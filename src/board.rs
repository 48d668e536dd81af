//! Boards and the wiring DSL.
//!
//! A board owns its components and the union-find of their pins. Wiring is
//! done by name, either with [`Board::connect`] or with the `>>` operator on
//! pin references:
//!
//! ```ignore
//! let tie = board.add(Tie::high("VCC", 1));
//! let probe = board.add(Probe::new("P", 1));
//! board.wire(tie.pin("OUT") >> probe.pin("IN"))?;
//! ```

use std::ops::Shr;

use tracing::{debug, info};

use crate::clock::ClockManager;
use crate::component::Component;
use crate::config::EngineConfig;
use crate::connection::ConnectionManager;
use crate::delay_queue::{DelayQueue, Payload};
use crate::diagnostics::Diagnostics;
use crate::error::{ConfigIssue, SimError, SimResult};
use crate::net::{NetChange, Netlist};
use crate::pin::{PinRegistry, Signal};
use crate::scheduler::{evaluate, Scheduler};
use crate::timing::TimingMonitor;
use crate::types::{ClockDomainId, ComponentId, NetId, PinAddr, PinIndex, Tick};

/// A pin named on a component handle, the left or right side of `>>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinRef {
    pub component: ComponentId,
    pub pin: String,
}

/// A requested connection between two pins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wire {
    pub from: PinRef,
    pub to: PinRef,
}

impl ComponentId {
    pub fn pin(self, name: &str) -> PinRef {
        PinRef {
            component: self,
            pin: name.to_string(),
        }
    }
}

impl Shr for PinRef {
    type Output = Wire;

    fn shr(self, to: PinRef) -> Wire {
        Wire { from: self, to }
    }
}

/// Everything the scheduler mutates during a tick.
pub struct Circuit {
    pub(crate) components: Vec<Box<dyn Component>>,
    pub(crate) netlist: Netlist,
    pub(crate) queue: DelayQueue,
    pub(crate) clocks: ClockManager,
    pub(crate) timing: TimingMonitor,
}

pub struct Board {
    name: String,
    pub(crate) circuit: Circuit,
    connections: ConnectionManager,
    pub(crate) scheduler: Scheduler,
    initialized: bool,
}

impl Board {
    pub fn new(name: &str) -> Self {
        Board {
            name: name.to_string(),
            circuit: Circuit {
                components: Vec::new(),
                netlist: Netlist::default(),
                queue: DelayQueue::new(),
                clocks: ClockManager::new(),
                timing: TimingMonitor::new(),
            },
            connections: ConnectionManager::new(),
            scheduler: Scheduler::default(),
            initialized: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn add<C: Component + 'static>(&mut self, component: C) -> ComponentId {
        self.add_boxed(Box::new(component))
    }

    pub fn add_boxed(&mut self, component: Box<dyn Component>) -> ComponentId {
        let id = self.connections.register_component(component.pins().len());
        debug!(board = %self.name, component = component.name(), %id, "add");
        self.circuit.components.push(component);
        id
    }

    pub fn add_clock_domain(&mut self, name: &str, period: Tick, phase: Tick) -> SimResult<ClockDomainId> {
        if self.initialized {
            return Err(SimError::config(name, None, ConfigIssue::AfterInit).on_board(&self.name));
        }
        self.circuit
            .clocks
            .add_domain(name, period, phase)
            .map_err(|err| err.on_board(&self.name))
    }

    pub fn clock_domain(&self, name: &str) -> Option<ClockDomainId> {
        self.circuit.clocks.find(name)
    }

    pub fn clocks(&self) -> &ClockManager {
        &self.circuit.clocks
    }

    pub fn component(&self, id: ComponentId) -> Option<&dyn Component> {
        self.circuit.components.get(id.index()).map(|c| c.as_ref())
    }

    /// Concrete view of a component, for inspecting reference parts in tests and front-ends.
    pub fn component_as<T: Component + 'static>(&self, id: ComponentId) -> Option<&T> {
        self.component(id)
            .and_then(|component| component.as_any().downcast_ref::<T>())
    }

    pub fn components(&self) -> impl Iterator<Item = (ComponentId, &dyn Component)> {
        self.circuit
            .components
            .iter()
            .enumerate()
            .map(|(index, component)| (ComponentId::from(index), component.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.circuit.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.circuit.components.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<ComponentId> {
        self.circuit
            .components
            .iter()
            .position(|c| c.name() == name)
            .map(ComponentId::from)
    }

    fn pins_of(&self, id: ComponentId) -> SimResult<&PinRegistry> {
        self.component(id).map(|c| c.pins()).ok_or_else(|| {
            SimError::config(
                &id.to_string(),
                None,
                ConfigIssue::MalformedBoard(format!("no component {}", id)),
            )
            .on_board(&self.name)
        })
    }

    /// Resolve a pin name on a component to its address.
    pub fn pin_addr(&self, id: ComponentId, pin: &str) -> SimResult<PinAddr> {
        let index = self
            .pins_of(id)?
            .lookup(pin)
            .map_err(|err| err.on_board(&self.name))?;
        Ok(PinAddr::new(id, index))
    }

    /// Merge the nets of two pins.
    pub fn connect(&mut self, a: ComponentId, pin_a: &str, b: ComponentId, pin_b: &str) -> SimResult<()> {
        if self.initialized {
            let name = self.component(a).map(|c| c.name().to_string()).unwrap_or_default();
            return Err(SimError::config(&name, Some(pin_a), ConfigIssue::AfterInit).on_board(&self.name));
        }
        let left = self.pin_addr(a, pin_a)?;
        let right = self.pin_addr(b, pin_b)?;
        let (left_pins, right_pins) = (self.pins_of(a)?, self.pins_of(b)?);
        if left == right {
            return Err(SimError::InvalidConnection {
                board: self.name.clone(),
                pin: format!("{}.{}", left_pins.owner(), pin_a),
                reason: "cannot be connected to itself".to_string(),
            });
        }
        let (Some(left_pin), Some(right_pin)) = (left_pins.pin(left.pin), right_pins.pin(right.pin)) else {
            return Err(SimError::config(left_pins.owner(), Some(pin_a), ConfigIssue::UnknownPin).on_board(&self.name));
        };

        if left_pin.width() != right_pin.width() {
            return Err(SimError::WidthMismatch {
                board: self.name.clone(),
                left: format!("{}.{}", left_pins.owner(), pin_a),
                left_width: left_pin.width(),
                right: format!("{}.{}", right_pins.owner(), pin_b),
                right_width: right_pin.width(),
            });
        }

        for (addr, pins, pin) in [(left, left_pins, left_pin), (right, right_pins, right_pin)] {
            if !pin.is_multi_connect() && self.connections.is_connected(addr) {
                return Err(SimError::AlreadyConnected {
                    board: self.name.clone(),
                    component: pins.owner().to_string(),
                    pin: pin.name().to_string(),
                });
            }
        }

        debug!(
            board = %self.name,
            "connect {}.{} >> {}.{}",
            left_pins.owner(),
            pin_a,
            right_pins.owner(),
            pin_b
        );
        self.connections.connect(left, right);
        Ok(())
    }

    pub fn wire(&mut self, wire: Wire) -> SimResult<()> {
        self.connect(wire.from.component, &wire.from.pin, wire.to.component, &wire.to.pin)
    }

    fn registry_mut(&mut self, id: ComponentId) -> SimResult<&mut PinRegistry> {
        let board = self.name.clone();
        self.circuit
            .components
            .get_mut(id.index())
            .map(|c| &mut c.base_mut().pins)
            .ok_or_else(|| {
                SimError::config(
                    &id.to_string(),
                    None,
                    ConfigIssue::MalformedBoard(format!("no component {}", id)),
                )
                .on_board(&board)
            })
    }

    pub fn set_multi_connect(&mut self, id: ComponentId, pin: &str) -> SimResult<()> {
        let board = self.name.clone();
        self.registry_mut(id)?
            .set_multi_connect(pin)
            .map_err(|err| err.on_board(&board))
    }

    pub fn set_optional(&mut self, id: ComponentId, pin: &str) -> SimResult<()> {
        let board = self.name.clone();
        self.registry_mut(id)?
            .set_optional(pin)
            .map_err(|err| err.on_board(&board))
    }

    pub fn netlist(&self) -> &Netlist {
        &self.circuit.netlist
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn queue(&self) -> &DelayQueue {
        &self.circuit.queue
    }

    pub fn net_id(&self, id: ComponentId, pin: &str) -> SimResult<NetId> {
        let addr = self.pin_addr(id, pin)?;
        self.circuit.netlist.net_of(addr).ok_or_else(|| {
            SimError::config(pin, None, ConfigIssue::NotInitialized).on_board(&self.name)
        })
    }

    /// Resolved signal on the net a pin belongs to.
    pub fn signal(&self, id: ComponentId, pin: &str) -> SimResult<Signal> {
        let net = self.net_id(id, pin)?;
        Ok(self
            .circuit
            .netlist
            .net(net)
            .map(|net| net.signal())
            .unwrap_or_else(Signal::floating))
    }

    /// Queue a write to `pin` of `id`, delivered through `receive` at tick `at`.
    pub fn schedule_write(&mut self, id: ComponentId, pin: &str, value: u64, at: Tick) -> SimResult<()> {
        let addr = self.pin_addr(id, pin)?;
        self.circuit.queue.enqueue(
            id,
            at,
            Some(Payload {
                pin: addr.pin,
                value,
            }),
        );
        Ok(())
    }

    /// Seal pins, validate components, build nets and ranks, then power on.
    pub(crate) fn initialize(&mut self, config: &EngineConfig) -> SimResult<()> {
        if self.initialized {
            return Ok(());
        }
        let board = self.name.clone();

        for (index, component) in self.circuit.components.iter_mut().enumerate() {
            let id = ComponentId::from(index);
            component.base_mut().pins.seal();
            if let Some((pin, issue)) = component.base().defect() {
                return Err(SimError::config(component.name(), Some(pin), issue.clone()).on_board(&board));
            }
            component
                .validate()
                .map_err(|issue| SimError::config(component.name(), None, issue).on_board(&board))?;

            for pin in component.pins().iter() {
                let addr = PinAddr::new(id, pin.index());
                if pin.is_required() && !self.connections.is_connected(addr) {
                    return Err(SimError::config(
                        component.name(),
                        Some(pin.name()),
                        ConfigIssue::RequiredPinUnconnected,
                    )
                    .on_board(&board));
                }
            }

            if let Some(domain) = component.clock_domain() {
                self.circuit
                    .clocks
                    .subscribe(domain, id)
                    .map_err(|issue| SimError::config(component.name(), None, issue).on_board(&board))?;
            }
        }

        let groups = self.connections.groups();
        let registries: Vec<&PinRegistry> = self.circuit.components.iter().map(|c| c.pins()).collect();
        self.circuit.netlist = Netlist::build(&groups, &registries);

        for (index, component) in self.circuit.components.iter().enumerate() {
            let Some(spec) = component.timing() else {
                continue;
            };
            let id = ComponentId::from(index);
            for pin in &spec.data_pins {
                let Some(net) = self.circuit.netlist.net_of(PinAddr::new(id, *pin)) else {
                    continue;
                };
                let name = component.pins().name_of(*pin);
                self.circuit.timing.watch(id, name, net, &spec);
            }
        }

        // Reset outputs as constructed, then let every part see the resolved nets.
        for (index, component) in self.circuit.components.iter().enumerate() {
            let id = ComponentId::from(index);
            let outputs: Vec<PinIndex> = component.pins().outputs().map(|pin| pin.index()).collect();
            for pin in outputs {
                self.circuit
                    .netlist
                    .update_driver(PinAddr::new(id, pin), component.emit(pin));
            }
        }
        self.circuit.netlist.resolve_all();

        self.scheduler = Scheduler::build(&self.circuit.components, &self.circuit.netlist);
        self.circuit.clocks.prime(0);

        for id in self.scheduler.order().to_vec() {
            for net in evaluate(&mut self.circuit, id, 0, None, config.latch_pre_edge, true) {
                self.circuit.netlist.resolve(net);
            }
        }
        self.circuit.netlist.settle();
        self.scheduler.clear_dirty();
        self.initialized = true;

        info!(
            board = %self.name,
            components = self.circuit.components.len(),
            nets = self.circuit.netlist.len(),
            clocks = self.circuit.clocks.len(),
            loops = self.scheduler.loops().len(),
            "board initialized"
        );
        Ok(())
    }

    pub(crate) fn step(&mut self, now: Tick, config: &EngineConfig, diagnostics: &mut Diagnostics) -> Vec<NetChange> {
        self.scheduler
            .step(&mut self.circuit, now, config, &self.name, diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Driver, Gate, Probe, Tie};

    #[test]
    fn test_dsl_builds_wire() {
        let wire = ComponentId(0).pin("OUT") >> ComponentId(1).pin("IN");
        assert_eq!(wire.from.pin, "OUT");
        assert_eq!(wire.to.component, ComponentId(1));
    }

    #[test]
    fn test_connect_unknown_pin() {
        let mut board = Board::new("main");
        let tie = board.add(Tie::high("VCC", 1));
        let probe = board.add(Probe::new("P", 1));
        let err = board.connect(tie, "NOPE", probe, "IN").unwrap_err();
        assert_eq!(err.issue(), Some(&ConfigIssue::UnknownPin));
        assert!(err.to_string().contains("main/VCC.NOPE"));
    }

    #[test]
    fn test_width_mismatch() {
        let mut board = Board::new("main");
        let tie = board.add(Tie::high("VCC", 4));
        let probe = board.add(Probe::new("P", 1));
        let err = board.wire(tie.pin("OUT") >> probe.pin("IN")).unwrap_err();
        assert!(matches!(
            err,
            SimError::WidthMismatch {
                left_width: 4,
                right_width: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_already_connected() {
        let mut board = Board::new("main");
        let a = board.add(Driver::new("A", 1, 0));
        let b = board.add(Driver::new("B", 1, 0));
        let probe = board.add(Probe::new("P", 1));
        board.wire(a.pin("OUT") >> probe.pin("IN")).unwrap();
        let err = board.wire(b.pin("OUT") >> probe.pin("IN")).unwrap_err();
        assert!(matches!(err, SimError::AlreadyConnected { ref pin, .. } if pin == "IN"));

        board.set_multi_connect(probe, "IN").unwrap();
        board.wire(b.pin("OUT") >> probe.pin("IN")).unwrap();
    }

    #[test]
    fn test_required_pin_unconnected() {
        let mut board = Board::new("main");
        board.add(Gate::not("INV", 0));
        let err = board.initialize(&EngineConfig::default()).unwrap_err();
        assert_eq!(err.issue(), Some(&ConfigIssue::RequiredPinUnconnected));
        assert!(err.to_string().contains("main/INV.A"));
    }

    #[test]
    fn test_optional_pin_allowed() {
        let mut board = Board::new("main");
        let probe = board.add(Probe::new("P", 1));
        board.set_optional(probe, "IN").unwrap();
        board.initialize(&EngineConfig::default()).unwrap();
        assert_eq!(board.netlist().len(), 1);
        assert!(board.signal(probe, "IN").unwrap().is_floating());
        assert!(board.set_optional(probe, "IN").is_err());
    }

    #[test]
    fn test_initial_resolution() {
        let mut board = Board::new("main");
        let tie = board.add(Tie::high("VCC", 1));
        let probe = board.add(Probe::new("P", 1));
        board.wire(tie.pin("OUT") >> probe.pin("IN")).unwrap();
        board.initialize(&EngineConfig::default()).unwrap();

        let net = board.net_id(probe, "IN").unwrap();
        assert_eq!(board.net_id(tie, "OUT").unwrap(), net);
        assert_eq!(board.signal(probe, "IN").unwrap().value, 1);
        assert_eq!(board.scheduler().rank(tie), Some(0));
        assert_eq!(board.scheduler().rank(probe), Some(1));
        assert!(board.scheduler().dirty().is_empty());
        assert!(board.component_as::<Probe>(probe).is_some());
        assert!(board.component_as::<Tie>(probe).is_none());
    }
}
