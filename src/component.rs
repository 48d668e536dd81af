use std::any::Any;

use crate::clock::ClockEdge;
use crate::delay_queue::{DelayQueue, Payload};
use crate::error::{ConfigIssue, SimError, SimResult};
use crate::net::Netlist;
use crate::pin::{Drive, PinDirection, PinRegistry, Signal};
use crate::snapshot::{StateReader, StateWriter};
use crate::timing::TimingSpec;
use crate::types::{ClockDomainId, ComponentId, NetId, PinIndex, Tick};

/// Downcasting support for boxed components.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Everything a simulated part is made of.
///
/// The scheduler only ever talks to a component through this trait. `tick` reads
/// nets and updates internal state; after every `tick` the scheduler polls
/// `emit` on each output pin and pushes the result onto the pin's net.
pub trait Component: AsAny + Send {
    fn base(&self) -> &BaseComponent;
    fn base_mut(&mut self) -> &mut BaseComponent;

    /// Stable type tag written into snapshots.
    fn class_tag(&self) -> &'static str;

    fn name(&self) -> &str {
        &self.base().name
    }

    fn pins(&self) -> &PinRegistry {
        &self.base().pins
    }

    fn propagation_delay(&self) -> Tick {
        self.base().delay
    }

    /// Setup/hold contract for clocked storage. Components returning `Some` are
    /// subscribed to its domain and cut from the rank graph on their inputs.
    fn timing(&self) -> Option<TimingSpec> {
        None
    }

    fn clock_domain(&self) -> Option<ClockDomainId> {
        self.timing().map(|spec| spec.domain)
    }

    fn is_clocked_storage(&self) -> bool {
        self.timing().is_some()
    }

    /// One-shot configuration check run by `Engine::init`.
    fn validate(&self) -> Result<(), ConfigIssue> {
        Ok(())
    }

    /// Called once during init, after nets first resolve, in rank order.
    fn power_on(&mut self, _ctx: &mut TickContext<'_>) {}

    fn tick(&mut self, ctx: &mut TickContext<'_>);

    /// Accept a write pushed from outside a tick. The scheduler marks the
    /// component dirty afterwards.
    fn receive(&mut self, pin: PinIndex, value: u64) {
        self.base_mut().set_shadow(pin, value);
    }

    /// Value currently driven on an output pin.
    fn emit(&self, pin: PinIndex) -> Drive;

    fn save_state(&self, _writer: &mut StateWriter) {}

    fn load_state(&mut self, _reader: &mut StateReader<'_>) -> SimResult<()> {
        Ok(())
    }
}

/// State shared by every component: name, pin table, propagation delay and the
/// shadow input register fed by the default `receive`.
#[derive(Debug, Clone)]
pub struct BaseComponent {
    pub name: String,
    pub pins: PinRegistry,
    pub delay: Tick,
    shadow: Vec<Option<u64>>,
    defect: Option<(String, ConfigIssue)>,
}

impl BaseComponent {
    pub fn new(name: &str) -> Self {
        BaseComponent {
            name: name.to_string(),
            pins: PinRegistry::new(name),
            delay: 0,
            shadow: Vec::new(),
            defect: None,
        }
    }

    pub fn with_delay(mut self, delay: Tick) -> Self {
        self.delay = delay;
        self
    }

    /// Add a pin from a constructor. A refused pin is remembered and reported
    /// by `Engine::init` as a configuration error.
    pub fn add_pin(&mut self, name: &str, direction: PinDirection, width: u8) -> PinIndex {
        match self.pins.add_pin(name, direction, width) {
            Ok(index) => index,
            Err(err) => {
                self.remember(name, &err);
                PinIndex(u16::MAX)
            }
        }
    }

    pub fn add_sink(&mut self, name: &str) -> PinIndex {
        self.add_pin(name, PinDirection::Sink, 1)
    }

    pub fn add_source(&mut self, name: &str) -> PinIndex {
        self.add_pin(name, PinDirection::Source, 1)
    }

    pub fn add_bidirectional(&mut self, name: &str) -> PinIndex {
        self.add_pin(name, PinDirection::Bidirectional, 1)
    }

    pub fn mark_multi_connect(&mut self, pin: &str) {
        if let Err(err) = self.pins.set_multi_connect(pin) {
            self.remember(pin, &err);
        }
    }

    pub fn mark_optional(&mut self, pin: &str) {
        if let Err(err) = self.pins.set_optional(pin) {
            self.remember(pin, &err);
        }
    }

    fn remember(&mut self, pin: &str, err: &SimError) {
        if self.defect.is_none() {
            let issue = err.issue().cloned().unwrap_or(ConfigIssue::UnknownPin);
            self.defect = Some((pin.to_string(), issue));
        }
    }

    /// First pin the constructor failed to create, with the reason.
    pub fn defect(&self) -> Option<(&str, &ConfigIssue)> {
        self.defect.as_ref().map(|(pin, issue)| (pin.as_str(), issue))
    }

    pub fn shadow(&self, pin: PinIndex) -> Option<u64> {
        self.shadow.get(pin.index()).copied().flatten()
    }

    pub fn set_shadow(&mut self, pin: PinIndex, value: u64) {
        if pin.index() >= self.pins.len() {
            return;
        }
        if self.shadow.len() <= pin.index() {
            self.shadow.resize(pin.index() + 1, None);
        }
        self.shadow[pin.index()] = Some(value);
    }

    pub(crate) fn save_shadow(&self, writer: &mut StateWriter) {
        writer.write_u32(self.shadow.len() as u32);
        for value in &self.shadow {
            writer.write_opt_u64(*value);
        }
    }

    pub(crate) fn load_shadow(&mut self, reader: &mut StateReader<'_>) -> SimResult<()> {
        let len = reader.read_u32()? as usize;
        let mut shadow = Vec::with_capacity(len.min(self.pins.len()));
        for _ in 0..len {
            shadow.push(reader.read_opt_u64()?);
        }
        self.shadow = shadow;
        Ok(())
    }
}

/// Per-call view handed to `Component::tick` and `Component::power_on`.
pub struct TickContext<'a> {
    pub(crate) now: Tick,
    pub(crate) component: ComponentId,
    pub(crate) pin_nets: &'a [NetId],
    pub(crate) nets: &'a Netlist,
    pub(crate) queue: &'a mut DelayQueue,
    pub(crate) edge: Option<ClockEdge>,
    pub(crate) level: Option<bool>,
    pub(crate) latch_pre_edge: bool,
}

impl<'a> TickContext<'a> {
    pub fn now(&self) -> Tick {
        self.now
    }

    pub fn id(&self) -> ComponentId {
        self.component
    }

    /// Resolved signal on the net of `pin`.
    pub fn signal(&self, pin: PinIndex) -> Signal {
        self.pin_nets
            .get(pin.index())
            .and_then(|id| self.nets.net(*id))
            .map(|net| net.signal())
            .unwrap_or_else(Signal::floating)
    }

    pub fn read(&self, pin: PinIndex) -> u64 {
        self.signal(pin).value
    }

    pub fn read_bit(&self, pin: PinIndex) -> bool {
        self.read(pin) & 1 == 1
    }

    /// Net value as it stood at the end of the previous tick.
    pub fn read_settled(&self, pin: PinIndex) -> u64 {
        self.pin_nets
            .get(pin.index())
            .and_then(|id| self.nets.net(*id))
            .map(|net| net.settled())
            .unwrap_or(0)
    }

    /// Value clocked storage should capture on an edge: the current value, or
    /// the pre-edge value when the engine runs with `latch_pre_edge`.
    pub fn latch_value(&self, pin: PinIndex) -> u64 {
        if self.latch_pre_edge {
            self.read_settled(pin)
        } else {
            self.read(pin)
        }
    }

    /// Edge of this component's clock domain that fired this tick, if any.
    pub fn clock_edge(&self) -> Option<ClockEdge> {
        self.edge
    }

    pub fn rising_edge(&self) -> bool {
        self.edge.is_some_and(|edge| edge.rising)
    }

    pub fn clock_level(&self) -> bool {
        self.level.unwrap_or(false)
    }

    /// Ask to be ticked again `delay` ticks from now (at least one).
    pub fn schedule(&mut self, delay: Tick) {
        self.queue.enqueue(self.component, self.now + delay.max(1), None);
    }

    /// Deliver `value` to this component's `pin` through `receive` after `delay`
    /// ticks (at least one).
    pub fn schedule_write(&mut self, delay: Tick, pin: PinIndex, value: u64) {
        self.queue.enqueue(
            self.component,
            self.now + delay.max(1),
            Some(Payload { pin, value }),
        );
    }

    /// Drive `value` onto `pin` in the same tick, after every component
    /// sampling on this tick's edges has settled. The last call per pin wins.
    pub fn commit_write(&mut self, pin: PinIndex, value: u64) {
        self.queue.commit(self.component, Payload { pin, value });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_component_pins() {
        let mut base = BaseComponent::new("U7").with_delay(3);
        let a = base.add_sink("A");
        let y = base.add_source("Y");
        assert_eq!(a, PinIndex(0));
        assert_eq!(y, PinIndex(1));
        assert_eq!(base.delay, 3);
        assert!(base.defect().is_none());
    }

    #[test]
    fn test_defect_recorded() {
        let mut base = BaseComponent::new("U7");
        base.add_sink("A");
        base.add_source("A");
        base.add_pin("W", PinDirection::Sink, 0);
        let (pin, issue) = base.defect().unwrap();
        assert_eq!(pin, "A");
        assert_eq!(issue, &ConfigIssue::DuplicatePinName);
    }

    #[test]
    fn test_shadow_register() {
        let mut base = BaseComponent::new("U7");
        base.add_sink("A");
        let b = base.add_sink("B");
        assert_eq!(base.shadow(b), None);
        base.set_shadow(b, 5);
        assert_eq!(base.shadow(b), Some(5));
        base.set_shadow(PinIndex(9), 1);
        assert_eq!(base.shadow(PinIndex(9)), None);

        let mut writer = StateWriter::new();
        base.save_shadow(&mut writer);
        let bytes = writer.into_bytes();
        let mut other = BaseComponent::new("U7");
        other.add_sink("A");
        other.add_sink("B");
        other.load_shadow(&mut StateReader::new(&bytes)).unwrap();
        assert_eq!(other.shadow(b), Some(5));
    }

    #[test]
    fn test_context_reads_and_schedules() {
        let mut registry = PinRegistry::new("x");
        registry.add_sink("A").unwrap();
        let addr = crate::types::PinAddr::new(ComponentId(0), PinIndex(0));
        let netlist = Netlist::build(&[vec![addr]], &[&registry]);
        let mut queue = DelayQueue::new();
        let mut ctx = TickContext {
            now: 10,
            component: ComponentId(0),
            pin_nets: netlist.pins_of(ComponentId(0)),
            nets: &netlist,
            queue: &mut queue,
            edge: None,
            level: None,
            latch_pre_edge: false,
        };
        assert!(ctx.signal(PinIndex(0)).is_floating());
        assert!(ctx.signal(PinIndex(5)).is_floating());
        assert!(!ctx.rising_edge());
        ctx.schedule(0);
        ctx.schedule_write(3, PinIndex(0), 1);
        assert_eq!(queue.peek_next(), Some(11));
        assert_eq!(queue.entries()[1].fire_tick, 13);
    }
}
