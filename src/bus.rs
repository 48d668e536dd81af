use crate::component::{BaseComponent, Component, TickContext};
use crate::error::{SimError, SimResult};
use crate::pin::{Drive, PinDirection};
use crate::snapshot::{StateReader, StateWriter};
use crate::types::{width_mask, PinIndex, Tick};

/// Shared W-bit data bus.
///
/// The bus owns a single bidirectional multi-connect pin `D`; every part that
/// talks on the bus connects to it and the net resolves the drivers. The bus
/// itself only adds two things: an optional keeper that weakly holds the last
/// value some driver put on the wires, and `receive(D, v)` which pushes `v` at
/// strong strength for exactly one tick.
pub struct Bus<const W: u8> {
    base: BaseComponent,
    data: PinIndex,
    keeper: bool,
    kept: Option<u64>,
    pending: Option<u64>,
    pushing: Option<(u64, Tick)>,
    contention_events: u64,
    last_contended: bool,
}

impl<const W: u8> Bus<W> {
    pub fn new(name: &str) -> Self {
        let mut base = BaseComponent::new(name);
        let data = base.add_pin("D", PinDirection::Bidirectional, W);
        base.mark_multi_connect("D");
        Bus {
            base,
            data,
            keeper: true,
            kept: None,
            pending: None,
            pushing: None,
            contention_events: 0,
            last_contended: false,
        }
    }

    /// Let the wires float when nobody drives them.
    pub fn without_keeper(mut self) -> Self {
        self.keeper = false;
        self
    }

    pub fn width(&self) -> u8 {
        W
    }

    pub fn has_keeper(&self) -> bool {
        self.keeper
    }

    /// Value the keeper is holding, if it has seen one.
    pub fn kept(&self) -> Option<u64> {
        self.kept
    }

    pub fn is_pushing(&self) -> bool {
        self.pushing.is_some()
    }

    /// Number of times the bus went from clean to contended.
    pub fn contention_events(&self) -> u64 {
        self.contention_events
    }
}

impl<const W: u8> Component for Bus<W> {
    fn base(&self) -> &BaseComponent {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseComponent {
        &mut self.base
    }

    fn class_tag(&self) -> &'static str {
        "bus"
    }

    fn power_on(&mut self, ctx: &mut TickContext<'_>) {
        self.tick(ctx);
    }

    fn tick(&mut self, ctx: &mut TickContext<'_>) {
        let now = ctx.now();
        if let Some(value) = self.pending.take() {
            self.pushing = Some((value, now));
            if self.keeper {
                self.kept = Some(value);
            }
            ctx.schedule(1);
        } else if matches!(self.pushing, Some((_, started)) if now > started) {
            self.pushing = None;
        }

        let signal = ctx.signal(self.data);
        let contended = signal.is_contended();
        if contended && !self.last_contended {
            self.contention_events += 1;
        }
        self.last_contended = contended;

        if self.keeper && self.pushing.is_none() && !contended && !signal.is_floating() {
            self.kept = Some(signal.value);
        }
    }

    fn receive(&mut self, pin: PinIndex, value: u64) {
        if pin == self.data {
            self.pending = Some(value & width_mask(W));
        } else {
            self.base.set_shadow(pin, value);
        }
    }

    fn emit(&self, pin: PinIndex) -> Drive {
        if pin != self.data {
            return Drive::high_z();
        }
        match (self.pushing, self.kept) {
            (Some((value, _)), _) => Drive::strong(value),
            (None, Some(value)) if self.keeper => Drive::weak(value),
            _ => Drive::high_z(),
        }
    }

    fn save_state(&self, writer: &mut StateWriter) {
        writer.write_opt_u64(self.kept);
        writer.write_opt_u64(self.pending);
        match self.pushing {
            Some((value, started)) => {
                writer.write_bool(true);
                writer.write_u64(value);
                writer.write_u64(started);
            }
            None => writer.write_bool(false),
        }
        writer.write_u64(self.contention_events);
        writer.write_bool(self.last_contended);
    }

    fn load_state(&mut self, reader: &mut StateReader<'_>) -> SimResult<()> {
        let kept = reader.read_opt_u64()?;
        let pending = reader.read_opt_u64()?;
        let pushing = if reader.read_bool()? {
            Some((reader.read_u64()?, reader.read_u64()?))
        } else {
            None
        };
        let contention_events = reader.read_u64()?;
        let last_contended = reader.read_bool()?;
        if kept.is_some_and(|value| value & !width_mask(W) != 0) {
            return Err(SimError::incompatible(format!(
                "bus {}: kept value wider than {} bits",
                self.base.name, W
            )));
        }
        self.kept = kept;
        self.pending = pending;
        self.pushing = pushing;
        self.contention_events = contention_events;
        self.last_contended = last_contended;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_creation() {
        let bus = Bus::<8>::new("DATA_BUS");
        assert_eq!(bus.name(), "DATA_BUS");
        assert_eq!(bus.width(), 8);
        assert!(bus.has_keeper());
        let pin = bus.pins().find("D").unwrap();
        assert_eq!(pin.width(), 8);
        assert!(pin.is_multi_connect());
        assert_eq!(pin.direction(), PinDirection::Bidirectional);
    }

    #[test]
    fn test_idle_bus_floats() {
        let bus = Bus::<4>::new("B");
        assert_eq!(bus.emit(PinIndex(0)), Drive::high_z());
        assert!(bus.kept().is_none());
    }

    #[test]
    fn test_receive_masks_to_width() {
        let mut bus = Bus::<4>::new("B");
        bus.receive(PinIndex(0), 0x1F);
        assert_eq!(bus.pending, Some(0xF));
    }

    #[test]
    fn test_unsupported_width_is_a_defect() {
        let bus = Bus::<0>::new("B");
        assert!(bus.base().defect().is_some());
    }

    #[test]
    fn test_state_round_trip() {
        let mut bus = Bus::<8>::new("B");
        bus.kept = Some(0xA5);
        bus.pushing = Some((0x3C, 7));
        bus.contention_events = 2;

        let mut writer = StateWriter::new();
        bus.save_state(&mut writer);
        let bytes = writer.into_bytes();

        let mut copy = Bus::<8>::new("B");
        copy.load_state(&mut StateReader::new(&bytes)).unwrap();
        assert_eq!(copy.kept(), Some(0xA5));
        assert!(copy.is_pushing());
        assert_eq!(copy.contention_events(), 2);
        assert_eq!(copy.emit(PinIndex(0)), Drive::strong(0x3C));
    }

    #[test]
    fn test_wide_kept_value_leaves_state_alone() {
        let mut wide = Bus::<8>::new("B");
        wide.kept = Some(0xA5);
        wide.contention_events = 4;
        let mut writer = StateWriter::new();
        wide.save_state(&mut writer);
        let bytes = writer.into_bytes();

        let mut narrow = Bus::<4>::new("B");
        narrow.kept = Some(0x3);
        let err = narrow.load_state(&mut StateReader::new(&bytes)).unwrap_err();
        assert!(matches!(err, SimError::SnapshotIncompatible(_)));
        assert_eq!(narrow.kept(), Some(0x3));
        assert_eq!(narrow.contention_events(), 0);
    }
}
