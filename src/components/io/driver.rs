use crate::component::{BaseComponent, Component, TickContext};
use crate::error::SimResult;
use crate::pin::{Drive, DriveStrength, PinDirection};
use crate::snapshot::{StateReader, StateWriter};
use crate::types::{width_mask, PinIndex};

/// Programmable source. `receive(OUT, v)` changes the driven value; the
/// optional `OE` input tri-states the output while it reads low.
pub struct Driver {
    base: BaseComponent,
    out: PinIndex,
    oe: PinIndex,
    width: u8,
    value: u64,
    strength: DriveStrength,
    enabled: bool,
}

impl Driver {
    pub fn new(name: &str, width: u8, value: u64) -> Self {
        let mut base = BaseComponent::new(name);
        let out = base.add_pin("OUT", PinDirection::Source, width);
        let oe = base.add_sink("OE");
        base.mark_optional("OE");
        Driver {
            base,
            out,
            oe,
            width,
            value: value & width_mask(width),
            strength: DriveStrength::Strong,
            enabled: true,
        }
    }

    pub fn with_strength(mut self, strength: DriveStrength) -> Self {
        self.strength = strength;
        self
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Component for Driver {
    fn base(&self) -> &BaseComponent {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseComponent {
        &mut self.base
    }

    fn class_tag(&self) -> &'static str {
        "driver"
    }

    fn power_on(&mut self, ctx: &mut TickContext<'_>) {
        self.tick(ctx);
    }

    fn tick(&mut self, ctx: &mut TickContext<'_>) {
        // An unconnected or floating OE leaves the output enabled.
        let oe = ctx.signal(self.oe);
        self.enabled = oe.is_floating() || oe.value & 1 == 1;
    }

    fn receive(&mut self, pin: PinIndex, value: u64) {
        if pin == self.out {
            self.value = value & width_mask(self.width);
        } else {
            self.base.set_shadow(pin, value);
        }
    }

    fn emit(&self, pin: PinIndex) -> Drive {
        if pin != self.out || !self.enabled {
            return Drive::high_z();
        }
        Drive {
            value: self.value,
            strength: self.strength,
        }
    }

    fn save_state(&self, writer: &mut StateWriter) {
        writer.write_u64(self.value);
        writer.write_bool(self.enabled);
    }

    fn load_state(&mut self, reader: &mut StateReader<'_>) -> SimResult<()> {
        let value = reader.read_u64()?;
        self.enabled = reader.read_bool()?;
        self.value = value;
        Ok(())
    }
}
