use crate::component::{BaseComponent, Component, TickContext};
use crate::pin::{Drive, PinDirection};
use crate::types::{width_mask, PinIndex};

/// Constant weak pull on a net: the tie-up / tie-down resistor of chip code.
pub struct Tie {
    base: BaseComponent,
    out: PinIndex,
    value: u64,
}

impl Tie {
    pub fn new(name: &str, width: u8, value: u64) -> Self {
        let mut base = BaseComponent::new(name);
        let out = base.add_pin("OUT", PinDirection::Source, width);
        base.mark_multi_connect("OUT");
        Tie {
            base,
            out,
            value: value & width_mask(width),
        }
    }

    /// Pull every bit high.
    pub fn high(name: &str, width: u8) -> Self {
        Self::new(name, width, u64::MAX)
    }

    pub fn low(name: &str, width: u8) -> Self {
        Self::new(name, width, 0)
    }

    pub fn value(&self) -> u64 {
        self.value
    }
}

impl Component for Tie {
    fn base(&self) -> &BaseComponent {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseComponent {
        &mut self.base
    }

    fn class_tag(&self) -> &'static str {
        "tie"
    }

    fn tick(&mut self, _ctx: &mut TickContext<'_>) {}

    fn emit(&self, pin: PinIndex) -> Drive {
        if pin == self.out {
            Drive::weak(self.value)
        } else {
            Drive::high_z()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tie_values() {
        let high = Tie::high("VCC", 4);
        assert_eq!(high.value(), 0b1111);
        assert_eq!(high.emit(PinIndex(0)), Drive::weak(0b1111));
        assert!(high.pins().find("OUT").unwrap().is_multi_connect());

        let low = Tie::low("GND", 1);
        assert_eq!(low.emit(PinIndex(0)), Drive::weak(0));
        assert_eq!(low.class_tag(), "tie");
    }
}
