use serde::{Deserialize, Serialize};

use crate::component::{BaseComponent, Component, TickContext};
use crate::error::SimResult;
use crate::pin::Drive;
use crate::snapshot::{StateReader, StateWriter};
use crate::types::{PinIndex, Tick};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateKind {
    Buf,
    Not,
    And,
    Or,
    Xor,
    Nand,
    Nor,
}

impl GateKind {
    pub fn inputs(self) -> usize {
        match self {
            GateKind::Buf | GateKind::Not => 1,
            _ => 2,
        }
    }

    pub fn eval(self, a: bool, b: bool) -> bool {
        match self {
            GateKind::Buf => a,
            GateKind::Not => !a,
            GateKind::And => a && b,
            GateKind::Or => a || b,
            GateKind::Xor => a ^ b,
            GateKind::Nand => !(a && b),
            GateKind::Nor => !(a || b),
        }
    }

    pub fn from_str(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "buf" => Some(GateKind::Buf),
            "not" => Some(GateKind::Not),
            "and" => Some(GateKind::And),
            "or" => Some(GateKind::Or),
            "xor" => Some(GateKind::Xor),
            "nand" => Some(GateKind::Nand),
            "nor" => Some(GateKind::Nor),
            _ => None,
        }
    }
}

/// Single-bit logic gate with transport delay.
///
/// Inputs are `A` (and `B` for two-input kinds), the output is `Y`. With a
/// non-zero delay a new result is scheduled as a write to `Y` and only driven
/// once it arrives; with zero delay the output follows the inputs within the
/// tick. At power-on the gate samples its inputs once and schedules the result
/// for tick 1, which is what starts ring oscillators. `Y` fans out to any
/// number of inputs.
pub struct Gate {
    base: BaseComponent,
    kind: GateKind,
    a: PinIndex,
    b: Option<PinIndex>,
    y: PinIndex,
    driven: bool,
    target: bool,
}

impl Gate {
    pub fn new(name: &str, kind: GateKind, delay: Tick) -> Self {
        let mut base = BaseComponent::new(name).with_delay(delay);
        let a = base.add_sink("A");
        let b = (kind.inputs() == 2).then(|| base.add_sink("B"));
        let y = base.add_source("Y");
        base.mark_multi_connect("Y");
        Gate {
            base,
            kind,
            a,
            b,
            y,
            driven: false,
            target: false,
        }
    }

    pub fn not(name: &str, delay: Tick) -> Self {
        Self::new(name, GateKind::Not, delay)
    }

    /// Output level before the first evaluation lands.
    pub fn with_initial(mut self, level: bool) -> Self {
        self.driven = level;
        self.target = level;
        self
    }

    pub fn kind(&self) -> GateKind {
        self.kind
    }

    pub fn output(&self) -> bool {
        self.driven
    }

    fn compute(&self, ctx: &TickContext<'_>) -> bool {
        let a = ctx.read_bit(self.a);
        let b = self.b.map(|b| ctx.read_bit(b)).unwrap_or(false);
        self.kind.eval(a, b)
    }
}

impl Component for Gate {
    fn base(&self) -> &BaseComponent {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseComponent {
        &mut self.base
    }

    fn class_tag(&self) -> &'static str {
        "gate"
    }

    fn power_on(&mut self, ctx: &mut TickContext<'_>) {
        let level = self.compute(ctx);
        if level != self.target {
            self.target = level;
            ctx.schedule_write(self.base.delay, self.y, level as u64);
        }
    }

    fn tick(&mut self, ctx: &mut TickContext<'_>) {
        let level = self.compute(ctx);
        if self.base.delay == 0 {
            self.driven = level;
            self.target = level;
        } else if level != self.target {
            self.target = level;
            ctx.schedule_write(self.base.delay, self.y, level as u64);
        }
    }

    fn receive(&mut self, pin: PinIndex, value: u64) {
        if pin == self.y {
            self.driven = value & 1 == 1;
        } else {
            self.base.set_shadow(pin, value);
        }
    }

    fn emit(&self, pin: PinIndex) -> Drive {
        if pin == self.y {
            Drive::strong(self.driven as u64)
        } else {
            Drive::high_z()
        }
    }

    fn save_state(&self, writer: &mut StateWriter) {
        writer.write_bool(self.driven);
        writer.write_bool(self.target);
    }

    fn load_state(&mut self, reader: &mut StateReader<'_>) -> SimResult<()> {
        self.driven = reader.read_bool()?;
        self.target = reader.read_bool()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truth_tables() {
        let cases = [
            (GateKind::And, [false, false, false, true]),
            (GateKind::Or, [false, true, true, true]),
            (GateKind::Xor, [false, true, true, false]),
            (GateKind::Nand, [true, true, true, false]),
            (GateKind::Nor, [true, false, false, false]),
        ];
        for (kind, expected) in cases {
            let got = [(false, false), (false, true), (true, false), (true, true)]
                .map(|(a, b)| kind.eval(a, b));
            assert_eq!(got, expected, "{:?}", kind);
        }
        assert!(GateKind::Not.eval(false, true));
        assert!(GateKind::Buf.eval(true, false));
    }

    #[test]
    fn test_pin_layout() {
        let inv = Gate::not("INV", 1);
        let names: Vec<&str> = inv.pins().iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["A", "Y"]);
        assert_eq!(inv.propagation_delay(), 1);

        let nand = Gate::new("NAND", GateKind::Nand, 0);
        let names: Vec<&str> = nand.pins().iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["A", "B", "Y"]);
    }

    #[test]
    fn test_receive_drives_output() {
        let mut inv = Gate::not("INV", 2).with_initial(true);
        assert_eq!(inv.emit(PinIndex(1)), Drive::strong(1));
        inv.receive(PinIndex(1), 0);
        assert!(!inv.output());
        assert_eq!(inv.emit(PinIndex(0)), Drive::high_z());
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(GateKind::from_str("NAND"), Some(GateKind::Nand));
        assert_eq!(GateKind::from_str("mux"), None);
    }
}
