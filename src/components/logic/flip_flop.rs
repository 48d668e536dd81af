use crate::component::{BaseComponent, Component, TickContext};
use crate::error::SimResult;
use crate::pin::{Drive, PinDirection};
use crate::snapshot::{StateReader, StateWriter};
use crate::timing::TimingSpec;
use crate::types::{width_mask, ClockDomainId, PinIndex, Tick};

/// Rising-edge D-type register on a clock domain.
///
/// `D` is sampled on every evaluation during an edge tick, so a data change in
/// the edge tick itself is captured (and flagged as a setup violation). With
/// `latch_pre_edge` the value settled before the edge is used instead. At zero
/// clock-to-Q delay the sample is committed to `Q` once the edge tick has
/// settled, so chained registers shift by one stage per edge and `Q` may feed
/// back into `D`. A non-zero delay is a scheduled write to `Q`.
pub struct DFlipFlop {
    base: BaseComponent,
    d: PinIndex,
    q: PinIndex,
    width: u8,
    domain: ClockDomainId,
    setup: Tick,
    hold: Tick,
    state: u64,
}

impl DFlipFlop {
    pub fn new(name: &str, width: u8, domain: ClockDomainId, setup: Tick, hold: Tick) -> Self {
        let mut base = BaseComponent::new(name);
        let d = base.add_pin("D", PinDirection::Sink, width);
        let q = base.add_pin("Q", PinDirection::Source, width);
        base.mark_multi_connect("Q");
        DFlipFlop {
            base,
            d,
            q,
            width,
            domain,
            setup,
            hold,
            state: 0,
        }
    }

    pub fn with_delay(mut self, delay: Tick) -> Self {
        self.base.delay = delay;
        self
    }

    pub fn with_initial(mut self, value: u64) -> Self {
        self.state = value & width_mask(self.width);
        self
    }

    /// Value currently driven on `Q`.
    pub fn q(&self) -> u64 {
        self.state
    }
}

impl Component for DFlipFlop {
    fn base(&self) -> &BaseComponent {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseComponent {
        &mut self.base
    }

    fn class_tag(&self) -> &'static str {
        "dff"
    }

    fn timing(&self) -> Option<TimingSpec> {
        Some(TimingSpec::new(self.domain, self.setup, self.hold).with_pin(self.d))
    }

    fn tick(&mut self, ctx: &mut TickContext<'_>) {
        if !ctx.rising_edge() {
            return;
        }
        let value = ctx.latch_value(self.d) & width_mask(self.width);
        if self.base.delay == 0 {
            ctx.commit_write(self.q, value);
        } else {
            ctx.schedule_write(self.base.delay, self.q, value);
        }
    }

    fn receive(&mut self, pin: PinIndex, value: u64) {
        if pin == self.q {
            self.state = value & width_mask(self.width);
        } else {
            self.base.set_shadow(pin, value);
        }
    }

    fn emit(&self, pin: PinIndex) -> Drive {
        if pin == self.q {
            Drive::strong(self.state)
        } else {
            Drive::high_z()
        }
    }

    fn save_state(&self, writer: &mut StateWriter) {
        writer.write_u64(self.state);
    }

    fn load_state(&mut self, reader: &mut StateReader<'_>) -> SimResult<()> {
        self.state = reader.read_u64()? & width_mask(self.width);
        Ok(())
    }
}
