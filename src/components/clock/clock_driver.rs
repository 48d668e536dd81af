use crate::component::{BaseComponent, Component, TickContext};
use crate::error::SimResult;
use crate::pin::Drive;
use crate::snapshot::{StateReader, StateWriter};
use crate::types::{ClockDomainId, PinIndex};

/// Puts a clock domain's level on a net, for parts that read a `CLK` pin
/// instead of subscribing to the domain. `ENABLE` is optional; when it is
/// driven low the output is held low.
pub struct ClockDriver {
    base: BaseComponent,
    clk: PinIndex,
    enable: PinIndex,
    domain: ClockDomainId,
    level: bool,
}

impl ClockDriver {
    pub fn new(name: &str, domain: ClockDomainId) -> Self {
        let mut base = BaseComponent::new(name);
        let clk = base.add_source("CLK");
        base.mark_multi_connect("CLK");
        let enable = base.add_sink("ENABLE");
        base.mark_optional("ENABLE");
        ClockDriver {
            base,
            clk,
            enable,
            domain,
            level: false,
        }
    }

    pub fn domain(&self) -> ClockDomainId {
        self.domain
    }

    pub fn level(&self) -> bool {
        self.level
    }

    fn sample(&mut self, ctx: &TickContext<'_>) {
        let enable = ctx.signal(self.enable);
        let enabled = enable.is_floating() || enable.value & 1 == 1;
        self.level = enabled && ctx.clock_level();
    }
}

impl Component for ClockDriver {
    fn base(&self) -> &BaseComponent {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseComponent {
        &mut self.base
    }

    fn class_tag(&self) -> &'static str {
        "clock_driver"
    }

    fn clock_domain(&self) -> Option<ClockDomainId> {
        Some(self.domain)
    }

    fn power_on(&mut self, ctx: &mut TickContext<'_>) {
        self.sample(ctx);
    }

    fn tick(&mut self, ctx: &mut TickContext<'_>) {
        self.sample(ctx);
    }

    fn emit(&self, pin: PinIndex) -> Drive {
        if pin == self.clk {
            Drive::strong(self.level as u64)
        } else {
            Drive::high_z()
        }
    }

    fn save_state(&self, writer: &mut StateWriter) {
        writer.write_bool(self.level);
    }

    fn load_state(&mut self, reader: &mut StateReader<'_>) -> SimResult<()> {
        self.level = reader.read_bool()?;
        Ok(())
    }
}
