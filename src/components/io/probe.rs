use std::collections::VecDeque;

use crate::component::{BaseComponent, Component, TickContext};
use crate::error::{SimError, SimResult};
use crate::pin::{Drive, LogicState, PinDirection, Signal};
use crate::snapshot::{StateReader, StateWriter};
use crate::types::{PinIndex, Tick};

/// Changes a probe keeps unless told otherwise.
pub const DEFAULT_HISTORY_LIMIT: usize = 1024;

/// Sink-only observer. Keeps the last signal seen on `IN` and the most recent
/// changes with their ticks; the oldest change is dropped once the history is
/// full. A limit of 0 keeps everything.
pub struct Probe {
    base: BaseComponent,
    input: PinIndex,
    last: Signal,
    history: VecDeque<(Tick, Signal)>,
    limit: usize,
}

impl Probe {
    pub fn new(name: &str, width: u8) -> Self {
        let mut base = BaseComponent::new(name);
        let input = base.add_pin("IN", PinDirection::Sink, width);
        Probe {
            base,
            input,
            last: Signal::floating(),
            history: VecDeque::new(),
            limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn last(&self) -> Signal {
        self.last
    }

    pub fn history(&self) -> &VecDeque<(Tick, Signal)> {
        &self.history
    }

    fn record(&mut self, tick: Tick, signal: Signal) {
        if self.limit > 0 && self.history.len() >= self.limit {
            self.history.pop_front();
        }
        self.history.push_back((tick, signal));
    }

    fn observe(&mut self, ctx: &TickContext<'_>) {
        let signal = ctx.signal(self.input);
        if self.history.is_empty() || signal != self.last {
            self.record(ctx.now(), signal);
        }
        self.last = signal;
    }
}

impl Component for Probe {
    fn base(&self) -> &BaseComponent {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseComponent {
        &mut self.base
    }

    fn class_tag(&self) -> &'static str {
        "probe"
    }

    fn power_on(&mut self, ctx: &mut TickContext<'_>) {
        self.observe(ctx);
    }

    fn tick(&mut self, ctx: &mut TickContext<'_>) {
        self.observe(ctx);
    }

    fn emit(&self, _pin: PinIndex) -> Drive {
        Drive::high_z()
    }

    fn save_state(&self, writer: &mut StateWriter) {
        writer.write_u64(self.last.value);
        writer.write_u8(self.last.state.as_u8());
        writer.write_u32(self.history.len() as u32);
        for (tick, signal) in &self.history {
            writer.write_u64(*tick);
            writer.write_u64(signal.value);
            writer.write_u8(signal.state.as_u8());
        }
    }

    fn load_state(&mut self, reader: &mut StateReader<'_>) -> SimResult<()> {
        fn signal(reader: &mut StateReader<'_>) -> SimResult<Signal> {
            let value = reader.read_u64()?;
            let state = LogicState::from_u8(reader.read_u8()?)
                .ok_or_else(|| SimError::incompatible("probe: invalid logic state"))?;
            Ok(Signal { value, state })
        }

        let last = signal(reader)?;
        let len = reader.read_u32()?;
        let mut history = VecDeque::new();
        for _ in 0..len {
            let tick = reader.read_u64()?;
            history.push_back((tick, signal(reader)?));
        }
        self.last = last;
        self.history = history;
        while self.limit > 0 && self.history.len() > self.limit {
            self.history.pop_front();
        }
        Ok(())
    }
}
