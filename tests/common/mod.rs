//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use pinvm::component::{BaseComponent, Component, TickContext};
use pinvm::components::{Gate, GateKind};
use pinvm::pin::{Drive, PinDirection};
use pinvm::snapshot::{StateReader, StateWriter};
use pinvm::{Board, BoardId, ComponentId, Engine, EngineConfig, PinIndex, SimResult, Tick};

pub const RING: [&str; 4] = ["INV1", "INV2", "INV3", "INV4"];
const RING_INITIAL: [bool; 4] = [false, true, true, false];

/// Four inverters in a ring, delay 1 each, inserted in `order` (a permutation
/// of 0..4). Node A is the net `INV4.Y -> INV1.A`; it is traced.
pub fn ring_in_order(order: &[usize], config: EngineConfig) -> (Engine, BoardId) {
    let mut board = Board::new("main");
    for &index in order {
        board.add(Gate::new(RING[index], GateKind::Not, 1).with_initial(RING_INITIAL[index]));
    }
    for index in 0..4 {
        let from = board.find(RING[index]).expect("ring gate");
        let to = board.find(RING[(index + 1) % 4]).expect("ring gate");
        board.wire(from.pin("Y") >> to.pin("A")).expect("ring wiring");
    }

    let mut engine = Engine::new(config);
    let id = engine.add_board(board).expect("board");
    let inv4 = component(&engine, id, "INV4");
    engine.enable_trace(id, inv4, "Y").expect("trace node A");
    (engine, id)
}

pub fn ring(config: EngineConfig) -> (Engine, BoardId) {
    ring_in_order(&[0, 1, 2, 3], config)
}

pub fn component(engine: &Engine, board: BoardId, name: &str) -> ComponentId {
    engine
        .board(board)
        .and_then(|b| b.find(name))
        .unwrap_or_else(|| panic!("no component {}", name))
}

pub fn node_a(engine: &Engine, board: BoardId) -> u64 {
    let inv4 = component(engine, board, "INV4");
    engine.net_value(board, inv4, "Y").expect("node A")
}

/// Values of every ring node by gate name, after each of `ticks` ticks.
pub fn ring_trace(engine: &mut Engine, board: BoardId, ticks: u64) -> Vec<[u64; 4]> {
    let ids: Vec<ComponentId> = RING.iter().map(|name| component(engine, board, name)).collect();
    (0..ticks)
        .map(|_| {
            engine.tick();
            let mut values = [0; 4];
            for (slot, id) in values.iter_mut().zip(&ids) {
                *slot = engine.net_value(board, *id, "Y").expect("ring node");
            }
            values
        })
        .collect()
}

/// Source that asks to be woken at `fire_at` and then increments its output.
pub struct Counter {
    base: BaseComponent,
    out: PinIndex,
    fire_at: Tick,
    value: u64,
}

impl Counter {
    pub fn new(name: &str, fire_at: Tick) -> Self {
        let mut base = BaseComponent::new(name);
        let out = base.add_pin("OUT", PinDirection::Source, 8);
        Counter {
            base,
            out,
            fire_at,
            value: 0,
        }
    }
}

impl Component for Counter {
    fn base(&self) -> &BaseComponent {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseComponent {
        &mut self.base
    }

    fn class_tag(&self) -> &'static str {
        "test_counter"
    }

    fn power_on(&mut self, ctx: &mut TickContext<'_>) {
        ctx.schedule(self.fire_at);
    }

    fn tick(&mut self, ctx: &mut TickContext<'_>) {
        if ctx.now() == self.fire_at {
            self.value += 1;
        }
    }

    fn emit(&self, pin: PinIndex) -> Drive {
        if pin == self.out {
            Drive::strong(self.value)
        } else {
            Drive::high_z()
        }
    }

    fn save_state(&self, writer: &mut StateWriter) {
        writer.write_u64(self.value);
    }

    fn load_state(&mut self, reader: &mut StateReader<'_>) -> SimResult<()> {
        self.value = reader.read_u64()?;
        Ok(())
    }
}

/// Sink that asks to be woken at `fire_at` and logs every value it reads.
pub struct Recorder {
    base: BaseComponent,
    input: PinIndex,
    fire_at: Tick,
    pub seen: Vec<(Tick, u64)>,
}

impl Recorder {
    pub fn new(name: &str, fire_at: Tick) -> Self {
        let mut base = BaseComponent::new(name);
        let input = base.add_pin("IN", PinDirection::Sink, 8);
        Recorder {
            base,
            input,
            fire_at,
            seen: Vec::new(),
        }
    }
}

impl Component for Recorder {
    fn base(&self) -> &BaseComponent {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseComponent {
        &mut self.base
    }

    fn class_tag(&self) -> &'static str {
        "test_recorder"
    }

    fn power_on(&mut self, ctx: &mut TickContext<'_>) {
        ctx.schedule(self.fire_at);
    }

    fn tick(&mut self, ctx: &mut TickContext<'_>) {
        self.seen.push((ctx.now(), ctx.read(self.input)));
    }

    fn emit(&self, _pin: PinIndex) -> Drive {
        Drive::high_z()
    }
}
