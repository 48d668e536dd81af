//! Binary engine snapshots.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! "PVMS" | version u32 | config hash u64
//! tick i64 | iteration bound i32 | halted u8 | diagnostic counts
//! boards: name, components (id, class tag, shadow, state blob), nets,
//!         delay queue, clock domains, timing watches, carried dirty set
//! traced pins | trace buffer
//! ```
//!
//! A snapshot only carries dynamic state. It is restored into an engine built
//! with the same boards; structure (component tags, net widths, driver
//! counts) is checked before anything is overwritten.

use tracing::{debug, warn};

use crate::clock::DomainState;
use crate::component::Component;
use crate::delay_queue::{Payload, QueueEntry};
use crate::diagnostics::DiagnosticKind;
use crate::engine::{Engine, SignalTransition};
use crate::error::{SimError, SimResult};
use crate::net::NetState;
use crate::pin::{Drive, DriveStrength, LogicState};
use crate::timing::WatchState;
use crate::types::{BoardId, ComponentId, NetId, PinAddr, PinIndex, Tick};

pub const MAGIC: &[u8; 4] = b"PVMS";
pub const VERSION: u32 = 1;

/// Growable little-endian byte sink handed to `Component::save_state`.
#[derive(Debug, Default, Clone)]
pub struct StateWriter {
    bytes: Vec<u8>,
}

impl StateWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(value as u8);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_opt_u64(&mut self, value: Option<u64>) {
        match value {
            Some(value) => {
                self.write_u8(1);
                self.write_u64(value);
            }
            None => self.write_u8(0),
        }
    }

    /// Length-prefixed byte string.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_u32(bytes.len() as u32);
        self.bytes.extend_from_slice(bytes);
    }

    pub fn write_str(&mut self, value: &str) {
        self.write_bytes(value.as_bytes());
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Cursor over snapshot bytes. Every read fails with `SnapshotIncompatible`
/// on truncated or malformed input.
#[derive(Debug, Clone)]
pub struct StateReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> StateReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        StateReader { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> SimResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| SimError::incompatible(format!("truncated at byte {}", self.pos)))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> SimResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> SimResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> SimResult<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(SimError::incompatible(format!("invalid bool byte {}", other))),
        }
    }

    pub fn read_u16(&mut self) -> SimResult<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn read_u32(&mut self) -> SimResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn read_i32(&mut self) -> SimResult<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub fn read_u64(&mut self) -> SimResult<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn read_i64(&mut self) -> SimResult<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    pub fn read_opt_u64(&mut self) -> SimResult<Option<u64>> {
        if self.read_bool()? {
            Ok(Some(self.read_u64()?))
        } else {
            Ok(None)
        }
    }

    pub fn read_bytes(&mut self) -> SimResult<&'a [u8]> {
        let len = self.read_u32()? as usize;
        self.take(len)
    }

    pub fn read_str(&mut self) -> SimResult<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| SimError::incompatible("string is not UTF-8"))
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Fail unless every byte was consumed.
    pub fn finish(&self) -> SimResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(SimError::incompatible(format!("{} trailing bytes", self.remaining())))
        }
    }
}

/// Decoded snapshot, checked against the target engine but not yet applied.
pub(crate) struct Image {
    tick: Tick,
    halted: bool,
    counts: [u64; 8],
    boards: Vec<BoardImage>,
    enabled: Vec<((BoardId, PinAddr), String)>,
    dropped: u64,
    records: Vec<SignalTransition>,
}

struct BoardImage {
    components: Vec<(Vec<u8>, Vec<u8>)>,
    nets: Vec<NetState>,
    queue: Vec<QueueEntry>,
    next_seq: u64,
    clocks: Vec<DomainState>,
    watches: Vec<WatchState>,
    dirty: Vec<ComponentId>,
}

pub(crate) fn encode(engine: &Engine) -> Vec<u8> {
    let mut w = StateWriter::new();
    w.bytes.extend_from_slice(MAGIC);
    w.write_u32(VERSION);
    w.write_u64(engine.config.config_hash());

    w.write_i64(engine.current_tick as i64);
    w.write_i32(engine.config.iteration_bound as i32);
    w.write_bool(engine.halted);
    let counts = engine.diagnostics.counts();
    w.write_u32(counts.len() as u32);
    for count in counts {
        w.write_u64(count);
    }

    w.write_u32(engine.boards.len() as u32);
    for board in &engine.boards {
        w.write_str(board.name());

        let components = &board.circuit.components;
        w.write_u32(components.len() as u32);
        for (index, component) in components.iter().enumerate() {
            w.write_u32(index as u32);
            w.write_str(component.class_tag());
            let (shadow, blob) = capture(&**component);
            w.write_bytes(&shadow);
            w.write_bytes(&blob);
        }

        let netlist = &board.circuit.netlist;
        w.write_u32(netlist.len() as u32);
        for net in netlist.iter() {
            w.write_u32(net.id().0);
            w.write_u8(net.width());
            w.write_u64(net.value());
            w.write_u64(net.settled());
            for bit in net.bits() {
                w.write_u8(bit.as_u8());
            }
            w.write_u32(net.drivers().len() as u32);
            for slot in net.drivers() {
                w.write_u64(slot.drive.value);
                w.write_u8(slot.drive.strength.as_u8());
            }
        }

        let entries = board.circuit.queue.entries();
        w.write_u32(entries.len() as u32);
        for entry in &entries {
            w.write_u64(entry.fire_tick);
            w.write_u64(entry.seq);
            w.write_u32(entry.component.0);
            match entry.payload {
                Some(payload) => {
                    w.write_u8(1);
                    w.write_u16(payload.pin.0);
                    w.write_u64(payload.value);
                }
                None => w.write_u8(0),
            }
        }
        w.write_u64(board.circuit.queue.next_seq());

        let clocks = board.circuit.clocks.state();
        w.write_u32(clocks.len() as u32);
        for clock in clocks {
            w.write_bool(clock.high);
            w.write_opt_u64(clock.last_edge);
            w.write_u64(clock.next_edge);
        }

        let watches = board.circuit.timing.state();
        w.write_u32(watches.len() as u32);
        for watch in watches {
            w.write_opt_u64(watch.last_change);
            w.write_opt_u64(watch.last_edge);
        }

        let dirty = board.scheduler.dirty();
        w.write_u32(dirty.len() as u32);
        for id in dirty {
            w.write_u32(id.0);
        }
    }

    w.write_u32(engine.trace.enabled.len() as u32);
    for ((board, addr), pin) in &engine.trace.enabled {
        w.write_u32(board.0);
        w.write_u32(addr.component.0);
        w.write_u16(addr.pin.0);
        w.write_str(pin);
    }
    w.write_u64(engine.trace.dropped);
    w.write_u32(engine.trace.records.len() as u32);
    for record in &engine.trace.records {
        w.write_u32(record.board.0);
        w.write_u32(record.component.0);
        w.write_str(&record.pin);
        w.write_u64(record.old);
        w.write_u64(record.new);
        w.write_u8(record.old_state.as_u8());
        w.write_u8(record.new_state.as_u8());
        w.write_u64(record.tick);
        w.write_opt_u64(record.wall_clock_ns);
    }

    w.into_bytes()
}

fn expect(condition: bool, reason: impl FnOnce() -> String) -> SimResult<()> {
    if condition {
        Ok(())
    } else {
        Err(SimError::incompatible(reason()))
    }
}

fn logic_state(byte: u8) -> SimResult<LogicState> {
    LogicState::from_u8(byte).ok_or_else(|| SimError::incompatible(format!("invalid logic state {}", byte)))
}

pub(crate) fn decode(engine: &Engine, bytes: &[u8]) -> SimResult<Image> {
    let mut r = StateReader::new(bytes);
    expect(r.take(4)? == MAGIC, || "bad magic".to_string())?;
    let version = r.read_u32()?;
    expect(version == VERSION, || format!("unsupported version {}", version))?;
    let hash = r.read_u64()?;
    let expected = engine.config.config_hash();
    expect(hash == expected, || {
        format!("config hash {:#018x} does not match {:#018x}", hash, expected)
    })?;

    let tick = r.read_i64()?;
    expect(tick >= 0, || format!("negative tick {}", tick))?;
    let bound = r.read_i32()?;
    expect(bound as i64 == engine.config.iteration_bound as i64, || {
        format!("iteration bound {} differs", bound)
    })?;
    let halted = r.read_bool()?;
    let kinds = r.read_u32()? as usize;
    expect(kinds == DiagnosticKind::ALL.len(), || format!("{} diagnostic kinds", kinds))?;
    let mut counts = [0u64; 8];
    for count in counts.iter_mut() {
        *count = r.read_u64()?;
    }

    let board_count = r.read_u32()? as usize;
    expect(board_count == engine.boards.len(), || {
        format!("{} boards, engine has {}", board_count, engine.boards.len())
    })?;

    let mut boards = Vec::with_capacity(board_count);
    for board in &engine.boards {
        let name = r.read_str()?;
        expect(name == board.name(), || format!("board '{}' where '{}' expected", name, board.name()))?;

        let components = &board.circuit.components;
        let count = r.read_u32()? as usize;
        expect(count == components.len(), || {
            format!("board '{}' has {} components, snapshot {}", name, components.len(), count)
        })?;
        let mut records = Vec::with_capacity(count);
        for (index, component) in components.iter().enumerate() {
            let id = r.read_u32()? as usize;
            expect(id == index, || format!("component record {} out of order", id))?;
            let tag = r.read_str()?;
            expect(tag == component.class_tag(), || {
                format!("unknown class tag '{}' for {}", tag, component.name())
            })?;
            let shadow = r.read_bytes()?.to_vec();
            let blob = r.read_bytes()?.to_vec();
            records.push((shadow, blob));
        }

        let netlist = &board.circuit.netlist;
        let net_count = r.read_u32()? as usize;
        expect(net_count == netlist.len(), || format!("{} nets, board has {}", net_count, netlist.len()))?;
        let mut nets = Vec::with_capacity(net_count);
        for net in netlist.iter() {
            let id = r.read_u32()?;
            let width = r.read_u8()?;
            expect(id == net.id().0 && width == net.width(), || {
                format!("net {} ({} bits) does not match {}", id, width, net.id())
            })?;
            let value = r.read_u64()?;
            let settled = r.read_u64()?;
            let mut bits = Vec::with_capacity(width as usize);
            for _ in 0..width {
                bits.push(logic_state(r.read_u8()?)?);
            }
            let drivers = r.read_u32()? as usize;
            expect(drivers == net.drivers().len(), || format!("driver count differs on {}", net.id()))?;
            let mut drives = Vec::with_capacity(drivers);
            for _ in 0..drivers {
                let value = r.read_u64()?;
                let strength = r.read_u8()?;
                let strength = DriveStrength::from_u8(strength)
                    .ok_or_else(|| SimError::incompatible(format!("invalid strength {}", strength)))?;
                drives.push(Drive { value, strength });
            }
            nets.push(NetState {
                value,
                settled,
                bits,
                drives,
            });
        }

        let entry_count = r.read_u32()? as usize;
        let mut queue = Vec::new();
        for _ in 0..entry_count {
            let fire_tick = r.read_u64()?;
            let seq = r.read_u64()?;
            let component = ComponentId(r.read_u32()?);
            let target = components.get(component.index());
            expect(target.is_some(), || format!("queue entry for unknown {}", component))?;
            let payload = if r.read_bool()? {
                let pin = PinIndex(r.read_u16()?);
                let value = r.read_u64()?;
                let known = target.is_some_and(|c| c.pins().pin(pin).is_some());
                expect(known, || format!("queue payload for unknown {}", pin))?;
                Some(Payload { pin, value })
            } else {
                None
            };
            queue.push(QueueEntry {
                fire_tick,
                seq,
                component,
                payload,
            });
        }
        let next_seq = r.read_u64()?;

        let clock_count = r.read_u32()? as usize;
        expect(clock_count == board.clocks().len(), || format!("{} clock domains", clock_count))?;
        let mut clocks = Vec::with_capacity(clock_count);
        for _ in 0..clock_count {
            clocks.push(DomainState {
                high: r.read_bool()?,
                last_edge: r.read_opt_u64()?,
                next_edge: r.read_u64()?,
            });
        }

        let watch_count = r.read_u32()? as usize;
        expect(watch_count == board.circuit.timing.len(), || format!("{} timing watches", watch_count))?;
        let mut watches = Vec::with_capacity(watch_count);
        for _ in 0..watch_count {
            watches.push(WatchState {
                last_change: r.read_opt_u64()?,
                last_edge: r.read_opt_u64()?,
            });
        }

        let dirty_count = r.read_u32()? as usize;
        let mut dirty = Vec::with_capacity(dirty_count);
        for _ in 0..dirty_count {
            let id = ComponentId(r.read_u32()?);
            expect(id.index() < components.len(), || format!("dirty entry for unknown {}", id))?;
            dirty.push(id);
        }

        boards.push(BoardImage {
            components: records,
            nets,
            queue,
            next_seq,
            clocks,
            watches,
            dirty,
        });
    }

    let enabled_count = r.read_u32()? as usize;
    let mut enabled = Vec::with_capacity(enabled_count);
    for _ in 0..enabled_count {
        let board = BoardId(r.read_u32()?);
        let addr = PinAddr::new(ComponentId(r.read_u32()?), PinIndex(r.read_u16()?));
        let pin = r.read_str()?;
        let known = engine
            .board(board)
            .and_then(|b| b.component(addr.component))
            .is_some_and(|c| c.pins().pin(addr.pin).is_some());
        expect(known, || format!("trace on unknown pin {}", pin))?;
        enabled.push(((board, addr), pin));
    }

    let dropped = r.read_u64()?;
    let record_count = r.read_u32()? as usize;
    let mut records = Vec::new();
    for _ in 0..record_count {
        records.push(SignalTransition {
            board: BoardId(r.read_u32()?),
            component: ComponentId(r.read_u32()?),
            pin: r.read_str()?,
            old: r.read_u64()?,
            new: r.read_u64()?,
            old_state: logic_state(r.read_u8()?)?,
            new_state: logic_state(r.read_u8()?)?,
            tick: r.read_u64()?,
            wall_clock_ns: r.read_opt_u64()?,
        });
    }
    r.finish()?;

    Ok(Image {
        tick: tick as Tick,
        halted,
        counts,
        boards,
        enabled,
        dropped,
        records,
    })
}

/// Shadow registers and component blob, as stored per component.
fn capture(component: &dyn Component) -> (Vec<u8>, Vec<u8>) {
    let mut shadow = StateWriter::new();
    component.base().save_shadow(&mut shadow);
    let mut blob = StateWriter::new();
    component.save_state(&mut blob);
    (shadow.into_bytes(), blob.into_bytes())
}

fn load(component: &mut dyn Component, shadow: &[u8], blob: &[u8]) -> SimResult<()> {
    let mut reader = StateReader::new(shadow);
    component.base_mut().load_shadow(&mut reader)?;
    reader.finish()?;
    let mut reader = StateReader::new(blob);
    component.load_state(&mut reader)?;
    reader.finish()
}

fn load_components(engine: &mut Engine, boards: &[BoardImage]) -> SimResult<()> {
    for (board, state) in engine.boards.iter_mut().zip(boards) {
        for (component, (shadow, blob)) in board.circuit.components.iter_mut().zip(&state.components) {
            load(&mut **component, shadow, blob)?;
        }
    }
    Ok(())
}

/// Overwrite the engine's dynamic state with a decoded image.
///
/// Component blobs are checked by loading them. When any component refuses
/// its blob every component is put back the way it was and nothing else is
/// touched.
pub(crate) fn apply(engine: &mut Engine, image: Image) -> SimResult<()> {
    let saved: Vec<Vec<(Vec<u8>, Vec<u8>)>> = engine
        .boards
        .iter()
        .map(|board| {
            board
                .circuit
                .components
                .iter()
                .map(|component| capture(&**component))
                .collect()
        })
        .collect();

    if let Err(err) = load_components(engine, &image.boards) {
        for (board, state) in engine.boards.iter_mut().zip(&saved) {
            for (component, (shadow, blob)) in board.circuit.components.iter_mut().zip(state) {
                if let Err(rollback) = load(&mut **component, shadow, blob) {
                    warn!(component = component.name(), error = %rollback, "could not roll back component state");
                }
            }
        }
        return Err(err);
    }

    for (board, state) in engine.boards.iter_mut().zip(image.boards) {
        for (index, net) in state.nets.into_iter().enumerate() {
            board.circuit.netlist.restore(NetId(index as u32), net);
        }
        board.circuit.queue.restore(state.queue, state.next_seq);
        board.circuit.clocks.restore(&state.clocks);
        board.circuit.timing.restore(&state.watches);
        board.scheduler.restore_dirty(&state.dirty);
        debug!(board = board.name(), "board state restored");
    }

    engine.current_tick = image.tick;
    engine.halted = image.halted;
    engine.diagnostics.set_counts(image.counts);
    engine.trace.enabled = image.enabled.into_iter().collect();
    engine.trace.dropped = image.dropped;
    engine.trace.records = image.records.into_iter().collect();
    Ok(())
}
