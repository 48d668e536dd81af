//! Top-level simulation engine.
//!
//! The engine owns every board, the global tick counter and the diagnostics
//! sink. Boards advance in lock-step: tick N completes on every board before
//! tick N+1 starts on any.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::io::{Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::board::Board;
use crate::config::EngineConfig;
use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
use crate::error::{ConfigIssue, SimError, SimResult};
use crate::net::NetChange;
use crate::pin::{LogicState, Signal};
use crate::snapshot;
use crate::types::{BoardId, ComponentId, PinAddr, Tick};

/// A pin whose net changed value during a tick, as seen by breakpoint predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalEvent<'a> {
    pub board: BoardId,
    pub component: ComponentId,
    pub pin: &'a str,
    pub value: u64,
    pub state: LogicState,
    pub tick: Tick,
}

pub type Breakpoint = Box<dyn FnMut(&SignalEvent<'_>) -> bool + Send>;

/// One recorded change on a traced pin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalTransition {
    pub board: BoardId,
    pub component: ComponentId,
    pub pin: String,
    pub old: u64,
    pub new: u64,
    pub old_state: LogicState,
    pub new_state: LogicState,
    pub tick: Tick,
    /// Nanoseconds since the Unix epoch, only with `trace_wall_clock`.
    pub wall_clock_ns: Option<u64>,
}

/// Pins selected for tracing and the transitions recorded on them.
#[derive(Debug, Clone, Default)]
pub struct TraceRecorder {
    pub(crate) enabled: BTreeMap<(BoardId, PinAddr), String>,
    pub(crate) records: VecDeque<SignalTransition>,
    pub(crate) dropped: u64,
}

impl TraceRecorder {
    pub fn records(&self) -> impl Iterator<Item = &SignalTransition> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records discarded because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Transitions recorded for one pin, oldest first.
    pub fn of(&self, board: BoardId, component: ComponentId, pin: &str) -> Vec<&SignalTransition> {
        self.records
            .iter()
            .filter(|r| r.board == board && r.component == component && r.pin == pin)
            .collect()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.dropped = 0;
    }

    fn push(&mut self, record: SignalTransition, capacity: usize) {
        if capacity > 0 && self.records.len() >= capacity {
            self.records.pop_front();
            self.dropped += 1;
        }
        self.records.push_back(record);
    }
}

pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) boards: Vec<Board>,
    pub(crate) current_tick: Tick,
    pub(crate) diagnostics: Diagnostics,
    breakpoints: Vec<Breakpoint>,
    break_kinds: BTreeSet<DiagnosticKind>,
    pub(crate) trace: TraceRecorder,
    pub(crate) halted: bool,
    initialized: bool,
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new(EngineConfig::default())
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Engine {
            config,
            boards: Vec::new(),
            current_tick: 0,
            diagnostics: Diagnostics::new(),
            breakpoints: Vec::new(),
            break_kinds: BTreeSet::new(),
            trace: TraceRecorder::default(),
            halted: false,
            initialized: false,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn add_board(&mut self, board: Board) -> SimResult<BoardId> {
        if self.initialized {
            return Err(SimError::config("engine", None, ConfigIssue::AfterInit).on_board(board.name()));
        }
        let id = BoardId(self.boards.len() as u32);
        self.boards.push(board);
        Ok(id)
    }

    pub fn board(&self, id: BoardId) -> Option<&Board> {
        self.boards.get(id.index())
    }

    /// Mutable board access, for wiring boards already handed to the engine.
    pub fn board_mut(&mut self, id: BoardId) -> Option<&mut Board> {
        self.boards.get_mut(id.index())
    }

    pub fn find_board(&self, name: &str) -> Option<BoardId> {
        self.boards
            .iter()
            .position(|board| board.name() == name)
            .map(|index| BoardId(index as u32))
    }

    pub fn boards(&self) -> impl Iterator<Item = (BoardId, &Board)> {
        self.boards
            .iter()
            .enumerate()
            .map(|(index, board)| (BoardId(index as u32), board))
    }

    fn board_ref(&self, id: BoardId) -> SimResult<&Board> {
        self.board(id).ok_or_else(|| missing_board(id))
    }

    pub fn current_tick(&self) -> Tick {
        self.current_tick
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Validate and build every board. Fatal errors are returned and recorded.
    pub fn init(&mut self) -> SimResult<()> {
        if self.initialized {
            return Ok(());
        }
        if let Err(err) = self.config.validate() {
            self.record_error(&err);
            return Err(err);
        }
        for index in 0..self.boards.len() {
            if let Err(err) = self.boards[index].initialize(&self.config) {
                self.record_error(&err);
                return Err(err);
            }
        }
        self.current_tick = 0;
        self.initialized = true;
        info!(boards = self.boards.len(), "engine initialized");
        Ok(())
    }

    /// Advance every board by one tick. Returns false once a breakpoint, a
    /// subscribed diagnostic kind or strict contention halted the engine.
    pub fn tick(&mut self) -> bool {
        if !self.initialized {
            warn!("tick on an engine that was not initialized");
            return false;
        }
        self.halted = false;
        self.current_tick += 1;
        let now = self.current_tick;
        let mark = self.diagnostics.len();

        let Engine {
            config,
            boards,
            diagnostics,
            breakpoints,
            trace,
            ..
        } = self;
        let mut hit = false;
        for (index, board) in boards.iter_mut().enumerate() {
            let changes = board.step(now, config, diagnostics);
            if changes.is_empty() {
                continue;
            }
            let id = BoardId(index as u32);
            record_trace(trace, config, id, board, &changes, now);
            if !breakpoints.is_empty() {
                hit |= check_breakpoints(breakpoints, id, board, &changes, now);
            }
        }

        let new = self.diagnostics.since(mark);
        let contention = self.config.strict_contention
            && new.iter().any(|d| d.kind == DiagnosticKind::BusContention);
        let subscribed = new.iter().any(|d| self.break_kinds.contains(&d.kind));
        if hit || contention || subscribed {
            debug!(tick = now, breakpoint = hit, contention, subscribed, "halted");
            self.halted = true;
        }
        !self.halted
    }

    /// Tick up to `n` times, stopping early on a halt. Returns the ticks executed.
    pub fn run(&mut self, n: u64) -> u64 {
        if !self.initialized {
            return 0;
        }
        let mut executed = 0;
        while executed < n {
            executed += 1;
            if !self.tick() {
                break;
            }
        }
        executed
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn resume(&mut self) {
        self.halted = false;
    }

    /// Halt after any tick where `predicate` holds for a changed pin.
    pub fn add_breakpoint<F>(&mut self, predicate: F)
    where
        F: FnMut(&SignalEvent<'_>) -> bool + Send + 'static,
    {
        self.breakpoints.push(Box::new(predicate));
    }

    pub fn clear_breakpoints(&mut self) {
        self.breakpoints.clear();
        self.break_kinds.clear();
    }

    /// Halt after any tick that records a diagnostic of `kind`.
    pub fn break_on(&mut self, kind: DiagnosticKind) {
        self.break_kinds.insert(kind);
    }

    pub fn enable_trace(&mut self, board: BoardId, component: ComponentId, pin: &str) -> SimResult<()> {
        let addr = self.board_ref(board)?.pin_addr(component, pin)?;
        self.trace.enabled.insert((board, addr), pin.to_string());
        Ok(())
    }

    pub fn trace(&self) -> &TraceRecorder {
        &self.trace
    }

    pub fn trace_mut(&mut self) -> &mut TraceRecorder {
        &mut self.trace
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn diagnostics_mut(&mut self) -> &mut Diagnostics {
        &mut self.diagnostics
    }

    /// Setup and hold violations recorded so far.
    pub fn violations(&self) -> (u64, u64) {
        (
            self.diagnostics.count(DiagnosticKind::SetupViolation),
            self.diagnostics.count(DiagnosticKind::HoldViolation),
        )
    }

    pub fn signal(&self, board: BoardId, component: ComponentId, pin: &str) -> SimResult<Signal> {
        self.board_ref(board)?.signal(component, pin)
    }

    pub fn net_value(&self, board: BoardId, component: ComponentId, pin: &str) -> SimResult<u64> {
        self.signal(board, component, pin).map(|signal| signal.value)
    }

    /// Deliver `value` to a component pin through `receive` at tick `at`.
    pub fn schedule_write(
        &mut self,
        board: BoardId,
        component: ComponentId,
        pin: &str,
        value: u64,
        at: Tick,
    ) -> SimResult<()> {
        self.boards
            .get_mut(board.index())
            .ok_or_else(|| missing_board(board))?
            .schedule_write(component, pin, value, at)
    }

    pub fn snapshot<W: Write>(&self, writer: &mut W) -> SimResult<()> {
        if !self.initialized {
            return Err(SimError::config("engine", None, ConfigIssue::NotInitialized));
        }
        let bytes = snapshot::encode(self);
        writer.write_all(&bytes)?;
        info!(tick = self.current_tick, bytes = bytes.len(), "snapshot written");
        Ok(())
    }

    /// Replace the dynamic state of this engine with a snapshot. The engine must
    /// hold the same boards as the one that wrote it; it is initialized first if
    /// needed. Structural mismatches are rejected before any state is touched.
    pub fn restore<R: Read>(&mut self, reader: &mut R) -> SimResult<()> {
        self.init()?;
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let restored = match snapshot::decode(self, &bytes) {
            Ok(image) => snapshot::apply(self, image),
            Err(err) => Err(err),
        };
        match restored {
            Ok(()) => {
                info!(tick = self.current_tick, "snapshot restored");
                Ok(())
            }
            Err(err) => {
                self.record_error(&err);
                Err(err)
            }
        }
    }

    fn record_error(&mut self, err: &SimError) {
        let Some(kind) = err.kind() else {
            return;
        };
        let mut diagnostic = Diagnostic::new(kind, self.current_tick, err.to_string());
        match err {
            SimError::Configuration {
                board,
                component,
                pin,
                ..
            } => {
                if !board.is_empty() {
                    diagnostic = diagnostic.with_board(board);
                }
                if let Some(id) = self
                    .find_board(board)
                    .and_then(|b| self.boards[b.index()].find(component))
                {
                    diagnostic = diagnostic.with_component(id);
                }
                if let Some(pin) = pin {
                    diagnostic = diagnostic.with_pin(pin);
                }
            }
            SimError::WidthMismatch { board, .. } | SimError::InvalidConnection { board, .. } => {
                diagnostic = diagnostic.with_board(board)
            }
            SimError::AlreadyConnected {
                board,
                component,
                pin,
            } => {
                diagnostic = diagnostic.with_board(board).with_pin(pin);
                if let Some(id) = self
                    .find_board(board)
                    .and_then(|b| self.boards[b.index()].find(component))
                {
                    diagnostic = diagnostic.with_component(id);
                }
            }
            _ => {}
        }
        self.diagnostics.record(diagnostic);
    }
}

fn missing_board(id: BoardId) -> SimError {
    SimError::config(
        &id.to_string(),
        None,
        ConfigIssue::MalformedBoard(format!("no board {}", id)),
    )
}

fn pin_name(board: &Board, addr: PinAddr) -> &str {
    board
        .component(addr.component)
        .map(|c| c.pins().name_of(addr.pin))
        .unwrap_or("?")
}

fn record_trace(
    trace: &mut TraceRecorder,
    config: &EngineConfig,
    id: BoardId,
    board: &Board,
    changes: &[NetChange],
    now: Tick,
) {
    if trace.enabled.is_empty() {
        return;
    }
    for change in changes {
        let Some(net) = board.netlist().net(change.net) else {
            continue;
        };
        for addr in net.pins() {
            let Some(pin) = trace.enabled.get(&(id, *addr)).cloned() else {
                continue;
            };
            let wall_clock_ns = config
                .trace_wall_clock
                .then(|| SystemTime::now().duration_since(UNIX_EPOCH).ok())
                .flatten()
                .map(|elapsed| elapsed.as_nanos() as u64);
            trace.push(
                SignalTransition {
                    board: id,
                    component: addr.component,
                    pin,
                    old: change.old.value,
                    new: change.new.value,
                    old_state: change.old.state,
                    new_state: change.new.state,
                    tick: now,
                    wall_clock_ns,
                },
                config.trace_capacity,
            );
        }
    }
}

fn check_breakpoints(
    breakpoints: &mut [Breakpoint],
    id: BoardId,
    board: &Board,
    changes: &[NetChange],
    now: Tick,
) -> bool {
    let mut hit = false;
    for change in changes {
        let Some(net) = board.netlist().net(change.net) else {
            continue;
        };
        for addr in net.pins() {
            let event = SignalEvent {
                board: id,
                component: addr.component,
                pin: pin_name(board, *addr),
                value: change.new.value,
                state: change.new.state,
                tick: now,
            };
            for predicate in breakpoints.iter_mut() {
                hit |= predicate(&event);
            }
        }
    }
    hit
}
