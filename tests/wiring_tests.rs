//! Board construction: the `>>` wiring DSL and the errors it reports.

use pinvm::component::{BaseComponent, Component, TickContext};
use pinvm::components::{Bus, Driver, Gate, GateKind, Probe, Tie};
use pinvm::pin::PinDirection;
use pinvm::{Board, ConfigIssue, DiagnosticKind, Drive, Engine, PinIndex, SimError};

#[test]
fn test_wire_dsl_merges_nets() {
    let mut board = Board::new("main");
    let vcc = board.add(Tie::high("VCC", 1));
    let inv = board.add(Gate::not("INV", 1));
    let probe = board.add(Probe::new("P", 1));

    let wire = vcc.pin("OUT") >> inv.pin("A");
    assert_eq!(wire.from.component, vcc);
    assert_eq!(wire.to.pin, "A");
    board.wire(wire).unwrap();
    board.wire(inv.pin("Y") >> probe.pin("IN")).unwrap();

    let mut engine = Engine::default();
    let id = engine.add_board(board).unwrap();
    engine.init().unwrap();

    let board = engine.board(id).unwrap();
    assert_eq!(board.net_id(vcc, "OUT").unwrap(), board.net_id(inv, "A").unwrap());
    assert_eq!(board.net_id(inv, "Y").unwrap(), board.net_id(probe, "IN").unwrap());
    assert_ne!(board.net_id(vcc, "OUT").unwrap(), board.net_id(probe, "IN").unwrap());
}

#[test]
fn test_width_mismatch() {
    let mut board = Board::new("main");
    let drv = board.add(Driver::new("DRV", 8, 0));
    let probe = board.add(Probe::new("P", 4));

    let err = board.wire(drv.pin("OUT") >> probe.pin("IN")).unwrap_err();
    match &err {
        SimError::WidthMismatch {
            left_width,
            right_width,
            left,
            ..
        } => {
            assert_eq!((*left_width, *right_width), (8, 4));
            assert_eq!(left, "DRV.OUT");
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(err.kind(), Some(DiagnosticKind::WidthMismatch));
}

#[test]
fn test_single_connect_pin_refuses_second_peer() {
    let mut board = Board::new("main");
    let a = board.add(Driver::new("A", 1, 0));
    let p1 = board.add(Probe::new("P1", 1));
    let p2 = board.add(Probe::new("P2", 1));

    board.wire(a.pin("OUT") >> p1.pin("IN")).unwrap();
    let err = board.wire(a.pin("OUT") >> p2.pin("IN")).unwrap_err();
    assert!(matches!(
        err,
        SimError::AlreadyConnected { ref component, ref pin, .. } if component == "A" && pin == "OUT"
    ));

    board.set_multi_connect(a, "OUT").unwrap();
    board.wire(a.pin("OUT") >> p2.pin("IN")).unwrap();
}

#[test]
fn test_multi_connect_outputs_fan_out() {
    let mut board = Board::new("main");
    let bus = board.add(Bus::<8>::new("BUS"));
    let inv = board.add(Gate::new("INV", GateKind::Not, 0));
    let tie = board.add(Tie::low("GND", 1));
    let probes: Vec<_> = (0..3).map(|n| board.add(Probe::new(&format!("P{}", n), 8))).collect();

    for probe in &probes {
        board.wire(bus.pin("D") >> probe.pin("IN")).unwrap();
    }
    board.wire(tie.pin("OUT") >> inv.pin("A")).unwrap();
    for n in 0..2 {
        let sink = board.add(Probe::new(&format!("Y{}", n), 1));
        board.wire(inv.pin("Y") >> sink.pin("IN")).unwrap();
    }
}

#[test]
fn test_pin_wired_to_itself_is_refused() {
    let mut board = Board::new("main");
    let bus = board.add(Bus::<4>::new("BUS"));
    let probe = board.add(Probe::new("P", 4));

    let err = board.wire(bus.pin("D") >> bus.pin("D")).unwrap_err();
    match &err {
        SimError::InvalidConnection { board, pin, .. } => {
            assert_eq!(board, "main");
            assert_eq!(pin, "BUS.D");
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(err.kind(), Some(DiagnosticKind::ConfigurationError));

    board.wire(bus.pin("D") >> probe.pin("IN")).unwrap();
    let mut engine = Engine::default();
    let id = engine.add_board(board).unwrap();
    engine.init().unwrap();
    let board = engine.board(id).unwrap();
    assert_eq!(board.net_id(bus, "D").unwrap(), board.net_id(probe, "IN").unwrap());
}

#[test]
fn test_unknown_pin() {
    let mut board = Board::new("main");
    let drv = board.add(Driver::new("DRV", 1, 0));
    let probe = board.add(Probe::new("P", 1));

    let err = board.wire(drv.pin("Q") >> probe.pin("IN")).unwrap_err();
    assert_eq!(err.issue(), Some(&ConfigIssue::UnknownPin));
    assert!(err.to_string().contains("main/DRV.Q"));
}

#[test]
fn test_wiring_after_init_is_refused() {
    let mut board = Board::new("main");
    let drv = board.add(Driver::new("DRV", 1, 0));
    let p1 = board.add(Probe::new("P1", 1));
    let p2 = board.add(Probe::new("P2", 1));
    board.wire(drv.pin("OUT") >> p1.pin("IN")).unwrap();

    let mut engine = Engine::default();
    let id = engine.add_board(board).unwrap();
    engine.init().unwrap();

    let board = engine.board_mut(id).unwrap();
    let err = board.wire(p1.pin("IN") >> p2.pin("IN")).unwrap_err();
    assert_eq!(err.issue(), Some(&ConfigIssue::AfterInit));
}

#[test]
fn test_required_pin_unconnected() {
    let mut board = Board::new("main");
    board.add(Tie::high("VCC", 1));
    board.add(Gate::not("INV", 1));

    let mut engine = Engine::default();
    engine.add_board(board).unwrap();
    let err = engine.init().unwrap_err();
    assert_eq!(err.issue(), Some(&ConfigIssue::RequiredPinUnconnected));
    assert!(!engine.is_initialized());

    let recorded: Vec<_> = engine
        .diagnostics()
        .of_kind(DiagnosticKind::ConfigurationError)
        .collect();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].board.as_deref(), Some("main"));
    assert_eq!(recorded[0].pin_name.as_deref(), Some("OUT"));
}

#[test]
fn test_invalid_clock_period() {
    let mut board = Board::new("main");
    let err = board.add_clock_domain("FAST", 1, 0).unwrap_err();
    assert_eq!(err.issue(), Some(&ConfigIssue::InvalidClockPeriod(1)));
    assert!(board.add_clock_domain("SYS", 2, 0).is_ok());
}

/// Declares the same pin name twice.
struct Clash {
    base: BaseComponent,
}

impl Clash {
    fn new(name: &str) -> Self {
        let mut base = BaseComponent::new(name);
        base.add_pin("X", PinDirection::Sink, 1);
        base.add_pin("X", PinDirection::Source, 1);
        Clash { base }
    }
}

impl Component for Clash {
    fn base(&self) -> &BaseComponent {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseComponent {
        &mut self.base
    }

    fn class_tag(&self) -> &'static str {
        "test_clash"
    }

    fn tick(&mut self, _ctx: &mut TickContext<'_>) {}

    fn emit(&self, _pin: PinIndex) -> Drive {
        Drive::high_z()
    }
}

#[test]
fn test_duplicate_pin_name_fails_init() {
    let mut board = Board::new("main");
    board.add(Clash::new("U1"));

    let mut engine = Engine::default();
    engine.add_board(board).unwrap();
    let err = engine.init().unwrap_err();
    assert_eq!(err.issue(), Some(&ConfigIssue::DuplicatePinName));
}
