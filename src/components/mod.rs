pub mod clock;
pub mod io;
pub mod logic;

pub use crate::bus::Bus;
pub use clock::ClockDriver;
pub use io::{Driver, Probe, Tie};
pub use logic::{DFlipFlop, Gate, GateKind};
