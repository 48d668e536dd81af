// Combinational and sequential logic primitives
pub mod flip_flop;
pub mod gate;

pub use flip_flop::DFlipFlop;
pub use gate::{Gate, GateKind};
