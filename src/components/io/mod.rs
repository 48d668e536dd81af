// Board I/O: constant pulls, stimulus sources and observers
pub mod driver;
pub mod probe;
pub mod tie;

pub use driver::Driver;
pub use probe::{Probe, DEFAULT_HISTORY_LIMIT};
pub use tie::Tie;
