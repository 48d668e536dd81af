pub mod clock_driver;

pub use clock_driver::ClockDriver;
