//! # pinvm
//!
//! A discrete-event simulator for digital circuits wired pin to pin.
//!
//! This library provides:
//! - Boards of components whose pins are merged into nets and resolved every tick
//! - Tri-state drivers with weak/strong strength and bus-contention reporting
//! - Clock domains with setup/hold checking for clocked storage
//! - Breakpoints, signal tracing and binary snapshots of a running engine
//! - A JSON system description and a terminal monitor for the `pinvm` binary

pub mod board;
pub mod bus;
pub mod clock;
pub mod component;
pub mod components;
pub mod config;
pub mod connection;
pub mod console;
pub mod delay_queue;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod net;
pub mod pin;
pub mod scheduler;
pub mod snapshot;
pub mod system_config;
pub mod timing;
pub mod types;

// Re-export commonly used items for easier importing
pub use board::{Board, PinRef, Wire};
pub use component::{BaseComponent, Component, TickContext};
pub use config::EngineConfig;
pub use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
pub use engine::{Engine, SignalEvent, SignalTransition};
pub use error::{ConfigIssue, SimError, SimResult};
pub use pin::{Drive, DriveStrength, LogicState, PinDirection, PinRegistry, Signal};
pub use timing::TimingSpec;
pub use types::{BoardId, ClockDomainId, ComponentId, NetId, PinAddr, PinIndex, Tick};

use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{registry, EnvFilter};

/// Install the global `tracing` subscriber. `RUST_LOG` wins over `level` when set.
///
/// Calling it a second time is harmless; the first subscriber stays installed
/// and receives a debug event saying so.
pub fn init_logging(level: &str) {
    let directives = match std::env::var("RUST_LOG") {
        Ok(value) if !value.trim().is_empty() => value,
        _ => format!("pinvm={}", level),
    };
    let filter = EnvFilter::builder()
        .parse(&directives)
        .unwrap_or_else(|_| EnvFilter::new("pinvm=info"));

    if let Err(err) = registry()
        .with(filter)
        .with(layer().with_writer(std::io::stderr))
        .try_init()
    {
        tracing::debug!(error = %err, "tracing subscriber already installed");
    }
}
