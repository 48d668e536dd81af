//! Diagnostics sink.
//!
//! Every runtime condition (contention, timing violations, unsettled loops) and
//! every fatal error surfaced by `init`/`restore` is recorded here as a
//! [`Diagnostic`]. Recording never fails and never halts the engine by itself.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::types::{ComponentId, Tick};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DiagnosticKind {
    ConfigurationError,
    WidthMismatch,
    AlreadyConnected,
    BusContention,
    SetupViolation,
    HoldViolation,
    CombinationalLoopNotSettled,
    SnapshotIncompatible,
}

impl DiagnosticKind {
    pub const ALL: [DiagnosticKind; 8] = [
        DiagnosticKind::ConfigurationError,
        DiagnosticKind::WidthMismatch,
        DiagnosticKind::AlreadyConnected,
        DiagnosticKind::BusContention,
        DiagnosticKind::SetupViolation,
        DiagnosticKind::HoldViolation,
        DiagnosticKind::CombinationalLoopNotSettled,
        DiagnosticKind::SnapshotIncompatible,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Fatal kinds abort the operation that raised them; the rest are runtime-only.
    pub fn is_fatal(self) -> bool {
        !matches!(
            self,
            DiagnosticKind::BusContention
                | DiagnosticKind::SetupViolation
                | DiagnosticKind::HoldViolation
                | DiagnosticKind::CombinationalLoopNotSettled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosticKind::ConfigurationError => "ConfigurationError",
            DiagnosticKind::WidthMismatch => "WidthMismatch",
            DiagnosticKind::AlreadyConnected => "AlreadyConnected",
            DiagnosticKind::BusContention => "BusContention",
            DiagnosticKind::SetupViolation => "SetupViolation",
            DiagnosticKind::HoldViolation => "HoldViolation",
            DiagnosticKind::CombinationalLoopNotSettled => "CombinationalLoopNotSettled",
            DiagnosticKind::SnapshotIncompatible => "SnapshotIncompatible",
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One diagnostic record: `{kind, tick, component_id?, pin_name?, message}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub tick: Tick,
    pub board: Option<String>,
    pub component_id: Option<ComponentId>,
    pub pin_name: Option<String>,
    pub message: String,
    /// Every driver (as `component.pin`) or component involved, for contention and loops.
    pub participants: Vec<String>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, tick: Tick, message: impl Into<String>) -> Self {
        Diagnostic {
            kind,
            tick,
            board: None,
            component_id: None,
            pin_name: None,
            message: message.into(),
            participants: Vec::new(),
        }
    }

    pub fn with_board(mut self, board: &str) -> Self {
        self.board = Some(board.to_string());
        self
    }

    pub fn with_component(mut self, component: ComponentId) -> Self {
        self.component_id = Some(component);
        self
    }

    pub fn with_pin(mut self, pin: &str) -> Self {
        self.pin_name = Some(pin.to_string());
        self
    }

    pub fn with_participants(mut self, participants: Vec<String>) -> Self {
        self.participants = participants;
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[tick {}] {}", self.tick, self.kind)?;
        if let Some(board) = &self.board {
            write!(f, " {}", board)?;
        }
        if let Some(component) = self.component_id {
            write!(f, " {}", component)?;
        }
        if let Some(pin) = &self.pin_name {
            write!(f, ".{}", pin)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Append-only diagnostics log with per-kind counters.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    records: Vec<Diagnostic>,
    counts: [u64; 8],
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, diagnostic: Diagnostic) {
        if diagnostic.kind.is_fatal() {
            error!(kind = %diagnostic.kind, tick = diagnostic.tick, "{}", diagnostic.message);
        } else {
            warn!(kind = %diagnostic.kind, tick = diagnostic.tick, "{}", diagnostic.message);
        }
        self.counts[diagnostic.kind.index()] += 1;
        self.records.push(diagnostic);
    }

    pub fn records(&self) -> &[Diagnostic] {
        &self.records
    }

    /// Records appended after position `mark` (as returned by `len()`).
    pub fn since(&self, mark: usize) -> &[Diagnostic] {
        self.records.get(mark..).unwrap_or(&[])
    }

    pub fn of_kind(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.records.iter().filter(move |d| d.kind == kind)
    }

    /// Total recorded for `kind`, including records dropped by `clear()`.
    pub fn count(&self, kind: DiagnosticKind) -> u64 {
        self.counts[kind.index()]
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop the stored records; counters are kept.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub(crate) fn counts(&self) -> [u64; 8] {
        self.counts
    }

    pub(crate) fn set_counts(&mut self, counts: [u64; 8]) {
        self.counts = counts;
    }
}
