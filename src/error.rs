//! Fatal error taxonomy.
//!
//! Errors in this module abort the operation that raised them (wiring, `init`,
//! `restore`). Runtime conditions such as bus contention never come through here;
//! they are recorded in [`crate::diagnostics::Diagnostics`].

use std::fmt;

use thiserror::Error;

use crate::diagnostics::DiagnosticKind;

/// What exactly was wrong with a board's configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigIssue {
    UnknownPin,
    DuplicatePinName,
    RequiredPinUnconnected,
    UnsupportedWidth(u8),
    UnknownClockDomain(u16),
    InvalidClockPeriod(u64),
    InvalidIterationBound,
    /// The component's own `validate()` refused its configuration.
    Rejected(String),
    MalformedBoard(String),
    /// Pin table or wiring mutated after `Engine::init`.
    AfterInit,
    NotInitialized,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigIssue::UnknownPin => write!(f, "unknown pin name"),
            ConfigIssue::DuplicatePinName => write!(f, "duplicate pin name"),
            ConfigIssue::RequiredPinUnconnected => write!(f, "required pin is unconnected"),
            ConfigIssue::UnsupportedWidth(width) => write!(f, "unsupported width {}", width),
            ConfigIssue::UnknownClockDomain(id) => write!(f, "unknown clock domain {}", id),
            ConfigIssue::InvalidClockPeriod(period) => {
                write!(f, "clock period {} is below the 2-tick minimum", period)
            }
            ConfigIssue::InvalidIterationBound => write!(f, "iteration bound must be at least 1"),
            ConfigIssue::Rejected(reason) => write!(f, "rejected configuration: {}", reason),
            ConfigIssue::MalformedBoard(reason) => write!(f, "malformed board: {}", reason),
            ConfigIssue::AfterInit => write!(f, "cannot be changed after init"),
            ConfigIssue::NotInitialized => write!(f, "engine is not initialized"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SimError {
    #[error("configuration error at {}: {issue}", locate(.board, .component, .pin))]
    Configuration {
        board: String,
        component: String,
        pin: Option<String>,
        issue: ConfigIssue,
    },

    #[error("width mismatch on board '{board}': {left} is {left_width} bits, {right} is {right_width} bits")]
    WidthMismatch {
        board: String,
        left: String,
        left_width: u8,
        right: String,
        right_width: u8,
    },

    #[error("pin {component}.{pin} on board '{board}' is already connected and not multi-connect")]
    AlreadyConnected {
        board: String,
        component: String,
        pin: String,
    },

    #[error("invalid connection on board '{board}': {pin} {reason}")]
    InvalidConnection {
        board: String,
        pin: String,
        reason: String,
    },

    #[error("snapshot incompatible: {0}")]
    SnapshotIncompatible(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type used throughout the simulator.
pub type SimResult<T> = Result<T, SimError>;

fn locate(board: &str, component: &str, pin: &Option<String>) -> String {
    let board = if board.is_empty() { "?" } else { board };
    match pin {
        Some(pin) => format!("{}/{}.{}", board, component, pin),
        None => format!("{}/{}", board, component),
    }
}

impl SimError {
    pub(crate) fn config(component: &str, pin: Option<&str>, issue: ConfigIssue) -> Self {
        SimError::Configuration {
            board: String::new(),
            component: component.to_string(),
            pin: pin.map(str::to_string),
            issue,
        }
    }

    pub(crate) fn incompatible(reason: impl Into<String>) -> Self {
        SimError::SnapshotIncompatible(reason.into())
    }

    /// Fill in the board name on errors raised below the board layer.
    pub(crate) fn on_board(self, name: &str) -> Self {
        match self {
            SimError::Configuration {
                board,
                component,
                pin,
                issue,
            } if board.is_empty() => SimError::Configuration {
                board: name.to_string(),
                component,
                pin,
                issue,
            },
            other => other,
        }
    }

    /// Diagnostic kind this error is reported under, if it belongs to the taxonomy.
    pub fn kind(&self) -> Option<DiagnosticKind> {
        match self {
            SimError::Configuration { .. } => Some(DiagnosticKind::ConfigurationError),
            SimError::WidthMismatch { .. } => Some(DiagnosticKind::WidthMismatch),
            SimError::AlreadyConnected { .. } => Some(DiagnosticKind::AlreadyConnected),
            SimError::InvalidConnection { .. } => Some(DiagnosticKind::ConfigurationError),
            SimError::SnapshotIncompatible(_) => Some(DiagnosticKind::SnapshotIncompatible),
            SimError::Io(_) | SimError::Json(_) => None,
        }
    }

    pub fn issue(&self) -> Option<&ConfigIssue> {
        match self {
            SimError::Configuration { issue, .. } => Some(issue),
            _ => None,
        }
    }
}
