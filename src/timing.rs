//! Setup/hold checking for clocked inputs.
//!
//! Timing checks are observational only: a violation is recorded as a
//! diagnostic and the latched value is whatever the storage element saw.

use std::collections::HashMap;

use crate::clock::ClockEdge;
use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
use crate::types::{ClockDomainId, ComponentId, NetId, PinIndex, Tick};

/// Timing contract a clocked component declares for its data inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingSpec {
    pub domain: ClockDomainId,
    pub data_pins: Vec<PinIndex>,
    pub setup: Tick,
    pub hold: Tick,
}

impl TimingSpec {
    pub fn new(domain: ClockDomainId, setup: Tick, hold: Tick) -> Self {
        TimingSpec {
            domain,
            data_pins: Vec::new(),
            setup,
            hold,
        }
    }

    pub fn with_pin(mut self, pin: PinIndex) -> Self {
        self.data_pins.push(pin);
        self
    }
}

#[derive(Debug, Clone)]
struct Watch {
    component: ComponentId,
    pin_name: String,
    domain: ClockDomainId,
    setup: Tick,
    hold: Tick,
    last_change: Option<Tick>,
    last_edge: Option<Tick>,
    // Change made after this tick's storage already sampled; folded into
    // `last_change` at the end of the tick.
    late_change: Option<Tick>,
}

/// Dynamic state of one watched input as stored in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WatchState {
    pub last_change: Option<Tick>,
    pub last_edge: Option<Tick>,
}

#[derive(Debug, Clone, Default)]
pub struct TimingMonitor {
    watches: Vec<Watch>,
    by_net: HashMap<NetId, Vec<usize>>,
}

impl TimingMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch one data input of a clocked component.
    pub fn watch(
        &mut self,
        component: ComponentId,
        pin_name: &str,
        net: NetId,
        spec: &TimingSpec,
    ) {
        self.by_net.entry(net).or_default().push(self.watches.len());
        self.watches.push(Watch {
            component,
            pin_name: pin_name.to_string(),
            domain: spec.domain,
            setup: spec.setup,
            hold: spec.hold,
            last_change: None,
            last_edge: None,
            late_change: None,
        });
    }

    pub fn len(&self) -> usize {
        self.watches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    pub fn is_watched(&self, net: NetId) -> bool {
        self.by_net.contains_key(&net)
    }

    /// Note that `net` changed value during tick `now`. `after_edge` marks a
    /// change driven by storage outputs committed after sampling, which cannot
    /// violate setup for the edge that caused it.
    pub fn record_change(&mut self, net: NetId, now: Tick, after_edge: bool) {
        if let Some(indices) = self.by_net.get(&net) {
            for &index in indices {
                let watch = &mut self.watches[index];
                if after_edge {
                    watch.late_change = Some(now);
                } else {
                    watch.last_change = Some(now);
                }
            }
        }
    }

    /// Run the end-of-tick checks against the edges that fired this tick.
    ///
    /// A change `1..=hold` ticks after the last rising edge is a hold violation.
    /// A rising edge less than `setup` ticks after the last change (including a
    /// change in the same tick) is a setup violation.
    pub fn check(&mut self, now: Tick, edges: &[ClockEdge], board: &str, diagnostics: &mut Diagnostics) {
        for watch in &mut self.watches {
            let changed_now = watch.last_change == Some(now) || watch.late_change == Some(now);
            if changed_now {
                if let Some(edge) = watch.last_edge {
                    let since = now - edge;
                    if since > 0 && since <= watch.hold {
                        diagnostics.record(
                            Diagnostic::new(
                                DiagnosticKind::HoldViolation,
                                now,
                                format!(
                                    "{} changed {} tick(s) after the edge at {}, hold is {}",
                                    watch.pin_name, since, edge, watch.hold
                                ),
                            )
                            .with_board(board)
                            .with_component(watch.component)
                            .with_pin(&watch.pin_name),
                        );
                    }
                }
            }

            let rising = edges
                .iter()
                .any(|edge| edge.rising && edge.domain == watch.domain);
            if !rising {
                if let Some(late) = watch.late_change.take() {
                    watch.last_change = Some(late);
                }
                continue;
            }
            if let Some(change) = watch.last_change {
                let since = now - change;
                if since < watch.setup {
                    diagnostics.record(
                        Diagnostic::new(
                            DiagnosticKind::SetupViolation,
                            now,
                            format!(
                                "{} changed {} tick(s) before the edge, setup is {}",
                                watch.pin_name, since, watch.setup
                            ),
                        )
                        .with_board(board)
                        .with_component(watch.component)
                        .with_pin(&watch.pin_name),
                    );
                }
            }
            watch.last_edge = Some(now);
            if let Some(late) = watch.late_change.take() {
                watch.last_change = Some(late);
            }
        }
    }

    pub(crate) fn state(&self) -> Vec<WatchState> {
        self.watches
            .iter()
            .map(|w| WatchState {
                last_change: w.last_change,
                last_edge: w.last_edge,
            })
            .collect()
    }

    pub(crate) fn restore(&mut self, states: &[WatchState]) {
        for (watch, state) in self.watches.iter_mut().zip(states) {
            watch.last_change = state.last_change;
            watch.last_edge = state.last_edge;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(setup: Tick, hold: Tick) -> TimingMonitor {
        let mut monitor = TimingMonitor::new();
        let spec = TimingSpec::new(ClockDomainId(0), setup, hold).with_pin(PinIndex(0));
        monitor.watch(ComponentId(1), "D", NetId(4), &spec);
        monitor
    }

    fn rising(tick: Tick) -> Vec<ClockEdge> {
        vec![ClockEdge {
            domain: ClockDomainId(0),
            tick,
            rising: true,
        }]
    }

    #[test]
    fn test_setup_met() {
        let mut monitor = monitor(1, 1);
        let mut diagnostics = Diagnostics::new();
        monitor.record_change(NetId(4), 5, false);
        monitor.check(5, &[], "b", &mut diagnostics);
        monitor.check(6, &rising(6), "b", &mut diagnostics);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_setup_violation_same_tick() {
        let mut monitor = monitor(1, 1);
        let mut diagnostics = Diagnostics::new();
        monitor.record_change(NetId(4), 6, false);
        monitor.check(6, &rising(6), "b", &mut diagnostics);
        assert_eq!(diagnostics.count(DiagnosticKind::SetupViolation), 1);
        assert_eq!(diagnostics.count(DiagnosticKind::HoldViolation), 0);
        assert_eq!(diagnostics.records()[0].pin_name.as_deref(), Some("D"));
    }

    #[test]
    fn test_setup_two_ticks() {
        let mut monitor = monitor(2, 0);
        let mut diagnostics = Diagnostics::new();
        monitor.record_change(NetId(4), 10, false);
        monitor.check(10, &[], "b", &mut diagnostics);
        monitor.check(11, &rising(11), "b", &mut diagnostics);
        assert_eq!(diagnostics.count(DiagnosticKind::SetupViolation), 1);
    }

    #[test]
    fn test_hold_violation() {
        let mut monitor = monitor(0, 2);
        let mut diagnostics = Diagnostics::new();
        monitor.check(4, &rising(4), "b", &mut diagnostics);
        monitor.record_change(NetId(4), 6, false);
        monitor.check(6, &[], "b", &mut diagnostics);
        monitor.record_change(NetId(4), 7, false);
        monitor.check(7, &[], "b", &mut diagnostics);
        assert_eq!(diagnostics.count(DiagnosticKind::HoldViolation), 1);
    }

    #[test]
    fn test_change_after_sampling_is_not_setup() {
        let mut monitor = monitor(2, 1);
        let mut diagnostics = Diagnostics::new();
        monitor.record_change(NetId(4), 6, true);
        monitor.check(6, &rising(6), "b", &mut diagnostics);
        assert!(diagnostics.is_empty());

        // It still counts as the latest change for the next edge.
        monitor.check(7, &rising(7), "b", &mut diagnostics);
        assert_eq!(diagnostics.count(DiagnosticKind::SetupViolation), 1);
    }

    #[test]
    fn test_unwatched_net_ignored() {
        let mut monitor = monitor(3, 3);
        let mut diagnostics = Diagnostics::new();
        monitor.record_change(NetId(9), 6, false);
        monitor.check(6, &rising(6), "b", &mut diagnostics);
        assert!(diagnostics.is_empty());
        assert!(!monitor.is_watched(NetId(9)));
    }
}
