//! Clock domains.
//!
//! Each domain is a two-state machine that starts low with its first edge at the
//! phase offset. The high phase lasts `period / 2` ticks and the low phase the
//! remainder, so odd periods are allowed.

use crate::error::{ConfigIssue, SimError, SimResult};
use crate::types::{ClockDomainId, ComponentId, Tick};

/// A transition reported by [`ClockManager::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockEdge {
    pub domain: ClockDomainId,
    pub tick: Tick,
    pub rising: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockDomain {
    id: ClockDomainId,
    name: String,
    period: Tick,
    phase: Tick,
    high: bool,
    last_edge: Option<Tick>,
    next_edge: Tick,
    members: Vec<ComponentId>,
}

impl ClockDomain {
    pub fn id(&self) -> ClockDomainId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn period(&self) -> Tick {
        self.period
    }

    pub fn phase(&self) -> Tick {
        self.phase
    }

    pub fn is_high(&self) -> bool {
        self.high
    }

    pub fn last_edge(&self) -> Option<Tick> {
        self.last_edge
    }

    pub fn next_edge(&self) -> Tick {
        self.next_edge
    }

    pub fn members(&self) -> &[ComponentId] {
        &self.members
    }

    fn flip(&mut self, now: Tick) -> ClockEdge {
        self.high = !self.high;
        self.last_edge = Some(now);
        self.next_edge = now
            + if self.high {
                self.period / 2
            } else {
                self.period - self.period / 2
            };
        ClockEdge {
            domain: self.id,
            tick: now,
            rising: self.high,
        }
    }
}

/// Dynamic state of one domain as stored in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DomainState {
    pub high: bool,
    pub last_edge: Option<Tick>,
    pub next_edge: Tick,
}

#[derive(Debug, Clone, Default)]
pub struct ClockManager {
    domains: Vec<ClockDomain>,
}

impl ClockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_domain(&mut self, name: &str, period: Tick, phase: Tick) -> SimResult<ClockDomainId> {
        if period < 2 {
            return Err(SimError::config(name, None, ConfigIssue::InvalidClockPeriod(period)));
        }
        let id = ClockDomainId(self.domains.len() as u16);
        self.domains.push(ClockDomain {
            id,
            name: name.to_string(),
            period,
            phase,
            high: false,
            last_edge: None,
            next_edge: phase,
            members: Vec::new(),
        });
        Ok(id)
    }

    pub fn domain(&self, id: ClockDomainId) -> Option<&ClockDomain> {
        self.domains.get(id.index())
    }

    pub fn find(&self, name: &str) -> Option<ClockDomainId> {
        self.domains.iter().find(|d| d.name == name).map(|d| d.id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClockDomain> {
        self.domains.iter()
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Register a component as driven by `domain`.
    pub fn subscribe(&mut self, domain: ClockDomainId, component: ComponentId) -> Result<(), ConfigIssue> {
        let domain = self
            .domains
            .get_mut(domain.index())
            .ok_or(ConfigIssue::UnknownClockDomain(domain.0))?;
        if !domain.members.contains(&component) {
            domain.members.push(component);
            domain.members.sort();
        }
        Ok(())
    }

    /// Apply every edge due at or before `now` without reporting it. Used at init
    /// so a zero phase offset starts the domain high.
    pub fn prime(&mut self, now: Tick) {
        for domain in &mut self.domains {
            while domain.next_edge <= now {
                domain.flip(domain.next_edge);
            }
        }
    }

    /// Flip every domain whose next edge is due at `now`.
    pub fn advance(&mut self, now: Tick) -> Vec<ClockEdge> {
        let mut edges = Vec::new();
        for domain in &mut self.domains {
            if domain.next_edge == now {
                edges.push(domain.flip(now));
            }
        }
        edges
    }

    pub fn level(&self, id: ClockDomainId) -> Option<bool> {
        self.domain(id).map(|d| d.high)
    }

    pub(crate) fn state(&self) -> Vec<DomainState> {
        self.domains
            .iter()
            .map(|d| DomainState {
                high: d.high,
                last_edge: d.last_edge,
                next_edge: d.next_edge,
            })
            .collect()
    }

    pub(crate) fn restore(&mut self, states: &[DomainState]) {
        for (domain, state) in self.domains.iter_mut().zip(states) {
            domain.high = state.high;
            domain.last_edge = state.last_edge;
            domain.next_edge = state.next_edge;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_minimum() {
        let mut clocks = ClockManager::new();
        let err = clocks.add_domain("fast", 1, 0).unwrap_err();
        assert_eq!(err.issue(), Some(&ConfigIssue::InvalidClockPeriod(1)));
        assert!(clocks.add_domain("ok", 2, 0).is_ok());
    }

    #[test]
    fn test_edges_follow_phase_and_period() {
        let mut clocks = ClockManager::new();
        let clk = clocks.add_domain("clk", 4, 2).unwrap();
        clocks.prime(0);

        let mut edges = Vec::new();
        for now in 1..=10 {
            edges.extend(clocks.advance(now));
        }
        let ticks: Vec<(Tick, bool)> = edges.iter().map(|e| (e.tick, e.rising)).collect();
        assert_eq!(ticks, vec![(2, true), (4, false), (6, true), (8, false), (10, true)]);
        assert_eq!(clocks.level(clk), Some(true));
        assert_eq!(clocks.domain(clk).unwrap().last_edge(), Some(10));
    }

    #[test]
    fn test_zero_phase_primed_high() {
        let mut clocks = ClockManager::new();
        let clk = clocks.add_domain("clk", 2, 0).unwrap();
        clocks.prime(0);
        assert_eq!(clocks.level(clk), Some(true));
        assert_eq!(clocks.advance(1), vec![ClockEdge { domain: clk, tick: 1, rising: false }]);
        assert!(clocks.advance(2)[0].rising);
    }

    #[test]
    fn test_odd_period() {
        let mut clocks = ClockManager::new();
        clocks.add_domain("odd", 5, 1).unwrap();
        clocks.prime(0);
        let edges: Vec<Tick> = (1..=12).flat_map(|now| clocks.advance(now)).map(|e| e.tick).collect();
        // high for 2 ticks, low for 3
        assert_eq!(edges, vec![1, 3, 6, 8, 11]);
    }

    #[test]
    fn test_subscribe_unknown_domain() {
        let mut clocks = ClockManager::new();
        assert_eq!(
            clocks.subscribe(ClockDomainId(3), ComponentId(0)),
            Err(ConfigIssue::UnknownClockDomain(3))
        );
    }
}
