//! Per-board evaluation order and the per-tick change-propagation loop.
//!
//! Ranks come from a one-shot Kahn pass over the driver-to-reader graph with
//! edges into clocked storage removed. Each tick the dirty components are
//! evaluated as a batch in (rank, id) order; nets touched by the batch are
//! resolved only after the whole batch ran, and the readers of every changed net
//! form the next batch. The loop stops at a fixed point or after the configured
//! iteration bound.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};

use tracing::{debug, warn};

use crate::board::Circuit;
use crate::clock::ClockEdge;
use crate::component::{Component, TickContext};
use crate::config::EngineConfig;
use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
use crate::net::{NetChange, Netlist};
use crate::types::{ComponentId, NetId, PinAddr, PinIndex, Tick};

#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    ranks: Vec<u32>,
    order: Vec<ComponentId>,
    fan_out: Vec<Vec<ComponentId>>,
    loops: Vec<Vec<ComponentId>>,
    dirty: BTreeSet<(u32, ComponentId)>,
}

impl Scheduler {
    pub fn build(components: &[Box<dyn Component>], netlist: &Netlist) -> Self {
        let count = components.len();
        let mut fan_out: Vec<BTreeSet<ComponentId>> = vec![BTreeSet::new(); count];

        for net in netlist.iter() {
            for driver in net.drivers() {
                for reader in net.readers() {
                    if *reader == driver.addr.component {
                        continue;
                    }
                    let storage = components
                        .get(reader.index())
                        .is_some_and(|c| c.is_clocked_storage());
                    if !storage {
                        fan_out[driver.addr.component.index()].insert(*reader);
                    }
                }
            }
        }
        let fan_out: Vec<Vec<ComponentId>> = fan_out
            .into_iter()
            .map(|targets| targets.into_iter().collect())
            .collect();

        let ranks = rank(&fan_out);
        let mut order: Vec<ComponentId> = (0..count).map(ComponentId::from).collect();
        order.sort_by_key(|id| (ranks[id.index()], *id));

        let loops = strongly_connected(&fan_out);
        for members in &loops {
            let names: Vec<&str> = members
                .iter()
                .filter_map(|id| components.get(id.index()).map(|c| c.name()))
                .collect();
            warn!(components = ?names, "combinational loop: no clocked storage on the cycle");
        }

        Scheduler {
            ranks,
            order,
            fan_out,
            loops,
            dirty: BTreeSet::new(),
        }
    }

    /// Topological rank of a component; `None` before the board is built.
    pub fn rank(&self, id: ComponentId) -> Option<u32> {
        self.ranks.get(id.index()).copied()
    }

    /// Components in evaluation order.
    pub fn order(&self) -> &[ComponentId] {
        &self.order
    }

    pub fn fan_out(&self, id: ComponentId) -> &[ComponentId] {
        self.fan_out.get(id.index()).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Combinational cycles found while ranking.
    pub fn loops(&self) -> &[Vec<ComponentId>] {
        &self.loops
    }

    pub fn mark(&mut self, id: ComponentId) {
        if let Some(rank) = self.rank(id) {
            self.dirty.insert((rank, id));
        }
    }

    pub fn is_dirty(&self, id: ComponentId) -> bool {
        self.rank(id)
            .is_some_and(|rank| self.dirty.contains(&(rank, id)))
    }

    /// Components still dirty, in evaluation order.
    pub fn dirty(&self) -> Vec<ComponentId> {
        self.dirty.iter().map(|(_, id)| *id).collect()
    }

    pub fn clear_dirty(&mut self) {
        self.dirty.clear();
    }

    /// Run one tick for a board. Returns the nets whose signal differs from the
    /// start of the tick.
    pub fn step(
        &mut self,
        circuit: &mut Circuit,
        now: Tick,
        config: &EngineConfig,
        board: &str,
        diagnostics: &mut Diagnostics,
    ) -> Vec<NetChange> {
        for entry in circuit.queue.pop_ready(now) {
            if let Some(payload) = entry.payload {
                if let Some(component) = circuit.components.get_mut(entry.component.index()) {
                    component.receive(payload.pin, payload.value);
                }
            }
            self.mark(entry.component);
        }

        let edges = circuit.clocks.advance(now);
        let mut edge_of: HashMap<ComponentId, ClockEdge> = HashMap::new();
        for edge in &edges {
            let members = circuit
                .clocks
                .domain(edge.domain)
                .map(|domain| domain.members().to_vec())
                .unwrap_or_default();
            for member in members {
                edge_of.insert(member, *edge);
                self.mark(member);
            }
        }

        let mut changes: BTreeMap<NetId, NetChange> = BTreeMap::new();
        let mut iterations = self.settle(circuit, now, &edge_of, config, false, &mut changes);

        // Storage sampled on this tick's edges updates its outputs only now, so
        // a register never sees another register's new value in the same edge.
        let committed = circuit.queue.take_committed();
        if !committed.is_empty() {
            for (id, payload) in committed {
                if let Some(component) = circuit.components.get_mut(id.index()) {
                    component.receive(payload.pin, payload.value);
                }
                self.mark(id);
            }
            iterations += self.settle(circuit, now, &HashMap::new(), config, true, &mut changes);
        }
        debug!(board, tick = now, iterations, edges = edges.len(), "step");

        if !self.dirty.is_empty() {
            let ids = self.dirty();
            let names: Vec<String> = ids
                .iter()
                .filter_map(|id| circuit.components.get(id.index()))
                .map(|c| c.name().to_string())
                .collect();
            let mut diagnostic = Diagnostic::new(
                DiagnosticKind::CombinationalLoopNotSettled,
                now,
                format!(
                    "{} component(s) still changing after {} iterations: {}",
                    names.len(),
                    iterations,
                    names.join(", ")
                ),
            )
            .with_board(board)
            .with_participants(names);
            if let [single] = ids.as_slice() {
                diagnostic = diagnostic.with_component(*single);
            }
            diagnostics.record(diagnostic);
        }

        for net in circuit.netlist.contended().collect::<Vec<_>>() {
            diagnostics.record(contention(circuit, net, now, board));
        }

        circuit.timing.check(now, &edges, board, diagnostics);
        circuit.netlist.settle();

        changes
            .into_values()
            .filter(|change| change.old != change.new)
            .collect()
    }

    /// Evaluate dirty batches until nothing changes or the iteration bound is
    /// hit. Returns the number of batches run.
    fn settle(
        &mut self,
        circuit: &mut Circuit,
        now: Tick,
        edge_of: &HashMap<ComponentId, ClockEdge>,
        config: &EngineConfig,
        after_edge: bool,
        changes: &mut BTreeMap<NetId, NetChange>,
    ) -> u32 {
        let mut iterations = 0;
        while !self.dirty.is_empty() && iterations < config.iteration_bound {
            iterations += 1;
            let batch = std::mem::take(&mut self.dirty);
            let mut touched = BTreeSet::new();
            for (_, id) in batch {
                let edge = edge_of.get(&id).copied();
                touched.extend(evaluate(circuit, id, now, edge, config.latch_pre_edge, false));
            }

            for net in touched {
                let Some(change) = circuit.netlist.resolve(net) else {
                    continue;
                };
                circuit.timing.record_change(net, now, after_edge);
                if let Some(resolved) = circuit.netlist.net(net) {
                    for reader in resolved.readers() {
                        if let Some(rank) = self.ranks.get(reader.index()) {
                            self.dirty.insert((*rank, *reader));
                        }
                    }
                }
                changes
                    .entry(net)
                    .and_modify(|merged| merged.new = change.new)
                    .or_insert(change);
            }
        }
        iterations
    }

    pub(crate) fn restore_dirty(&mut self, dirty: &[ComponentId]) {
        self.dirty.clear();
        for id in dirty {
            self.mark(*id);
        }
    }
}

/// Tick (or power on) one component and push its output drives onto the nets.
/// Returns the nets whose driver set changed.
pub(crate) fn evaluate(
    circuit: &mut Circuit,
    id: ComponentId,
    now: Tick,
    edge: Option<ClockEdge>,
    latch_pre_edge: bool,
    power_on: bool,
) -> Vec<NetId> {
    let Circuit {
        components,
        netlist,
        queue,
        clocks,
        ..
    } = circuit;
    let Some(component) = components.get_mut(id.index()) else {
        return Vec::new();
    };
    let level = component.clock_domain().and_then(|domain| clocks.level(domain));

    {
        let nets: &Netlist = netlist;
        let mut ctx = TickContext {
            now,
            component: id,
            pin_nets: nets.pins_of(id),
            nets,
            queue,
            edge,
            level,
            latch_pre_edge,
        };
        if power_on {
            component.power_on(&mut ctx);
        } else {
            component.tick(&mut ctx);
        }
    }

    let outputs: Vec<PinIndex> = component.pins().outputs().map(|pin| pin.index()).collect();
    outputs
        .into_iter()
        .filter_map(|pin| netlist.update_driver(PinAddr::new(id, pin), component.emit(pin)))
        .collect()
}

fn contention(circuit: &Circuit, net: NetId, now: Tick, board: &str) -> Diagnostic {
    let drivers: Vec<String> = circuit
        .netlist
        .net(net)
        .map(|resolved| resolved.active_drivers())
        .unwrap_or_default()
        .iter()
        .map(|slot| {
            let component = circuit.components.get(slot.addr.component.index());
            let name = component.map(|c| c.name()).unwrap_or("?");
            let pin = component
                .map(|c| c.pins().name_of(slot.addr.pin))
                .unwrap_or("?");
            format!("{}.{}={:#x}", name, pin, slot.drive.value)
        })
        .collect();

    Diagnostic::new(
        DiagnosticKind::BusContention,
        now,
        format!("{} contended by {}", net, drivers.join(", ")),
    )
    .with_board(board)
    .with_participants(drivers)
}

/// Longest-path levels by Kahn's algorithm. When no node is ready the lowest-id
/// unranked node is forced, which breaks cycles deterministically.
fn rank(fan_out: &[Vec<ComponentId>]) -> Vec<u32> {
    let count = fan_out.len();
    let mut indegree = vec![0usize; count];
    for targets in fan_out {
        for target in targets {
            indegree[target.index()] += 1;
        }
    }

    let mut ranks = vec![0u32; count];
    let mut done = vec![false; count];
    let mut ready: BinaryHeap<Reverse<usize>> = (0..count)
        .filter(|node| indegree[*node] == 0)
        .map(Reverse)
        .collect();
    let mut processed = 0;

    while processed < count {
        let node = match ready.pop() {
            Some(Reverse(node)) => node,
            None => match (0..count).find(|node| !done[*node]) {
                Some(node) => node,
                None => break,
            },
        };
        if done[node] {
            continue;
        }
        done[node] = true;
        processed += 1;

        for target in &fan_out[node] {
            let target = target.index();
            if done[target] {
                continue;
            }
            ranks[target] = ranks[target].max(ranks[node] + 1);
            indegree[target] -= 1;
            if indegree[target] == 0 {
                ready.push(Reverse(target));
            }
        }
    }
    ranks
}

/// Cycles of the rank graph (strongly connected components with more than one
/// member), each sorted by id. Iterative Kosaraju.
fn strongly_connected(fan_out: &[Vec<ComponentId>]) -> Vec<Vec<ComponentId>> {
    let count = fan_out.len();
    let mut finished = Vec::with_capacity(count);
    let mut visited = vec![false; count];

    for start in 0..count {
        if visited[start] {
            continue;
        }
        visited[start] = true;
        let mut stack = vec![(start, 0usize)];
        while let Some((node, next)) = stack.pop() {
            if let Some(target) = fan_out[node].get(next) {
                stack.push((node, next + 1));
                let target = target.index();
                if !visited[target] {
                    visited[target] = true;
                    stack.push((target, 0));
                }
            } else {
                finished.push(node);
            }
        }
    }

    let mut fan_in: Vec<Vec<usize>> = vec![Vec::new(); count];
    for (node, targets) in fan_out.iter().enumerate() {
        for target in targets {
            fan_in[target.index()].push(node);
        }
    }

    let mut assigned = vec![false; count];
    let mut loops = Vec::new();
    for &root in finished.iter().rev() {
        if assigned[root] {
            continue;
        }
        assigned[root] = true;
        let mut members = vec![root];
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            for &source in &fan_in[node] {
                if !assigned[source] {
                    assigned[source] = true;
                    members.push(source);
                    stack.push(source);
                }
            }
        }
        if members.len() > 1 {
            members.sort();
            loops.push(members.into_iter().map(ComponentId::from).collect());
        }
    }
    loops.sort();
    loops
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(u32, u32)], count: usize) -> Vec<Vec<ComponentId>> {
        let mut fan_out = vec![Vec::new(); count];
        for (from, to) in edges {
            fan_out[*from as usize].push(ComponentId(*to));
        }
        fan_out
    }

    #[test]
    fn test_rank_chain() {
        let fan_out = graph(&[(2, 1), (1, 0)], 3);
        assert_eq!(rank(&fan_out), vec![2, 1, 0]);
    }

    #[test]
    fn test_rank_longest_path() {
        // 0 -> 1 -> 3, 0 -> 3, 2 -> 3
        let fan_out = graph(&[(0, 1), (1, 3), (0, 3), (2, 3)], 4);
        assert_eq!(rank(&fan_out), vec![0, 1, 0, 2]);
    }

    #[test]
    fn test_rank_breaks_cycle_at_lowest_id() {
        // 0 -> 1 -> 2 -> 0, 2 -> 3
        let fan_out = graph(&[(0, 1), (1, 2), (2, 0), (2, 3)], 4);
        assert_eq!(rank(&fan_out), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_strongly_connected() {
        let fan_out = graph(&[(0, 1), (1, 0), (1, 2), (3, 4), (4, 5), (5, 3)], 6);
        let loops = strongly_connected(&fan_out);
        assert_eq!(
            loops,
            vec![
                vec![ComponentId(0), ComponentId(1)],
                vec![ComponentId(3), ComponentId(4), ComponentId(5)],
            ]
        );
    }

    #[test]
    fn test_acyclic_has_no_loops() {
        let fan_out = graph(&[(0, 1), (1, 2), (0, 2)], 3);
        assert!(strongly_connected(&fan_out).is_empty());
    }
}
