use std::collections::HashMap;

use crate::types::{ComponentId, PinAddr, PinIndex};

/// Tracks the electrical connections made on a board as a union-find over pin slots.
///
/// Every pin of every registered component owns one slot. Connecting two pins
/// merges their classes; each class becomes one net when the board is built.
#[derive(Debug, Clone, Default)]
pub struct ConnectionManager {
    offsets: Vec<usize>,
    slots: Vec<PinAddr>,
    parent: Vec<usize>,
    size: Vec<usize>,
    peers: Vec<u32>,
    links: Vec<(PinAddr, PinAddr)>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate slots for a newly added component with `pin_count` pins.
    pub fn register_component(&mut self, pin_count: usize) -> ComponentId {
        let id = ComponentId(self.offsets.len() as u32);
        self.offsets.push(self.slots.len());
        for pin in 0..pin_count {
            let slot = self.slots.len();
            self.slots.push(PinAddr::new(id, PinIndex(pin as u16)));
            self.parent.push(slot);
            self.size.push(1);
            self.peers.push(0);
        }
        id
    }

    pub fn component_count(&self) -> usize {
        self.offsets.len()
    }

    fn slot(&self, addr: PinAddr) -> Option<usize> {
        let offset = *self.offsets.get(addr.component.index())?;
        let end = self
            .offsets
            .get(addr.component.index() + 1)
            .copied()
            .unwrap_or(self.slots.len());
        let slot = offset + addr.pin.index();
        (slot < end).then_some(slot)
    }

    fn find(&mut self, mut slot: usize) -> usize {
        while self.parent[slot] != slot {
            self.parent[slot] = self.parent[self.parent[slot]];
            slot = self.parent[slot];
        }
        slot
    }

    /// Number of direct connections made to `addr`.
    pub fn peer_count(&self, addr: PinAddr) -> u32 {
        self.slot(addr).map(|slot| self.peers[slot]).unwrap_or(0)
    }

    pub fn is_connected(&self, addr: PinAddr) -> bool {
        self.peer_count(addr) > 0
    }

    /// Join the classes of `a` and `b`. Returns false if either pin is unknown
    /// or both name the same pin.
    pub fn connect(&mut self, a: PinAddr, b: PinAddr) -> bool {
        let (Some(sa), Some(sb)) = (self.slot(a), self.slot(b)) else {
            return false;
        };
        if sa == sb {
            return false;
        }
        self.peers[sa] += 1;
        self.peers[sb] += 1;
        self.links.push((a, b));

        let (ra, rb) = (self.find(sa), self.find(sb));
        if ra != rb {
            let (big, small) = if self.size[ra] >= self.size[rb] {
                (ra, rb)
            } else {
                (rb, ra)
            };
            self.parent[small] = big;
            self.size[big] += self.size[small];
        }
        true
    }

    pub fn same_net(&mut self, a: PinAddr, b: PinAddr) -> bool {
        match (self.slot(a), self.slot(b)) {
            (Some(sa), Some(sb)) => self.find(sa) == self.find(sb),
            _ => false,
        }
    }

    /// Connections in the order they were made.
    pub fn links(&self) -> &[(PinAddr, PinAddr)] {
        &self.links
    }

    /// Every equivalence class, ordered by the first (component, pin) it contains.
    /// Unconnected pins form singleton groups.
    pub fn groups(&mut self) -> Vec<Vec<PinAddr>> {
        let mut index: HashMap<usize, usize> = HashMap::new();
        let mut groups: Vec<Vec<PinAddr>> = Vec::new();
        for slot in 0..self.slots.len() {
            let root = self.find(slot);
            let group = *index.entry(root).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[group].push(self.slots[slot]);
        }
        groups
    }
}
