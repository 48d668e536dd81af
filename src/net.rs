//! Nets and driver arbitration.
//!
//! A net is the equivalence class of every pin wired together on a board. Nets
//! live in an arena ([`Netlist`]) and are addressed by [`NetId`]; pins never hold
//! values, they hold the handle of their net.

use std::collections::{BTreeSet, HashMap};

use crate::pin::{Drive, DriveStrength, LogicState, PinRegistry, Signal};
use crate::types::{width_mask, ComponentId, NetId, PinAddr};

/// Outcome of resolving a driver set against a held value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub value: u64,
    pub bits: Vec<LogicState>,
    /// Mask of the bits driven to conflicting values in the strongest class.
    pub contended: u64,
}

/// Resolve the drives asserted on a `width`-bit net.
///
/// Every bit takes the value of the strongest class of non-high-Z drivers. If
/// drivers in that class disagree on a bit, the bit is contended and the whole
/// value becomes the all-ones sentinel. Bits with no driver keep `held`.
pub fn resolve_drives<I>(width: u8, held: u64, drives: I) -> Resolution
where
    I: IntoIterator<Item = Drive>,
{
    let mask = width_mask(width);
    let mut top = DriveStrength::HighZ;
    let mut ones = 0u64;
    let mut zeros = 0u64;

    for drive in drives {
        if drive.strength == DriveStrength::HighZ || drive.strength < top {
            continue;
        }
        if drive.strength > top {
            top = drive.strength;
            ones = 0;
            zeros = 0;
        }
        ones |= drive.value & mask;
        zeros |= !drive.value & mask;
    }

    if top == DriveStrength::HighZ {
        return Resolution {
            value: held & mask,
            bits: vec![LogicState::HighZ; width as usize],
            contended: 0,
        };
    }

    let contended = ones & zeros;
    let bits = (0..width)
        .map(|bit| {
            if contended >> bit & 1 == 1 {
                LogicState::Contention
            } else {
                LogicState::from_drive(top, ones >> bit & 1 == 1)
            }
        })
        .collect();

    Resolution {
        value: if contended != 0 { mask } else { ones },
        bits,
        contended,
    }
}

/// Aggregate state of a whole net from its per-bit states.
fn aggregate(value: u64, bits: &[LogicState]) -> LogicState {
    if bits.iter().any(|bit| *bit == LogicState::Contention) {
        return LogicState::Contention;
    }
    let weakest = bits
        .iter()
        .filter_map(LogicState::strength)
        .min()
        .unwrap_or(DriveStrength::HighZ);
    LogicState::from_drive(weakest, value != 0)
}

/// One driver record: the pin and what its component currently asserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverSlot {
    pub addr: PinAddr,
    pub drive: Drive,
}

#[derive(Debug, Clone)]
pub struct Net {
    id: NetId,
    width: u8,
    value: u64,
    settled: u64,
    bits: Vec<LogicState>,
    pins: Vec<PinAddr>,
    readers: Vec<ComponentId>,
    drivers: Vec<DriverSlot>,
}

impl Net {
    pub fn id(&self) -> NetId {
        self.id
    }

    pub fn width(&self) -> u8 {
        self.width
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    /// Value at the end of the previous tick.
    pub fn settled(&self) -> u64 {
        self.settled
    }

    pub fn bits(&self) -> &[LogicState] {
        &self.bits
    }

    pub fn state(&self) -> LogicState {
        aggregate(self.value, &self.bits)
    }

    pub fn signal(&self) -> Signal {
        Signal {
            value: self.value,
            state: self.state(),
        }
    }

    pub fn is_contended(&self) -> bool {
        self.bits.iter().any(|bit| *bit == LogicState::Contention)
    }

    pub fn pins(&self) -> &[PinAddr] {
        &self.pins
    }

    /// Components with a sink or bidirectional pin on this net.
    pub fn readers(&self) -> &[ComponentId] {
        &self.readers
    }

    pub fn drivers(&self) -> &[DriverSlot] {
        &self.drivers
    }

    /// Drivers asserting in the strongest class present on the net.
    pub fn active_drivers(&self) -> Vec<DriverSlot> {
        let top = self
            .drivers
            .iter()
            .map(|slot| slot.drive.strength)
            .max()
            .unwrap_or(DriveStrength::HighZ);
        if top == DriveStrength::HighZ {
            return Vec::new();
        }
        self.drivers
            .iter()
            .filter(|slot| slot.drive.strength == top)
            .copied()
            .collect()
    }

    fn resolve(&mut self) -> Option<NetChange> {
        let old = self.signal();
        let resolution = resolve_drives(
            self.width,
            self.value,
            self.drivers.iter().map(|slot| slot.drive),
        );
        self.value = resolution.value;
        self.bits = resolution.bits;
        let new = self.signal();
        if old == new {
            None
        } else {
            Some(NetChange {
                net: self.id,
                old,
                new,
            })
        }
    }
}

/// A net whose resolved signal differs from the previous resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetChange {
    pub net: NetId,
    pub old: Signal,
    pub new: Signal,
}

/// Resolved state of a net as stored in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NetState {
    pub value: u64,
    pub settled: u64,
    pub bits: Vec<LogicState>,
    pub drives: Vec<Drive>,
}

/// Arena of nets for one board plus the pin-to-net handle table.
#[derive(Debug, Clone, Default)]
pub struct Netlist {
    nets: Vec<Net>,
    pin_nets: Vec<Vec<NetId>>,
    driver_index: HashMap<PinAddr, (NetId, usize)>,
    contended: BTreeSet<NetId>,
}

impl Netlist {
    /// Build the arena from wiring groups. `groups` must cover every pin of every
    /// component exactly once; net ids follow the order of the groups.
    pub fn build(groups: &[Vec<PinAddr>], pins: &[&PinRegistry]) -> Self {
        let mut netlist = Netlist {
            pin_nets: pins.iter().map(|registry| vec![NetId(0); registry.len()]).collect(),
            ..Default::default()
        };

        for group in groups {
            let id = NetId(netlist.nets.len() as u32);
            let mut width = 1;
            let mut readers = Vec::new();
            let mut drivers = Vec::new();

            for addr in group {
                let Some(pin) = pins
                    .get(addr.component.index())
                    .and_then(|registry| registry.pin(addr.pin))
                else {
                    continue;
                };
                width = width.max(pin.width());
                if pin.direction().reads() {
                    readers.push(addr.component);
                }
                if pin.direction().drives() {
                    netlist.driver_index.insert(*addr, (id, drivers.len()));
                    drivers.push(DriverSlot {
                        addr: *addr,
                        drive: Drive::high_z(),
                    });
                }
                if let Some(slot) = netlist
                    .pin_nets
                    .get_mut(addr.component.index())
                    .and_then(|nets| nets.get_mut(addr.pin.index()))
                {
                    *slot = id;
                }
            }
            readers.sort();
            readers.dedup();

            netlist.nets.push(Net {
                id,
                width,
                value: 0,
                settled: 0,
                bits: vec![LogicState::HighZ; width as usize],
                pins: group.clone(),
                readers,
                drivers,
            });
        }
        netlist
    }

    pub fn len(&self) -> usize {
        self.nets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nets.is_empty()
    }

    pub fn net(&self, id: NetId) -> Option<&Net> {
        self.nets.get(id.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Net> {
        self.nets.iter()
    }

    pub fn net_of(&self, addr: PinAddr) -> Option<NetId> {
        self.pin_nets
            .get(addr.component.index())
            .and_then(|nets| nets.get(addr.pin.index()))
            .copied()
    }

    /// Net handles of every pin of `component`, indexed by pin.
    pub fn pins_of(&self, component: ComponentId) -> &[NetId] {
        self.pin_nets
            .get(component.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Nets contended after their most recent resolution.
    pub fn contended(&self) -> impl Iterator<Item = NetId> + '_ {
        self.contended.iter().copied()
    }

    /// Update what a driver pin asserts. Returns the net when the driver set changed.
    pub fn update_driver(&mut self, addr: PinAddr, drive: Drive) -> Option<NetId> {
        let (id, slot) = *self.driver_index.get(&addr)?;
        let net = &mut self.nets[id.index()];
        let drive = Drive {
            value: drive.value & width_mask(net.width),
            strength: drive.strength,
        };
        let current = &mut net.drivers[slot].drive;
        if *current == drive {
            return None;
        }
        *current = drive;
        Some(id)
    }

    pub fn resolve(&mut self, id: NetId) -> Option<NetChange> {
        let net = self.nets.get_mut(id.index())?;
        let change = net.resolve();
        if net.is_contended() {
            self.contended.insert(id);
        } else {
            self.contended.remove(&id);
        }
        change
    }

    pub fn resolve_all(&mut self) -> Vec<NetChange> {
        (0..self.nets.len() as u32)
            .filter_map(|id| self.resolve(NetId(id)))
            .collect()
    }

    /// Latch every net's current value as its end-of-tick value.
    pub fn settle(&mut self) {
        for net in &mut self.nets {
            net.settled = net.value;
        }
    }

    pub(crate) fn state(&self, id: NetId) -> Option<NetState> {
        self.net(id).map(|net| NetState {
            value: net.value,
            settled: net.settled,
            bits: net.bits.clone(),
            drives: net.drivers.iter().map(|slot| slot.drive).collect(),
        })
    }

    /// Overwrite a net's resolved state. The caller has checked widths and driver counts.
    pub(crate) fn restore(&mut self, id: NetId, state: NetState) {
        let Some(net) = self.nets.get_mut(id.index()) else {
            return;
        };
        net.value = state.value;
        net.settled = state.settled;
        net.bits = state.bits;
        for (slot, drive) in net.drivers.iter_mut().zip(state.drives) {
            slot.drive = drive;
        }
        if net.is_contended() {
            self.contended.insert(id);
        } else {
            self.contended.remove(&id);
        }
    }
}
