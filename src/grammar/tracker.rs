//! Incremental connectivity bookkeeping for one candidate sequence.
//!
//! The tracker is fed one connection declaration at a time and never looks
//! back at the sequence. Besides the per-device pin sets and per-net fan-in
//! sets it keeps two running counters, the number of appeared devices that
//! still have unused pins and the number of internal nets bridging a single
//! device, so ERC completeness is a constant-time question.

use std::{
    collections::{HashMap, HashSet},
    error::Error,
    fmt,
};

use crate::vocabulary::{FamilyId, PinSet, TokenId, TokenKind, Vocabulary};

/// Raised when a declaration reuses a pin of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectivityError {
    PinAlreadyUsed {
        device: TokenId,
        requested: PinSet,
        used: PinSet,
    },
}

impl fmt::Display for ConnectivityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectivityError::PinAlreadyUsed {
                device,
                requested,
                used,
            } => write!(
                f,
                "Pins {:#06b} of device #{} overlap already used pins {:#06b}",
                requested.bits(),
                device,
                used.bits()
            ),
        }
    }
}

impl Error for ConnectivityError {}

/// Pin usage and net fan-in of a partial sequence.
#[derive(Debug, Clone)]
pub struct ConnectivityTracker<'v> {
    vocab: &'v Vocabulary,
    pins_used: HashMap<TokenId, PinSet>,
    fanin: HashMap<TokenId, HashSet<TokenId>>,
    device_nets: HashMap<TokenId, HashSet<TokenId>>,
    connections: HashSet<(TokenId, TokenId, TokenId)>,
    appeared: Vec<Vec<TokenId>>,
    unsaturated: usize,
    dangling: usize,
}

impl<'v> ConnectivityTracker<'v> {
    pub fn new(vocab: &'v Vocabulary) -> Self {
        Self {
            vocab,
            pins_used: HashMap::new(),
            fanin: HashMap::new(),
            device_nets: HashMap::new(),
            connections: HashSet::new(),
            appeared: vec![Vec::new(); vocab.families().len()],
            unsaturated: 0,
            dangling: 0,
        }
    }

    fn full_pins(&self, device: TokenId) -> PinSet {
        match self.vocab.kind(device) {
            TokenKind::Device { family } => self.vocab.family(family).full_pins(),
            _ => PinSet::EMPTY,
        }
    }

    /// Mark `pins` of `device` as used.
    ///
    /// The first call for a device registers it as appeared. Fails without
    /// touching any state when one of the pins is already in use.
    pub fn record_device_pin_use(
        &mut self,
        device: TokenId,
        pins: PinSet,
    ) -> Result<(), ConnectivityError> {
        let full = self.full_pins(device);
        let used = self.pins_used.get(&device).copied();

        if let Some(used) = used {
            if used.intersects(pins) {
                return Err(ConnectivityError::PinAlreadyUsed {
                    device,
                    requested: pins,
                    used,
                });
            }
        }

        let before = used.unwrap_or(PinSet::EMPTY);
        let after = before.union(pins);
        if used.is_none() {
            if let TokenKind::Device { family } = self.vocab.kind(device) {
                self.appeared[family].push(device);
            }
            if after != full {
                self.unsaturated += 1;
            }
        } else if before != full && after == full {
            self.unsaturated -= 1;
        }
        self.pins_used.insert(device, after);

        Ok(())
    }

    /// Add `device` to the devices bridged by `net`.
    pub fn record_net_attachment(&mut self, net: TokenId, device: TokenId) {
        let devices = self.fanin.entry(net).or_default();
        let before = devices.len();
        devices.insert(device);
        let after = devices.len();

        if self.vocab.kind(net) == TokenKind::Net && before != after {
            match after {
                1 => self.dangling += 1,
                2 => self.dangling -= 1,
                _ => (),
            }
        }
        self.device_nets.entry(device).or_default().insert(net);
    }

    /// Remember the `(device, edge, net)` declaration.
    pub fn record_connection(&mut self, device: TokenId, edge: TokenId, net: TokenId) {
        self.connections.insert((device, edge, net));
    }

    pub fn duplicate_connection(&self, device: TokenId, edge: TokenId, net: TokenId) -> bool {
        self.connections.contains(&(device, edge, net))
    }

    /// True once every pin of an appeared device is used.
    pub fn device_is_saturated(&self, device: TokenId) -> bool {
        self.pins_used
            .get(&device)
            .is_some_and(|&used| used == self.full_pins(device))
    }

    /// Ports and rails are always valid; internal nets need two devices.
    pub fn net_is_valid(&self, net: TokenId) -> bool {
        match self.vocab.kind(net) {
            TokenKind::Net => self.fanin(net) >= 2,
            _ => true,
        }
    }

    pub fn fanin(&self, net: TokenId) -> usize {
        self.fanin.get(&net).map_or(0, HashSet::len)
    }

    pub fn pins_used(&self, device: TokenId) -> PinSet {
        self.pins_used.get(&device).copied().unwrap_or(PinSet::EMPTY)
    }

    /// Pins of `device` not yet declared; the full set for devices not yet seen.
    pub fn remaining_pins(&self, device: TokenId) -> PinSet {
        self.full_pins(device).difference(self.pins_used(device))
    }

    pub fn has_appeared(&self, device: TokenId) -> bool {
        self.pins_used.contains_key(&device)
    }

    /// Whether `device` already has a declaration landing on `net`.
    pub fn is_attached(&self, device: TokenId, net: TokenId) -> bool {
        self.device_nets
            .get(&device)
            .is_some_and(|nets| nets.contains(&net))
    }

    /// Devices of a family in order of first appearance.
    pub fn appeared(&self, family: FamilyId) -> &[TokenId] {
        &self.appeared[family]
    }

    /// Whether the family's pool still holds a device that has not appeared.
    pub fn fresh_device_available(&self, family: FamilyId) -> bool {
        self.appeared[family].len() < self.vocab.devices_of(family).len()
    }

    /// Appeared devices with pins still undeclared.
    pub fn unsaturated_devices(&self) -> usize {
        self.unsaturated
    }

    pub fn dangling_nets(&self) -> usize {
        self.dangling
    }

    /// Every appeared device saturated and every internal net bridging two devices.
    pub fn erc_complete(&self) -> bool {
        self.unsaturated == 0 && self.dangling == 0
    }
}
