//! Bipartite grammar for topology token sequences.
//!
//! A sequence is a walk over a bipartite device/net graph that starts and
//! ends on a power rail:
//!
//! ```text
//! [CIRCUIT_tag] rail edge device edge net edge device edge ... rail TRUNCATE
//! ```
//!
//! Each `net edge device` or `device edge net` triple declares that the pins
//! named by the edge-type token connect the device to the net. The
//! [`GrammarMachine`] follows the walk token by token, keeping a
//! [`ConnectivityTracker`] up to date, and can answer at every step which
//! tokens may come next.
//!
//! # States
//!
//! | State            | Previous token                 | Legal next tokens |
//! |------------------|--------------------------------|-------------------|
//! | `Start`          | none, or the circuit tag       | tag (once), rails |
//! | `NetEdge`        | net, port or rail              | edge-types some device can enter through |
//! | `EdgeDevice`     | edge-type after a net          | devices of that family able to take the pins |
//! | `DeviceEdge`     | device                         | edge-types over the device's unused pins, never leaving one |
//! | `EdgeNet`        | edge-type after a device       | nets, ports and rails |
//! | `TerminalCheck`  | the opening rail, again        | `TRUNCATE` once ERC is complete, else as `NetEdge` |
//! | `Done`           | `TRUNCATE`                     | nothing |
//!
//! A device entered from a net must keep at least one unused pin so the walk
//! can leave it again; this look-ahead guarantees `DeviceEdge` is never empty.
//! Leaving a device must in turn use all of its remaining pins or leave at
//! least two, since a later visit needs one pin to enter by and one to exit by.
//!
//! Once every device is saturated and no net dangles, landing on the opening
//! rail closes the walk. The rail is then reported by
//! [`GrammarMachine::closing_rail`] so the decoder can favour it, but the other
//! attachables stay legal and the walk may go on growing.
//!
//! # Example
//!
//! ```
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use topogen::grammar::GrammarMachine;
//! use topogen::vocabulary::Vocabulary;
//!
//! let vocab = Vocabulary::analog()?;
//! let mut machine = GrammarMachine::new(&vocab);
//! for token in ["CIRCUIT_Mirror", "VSS", "M_S", "NM1", "M_BDG"] {
//!     machine.push(vocab.id_of(token)?)?;
//! }
//! // NM1 is saturated and no net dangles: VSS would close the walk.
//! let vss = vocab.id_of("VSS")?;
//! assert_eq!(machine.closing_rail(), Some(vss));
//! assert!(machine.admits(vss));
//! assert!(machine.admits(vocab.id_of("VOUT1")?));
//! # Ok(())
//! # }
//! ```

use std::{error::Error, fmt};

use tracing::warn;

use crate::vocabulary::{FamilyId, PinSet, TokenId, TokenKind, Vocabulary};

pub mod tracker;

pub use tracker::{ConnectivityError, ConnectivityTracker};

/// Position of the machine in the walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrammarState {
    Start { tagged: bool },
    NetEdge { net: TokenId },
    EdgeDevice { net: TokenId, edge: TokenId },
    DeviceEdge { device: TokenId },
    EdgeNet { device: TokenId, edge: TokenId },
    TerminalCheck { rail: TokenId },
    Done,
}

impl fmt::Display for GrammarState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrammarState::Start { .. } => write!(f, "start"),
            GrammarState::NetEdge { .. } => write!(f, "net->edge"),
            GrammarState::EdgeDevice { .. } => write!(f, "edge->device"),
            GrammarState::DeviceEdge { .. } => write!(f, "device->edge"),
            GrammarState::EdgeNet { .. } => write!(f, "edge->net"),
            GrammarState::TerminalCheck { .. } => write!(f, "terminal check"),
            GrammarState::Done => write!(f, "done"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrammarError {
    /// No token may follow the current prefix.
    DeadEnd { state: GrammarState },
    /// The token is not in the legal set of the current state.
    IllegalToken { token: TokenId, state: GrammarState },
    /// The tracker refused a pin declaration the grammar had admitted.
    PinAlreadyUsed(ConnectivityError),
}

impl fmt::Display for GrammarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrammarError::DeadEnd { state } => write!(f, "No legal token in state {}", state),
            GrammarError::IllegalToken { token, state } => {
                write!(f, "Token #{} is not legal in state {}", token, state)
            }
            GrammarError::PinAlreadyUsed(err) => write!(f, "{}", err),
        }
    }
}

impl Error for GrammarError {}

/// Grammar automaton of one candidate sequence.
///
/// Owns the candidate's [`ConnectivityTracker`]; machines are never shared
/// between candidates.
#[derive(Debug, Clone)]
pub struct GrammarMachine<'v> {
    vocab: &'v Vocabulary,
    tracker: ConnectivityTracker<'v>,
    state: GrammarState,
    circuit_type: Option<TokenId>,
    opening_rail: Option<TokenId>,
    accepted: usize,
}

impl<'v> GrammarMachine<'v> {
    pub fn new(vocab: &'v Vocabulary) -> Self {
        Self {
            vocab,
            tracker: ConnectivityTracker::new(vocab),
            state: GrammarState::Start { tagged: false },
            circuit_type: None,
            opening_rail: None,
            accepted: 0,
        }
    }

    /// Run the machine over a prefix, failing on the first illegal token.
    pub fn with_prefix(vocab: &'v Vocabulary, prefix: &[TokenId]) -> Result<Self, GrammarError> {
        let mut machine = Self::new(vocab);
        for &token in prefix {
            machine.push(token)?;
        }
        Ok(machine)
    }

    pub fn state(&self) -> GrammarState {
        self.state
    }

    pub fn tracker(&self) -> &ConnectivityTracker<'v> {
        &self.tracker
    }

    pub fn circuit_type(&self) -> Option<TokenId> {
        self.circuit_type
    }

    pub fn opening_rail(&self) -> Option<TokenId> {
        self.opening_rail
    }

    /// Number of tokens accepted so far.
    pub fn len(&self) -> usize {
        self.accepted
    }

    pub fn is_empty(&self) -> bool {
        self.accepted == 0
    }

    pub fn is_complete(&self) -> bool {
        self.state == GrammarState::Done
    }

    /// Whether `device` of `family` can be entered through `edge` from `net`
    /// and still keep a pin to leave by.
    fn can_enter(
        &self,
        family: FamilyId,
        device: TokenId,
        edge: TokenId,
        pins: PinSet,
        net: TokenId,
    ) -> bool {
        let remaining = self.tracker.remaining_pins(device);
        pins.is_subset(remaining)
            && !remaining.difference(pins).is_empty()
            && !self.tracker.duplicate_connection(device, edge, net)
            && (self.vocab.family(family).shorted_terminals || !self.tracker.is_attached(device, net))
    }

    /// Whether some device, appeared or fresh, can be entered through `edge`.
    fn edge_has_entry(&self, family: FamilyId, edge: TokenId, pins: PinSet, net: TokenId) -> bool {
        let family_pins = self.vocab.family(family).full_pins();
        if pins == family_pins {
            return false;
        }
        if self.tracker.fresh_device_available(family) {
            return true;
        }
        self.tracker
            .appeared(family)
            .iter()
            .any(|&device| self.can_enter(family, device, edge, pins, net))
    }

    /// The opening rail when landing on it now would close an ERC-complete
    /// walk, `None` in every other state.
    pub fn closing_rail(&self) -> Option<TokenId> {
        match (self.state, self.opening_rail) {
            (GrammarState::EdgeNet { device, edge }, Some(rail))
                if self.tracker.erc_complete() && self.may_land(device, edge, rail) =>
            {
                Some(rail)
            }
            _ => None,
        }
    }

    /// Net admissibility before the opening-rail rules.
    fn may_land(&self, device: TokenId, edge: TokenId, net: TokenId) -> bool {
        let shorting = match self.vocab.kind(device) {
            TokenKind::Device { family } => self.vocab.family(family).shorted_terminals,
            _ => false,
        };
        !self.tracker.duplicate_connection(device, edge, net)
            && (shorting || !self.tracker.is_attached(device, net))
    }

    fn may_follow_net(&self, net: TokenId, token: TokenId) -> bool {
        match self.vocab.try_kind(token) {
            Some(TokenKind::Edge { family, pins }) => self.edge_has_entry(family, token, pins, net),
            _ => false,
        }
    }

    /// Whether `token` is a legal continuation of the current prefix.
    pub fn admits(&self, token: TokenId) -> bool {
        let Some(kind) = self.vocab.try_kind(token) else {
            return false;
        };

        match self.state {
            GrammarState::Start { tagged } => match kind {
                TokenKind::CircuitType => !tagged,
                TokenKind::PowerRail => true,
                _ => false,
            },
            GrammarState::NetEdge { net } => self.may_follow_net(net, token),
            GrammarState::EdgeDevice { net, edge } => match (kind, self.vocab.kind(edge)) {
                (TokenKind::Device { family }, TokenKind::Edge { family: f, pins }) if family == f => {
                    self.can_enter(family, token, edge, pins, net)
                }
                _ => false,
            },
            GrammarState::DeviceEdge { device } => match (kind, self.vocab.kind(device)) {
                (TokenKind::Edge { family, pins }, TokenKind::Device { family: f }) if family == f => {
                    let remaining = self.tracker.remaining_pins(device);
                    pins.is_subset(remaining) && remaining.difference(pins).len() != 1
                }
                _ => false,
            },
            GrammarState::EdgeNet { device, edge } => {
                if !kind.is_attachable() || !self.may_land(device, edge, token) {
                    return false;
                }
                match self.opening_rail {
                    Some(rail) if self.tracker.dangling_nets() > 0 => token != rail,
                    _ => true,
                }
            }
            GrammarState::TerminalCheck { rail } => {
                if self.tracker.erc_complete() {
                    kind == TokenKind::Terminator
                } else {
                    self.may_follow_net(rail, token)
                }
            }
            GrammarState::Done => false,
        }
    }

    /// The legal next tokens, in id order.
    pub fn legal_tokens(&self) -> Vec<TokenId> {
        let vocab = self.vocab;
        let candidates: Vec<TokenId> = match self.state {
            GrammarState::Start { tagged: false } => vocab
                .circuit_types()
                .iter()
                .chain(vocab.rails())
                .copied()
                .collect(),
            GrammarState::Start { tagged: true } => vocab.rails().to_vec(),
            GrammarState::NetEdge { .. } => vocab.edges().to_vec(),
            GrammarState::EdgeDevice { edge, .. } => match vocab.kind(edge) {
                TokenKind::Edge { family, .. } => vocab.devices_of(family).to_vec(),
                _ => Vec::new(),
            },
            GrammarState::DeviceEdge { device } => match vocab.kind(device) {
                TokenKind::Device { family } => vocab.edges_of(family).to_vec(),
                _ => Vec::new(),
            },
            GrammarState::EdgeNet { .. } => vocab.attachables().to_vec(),
            GrammarState::TerminalCheck { .. } if self.tracker.erc_complete() => {
                vec![vocab.terminator()]
            }
            GrammarState::TerminalCheck { .. } => vocab.edges().to_vec(),
            GrammarState::Done => Vec::new(),
        };

        let mut legal: Vec<TokenId> = candidates
            .into_iter()
            .filter(|&token| self.admits(token))
            .collect();
        legal.sort_unstable();
        legal
    }

    /// Like [`GrammarMachine::legal_tokens`], but an empty set before the
    /// walk is finished is a [`GrammarError::DeadEnd`].
    pub fn next_legal(&self) -> Result<Vec<TokenId>, GrammarError> {
        let legal = self.legal_tokens();
        if legal.is_empty() && !self.is_complete() {
            return Err(GrammarError::DeadEnd { state: self.state });
        }
        Ok(legal)
    }

    /// Accept one token and advance.
    ///
    /// # Arguments
    ///
    /// * `token` - Id of the next token; it must be admitted by the current state
    ///
    /// # Returns
    ///
    /// `Err(GrammarError::IllegalToken)` when the token is not admitted, in which
    /// case the machine is left untouched.
    pub fn push(&mut self, token: TokenId) -> Result<(), GrammarError> {
        if !self.admits(token) {
            return Err(GrammarError::IllegalToken {
                token,
                state: self.state,
            });
        }
        let kind = self.vocab.kind(token);

        self.state = match (self.state, kind) {
            (GrammarState::Start { .. }, TokenKind::CircuitType) => {
                self.circuit_type = Some(token);
                GrammarState::Start { tagged: true }
            }
            (GrammarState::Start { .. }, _) => {
                self.opening_rail = Some(token);
                GrammarState::NetEdge { net: token }
            }
            (GrammarState::NetEdge { net } | GrammarState::TerminalCheck { rail: net }, TokenKind::Edge { .. }) => {
                GrammarState::EdgeDevice { net, edge: token }
            }
            (GrammarState::TerminalCheck { .. }, _) => GrammarState::Done,
            (GrammarState::EdgeDevice { net, edge }, _) => {
                let pins = self.edge_pins(edge);
                self.record_pins(token, pins)?;
                self.tracker.record_net_attachment(net, token);
                self.tracker.record_connection(token, edge, net);
                GrammarState::DeviceEdge { device: token }
            }
            (GrammarState::DeviceEdge { device }, _) => {
                let pins = self.edge_pins(token);
                self.record_pins(device, pins)?;
                GrammarState::EdgeNet { device, edge: token }
            }
            (GrammarState::EdgeNet { device, edge }, _) => {
                self.tracker.record_net_attachment(token, device);
                self.tracker.record_connection(device, edge, token);
                if Some(token) == self.opening_rail {
                    GrammarState::TerminalCheck { rail: token }
                } else {
                    GrammarState::NetEdge { net: token }
                }
            }
            (state, _) => {
                return Err(GrammarError::IllegalToken { token, state });
            }
        };
        self.accepted += 1;

        Ok(())
    }

    fn edge_pins(&self, edge: TokenId) -> PinSet {
        match self.vocab.kind(edge) {
            TokenKind::Edge { pins, .. } => pins,
            _ => PinSet::EMPTY,
        }
    }

    fn record_pins(&mut self, device: TokenId, pins: PinSet) -> Result<(), GrammarError> {
        self.tracker
            .record_device_pin_use(device, pins)
            .map_err(|err| {
                warn!(device, %err, "grammar admitted a pin that was already in use");
                GrammarError::PinAlreadyUsed(err)
            })
    }
}
