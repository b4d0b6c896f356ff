//! Offline electrical rule check of finished sequences.
//!
//! Where the [`grammar`](crate::grammar) enforces the rules while a sequence
//! is being written, this module re-derives them from scratch for a complete
//! sequence: generated output can be audited, and artifacts coming from
//! elsewhere (training corpora, other generators) can be screened.
//!
//! # Rules
//!
//! - **Pattern**: node and edge-type tokens alternate, every edge joins one
//!   device to one net, port or rail, and the edge belongs to the device's family
//! - **Pins**: no pin is declared twice and every pin of every device is declared
//! - **Nets**: every internal net bridges at least two devices, and two-terminal
//!   devices never have both terminals on one net
//! - **Duplicates**: no `(device, edge, net)` declaration repeats
//! - **Termination**: exactly one terminator, followed only by padding
//!
//! # Example
//!
//! ```
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use topogen::erc::{Rule, check_sequence};
//! use topogen::sequence::{encode, parse_artifact};
//! use topogen::vocabulary::Vocabulary;
//!
//! let vocab = Vocabulary::analog()?;
//! let ids = encode(&vocab, &parse_artifact("VSS->M_S->NM1->M_D->NET1->TRUNCATE"))?;
//! let report = check_sequence(&vocab, &ids);
//! assert!(report.violations.iter().any(|v| v.rule() == Rule::Pins));
//! assert!(report.violations.iter().any(|v| v.rule() == Rule::Nets));
//! # Ok(())
//! # }
//! ```

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
};

use itertools::Itertools;

use crate::vocabulary::{FamilyId, PinSet, Symbol, TokenId, TokenKind, Vocabulary};

mod audit;

pub use audit::{CheckArgs, check_main};

/// Rule family of a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Rule {
    Pattern,
    Pins,
    Nets,
    Duplicates,
    Termination,
}

impl Rule {
    pub const ALL: [Rule; 5] = [
        Rule::Pattern,
        Rule::Pins,
        Rule::Nets,
        Rule::Duplicates,
        Rule::Termination,
    ];
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Rule::Pattern => "pattern",
            Rule::Pins => "pins",
            Rule::Nets => "nets",
            Rule::Duplicates => "duplicates",
            Rule::Termination => "termination",
        };
        write!(f, "{}", name)
    }
}

/// One broken rule, with the tokens involved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// A circuit-type tag anywhere but the first position.
    MisplacedTag { position: usize },
    /// A token breaking the node/edge alternation or the device/net bipartition.
    Alternation { position: usize, token: Symbol },
    /// An edge-type of another family next to a device.
    FamilyMismatch { position: usize, device: Symbol, edge: Symbol },
    PinReused { device: Symbol, pins: String },
    MissingPins { device: Symbol, pins: String },
    ShortedTerminals { device: Symbol, net: Symbol },
    DanglingNet { net: Symbol },
    DuplicateConnection { device: Symbol, edge: Symbol, net: Symbol },
    MissingTerminator,
    /// Content other than padding after the first terminator.
    TrailingContent { position: usize },
}

impl Violation {
    pub fn rule(&self) -> Rule {
        match self {
            Violation::MisplacedTag { .. }
            | Violation::Alternation { .. }
            | Violation::FamilyMismatch { .. } => Rule::Pattern,
            Violation::PinReused { .. } | Violation::MissingPins { .. } => Rule::Pins,
            Violation::ShortedTerminals { .. } | Violation::DanglingNet { .. } => Rule::Nets,
            Violation::DuplicateConnection { .. } => Rule::Duplicates,
            Violation::MissingTerminator | Violation::TrailingContent { .. } => Rule::Termination,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::MisplacedTag { position } => {
                write!(f, "circuit-type tag at position {}", position)
            }
            Violation::Alternation { position, token } => {
                write!(f, "{} at position {} breaks the alternation", token, position)
            }
            Violation::FamilyMismatch {
                position,
                device,
                edge,
            } => write!(f, "{} at position {} does not fit {}", edge, position, device),
            Violation::PinReused { device, pins } => {
                write!(f, "{} pins {} declared twice", device, pins)
            }
            Violation::MissingPins { device, pins } => {
                write!(f, "{} pins {} never connected", device, pins)
            }
            Violation::ShortedTerminals { device, net } => {
                write!(f, "{} has both terminals on {}", device, net)
            }
            Violation::DanglingNet { net } => write!(f, "{} connects a single device", net),
            Violation::DuplicateConnection { device, edge, net } => {
                write!(f, "{} {} {} declared twice", device, edge, net)
            }
            Violation::MissingTerminator => write!(f, "no terminator"),
            Violation::TrailingContent { position } => {
                write!(f, "content after the terminator at position {}", position)
            }
        }
    }
}

/// Result of checking one sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErcReport {
    pub violations: Vec<Violation>,
}

impl ErcReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn count_by_rule(&self) -> BTreeMap<Rule, usize> {
        self.violations.iter().map(Violation::rule).counts().into_iter().collect()
    }
}

struct DeviceUse {
    family: FamilyId,
    pins: PinSet,
    nets: HashSet<TokenId>,
}

/// Check a complete token sequence.
///
/// The sequence may carry a leading circuit-type tag and trailing padding.
/// Ids outside the registry count as alternation violations.
pub fn check_sequence(vocab: &Vocabulary, ids: &[TokenId]) -> ErcReport {
    let name = |id: TokenId| {
        vocab
            .token_of(id)
            .cloned()
            .unwrap_or_else(|_| Symbol::from(format!("#{}", id)))
    };
    let mut violations = Vec::new();

    let terminator = ids.iter().position(|&id| id == vocab.terminator());
    let end = match terminator {
        Some(end) => {
            if let Some(offset) = ids[end..].iter().position(|&id| id != vocab.terminator()) {
                violations.push(Violation::TrailingContent {
                    position: end + offset,
                });
            }
            end
        }
        None => {
            violations.push(Violation::MissingTerminator);
            ids.len()
        }
    };

    let start = match ids.first() {
        Some(&id) if vocab.try_kind(id) == Some(TokenKind::CircuitType) => 1,
        _ => 0,
    };

    let body: Vec<(usize, TokenId, TokenKind)> = (start..end)
        .filter_map(|position| {
            let id = ids[position];
            match vocab.try_kind(id) {
                Some(TokenKind::CircuitType) => {
                    violations.push(Violation::MisplacedTag { position });
                    None
                }
                Some(kind) => Some((position, id, kind)),
                None => {
                    violations.push(Violation::Alternation {
                        position,
                        token: name(id),
                    });
                    None
                }
            }
        })
        .collect();

    for (slot, (position, id, kind)) in body.iter().enumerate() {
        let expects_node = slot % 2 == 0;
        if kind.is_node() != expects_node {
            violations.push(Violation::Alternation {
                position: *position,
                token: name(*id),
            });
        }
    }
    if body.len() % 2 == 0 {
        if let Some(&(position, id, _)) = body.last() {
            violations.push(Violation::Alternation {
                position,
                token: name(id),
            });
        }
    }

    let mut devices: HashMap<TokenId, DeviceUse> = HashMap::new();
    let mut device_order = Vec::new();
    let mut fanin: HashMap<TokenId, HashSet<TokenId>> = HashMap::new();
    let mut net_order = Vec::new();
    let mut seen = HashSet::new();

    for i in (0..body.len().saturating_sub(2)).step_by(2) {
        let (a, e, b) = (&body[i], &body[i + 1], &body[i + 2]);
        let (device, net) = match (a.2, b.2) {
            (TokenKind::Device { family }, other) if other.is_attachable() => ((a.1, family), b.1),
            (other, TokenKind::Device { family }) if other.is_attachable() => ((b.1, family), a.1),
            _ => {
                violations.push(Violation::Alternation {
                    position: b.0,
                    token: name(b.1),
                });
                continue;
            }
        };
        let (device, family) = device;

        let pins = match e.2 {
            TokenKind::Edge { family: f, pins } if f == family => pins,
            TokenKind::Edge { .. } => {
                violations.push(Violation::FamilyMismatch {
                    position: e.0,
                    device: name(device),
                    edge: name(e.1),
                });
                continue;
            }
            _ => continue,
        };

        let usage = devices.entry(device).or_insert_with(|| {
            device_order.push(device);
            DeviceUse {
                family,
                pins: PinSet::EMPTY,
                nets: HashSet::new(),
            }
        });
        let reused = usage.pins.intersection(pins);
        if !reused.is_empty() {
            violations.push(Violation::PinReused {
                device: name(device),
                pins: vocab.family(family).pin_letters(reused),
            });
        }
        usage.pins = usage.pins.union(pins);

        if !seen.insert((device, e.1, net)) {
            violations.push(Violation::DuplicateConnection {
                device: name(device),
                edge: name(e.1),
                net: name(net),
            });
        } else if !usage.nets.insert(net) && !vocab.family(family).shorted_terminals {
            violations.push(Violation::ShortedTerminals {
                device: name(device),
                net: name(net),
            });
        }

        if vocab.kind(net) == TokenKind::Net {
            fanin
                .entry(net)
                .or_insert_with(|| {
                    net_order.push(net);
                    HashSet::new()
                })
                .insert(device);
        }
    }

    for device in device_order {
        let usage = &devices[&device];
        let family = vocab.family(usage.family);
        let missing = family.full_pins().difference(usage.pins);
        if !missing.is_empty() {
            violations.push(Violation::MissingPins {
                device: name(device),
                pins: family.pin_letters(missing),
            });
        }
    }

    for net in net_order {
        if fanin[&net].len() < 2 {
            violations.push(Violation::DanglingNet { net: name(net) });
        }
    }

    ErcReport { violations }
}
