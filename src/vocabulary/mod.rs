//! Token vocabulary for circuit topology sequences.
//!
//! A [`Vocabulary`] is an immutable registry mapping token strings to dense
//! integer ids and back. It is produced once by a [`VocabularyBuilder`] and then
//! passed by reference to everything that needs it: the grammar, the decoding
//! loop, the batch orchestrator and the auditing tools.
//!
//! # Enumeration order
//!
//! Ids are assigned in a fixed order so that they are stable between runs:
//!
//! 1. edge-type tokens, family by family (see [`DeviceFamily::edge_subsets`])
//! 2. power rails
//! 3. circuit-type tags
//! 4. device instances, pool by pool
//! 5. internal nets
//! 6. external ports
//! 7. the terminator
//!
//! # Example
//!
//! ```
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use topogen::vocabulary::{TokenKind, Vocabulary};
//!
//! let vocab = Vocabulary::analog()?;
//! let id = vocab.id_of("NET7")?;
//! assert_eq!(&**vocab.token_of(id)?, "NET7");
//! assert_eq!(vocab.kind(id), TokenKind::Net);
//! # Ok(())
//! # }
//! ```

use std::{collections::HashMap, error::Error, fmt};

use lazy_static::lazy_static;
use regex::Regex;
use string_cache::DefaultAtom;

mod classify;
mod family;

pub use classify::{DeviceInfo, EdgeInfo, TokenKind};
pub use family::{DeviceFamily, DevicePool, FamilyId, MAX_PINS, PinSet};

pub type Symbol = DefaultAtom;

/// Dense integer id of a token.
pub type TokenId = u32;

/// Raised when a token or id is not in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnknownTokenError {
    Name(String),
    Id(TokenId),
}

impl fmt::Display for UnknownTokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnknownTokenError::Name(name) => write!(f, "Unknown token \"{}\"", name),
            UnknownTokenError::Id(id) => write!(f, "Unknown token id {}", id),
        }
    }
}

impl Error for UnknownTokenError {}

/// Errors found while building a vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VocabularyError {
    DuplicateToken(String),
    MalformedName(String),
    BadPinCount { family: String, pins: usize },
    UnknownFamily(String),
    UnknownAliasTarget { alias: String, target: String },
    NoRails,
}

impl fmt::Display for VocabularyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VocabularyError::DuplicateToken(name) => {
                write!(f, "Token \"{}\" is registered more than once", name)
            }
            VocabularyError::MalformedName(name) => {
                write!(f, "Malformed token name \"{}\"", name)
            }
            VocabularyError::BadPinCount { family, pins } => write!(
                f,
                "Family {} declares {} pins, expected 1 to {}",
                family, pins, MAX_PINS
            ),
            VocabularyError::UnknownFamily(name) => {
                write!(f, "Device pool refers to unknown family {}", name)
            }
            VocabularyError::UnknownAliasTarget { alias, target } => write!(
                f,
                "Alias \"{}\" points at unregistered token \"{}\"",
                alias, target
            ),
            VocabularyError::NoRails => write!(f, "At least one power rail is required"),
        }
    }
}

impl Error for VocabularyError {}

/// Immutable token registry.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    tokens: Vec<Symbol>,
    kinds: Vec<TokenKind>,
    index: HashMap<String, TokenId>,
    families: Vec<DeviceFamily>,
    edges_by_family: Vec<Vec<TokenId>>,
    devices_by_family: Vec<Vec<TokenId>>,
    edges: Vec<TokenId>,
    rails: Vec<TokenId>,
    circuit_types: Vec<TokenId>,
    attachables: Vec<TokenId>,
    terminator: TokenId,
}

impl Vocabulary {
    /// The default analog vocabulary: MOSFET, BJT, R, C, L and diode
    /// families, rails `VSS`/`VDD`, fifteen circuit classes, `NET1..NET50`
    /// and the standard external ports.
    pub fn analog() -> Result<Self, VocabularyError> {
        VocabularyBuilder::analog().build()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Id of a token string. Aliases resolve to the id of their target.
    pub fn id_of(&self, token: &str) -> Result<TokenId, UnknownTokenError> {
        self.index
            .get(token)
            .copied()
            .ok_or_else(|| UnknownTokenError::Name(token.into()))
    }

    /// Token string of an id.
    pub fn token_of(&self, id: TokenId) -> Result<&Symbol, UnknownTokenError> {
        self.tokens
            .get(id as usize)
            .ok_or(UnknownTokenError::Id(id))
    }

    /// Kind of a registered id.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not handed out by this registry; use [`Vocabulary::try_kind`]
    /// for ids of unknown origin.
    pub fn kind(&self, id: TokenId) -> TokenKind {
        self.kinds[id as usize]
    }

    pub fn try_kind(&self, id: TokenId) -> Option<TokenKind> {
        self.kinds.get(id as usize).copied()
    }

    pub fn tokens(&self) -> &[Symbol] {
        &self.tokens
    }

    pub fn families(&self) -> &[DeviceFamily] {
        &self.families
    }

    pub fn family(&self, family: FamilyId) -> &DeviceFamily {
        &self.families[family]
    }

    /// All edge-type ids, in id order.
    pub fn edges(&self) -> &[TokenId] {
        &self.edges
    }

    pub fn edges_of(&self, family: FamilyId) -> &[TokenId] {
        &self.edges_by_family[family]
    }

    /// Device instance ids of one family, in pool order.
    pub fn devices_of(&self, family: FamilyId) -> &[TokenId] {
        &self.devices_by_family[family]
    }

    pub fn rails(&self) -> &[TokenId] {
        &self.rails
    }

    /// The rail generation starts from (the first registered rail).
    pub fn ground(&self) -> TokenId {
        self.rails[0]
    }

    pub fn circuit_types(&self) -> &[TokenId] {
        &self.circuit_types
    }

    /// Nets, ports and rails, in id order.
    pub fn attachables(&self) -> &[TokenId] {
        &self.attachables
    }

    pub fn terminator(&self) -> TokenId {
        self.terminator
    }

    /// Resolve a circuit class given either as the full tag (`CIRCUIT_Opamp`)
    /// or by its bare name (`Opamp`).
    pub fn circuit_type(&self, name: &str) -> Result<TokenId, UnknownTokenError> {
        let found = [name.to_string(), format!("{}{}", CIRCUIT_TAG_PREFIX, name)]
            .iter()
            .filter_map(|candidate| self.index.get(candidate.as_str()))
            .copied()
            .find(|&id| self.kind(id) == TokenKind::CircuitType);
        found.ok_or_else(|| UnknownTokenError::Name(name.into()))
    }
}

/// Prefix of circuit-type tags.
pub const CIRCUIT_TAG_PREFIX: &str = "CIRCUIT_";

/// Edge spellings of older datasets, mapped onto the two-pin edges of the
/// default vocabulary. Passives were written with a single collapsed
/// terminal, and diodes listed both pin orders.
pub const ANALOG_EDGE_ALIASES: [(&str, &str); 4] = [
    ("R_C", "R_NP"),
    ("C_C", "C_NP"),
    ("L_C", "L_NP"),
    ("D_PN", "D_NP"),
];

/// Circuit classes of the default vocabulary, in registration order.
pub const ANALOG_CIRCUIT_TYPES: [&str; 15] = [
    "Opamp",
    "LDO",
    "Bandgap_Ref",
    "Power_converter",
    "Oscillator",
    "General",
    "Mirror",
    "Mixer",
    "Power_Amp",
    "PLL",
    "Filter",
    "Comparator",
    "Voltage_Regulator",
    "Switched_Cap",
    "ADC_DAC",
];

/// Builder for [`Vocabulary`].
///
/// # Example
///
/// ```
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use topogen::vocabulary::{DeviceFamily, VocabularyBuilder};
///
/// let vocab = VocabularyBuilder::new()
///     .family(DeviceFamily::new("Resistor", "R", "NP", true))
///     .devices("Resistor", "R", 2)
///     .rails(["VSS"])
///     .circuit_types(["Filter"])
///     .nets("NET", 1)
///     .build()?;
/// assert_eq!(vocab.len(), 3 + 1 + 1 + 2 + 1 + 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct VocabularyBuilder {
    families: Vec<DeviceFamily>,
    pools: Vec<DevicePool>,
    rails: Vec<String>,
    circuit_types: Vec<String>,
    nets: Vec<String>,
    ports: Vec<String>,
    aliases: Vec<(String, String)>,
    terminator: String,
}

impl Default for VocabularyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl VocabularyBuilder {
    /// An empty builder whose terminator is `TRUNCATE`.
    pub fn new() -> Self {
        Self {
            families: Vec::new(),
            pools: Vec::new(),
            rails: Vec::new(),
            circuit_types: Vec::new(),
            nets: Vec::new(),
            ports: Vec::new(),
            aliases: Vec::new(),
            terminator: "TRUNCATE".into(),
        }
    }

    /// The builder behind [`Vocabulary::analog`].
    pub fn analog() -> Self {
        let indexed = |prefix: &str, count: usize| {
            (1..=count).map(move |i| format!("{}{}", prefix, i)).collect::<Vec<_>>()
        };

        let mut ports = indexed("VIN", 20);
        ports.push("VOUT".into());
        for (prefix, count) in [
            ("VOUT", 7),
            ("IIN", 3),
            ("IOUT", 5),
            ("VB", 11),
            ("IB", 7),
            ("VCONT", 21),
            ("VCM", 3),
            ("VREF", 3),
            ("IREF", 3),
            ("VRF", 3),
            ("VIF", 3),
            ("VLO", 5),
            ("VBB", 5),
        ] {
            ports.extend(indexed(prefix, count));
        }

        Self::new()
            .family(DeviceFamily::new("MOSFET", "M", "BDGS", true))
            .family(DeviceFamily::new("BJT", "B", "BCE", true))
            .family(DeviceFamily::new("Resistor", "R", "NP", false))
            .family(DeviceFamily::new("Capacitor", "C", "NP", false))
            .family(DeviceFamily::new("Inductor", "L", "NP", false))
            .family(DeviceFamily::new("Diode", "D", "NP", false))
            .rails(["VSS", "VDD"])
            .circuit_types(ANALOG_CIRCUIT_TYPES)
            .devices("MOSFET", "NM", 35)
            .devices("MOSFET", "PM", 35)
            .devices("BJT", "NPN", 27)
            .devices("BJT", "PNP", 27)
            .devices("Resistor", "R", 28)
            .devices("Capacitor", "C", 16)
            .devices("Inductor", "L", 24)
            .devices("Diode", "DIO", 8)
            .nets("NET", 50)
            .ports(ports)
            .aliases(ANALOG_EDGE_ALIASES)
    }

    pub fn family(mut self, family: DeviceFamily) -> Self {
        self.families.push(family);
        self
    }

    /// Add the instances `{prefix}1..={count}` of a family registered by name.
    pub fn devices(mut self, family: &str, prefix: &str, count: usize) -> Self {
        self.pools.push(DevicePool {
            family: family.into(),
            prefix: prefix.into(),
            count,
        });
        self
    }

    pub fn rails<I, S>(mut self, rails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rails.extend(rails.into_iter().map(Into::into));
        self
    }

    /// Add circuit classes by bare name; the tags get the `CIRCUIT_` prefix.
    pub fn circuit_types<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.circuit_types.extend(
            names
                .into_iter()
                .map(|name| format!("{}{}", CIRCUIT_TAG_PREFIX, name.as_ref())),
        );
        self
    }

    /// Add the internal nets `{prefix}1..={count}`.
    pub fn nets(mut self, prefix: &str, count: usize) -> Self {
        self.nets
            .extend((1..=count).map(|i| format!("{}{}", prefix, i)));
        self
    }

    pub fn ports<I, S>(mut self, ports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ports.extend(ports.into_iter().map(Into::into));
        self
    }

    /// Accept `alias` as another spelling of `target` when reading tokens.
    /// Aliases take no id of their own and are never written back.
    pub fn aliases<I, A, T>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = (A, T)>,
        A: Into<String>,
        T: Into<String>,
    {
        self.aliases
            .extend(aliases.into_iter().map(|(a, t)| (a.into(), t.into())));
        self
    }

    pub fn terminator(mut self, name: &str) -> Self {
        self.terminator = name.into();
        self
    }

    /// Enumerate every token and freeze the registry.
    pub fn build(self) -> Result<Vocabulary, VocabularyError> {
        lazy_static! {
            static ref NAME: Regex = Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").unwrap();
        }

        if self.rails.is_empty() {
            return Err(VocabularyError::NoRails);
        }

        let mut vocab = Vocabulary {
            tokens: Vec::new(),
            kinds: Vec::new(),
            index: HashMap::new(),
            families: self.families,
            edges_by_family: Vec::new(),
            devices_by_family: Vec::new(),
            edges: Vec::new(),
            rails: Vec::new(),
            circuit_types: Vec::new(),
            attachables: Vec::new(),
            terminator: 0,
        };

        let register = |vocab: &mut Vocabulary, name: String, kind: TokenKind| {
            if !NAME.is_match(&name) {
                return Err(VocabularyError::MalformedName(name));
            }
            if vocab.index.contains_key(&name) {
                return Err(VocabularyError::DuplicateToken(name));
            }
            let id = vocab.tokens.len() as TokenId;
            vocab.tokens.push(Symbol::from(name.as_str()));
            vocab.kinds.push(kind);
            vocab.index.insert(name, id);
            if kind.is_attachable() {
                vocab.attachables.push(id);
            }
            Ok(id)
        };

        for family in vocab.families.iter() {
            if family.pin_count() == 0 || family.pin_count() > MAX_PINS {
                return Err(VocabularyError::BadPinCount {
                    family: family.name.clone(),
                    pins: family.pin_count(),
                });
            }
        }

        let families = vocab.families.clone();
        for (family_id, family) in families.iter().enumerate() {
            let mut ids = Vec::new();
            for pins in family.edge_subsets() {
                let kind = TokenKind::Edge {
                    family: family_id,
                    pins,
                };
                ids.push(register(&mut vocab, family.edge_token(pins), kind)?);
            }
            vocab.edges.extend(ids.iter().copied());
            vocab.edges_by_family.push(ids);
        }

        for rail in self.rails {
            let id = register(&mut vocab, rail, TokenKind::PowerRail)?;
            vocab.rails.push(id);
        }

        for tag in self.circuit_types {
            let id = register(&mut vocab, tag, TokenKind::CircuitType)?;
            vocab.circuit_types.push(id);
        }

        vocab.devices_by_family = vec![Vec::new(); families.len()];
        for pool in self.pools.iter() {
            let family = families
                .iter()
                .position(|f| f.name == pool.family)
                .ok_or_else(|| VocabularyError::UnknownFamily(pool.family.clone()))?;
            for name in pool.names() {
                let id = register(&mut vocab, name, TokenKind::Device { family })?;
                vocab.devices_by_family[family].push(id);
            }
        }

        for net in self.nets {
            register(&mut vocab, net, TokenKind::Net)?;
        }

        for port in self.ports {
            register(&mut vocab, port, TokenKind::Port)?;
        }

        vocab.terminator = register(&mut vocab, self.terminator, TokenKind::Terminator)?;

        for (alias, target) in self.aliases {
            if !NAME.is_match(&alias) {
                return Err(VocabularyError::MalformedName(alias));
            }
            if vocab.index.contains_key(&alias) {
                return Err(VocabularyError::DuplicateToken(alias));
            }
            let id = match vocab.index.get(&target) {
                Some(&id) => id,
                None => return Err(VocabularyError::UnknownAliasTarget { alias, target }),
            };
            vocab.index.insert(alias, id);
        }

        Ok(vocab)
    }
}
