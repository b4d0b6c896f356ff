//! Token classification.
//!
//! Every registered token falls in exactly one [`TokenKind`]. The kind of each
//! id is computed once when the registry is built, so every predicate here is
//! a hash lookup followed by a table read.

use std::fmt;

use super::{DeviceFamily, FamilyId, PinSet, TokenId, Vocabulary};

/// Category of a token, with the data the grammar needs about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    CircuitType,
    PowerRail,
    Device { family: FamilyId },
    Edge { family: FamilyId, pins: PinSet },
    Net,
    Port,
    Terminator,
}

impl TokenKind {
    /// Devices, nets, ports and rails: the tokens that stand for graph nodes.
    pub fn is_node(self) -> bool {
        matches!(
            self,
            TokenKind::Device { .. } | TokenKind::Net | TokenKind::Port | TokenKind::PowerRail
        )
    }

    /// Nets, ports and rails: the nodes a device declaration can land on.
    pub fn is_attachable(self) -> bool {
        matches!(self, TokenKind::Net | TokenKind::Port | TokenKind::PowerRail)
    }

    pub fn category(self) -> &'static str {
        match self {
            TokenKind::CircuitType => "circuit-type",
            TokenKind::PowerRail => "power-rail",
            TokenKind::Device { .. } => "device",
            TokenKind::Edge { .. } => "edge-type",
            TokenKind::Net => "net",
            TokenKind::Port => "port",
            TokenKind::Terminator => "terminator",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.category())
    }
}

/// A device instance together with its family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo<'v> {
    pub id: TokenId,
    pub family_id: FamilyId,
    pub family: &'v DeviceFamily,
}

impl DeviceInfo<'_> {
    /// The full pin set of the instance.
    pub fn pins(&self) -> PinSet {
        self.family.full_pins()
    }
}

/// An edge-type token decoded into its family and pin subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeInfo<'v> {
    pub id: TokenId,
    pub family_id: FamilyId,
    pub family: &'v DeviceFamily,
    pub pins: PinSet,
}

impl Vocabulary {
    /// Classify a token string.
    ///
    /// Returns `None` for strings that are not in the registry; every
    /// registered string maps to the same kind on every call.
    pub fn classify_token(&self, token: &str) -> Option<TokenKind> {
        self.index.get(token).map(|&id| self.kind(id))
    }

    pub fn is_circuit_type_tag(&self, token: &str) -> bool {
        self.classify_token(token) == Some(TokenKind::CircuitType)
    }

    pub fn is_power_rail(&self, token: &str) -> bool {
        self.classify_token(token) == Some(TokenKind::PowerRail)
    }

    /// Look up a device instance, returning its family and pin layout.
    pub fn is_device(&self, token: &str) -> Option<DeviceInfo<'_>> {
        let id = *self.index.get(token)?;
        self.device_info(id)
    }

    /// Look up an edge-type token, returning the pins it declares and the
    /// family it is valid for.
    pub fn is_edge_type(&self, token: &str) -> Option<EdgeInfo<'_>> {
        let id = *self.index.get(token)?;
        self.edge_info(id)
    }

    pub fn is_net(&self, token: &str) -> bool {
        self.classify_token(token) == Some(TokenKind::Net)
    }

    pub fn is_external_port(&self, token: &str) -> bool {
        self.classify_token(token) == Some(TokenKind::Port)
    }

    pub fn is_terminator(&self, token: &str) -> bool {
        self.classify_token(token) == Some(TokenKind::Terminator)
    }

    pub fn device_info(&self, id: TokenId) -> Option<DeviceInfo<'_>> {
        match self.try_kind(id)? {
            TokenKind::Device { family } => Some(DeviceInfo {
                id,
                family_id: family,
                family: &self.families[family],
            }),
            _ => None,
        }
    }

    pub fn edge_info(&self, id: TokenId) -> Option<EdgeInfo<'_>> {
        match self.try_kind(id)? {
            TokenKind::Edge { family, pins } => Some(EdgeInfo {
                id,
                family_id: family,
                family: &self.families[family],
                pins,
            }),
            _ => None,
        }
    }
}
