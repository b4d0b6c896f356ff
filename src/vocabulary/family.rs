//! Device families and the pin subsets their edge-type tokens encode.
//!
//! A [`DeviceFamily`] names a class of components (MOSFET, resistor, ...)
//! together with its ordered pin labels. Every non-empty subset of those pins
//! becomes one edge-type token, spelled `{prefix}_{pins}` with the pin letters
//! in the family's canonical (alphabetical) order, e.g. `M_DG` or `R_P`.

use std::fmt;

use itertools::Itertools;

/// Index of a family inside a [`Vocabulary`](super::Vocabulary).
pub type FamilyId = usize;

/// Largest number of pins a family may declare; pin sets are stored as a bit mask.
pub const MAX_PINS: usize = 8;

/// A subset of a family's pins, bit `i` standing for the family's `i`-th pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PinSet(u8);

impl PinSet {
    pub const EMPTY: PinSet = PinSet(0);

    /// The set holding the first `pin_count` pins.
    pub fn full(pin_count: usize) -> Self {
        PinSet(((1u16 << pin_count.min(MAX_PINS)) - 1) as u8)
    }

    pub fn from_indices(indices: impl IntoIterator<Item = usize>) -> Self {
        PinSet(
            indices
                .into_iter()
                .filter(|&i| i < MAX_PINS)
                .fold(0u8, |bits, i| bits | (1 << i)),
        )
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn contains(self, index: usize) -> bool {
        index < MAX_PINS && self.0 & (1 << index) != 0
    }

    pub fn is_subset(self, other: PinSet) -> bool {
        self.0 & !other.0 == 0
    }

    pub fn intersects(self, other: PinSet) -> bool {
        self.0 & other.0 != 0
    }

    pub fn union(self, other: PinSet) -> PinSet {
        PinSet(self.0 | other.0)
    }

    pub fn intersection(self, other: PinSet) -> PinSet {
        PinSet(self.0 & other.0)
    }

    pub fn difference(self, other: PinSet) -> PinSet {
        PinSet(self.0 & !other.0)
    }

    /// Pin indices in ascending order.
    pub fn iter(self) -> impl Iterator<Item = usize> {
        (0..MAX_PINS).filter(move |&i| self.contains(i))
    }
}

/// A class of devices sharing one pin layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFamily {
    /// Human readable family name, e.g. `MOSFET`.
    pub name: String,
    /// Prefix of the family's edge-type tokens, e.g. `M`.
    pub edge_prefix: String,
    /// Pin labels, sorted alphabetically.
    pub pins: Vec<char>,
    /// Whether two declarations of one device may land on the same net.
    pub shorted_terminals: bool,
}

impl DeviceFamily {
    /// Create a family from its pin letters.
    ///
    /// The pin letters are sorted so that edge-type names are canonical no
    /// matter the order they are given in.
    ///
    /// # Example
    ///
    /// ```
    /// use topogen::vocabulary::DeviceFamily;
    ///
    /// let mos = DeviceFamily::new("MOSFET", "M", "SGDB", true);
    /// assert_eq!(mos.pins, vec!['B', 'D', 'G', 'S']);
    /// ```
    pub fn new(name: &str, edge_prefix: &str, pins: &str, shorted_terminals: bool) -> Self {
        let pins = pins.chars().sorted().collect();
        Self {
            name: name.into(),
            edge_prefix: edge_prefix.into(),
            pins,
            shorted_terminals,
        }
    }

    pub fn pin_count(&self) -> usize {
        self.pins.len()
    }

    pub fn full_pins(&self) -> PinSet {
        PinSet::full(self.pin_count())
    }

    /// Letters of the pins in `pins`, in canonical order.
    pub fn pin_letters(&self, pins: PinSet) -> String {
        pins.iter()
            .filter_map(|i| self.pins.get(i))
            .collect()
    }

    /// Name of the edge-type token declaring `pins`.
    pub fn edge_token(&self, pins: PinSet) -> String {
        format!("{}_{}", self.edge_prefix, self.pin_letters(pins))
    }

    /// Decode the pin letters of an edge-type suffix, in any order.
    ///
    /// Returns `None` for unknown letters, repeated letters or an empty suffix.
    pub fn parse_pins(&self, letters: &str) -> Option<PinSet> {
        let mut set = PinSet::EMPTY;
        for letter in letters.chars() {
            let index = self.pins.iter().position(|&p| p == letter)?;
            let pin = PinSet::from_indices([index]);
            if set.intersects(pin) {
                return None;
            }
            set = set.union(pin);
        }
        (!set.is_empty()).then_some(set)
    }

    /// Every non-empty pin subset, by size and then lexicographically.
    pub fn edge_subsets(&self) -> Vec<PinSet> {
        let n = self.pin_count();
        (1..=n)
            .flat_map(|k| (0..n).combinations(k).map(PinSet::from_indices))
            .collect()
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}_{{{}}})",
            self.name,
            self.edge_prefix,
            self.pins.iter().join(",")
        )
    }
}

/// A pool of interchangeable instance names `{prefix}1..={count}` of one family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePool {
    pub family: String,
    pub prefix: String,
    pub count: usize,
}

impl DevicePool {
    pub fn names(&self) -> impl Iterator<Item = String> + '_ {
        (1..=self.count).map(move |i| format!("{}{}", self.prefix, i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Subsets are ordered by size first so single-pin edges get the lowest ids.
    #[test]
    fn test_edge_subset_order() {
        let bjt = DeviceFamily::new("BJT", "B", "BCE", true);
        let names: Vec<_> = bjt
            .edge_subsets()
            .into_iter()
            .map(|p| bjt.edge_token(p))
            .collect();
        assert_eq!(
            names,
            vec!["B_B", "B_C", "B_E", "B_BC", "B_BE", "B_CE", "B_BCE"]
        );
    }

    #[test]
    fn test_mosfet_has_fifteen_edges() {
        let mos = DeviceFamily::new("MOSFET", "M", "BDGS", true);
        assert_eq!(mos.edge_subsets().len(), 15);
        assert_eq!(mos.edge_token(mos.full_pins()), "M_BDGS");
    }

    #[test]
    fn test_parse_pins() {
        let mos = DeviceFamily::new("MOSFET", "M", "BDGS", true);
        let dg = mos.parse_pins("GD").unwrap();
        assert_eq!(mos.pin_letters(dg), "DG");
        assert_eq!(mos.parse_pins("DD"), None);
        assert_eq!(mos.parse_pins("X"), None);
        assert_eq!(mos.parse_pins(""), None);
    }

    #[test]
    fn test_pin_set_algebra() {
        let full = PinSet::full(4);
        let dg = PinSet::from_indices([1, 2]);
        assert_eq!(full.len(), 4);
        assert!(dg.is_subset(full));
        assert!(!full.is_subset(dg));
        assert_eq!(full.difference(dg), PinSet::from_indices([0, 3]));
        assert!(!full.difference(dg).intersects(dg));
        assert_eq!(dg.iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_pool_names() {
        let pool = DevicePool {
            family: "Resistor".into(),
            prefix: "R".into(),
            count: 3,
        };
        assert_eq!(pool.names().collect::<Vec<_>>(), vec!["R1", "R2", "R3"]);
    }
}
