//! Data model shared by the circuit-synth synchronization engine.
//!
//! This crate owns the types both sides of a sync speak: the live-circuit
//! netlist document produced by the circuit-description front-end
//! ([`netlist`]), hierarchical sheet addressing ([`SheetPath`]), the stable
//! identity marker for engine-owned elements ([`ManagedId`]), normalized
//! property access ([`PropertyMap`]), net classification ([`NetClass`]), and
//! reference-designator allocation ([`refdes`]).

pub mod netlist;
pub mod refdes;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Address of a sheet within the design tree.
///
/// The root sheet is the empty path and displays as `/`; children append
/// their sheet name, e.g. `/Power/Charger`. Paths serialize as that string
/// so they survive JSON round-trips unchanged.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct SheetPath(Vec<String>);

impl SheetPath {
    pub fn root() -> Self {
        SheetPath(Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Child path obtained by appending one sheet name.
    pub fn join(&self, name: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.into());
        SheetPath(segments)
    }

    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            return None;
        }
        Some(SheetPath(self.0[..self.0.len() - 1].to_vec()))
    }

    /// Final segment, `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for SheetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "/");
        }
        for segment in &self.0 {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for SheetPath {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.starts_with('/') {
            return Err(format!("sheet path must start with '/': {s:?}"));
        }
        let segments: Vec<String> = s
            .split('/')
            .skip(1)
            .filter(|seg| !seg.is_empty())
            .map(str::to_owned)
            .collect();
        Ok(SheetPath(segments))
    }
}

impl From<SheetPath> for String {
    fn from(path: SheetPath) -> Self {
        path.to_string()
    }
}

impl TryFrom<String> for SheetPath {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Stable identity this engine embeds in the persisted project to mark the
/// elements it owns. Never inferred from names or positions; only from the
/// embedded marker. Minted once, never reused after removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManagedId(Uuid);

impl ManagedId {
    /// Mint a fresh identity.
    pub fn new() -> Self {
        ManagedId(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(ManagedId)
    }
}

impl Default for ManagedId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ManagedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Classification of a net, computed once during canonicalization and carried
/// as data from then on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NetClass {
    Ground,
    Power,
    Signal,
}

impl NetClass {
    /// Classify a net by name. This is the only place the name patterns live.
    pub fn classify(name: &str) -> NetClass {
        let upper = name.to_ascii_uppercase();
        if upper == "GND"
            || upper.ends_with("GND")
            || upper.starts_with("GND")
            || upper == "VSS"
            || upper == "AGND"
            || upper == "DGND"
        {
            return NetClass::Ground;
        }
        if upper.starts_with("VCC")
            || upper.starts_with("VDD")
            || upper.starts_with("VBUS")
            || upper.starts_with("VIN")
            || upper.starts_with('+')
            || (upper.starts_with('-') && upper.ends_with('V'))
        {
            return NetClass::Power;
        }
        NetClass::Signal
    }

    pub fn tag(&self) -> &'static str {
        match self {
            NetClass::Ground => "ground",
            NetClass::Power => "power",
            NetClass::Signal => "signal",
        }
    }
}

/// Normalized component properties.
///
/// The file codec hands property containers over in more than one shape
/// (repeated pair nodes or a single map block). This type is the only point
/// where those shapes converge; nothing downstream ever inspects raw codec
/// output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyMap(BTreeMap<String, String>);

impl PropertyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        PropertyMap(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// First present key wins; callers list casing variants explicitly.
    pub fn get_any(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|key| self.get(key))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sheet_path_display_roundtrip() {
        let path = SheetPath::root().join("Power").join("Charger");
        assert_eq!(path.to_string(), "/Power/Charger");
        assert_eq!("/Power/Charger".parse::<SheetPath>().unwrap(), path);
        assert_eq!(path.parent().unwrap().to_string(), "/Power");
        assert_eq!(path.name(), Some("Charger"));
    }

    #[test]
    fn sheet_path_root() {
        let root = SheetPath::root();
        assert_eq!(root.to_string(), "/");
        assert_eq!("/".parse::<SheetPath>().unwrap(), root);
        assert!(root.parent().is_none());
        assert!(root.is_root());
    }

    #[test]
    fn sheet_path_rejects_relative() {
        assert!("Power/Charger".parse::<SheetPath>().is_err());
    }

    #[test]
    fn managed_id_string_roundtrip() {
        let id = ManagedId::new();
        assert_eq!(ManagedId::parse(&id.to_string()), Some(id));
        assert_eq!(ManagedId::parse("not-a-uuid"), None);
    }

    #[test]
    fn net_classification() {
        assert_eq!(NetClass::classify("GND"), NetClass::Ground);
        assert_eq!(NetClass::classify("PGND"), NetClass::Ground);
        assert_eq!(NetClass::classify("VCC_3V3"), NetClass::Power);
        assert_eq!(NetClass::classify("+5V"), NetClass::Power);
        assert_eq!(NetClass::classify("-12V"), NetClass::Power);
        assert_eq!(NetClass::classify("SPI_MISO"), NetClass::Signal);
    }

    #[test]
    fn property_map_casing_variants() {
        let props = PropertyMap::from_pairs([("Value", "10k"), ("footprint", "R_0603")]);
        assert_eq!(props.get_any(&["Value", "value"]), Some("10k"));
        assert_eq!(props.get_any(&["Footprint", "footprint"]), Some("R_0603"));
        assert_eq!(props.get_any(&["Missing"]), None);
    }
}
