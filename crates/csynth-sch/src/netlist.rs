//! The live-circuit netlist document.
//!
//! The circuit-description front-end evaluates the user's design and hands
//! the result over as JSON in this shape. The sync engine only ever reads it.
//!
//! Components carry their per-pin bindings and nets carry their member pin
//! sets; the two views are redundant on purpose (front-ends differ in which
//! one they populate fully) and the canonicalizer reconciles them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ManagedId;

/// A complete live circuit: one root subcircuit, arbitrarily nested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Circuit {
    /// Project name; the root sheet file is named after it.
    pub name: String,
    pub root: Subcircuit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subcircuit {
    pub name: String,
    /// Sheet file this subcircuit persists to. Derived from the name when
    /// absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet_file: Option<String>,
    /// Identity assigned by an earlier sync, round-tripped by the front-end.
    /// Lets a renamed subcircuit keep its persisted sheet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_id: Option<ManagedId>,
    #[serde(default)]
    pub components: Vec<Component>,
    #[serde(default)]
    pub nets: Vec<Net>,
    #[serde(default)]
    pub children: Vec<Subcircuit>,
}

impl Subcircuit {
    pub fn new(name: impl Into<String>) -> Self {
        Subcircuit {
            name: name.into(),
            sheet_file: None,
            managed_id: None,
            components: Vec::new(),
            nets: Vec::new(),
            children: Vec::new(),
        }
    }

    /// File name this subcircuit persists to.
    pub fn file_name(&self) -> String {
        self.sheet_file
            .clone()
            .unwrap_or_else(|| format!("{}.kicad_sch", self.name.to_lowercase()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Component {
    /// Reference designator, unique within its subcircuit.
    pub reference: String,
    /// Library symbol id, e.g. `Device:R`.
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footprint: Option<String>,
    /// Pin id to net name.
    #[serde(default)]
    pub pins: BTreeMap<String, String>,
}

impl Component {
    pub fn new(reference: impl Into<String>, symbol: impl Into<String>) -> Self {
        Component {
            reference: reference.into(),
            symbol: symbol.into(),
            value: None,
            footprint: None,
            pins: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_footprint(mut self, footprint: impl Into<String>) -> Self {
        self.footprint = Some(footprint.into());
        self
    }

    pub fn with_pin(mut self, pin: impl Into<String>, net: impl Into<String>) -> Self {
        self.pins.insert(pin.into(), net.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Net {
    pub name: String,
    #[serde(default)]
    pub pins: Vec<PinRef>,
}

/// One member of a net: a component pin within the same subcircuit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PinRef {
    pub component: String,
    pub pin: String,
}

impl Circuit {
    /// Parse the JSON netlist document produced by the front-end.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_roundtrip() {
        let circuit = Circuit {
            name: "blinky".to_owned(),
            root: Subcircuit {
                components: vec![
                    Component::new("R1", "Device:R")
                        .with_value("10k")
                        .with_footprint("Resistor_SMD:R_0603_1608Metric")
                        .with_pin("1", "VCC")
                        .with_pin("2", "LED_A"),
                ],
                nets: vec![Net {
                    name: "VCC".to_owned(),
                    pins: vec![PinRef {
                        component: "R1".to_owned(),
                        pin: "1".to_owned(),
                    }],
                }],
                ..Subcircuit::new("blinky")
            },
        };

        let parsed = Circuit::from_json(&circuit.to_json().unwrap()).unwrap();
        assert_eq!(parsed.root.components[0].reference, "R1");
        assert_eq!(parsed.root.components[0].pins.get("2").unwrap(), "LED_A");
        assert_eq!(parsed.root.nets[0].pins.len(), 1);
    }

    #[test]
    fn sheet_file_defaults_from_name() {
        let sub = Subcircuit::new("Power");
        assert_eq!(sub.file_name(), "power.kicad_sch");

        let mut explicit = Subcircuit::new("Power");
        explicit.sheet_file = Some("supply.kicad_sch".to_owned());
        assert_eq!(explicit.file_name(), "supply.kicad_sch");
    }

    #[test]
    fn minimal_json_fills_defaults() {
        let json = r#"{
            "name": "demo",
            "root": {
                "name": "demo",
                "components": [{"reference": "C1", "symbol": "Device:C"}]
            }
        }"#;
        let circuit = Circuit::from_json(json).unwrap();
        assert!(circuit.root.nets.is_empty());
        assert!(circuit.root.children.is_empty());
        assert!(circuit.root.components[0].value.is_none());
    }
}
