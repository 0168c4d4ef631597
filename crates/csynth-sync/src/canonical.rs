//! Canonicalization: both sides of a sync reduce to one comparable shape.
//!
//! The live circuit arrives as a nested netlist document; the persisted
//! project arrives as parsed sheet files. Neither is directly comparable, so
//! both are normalized into a [`CanonicalGraph`]: components with stable
//! keys, nets as connection sets, hierarchy as an arena-indexed tree.
//!
//! Canonicalization is pure and order-independent: all output collections
//! are sorted by deterministic keys (hierarchy path, then natural reference
//! order, then pin id), so permuting either input's container order yields a
//! byte-identical canonical form. This is what makes matching and planning
//! reproducible.

use std::collections::{BTreeMap, BTreeSet};

use csynth_kicad::{Project, symbol};
use csynth_sch::netlist::{Circuit, Subcircuit};
use csynth_sch::{ManagedId, NetClass, SheetPath};
use serde::Serialize;

use crate::SyncError;

/// A component reduced to the fields synchronization compares.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalComponent {
    pub path: SheetPath,
    pub reference: String,
    pub symbol_id: String,
    pub value: Option<String>,
    pub footprint: Option<String>,
    /// `(pin_id, net_name)` pairs.
    pub net_bindings: BTreeSet<(String, String)>,
    pub managed_id: Option<ManagedId>,
}

impl CanonicalComponent {
    /// Bindings as a pin-to-net map.
    pub fn bindings_by_pin(&self) -> BTreeMap<&str, &str> {
        self.net_bindings
            .iter()
            .map(|(pin, net)| (pin.as_str(), net.as_str()))
            .collect()
    }
}

/// A net reduced to its member pin set, with its classification computed
/// here once and carried as data from then on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalNet {
    pub path: SheetPath,
    pub name: String,
    pub class: NetClass,
    /// `(component_reference, pin_id)` pairs.
    pub members: BTreeSet<(String, String)>,
}

/// One sheet in the design tree. Parents are arena indices into
/// [`CanonicalGraph::nodes`], never owning pointers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HierarchyNode {
    pub path: SheetPath,
    pub parent: Option<usize>,
    pub sheet_file: String,
    pub managed_id: Option<ManagedId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CanonicalGraph {
    /// Pre-order: every node appears after its parent.
    pub nodes: Vec<HierarchyNode>,
    pub components: Vec<CanonicalComponent>,
    pub nets: Vec<CanonicalNet>,
}

impl CanonicalGraph {
    pub fn components_in<'a>(&'a self, path: &SheetPath) -> Vec<&'a CanonicalComponent> {
        self.components.iter().filter(|c| &c.path == path).collect()
    }

    /// Net name to class, for one scope.
    pub fn net_classes_in(&self, path: &SheetPath) -> BTreeMap<&str, NetClass> {
        self.nets
            .iter()
            .filter(|n| &n.path == path)
            .map(|n| (n.name.as_str(), n.class))
            .collect()
    }

    pub fn children_of(&self, index: usize) -> Vec<usize> {
        let mut children: Vec<usize> = (0..self.nodes.len())
            .filter(|&i| self.nodes[i].parent == Some(index))
            .collect();
        children.sort_by(|&a, &b| self.nodes[a].sheet_file.cmp(&self.nodes[b].sheet_file));
        children
    }

    fn sort(&mut self) {
        self.components.sort_by(|a, b| {
            a.path
                .cmp(&b.path)
                .then_with(|| natord::compare(&a.reference, &b.reference))
        });
        self.nets
            .sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.name.cmp(&b.name)));
    }
}

/// Canonicalize the live circuit.
pub fn canonicalize_circuit(circuit: &Circuit) -> Result<CanonicalGraph, SyncError> {
    let mut graph = CanonicalGraph::default();
    let root_file = format!("{}.kicad_sch", circuit.name.to_lowercase());
    walk_subcircuit(&circuit.root, SheetPath::root(), root_file, None, &mut graph)?;
    graph.sort();
    Ok(graph)
}

fn walk_subcircuit(
    sub: &Subcircuit,
    path: SheetPath,
    sheet_file: String,
    parent: Option<usize>,
    graph: &mut CanonicalGraph,
) -> Result<(), SyncError> {
    let index = graph.nodes.len();
    graph.nodes.push(HierarchyNode {
        path: path.clone(),
        parent,
        sheet_file,
        managed_id: sub.managed_id,
    });

    // Pin bindings reconcile the two redundant views of connectivity:
    // net member lists first, then the per-component pin maps on top.
    let mut bindings: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    for net in &sub.nets {
        for pin_ref in &net.pins {
            bindings
                .entry(pin_ref.component.clone())
                .or_default()
                .insert(pin_ref.pin.clone(), net.name.clone());
        }
    }
    for comp in &sub.components {
        for (pin, net) in &comp.pins {
            bindings
                .entry(comp.reference.clone())
                .or_default()
                .insert(pin.clone(), net.clone());
        }
    }

    let mut seen_refs = BTreeSet::new();
    for comp in &sub.components {
        if comp.reference.is_empty() {
            return Err(SyncError::MalformedInput {
                sheet: path.to_string(),
                detail: format!("component with symbol {:?} has no reference", comp.symbol),
            });
        }
        if comp.symbol.is_empty() {
            return Err(SyncError::MalformedInput {
                sheet: path.to_string(),
                detail: format!("component {} has no symbol id", comp.reference),
            });
        }
        if !seen_refs.insert(comp.reference.clone()) {
            return Err(SyncError::MalformedInput {
                sheet: path.to_string(),
                detail: format!("duplicate reference {}", comp.reference),
            });
        }
        let net_bindings = bindings
            .get(&comp.reference)
            .map(|pins| {
                pins.iter()
                    .map(|(pin, net)| (pin.clone(), net.clone()))
                    .collect()
            })
            .unwrap_or_default();
        graph.components.push(CanonicalComponent {
            path: path.clone(),
            reference: comp.reference.clone(),
            symbol_id: comp.symbol.clone(),
            value: comp.value.clone(),
            footprint: comp.footprint.clone(),
            net_bindings,
            managed_id: None,
        });
    }

    push_nets_from_bindings(
        &path,
        sub.nets.iter().map(|n| n.name.clone()),
        &bindings,
        graph,
    );

    // Children in name order: input declaration order must not leak into
    // the canonical form.
    let mut children: Vec<&Subcircuit> = sub.children.iter().collect();
    children.sort_by(|a, b| a.name.cmp(&b.name));
    for child in children {
        walk_subcircuit(
            child,
            path.join(child.name.clone()),
            child.file_name(),
            Some(index),
            graph,
        )?;
    }
    Ok(())
}

/// Canonicalize the persisted project.
pub fn canonicalize_project(project: &Project) -> Result<CanonicalGraph, SyncError> {
    let mut graph = CanonicalGraph::default();
    let mut file_stack = Vec::new();
    walk_sheet(
        project,
        &project.root_file.clone(),
        SheetPath::root(),
        None,
        None,
        &mut file_stack,
        &mut graph,
    )?;
    graph.sort();
    Ok(graph)
}

#[allow(clippy::too_many_arguments)]
fn walk_sheet(
    project: &Project,
    file_name: &str,
    path: SheetPath,
    parent: Option<usize>,
    managed_id: Option<ManagedId>,
    file_stack: &mut Vec<String>,
    graph: &mut CanonicalGraph,
) -> Result<(), SyncError> {
    if file_stack.iter().any(|f| f == file_name) {
        return Err(SyncError::HierarchyCycle { path });
    }

    let index = graph.nodes.len();
    graph.nodes.push(HierarchyNode {
        path: path.clone(),
        parent,
        sheet_file: file_name.to_owned(),
        managed_id,
    });

    // A sheet referenced but absent on disk contributes an empty branch.
    let Some(doc) = project.sheet(file_name) else {
        return Ok(());
    };

    let mut bindings: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    for node in symbol::symbols(&doc.doc) {
        let reference = symbol::symbol_reference(node).ok_or_else(|| SyncError::MalformedInput {
            sheet: file_name.to_owned(),
            detail: "symbol without a Reference property".to_owned(),
        })?;
        let symbol_id = symbol::symbol_lib_id(node).ok_or_else(|| SyncError::MalformedInput {
            sheet: file_name.to_owned(),
            detail: format!("symbol {reference} without a lib_id"),
        })?;
        let props = symbol::properties(node);
        let mut pin_map = BTreeMap::new();
        for (pin, net) in symbol::symbol_pins(node) {
            if let Some(net) = net {
                pin_map.insert(pin, net);
            }
        }
        graph.components.push(CanonicalComponent {
            path: path.clone(),
            reference: reference.clone(),
            symbol_id,
            value: props.get_any(&["Value", "value"]).map(str::to_owned),
            footprint: props.get_any(&["Footprint", "footprint"]).map(str::to_owned),
            net_bindings: pin_map
                .iter()
                .map(|(pin, net)| (pin.clone(), net.clone()))
                .collect(),
            managed_id: symbol::sync_id(node),
        });
        bindings.insert(reference, pin_map);
    }

    push_nets_from_bindings(&path, std::iter::empty(), &bindings, graph);

    // Sheet records in file-name order; each child is one hierarchy node.
    let mut records: Vec<(String, Option<String>, Option<ManagedId>)> = Vec::new();
    for record in symbol::sheet_records(&doc.doc) {
        let Some(child_file) = symbol::sheet_record_file(record) else {
            return Err(SyncError::MalformedInput {
                sheet: file_name.to_owned(),
                detail: "sheet record without a Sheetfile property".to_owned(),
            });
        };
        records.push((
            child_file,
            symbol::sheet_record_name(record),
            symbol::sync_id(record),
        ));
    }
    records.sort();

    file_stack.push(file_name.to_owned());
    for (child_file, child_name, child_id) in records {
        let name = child_name.unwrap_or_else(|| {
            child_file
                .strip_suffix(".kicad_sch")
                .unwrap_or(&child_file)
                .to_owned()
        });
        walk_sheet(
            project,
            &child_file,
            path.join(name),
            Some(index),
            child_id,
            file_stack,
            graph,
        )?;
    }
    file_stack.pop();
    Ok(())
}

/// Derive per-scope canonical nets from the reconciled binding maps.
/// `declared` adds nets that exist by name even without members.
fn push_nets_from_bindings(
    path: &SheetPath,
    declared: impl Iterator<Item = String>,
    bindings: &BTreeMap<String, BTreeMap<String, String>>,
    graph: &mut CanonicalGraph,
) {
    let mut members: BTreeMap<String, BTreeSet<(String, String)>> = BTreeMap::new();
    for name in declared {
        members.entry(name).or_default();
    }
    for (reference, pins) in bindings {
        for (pin, net) in pins {
            members
                .entry(net.clone())
                .or_default()
                .insert((reference.clone(), pin.clone()));
        }
    }
    for (name, members) in members {
        graph.nets.push(CanonicalNet {
            path: path.clone(),
            class: NetClass::classify(&name),
            name,
            members,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csynth_sch::netlist::{Component, Net, PinRef};

    fn sample_circuit() -> Circuit {
        let mut root = Subcircuit::new("demo");
        root.components = vec![
            Component::new("R10", "Device:R").with_value("1k").with_pin("1", "VCC"),
            Component::new("R2", "Device:R").with_value("10k").with_pin("1", "VCC"),
        ];
        root.nets = vec![Net {
            name: "VCC".to_owned(),
            pins: vec![PinRef {
                component: "R10".to_owned(),
                pin: "1".to_owned(),
            }],
        }];
        let mut child = Subcircuit::new("Power");
        child.components = vec![Component::new("C1", "Device:C").with_value("100n")];
        root.children = vec![child];
        Circuit {
            name: "demo".to_owned(),
            root,
        }
    }

    #[test]
    fn circuit_components_sort_naturally() {
        let graph = canonicalize_circuit(&sample_circuit()).unwrap();
        let root_refs: Vec<&str> = graph
            .components
            .iter()
            .filter(|c| c.path.is_root())
            .map(|c| c.reference.as_str())
            .collect();
        // Natural order: R2 before R10.
        assert_eq!(root_refs, vec!["R2", "R10"]);
    }

    #[test]
    fn circuit_hierarchy_paths() {
        let graph = canonicalize_circuit(&sample_circuit()).unwrap();
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.nodes[1].path.to_string(), "/Power");
        assert_eq!(graph.nodes[1].parent, Some(0));
        assert_eq!(graph.nodes[1].sheet_file, "power.kicad_sch");
    }

    #[test]
    fn permuting_input_order_is_invisible() {
        let circuit = sample_circuit();
        let mut permuted = circuit.clone();
        permuted.root.components.reverse();
        permuted.root.nets.reverse();

        let a = canonicalize_circuit(&circuit).unwrap();
        let b = canonicalize_circuit(&permuted).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn net_class_is_computed_once_and_stored() {
        let graph = canonicalize_circuit(&sample_circuit()).unwrap();
        let vcc = graph.nets.iter().find(|n| n.name == "VCC").unwrap();
        assert_eq!(vcc.class, NetClass::Power);
    }

    #[test]
    fn missing_reference_is_malformed_input() {
        let mut circuit = sample_circuit();
        circuit.root.components[0].reference = String::new();
        assert!(matches!(
            canonicalize_circuit(&circuit),
            Err(SyncError::MalformedInput { .. })
        ));
    }

    #[test]
    fn duplicate_reference_is_malformed_input() {
        let mut circuit = sample_circuit();
        circuit.root.components[1].reference = "R10".to_owned();
        assert!(matches!(
            canonicalize_circuit(&circuit),
            Err(SyncError::MalformedInput { .. })
        ));
    }
}
