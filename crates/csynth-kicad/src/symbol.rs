//! Reading and emitting the schematic nodes the sync engine touches:
//! `(symbol ...)` component records and `(sheet ...)` instance records.
//!
//! Everything here works on parsed [`Sexpr`] nodes and byte spans; actual
//! text mutation goes through the owning sheet's patch set.

use csynth_sch::{ManagedId, PropertyMap};
use csynth_sexpr::{Sexpr, Span, string_prop};

/// Property key carrying the managed identity of an engine-owned element.
/// Deliberately distinct from every user-visible property.
pub const SYNC_ID_PROP: &str = "Sync_Id";

/// All `(symbol ...)` component records in a sheet.
pub fn symbols(doc: &Sexpr) -> Vec<&Sexpr> {
    doc.find_all("symbol")
}

/// All `(sheet ...)` instance records in a sheet.
pub fn sheet_records(doc: &Sexpr) -> Vec<&Sexpr> {
    doc.find_all("sheet")
}

/// Collect a node's properties into a [`PropertyMap`].
///
/// Two container shapes occur in the wild and both normalize here: repeated
/// `(property "K" "V")` nodes, and a single `(properties ("K" "V") ...)`
/// map block. Nothing downstream sees the difference.
pub fn properties(node: &Sexpr) -> PropertyMap {
    let mut props = PropertyMap::new();
    for prop in node.find_all("property") {
        let Some(items) = prop.as_list() else { continue };
        if let (Some(key), Some(value)) = (
            items.get(1).and_then(Sexpr::as_str),
            items.get(2).and_then(Sexpr::as_str),
        ) {
            props.insert(key, value);
        }
    }
    if let Some(block) = node.find("properties") {
        for entry in block.as_list().into_iter().flatten().skip(1) {
            let Some(pair) = entry.as_list() else { continue };
            if let (Some(key), Some(value)) = (
                pair.first().and_then(Sexpr::as_str),
                pair.get(1).and_then(Sexpr::as_str),
            ) {
                props.insert(key, value);
            }
        }
    }
    props
}

pub fn symbol_reference(node: &Sexpr) -> Option<String> {
    properties(node)
        .get_any(&["Reference", "reference"])
        .map(str::to_owned)
}

pub fn symbol_lib_id(node: &Sexpr) -> Option<String> {
    string_prop(node, "lib_id")
}

/// Per-pin net labels: `(pin "1" ... (net "VCC"))`.
pub fn symbol_pins(node: &Sexpr) -> Vec<(String, Option<String>)> {
    node.find_all("pin")
        .into_iter()
        .filter_map(|pin| {
            let id = pin.as_list()?.get(1)?.as_str()?.to_owned();
            let net = string_prop(pin, "net");
            Some((id, net))
        })
        .collect()
}

/// Managed id embedded on a symbol or sheet record, if any.
pub fn sync_id(node: &Sexpr) -> Option<ManagedId> {
    properties(node)
        .get(SYNC_ID_PROP)
        .and_then(ManagedId::parse)
}

pub fn sheet_record_name(record: &Sexpr) -> Option<String> {
    properties(record)
        .get_any(&["Sheetname", "Sheet name"])
        .map(str::to_owned)
}

pub fn sheet_record_file(record: &Sexpr) -> Option<String> {
    properties(record)
        .get_any(&["Sheetfile", "Sheet file"])
        .map(str::to_owned)
}

/// Find a component record by reference designator.
pub fn find_symbol<'a>(doc: &'a Sexpr, reference: &str) -> Option<&'a Sexpr> {
    symbols(doc)
        .into_iter()
        .find(|node| symbol_reference(node).as_deref() == Some(reference))
}

/// Find a sheet record by child file name.
pub fn find_sheet_record<'a>(doc: &'a Sexpr, file_name: &str) -> Option<&'a Sexpr> {
    sheet_records(doc)
        .into_iter()
        .find(|record| sheet_record_file(record).as_deref() == Some(file_name))
}

/// Span of the value literal of `(property "key" "value")`, for in-place
/// replacement.
pub fn property_value_span(node: &Sexpr, key: &str) -> Option<Span> {
    node.find_all("property").into_iter().find_map(|prop| {
        let items = prop.as_list()?;
        if items.get(1)?.as_str()? != key {
            return None;
        }
        items.get(2).map(Sexpr::span)
    })
}

/// Span of a whole `(property "key" ...)` node, for removal.
pub fn property_node_span(node: &Sexpr, key: &str) -> Option<Span> {
    node.find_all("property").into_iter().find_map(|prop| {
        let items = prop.as_list()?;
        (items.get(1)?.as_str()? == key).then(|| prop.span())
    })
}

/// Span of the value atom inside `(lib_id "Lib:Part")`.
pub fn lib_id_value_span(node: &Sexpr) -> Option<Span> {
    node.find("lib_id")?.as_list()?.get(1).map(Sexpr::span)
}

/// The `(pin "id" ...)` node for a pin id.
pub fn pin_node<'a>(node: &'a Sexpr, pin: &str) -> Option<&'a Sexpr> {
    node.find_all("pin")
        .into_iter()
        .find(|p| p.as_list().and_then(|items| items.get(1)?.as_str()) == Some(pin))
}

/// Span of the net name inside `(pin "id" ... (net "NAME"))`.
pub fn pin_net_span(node: &Sexpr, pin: &str) -> Option<Span> {
    let net = pin_node(node, pin)?.find("net")?;
    net.as_list()?.get(1).map(Sexpr::span)
}

/// Span of the whole `(net "NAME")` node inside a pin, for removal.
pub fn pin_net_node_span(node: &Sexpr, pin: &str) -> Option<Span> {
    pin_node(node, pin)?.find("net").map(Sexpr::span)
}

/// Build a `(property "key" "value")` node.
pub fn property_node(key: &str, value: &str) -> Sexpr {
    Sexpr::list(vec![
        Sexpr::sym("property"),
        Sexpr::string(key),
        Sexpr::string(value),
    ])
}

/// Build a complete `(symbol ...)` record for a component this engine is
/// adding. Position comes from the placement collaborator.
#[allow(clippy::too_many_arguments)]
pub fn emit_symbol(
    reference: &str,
    lib_id: &str,
    value: Option<&str>,
    footprint: Option<&str>,
    pins: impl IntoIterator<Item = (String, String)>,
    position: (f64, f64),
    id: ManagedId,
) -> Sexpr {
    let mut items = vec![
        Sexpr::sym("symbol"),
        Sexpr::list(vec![Sexpr::sym("lib_id"), Sexpr::string(lib_id)]),
        Sexpr::list(vec![
            Sexpr::sym("at"),
            Sexpr::float(position.0),
            Sexpr::float(position.1),
            Sexpr::int(0),
        ]),
        property_node("Reference", reference),
    ];
    if let Some(value) = value {
        items.push(property_node("Value", value));
    }
    if let Some(footprint) = footprint {
        items.push(property_node("Footprint", footprint));
    }
    items.push(property_node(SYNC_ID_PROP, &id.to_string()));
    for (pin, net) in pins {
        items.push(Sexpr::list(vec![
            Sexpr::sym("pin"),
            Sexpr::string(pin),
            Sexpr::list(vec![Sexpr::sym("net"), Sexpr::string(net)]),
        ]));
    }
    Sexpr::list(items)
}

/// Build a `(sheet ...)` instance record pointing at a child sheet file.
pub fn emit_sheet_record(
    name: &str,
    file_name: &str,
    position: (f64, f64),
    id: ManagedId,
) -> Sexpr {
    Sexpr::list(vec![
        Sexpr::sym("sheet"),
        Sexpr::list(vec![
            Sexpr::sym("at"),
            Sexpr::float(position.0),
            Sexpr::float(position.1),
        ]),
        property_node("Sheetname", name),
        property_node("Sheetfile", file_name),
        property_node(SYNC_ID_PROP, &id.to_string()),
    ])
}
