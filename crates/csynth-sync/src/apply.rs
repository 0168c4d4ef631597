//! Plan execution against the loaded project.
//!
//! Every op turns into the smallest possible byte-range patch: a value
//! update touches exactly the property literal, a rebind touches exactly the
//! pin's net label, a removal deletes exactly the element's node. Fields no
//! op names (positions, rotations, annotations, wire geometry) are never
//! rewritten, which is what keeps untouched files byte-identical.
//!
//! Additions mint a fresh managed id from the shared allocator and ask the
//! placement collaborator for a position, once, based on current occupancy.
//! A reference collision skips that one op with a warning; the rest of the
//! plan proceeds.

use std::collections::BTreeMap;

use csynth_kicad::{Project, SheetDoc, symbol};
use csynth_sch::SheetPath;
use csynth_sch::refdes::IdentifierAllocator;
use csynth_sexpr::{Sexpr, Span, format};

use crate::place::{Occupancy, Placer};
use crate::plan::{ComponentField, SyncOp, SyncPlan};

#[derive(Debug, Default)]
pub struct Applied {
    pub ops: Vec<SyncOp>,
    pub warnings: Vec<String>,
}

/// Apply a plan to the in-memory project. No disk I/O happens here; the
/// caller decides whether to save, which is what makes dry runs free.
pub fn apply_plan(
    project: &mut Project,
    plan: &SyncPlan,
    placer: &dyn Placer,
    alloc: &IdentifierAllocator,
) -> Applied {
    let mut applied = Applied::default();
    let mut occupancy: BTreeMap<String, Occupancy> = BTreeMap::new();

    for op in &plan.ops {
        let outcome = match op {
            SyncOp::AddSheet { path, name, file } => {
                apply_add_sheet(project, plan, placer, alloc, &mut occupancy, path, name, file)
            }
            SyncOp::RemoveSheet { file, .. } => apply_remove_sheet(project, file),
            SyncOp::AddComponent { path, component } => apply_add_component(
                project,
                plan,
                placer,
                alloc,
                &mut occupancy,
                path,
                component,
            ),
            SyncOp::RemoveComponent {
                path, reference, ..
            } => apply_remove_component(project, plan, path, reference),
            SyncOp::UpdateComponentField {
                path,
                reference,
                field,
                new,
                ..
            } => apply_update_field(project, plan, path, reference, *field, new.as_deref()),
            SyncOp::RebindNet {
                path,
                reference,
                pin,
                new_net,
                ..
            } => apply_rebind_net(project, plan, path, reference, pin, new_net.as_deref()),
        };
        match outcome {
            Ok(()) => applied.ops.push(op.clone()),
            Err(warning) => {
                log::warn!("{warning}");
                applied.warnings.push(warning);
            }
        }
    }

    applied
}

fn scope_file<'a>(plan: &'a SyncPlan, path: &SheetPath) -> Result<&'a str, String> {
    plan.files
        .get(path)
        .map(String::as_str)
        .ok_or_else(|| format!("no sheet file recorded for scope {path}"))
}

fn scope_doc<'a>(
    project: &'a mut Project,
    plan: &SyncPlan,
    path: &SheetPath,
) -> Result<&'a mut SheetDoc, String> {
    let file = scope_file(plan, path)?.to_owned();
    project
        .sheet_mut(&file)
        .ok_or_else(|| format!("sheet file {file} is not loaded"))
}

/// Like [`scope_doc`], but regenerates the sheet when its file went missing
/// on disk: additions into an absent branch recreate it.
fn scope_doc_or_create<'a>(
    project: &'a mut Project,
    plan: &SyncPlan,
    path: &SheetPath,
) -> Result<&'a mut SheetDoc, String> {
    let file = scope_file(plan, path)?.to_owned();
    Ok(project.create_sheet(&file))
}

fn occupancy_of<'a>(
    occupancy: &'a mut BTreeMap<String, Occupancy>,
    doc: &SheetDoc,
) -> &'a mut Occupancy {
    occupancy
        .entry(doc.file_name.clone())
        .or_insert_with(|| Occupancy {
            symbols: symbol::symbols(&doc.doc).len(),
            sheets: symbol::sheet_records(&doc.doc).len(),
        })
}

#[allow(clippy::too_many_arguments)]
fn apply_add_sheet(
    project: &mut Project,
    plan: &SyncPlan,
    placer: &dyn Placer,
    alloc: &IdentifierAllocator,
    occupancy: &mut BTreeMap<String, Occupancy>,
    path: &SheetPath,
    name: &str,
    file: &str,
) -> Result<(), String> {
    let parent = path
        .parent()
        .ok_or_else(|| format!("cannot add a sheet at the root path {path}"))?;
    let parent_doc = scope_doc(project, plan, &parent)?;

    let occ = occupancy_of(occupancy, parent_doc);
    let position = placer.place_sheet(occ);
    occ.sheets += 1;

    let id = alloc.mint_id();
    let record = symbol::emit_sheet_record(name, file, position, id);
    parent_doc.append_node(&record);
    project.create_sheet(file);
    log::info!("adding sheet {path} ({file})");
    Ok(())
}

fn apply_remove_sheet(project: &mut Project, file: &str) -> Result<(), String> {
    // The record lives in whichever loaded sheet references this file.
    let owner = project
        .sheets()
        .find(|doc| symbol::find_sheet_record(&doc.doc, file).is_some())
        .map(|doc| doc.file_name.clone());
    let Some(owner) = owner else {
        return Err(format!("no sheet record found for {file}, skipping removal"));
    };
    let doc = project
        .sheet_mut(&owner)
        .expect("owner doc was just found");
    let span = symbol::find_sheet_record(&doc.doc, file)
        .map(Sexpr::span)
        .expect("record was just found");
    doc.delete_node(span);
    project.remove_sheet(file);
    log::info!("removing sheet file {file}");
    Ok(())
}

fn apply_add_component(
    project: &mut Project,
    plan: &SyncPlan,
    placer: &dyn Placer,
    alloc: &IdentifierAllocator,
    occupancy: &mut BTreeMap<String, Occupancy>,
    path: &SheetPath,
    component: &crate::canonical::CanonicalComponent,
) -> Result<(), String> {
    // Scoped uniqueness: the same designator may exist on other sheets.
    let key = format!("{path}::{}", component.reference);
    if !alloc.reserve(&key) {
        return Err(format!(
            "reference {} already in use in scope {path}, skipping addition",
            component.reference
        ));
    }

    let doc = scope_doc_or_create(project, plan, path)?;
    let occ = occupancy_of(occupancy, doc);
    let position = placer.place_component(occ);
    occ.symbols += 1;

    let id = alloc.mint_id();
    let node = symbol::emit_symbol(
        &component.reference,
        &component.symbol_id,
        component.value.as_deref(),
        component.footprint.as_deref(),
        component.net_bindings.iter().cloned(),
        position,
        id,
    );
    doc.append_node(&node);
    log::info!("adding component {path}/{}", component.reference);
    Ok(())
}

fn apply_remove_component(
    project: &mut Project,
    plan: &SyncPlan,
    path: &SheetPath,
    reference: &str,
) -> Result<(), String> {
    let doc = scope_doc(project, plan, path)?;
    let span = symbol::find_symbol(&doc.doc, reference).map(Sexpr::span);
    let Some(span) = span else {
        return Err(format!("component {path}/{reference} not found, skipping removal"));
    };
    doc.delete_node(span);
    log::info!("removing component {path}/{reference}");
    Ok(())
}

fn apply_update_field(
    project: &mut Project,
    plan: &SyncPlan,
    path: &SheetPath,
    reference: &str,
    field: ComponentField,
    new: Option<&str>,
) -> Result<(), String> {
    let doc = scope_doc(project, plan, path)?;

    enum Edit {
        Replace(Span),
        InsertAfter(Span, Sexpr),
        DeleteNode(Span),
    }

    let edit = {
        let Some(node) = symbol::find_symbol(&doc.doc, reference) else {
            return Err(format!("component {path}/{reference} not found, skipping update"));
        };
        match (field, new) {
            (ComponentField::SymbolId, Some(_)) => symbol::lib_id_value_span(node)
                .map(Edit::Replace)
                .ok_or_else(|| format!("component {path}/{reference} has no lib_id to update"))?,
            (ComponentField::SymbolId, None) => {
                return Err(format!("refusing to clear the symbol id of {path}/{reference}"));
            }
            (field, new) => {
                let key = match field {
                    ComponentField::Value => "Value",
                    ComponentField::Footprint => "Footprint",
                    ComponentField::SymbolId => unreachable!("handled above"),
                };
                match (symbol::property_value_span(node, key), new) {
                    (Some(span), Some(_)) => Edit::Replace(span),
                    (None, Some(value)) => {
                        // Property absent so far: add it after an existing
                        // anchor line inside the symbol.
                        let anchor = property_anchor(node)
                            .ok_or_else(|| format!("component {path}/{reference} has no anchor node"))?;
                        Edit::InsertAfter(anchor, symbol::property_node(key, value))
                    }
                    (Some(_), None) => {
                        let span = symbol::property_node_span(node, key)
                            .expect("value span implies node span");
                        Edit::DeleteNode(span)
                    }
                    (None, None) => return Ok(()),
                }
            }
        }
    };

    match edit {
        Edit::Replace(span) => doc
            .patches_mut()
            .replace_string(span, new.expect("replace always has a value")),
        Edit::InsertAfter(anchor, prop) => doc.insert_node_after(anchor, &prop),
        Edit::DeleteNode(span) => doc.delete_node(span),
    }
    log::debug!("updating {field:?} of {path}/{reference}");
    Ok(())
}

fn apply_rebind_net(
    project: &mut Project,
    plan: &SyncPlan,
    path: &SheetPath,
    reference: &str,
    pin: &str,
    new_net: Option<&str>,
) -> Result<(), String> {
    let doc = scope_doc(project, plan, path)?;

    enum Edit {
        Replace(Span),
        InsertIntoPin(Span),
        InsertPin(Span),
        DeleteInline(Span),
    }

    let edit = {
        let Some(node) = symbol::find_symbol(&doc.doc, reference) else {
            return Err(format!("component {path}/{reference} not found, skipping rebind"));
        };
        match new_net {
            Some(_) => {
                if let Some(span) = symbol::pin_net_span(node, pin) {
                    Edit::Replace(span)
                } else if let Some(pin_node) = symbol::pin_node(node, pin) {
                    Edit::InsertIntoPin(pin_node.span())
                } else {
                    let anchor = last_pin_or_anchor(node).ok_or_else(|| {
                        format!("component {path}/{reference} has no anchor node")
                    })?;
                    Edit::InsertPin(anchor)
                }
            }
            None => match symbol::pin_net_node_span(node, pin) {
                Some(span) => Edit::DeleteInline(span),
                None => return Ok(()),
            },
        }
    };

    match edit {
        Edit::Replace(span) => doc
            .patches_mut()
            .replace_string(span, new_net.expect("replace always has a net")),
        Edit::InsertIntoPin(pin_span) => {
            let net = new_net.expect("insert always has a net");
            doc.insert_into_list(pin_span, format!(" (net {})", format::quote_string(net)));
        }
        Edit::InsertPin(anchor) => {
            let net = new_net.expect("insert always has a net");
            let pin_node = Sexpr::list(vec![
                Sexpr::sym("pin"),
                Sexpr::string(pin),
                Sexpr::list(vec![Sexpr::sym("net"), Sexpr::string(net)]),
            ]);
            doc.insert_node_after(anchor, &pin_node);
        }
        Edit::DeleteInline(span) => doc.delete_inline(span),
    }
    log::debug!("rebinding {path}/{reference} pin {pin}");
    Ok(())
}

/// Anchor line for inserting a new property: the last existing property,
/// falling back to the lib_id node.
fn property_anchor(node: &Sexpr) -> Option<Span> {
    node.find_all("property")
        .last()
        .map(|prop| prop.span())
        .or_else(|| node.find("lib_id").map(Sexpr::span))
}

/// Anchor line for inserting a new pin: the last existing pin, falling back
/// to the property anchor.
fn last_pin_or_anchor(node: &Sexpr) -> Option<Span> {
    node.find_all("pin")
        .last()
        .map(|pin| pin.span())
        .or_else(|| property_anchor(node))
}
