//! Managed-identity tracking.
//!
//! The engine's ownership marker lives inside the project files themselves,
//! as a dedicated property on every symbol and sheet record it created.
//! Managed status is read from that marker and nowhere else, never from
//! reference patterns, positions, or any other heuristic.

use std::collections::BTreeSet;

use csynth_kicad::{Project, symbol};
use csynth_sch::ManagedId;

/// All managed ids currently embedded in the project.
pub fn read_tracked_ids(project: &Project) -> BTreeSet<ManagedId> {
    let mut ids = BTreeSet::new();
    for doc in project.sheets() {
        for node in symbol::symbols(&doc.doc) {
            if let Some(id) = symbol::sync_id(node) {
                ids.insert(id);
            }
        }
        for record in symbol::sheet_records(&doc.doc) {
            if let Some(id) = symbol::sync_id(record) {
                ids.insert(id);
            }
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use csynth_kicad::SheetDoc;

    #[test]
    fn reads_ids_from_symbols_and_sheet_records() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("demo");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("demo.kicad_sch"),
            r#"(kicad_sch
	(version 20240101)
	(symbol
		(lib_id "Device:R")
		(property "Reference" "R1")
		(property "Sync_Id" "0b7e59a1-7a4b-4b7e-8c26-0f0a5a9cc001")
	)
	(symbol
		(lib_id "Device:R")
		(property "Reference" "R2")
	)
	(sheet
		(property "Sheetname" "Power")
		(property "Sheetfile" "power.kicad_sch")
		(property "Sync_Id" "0b7e59a1-7a4b-4b7e-8c26-0f0a5a9cc002")
	)
)
"#,
        )
        .unwrap();
        std::fs::write(
            dir.join("power.kicad_sch"),
            "(kicad_sch\n\t(version 20240101)\n)\n",
        )
        .unwrap();

        let project = Project::load(&dir).unwrap();
        let ids = read_tracked_ids(&project);
        assert_eq!(ids.len(), 2, "unmanaged R2 contributes nothing");
    }

    #[test]
    fn unmarked_project_has_no_tracked_ids() {
        let doc = SheetDoc::parse(
            "x.kicad_sch",
            "(kicad_sch\n\t(symbol (lib_id \"Device:R\") (property \"Reference\" \"R1\"))\n)\n"
                .to_owned(),
        )
        .unwrap();
        // No Sync_Id property anywhere: nothing is considered managed, no
        // matter how machine-generated the element looks.
        assert!(symbol::sync_id(symbol::symbols(&doc.doc)[0]).is_none());
    }
}
