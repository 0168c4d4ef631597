//! The persisted schematic project: a directory of `.kicad_sch`-style
//! s-expression files, one root sheet plus one file per subcircuit sheet.
//!
//! A [`Project`] is loaded fresh for every sync. Mutation happens only
//! through byte-range patches accumulated on each [`SheetDoc`]; rendering a
//! doc replays its patches against the original source text, so every byte
//! the sync engine did not explicitly touch survives unchanged. Saving is
//! write-to-temporary-then-rename per file, and files whose rendered text
//! equals their loaded text are not rewritten at all.

pub mod symbol;

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};

use atomicwrites::{AtomicFile, OverwriteBehavior};
use csynth_sexpr::{ParseError, PatchSet, Sexpr, Span, format, parse};
use thiserror::Error;

/// File extension of schematic sheets.
pub const SHEET_EXT: &str = "kicad_sch";

/// Generator string stamped into sheets this engine creates.
pub const GENERATOR: &str = "circuit-synth";

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("project path not found: {0}")]
    NotFound(PathBuf),

    #[error("not a schematic project: {0}")]
    NotAProject(PathBuf),

    #[error("failed to parse {file}")]
    Parse {
        file: String,
        #[source]
        source: ParseError,
    },

    #[error("i/o error on {file}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },

    // No multi-file transaction exists: earlier files in this save may
    // already be on disk. The caller must re-run from the pre-sync state.
    #[error("failed to save {file}; project may be partially written, re-run from the pre-sync state")]
    PartialWrite {
        file: String,
        #[source]
        source: std::io::Error,
    },
}

/// One sheet file: original text, parsed tree, and pending edits.
#[derive(Debug)]
pub struct SheetDoc {
    pub file_name: String,
    pub source: String,
    pub doc: Sexpr,
    patches: PatchSet,
    created: bool,
}

impl SheetDoc {
    pub fn parse(file_name: impl Into<String>, source: String) -> Result<Self, ProjectError> {
        let file_name = file_name.into();
        let doc = parse(&source).map_err(|source| ProjectError::Parse {
            file: file_name.clone(),
            source,
        })?;
        Ok(SheetDoc {
            file_name,
            source,
            doc,
            patches: PatchSet::new(),
            created: false,
        })
    }

    /// A fresh, empty sheet that does not exist on disk yet.
    pub fn new_empty(file_name: impl Into<String>) -> Self {
        let source = empty_sheet_text();
        let doc = parse(&source).expect("empty sheet template parses");
        SheetDoc {
            file_name: file_name.into(),
            source,
            doc,
            patches: PatchSet::new(),
            created: true,
        }
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn is_dirty(&self) -> bool {
        self.created || !self.patches.is_empty()
    }

    pub fn patches_mut(&mut self) -> &mut PatchSet {
        &mut self.patches
    }

    /// Original text with all pending patches applied.
    pub fn render(&self) -> String {
        self.patches.apply(&self.source)
    }

    /// Append a node at the end of the sheet, before the root closing paren.
    pub fn append_node(&mut self, node: &Sexpr) {
        let close = self.doc.span().end.saturating_sub(1);
        let mut text = format::render_indented(node, 1);
        // Keep the closing paren on its own line.
        if !self.source[..close].ends_with('\n') {
            text.insert(0, '\n');
        }
        self.patches.insert(close, text);
    }

    /// Insert a node on its own line after `anchor`, copying the indent of
    /// the line `anchor` starts on.
    pub fn insert_node_after(&mut self, anchor: Span, node: &Sexpr) {
        let bytes = self.source.as_bytes();
        let line_start = self.source[..anchor.start]
            .rfind('\n')
            .map(|i| i + 1)
            .unwrap_or(0);
        let mut indent = String::new();
        for &b in &bytes[line_start..anchor.start] {
            if matches!(b, b' ' | b'\t') {
                indent.push(b as char);
            } else {
                break;
            }
        }
        let text = format!("\n{indent}{}", format::compact(node));
        self.patches.insert(anchor.end, text);
    }

    /// Insert raw text just before the closing paren of a list node.
    pub fn insert_into_list(&mut self, list_span: Span, text: String) {
        self.patches.insert(list_span.end.saturating_sub(1), text);
    }

    /// Delete a child node plus one preceding space, for nodes that sit
    /// inline within their parent.
    pub fn delete_inline(&mut self, span: Span) {
        let start = if span.start > 0 && self.source.as_bytes()[span.start - 1] == b' ' {
            span.start - 1
        } else {
            span.start
        };
        self.patches.delete(Span::new(start, span.end));
    }

    /// Delete a node together with its line's leading indent and trailing
    /// newline, so no blank hole is left behind.
    pub fn delete_node(&mut self, span: Span) {
        let bytes = self.source.as_bytes();
        let mut start = span.start;
        while start > 0 && matches!(bytes[start - 1], b' ' | b'\t') {
            start -= 1;
        }
        let mut end = span.end;
        while end < bytes.len() && matches!(bytes[end], b' ' | b'\t') {
            end += 1;
        }
        if end < bytes.len() && bytes[end] == b'\n' {
            end += 1;
        }
        self.patches.delete(Span::new(start, end));
    }
}

/// A loaded schematic project directory.
#[derive(Debug)]
pub struct Project {
    pub dir: PathBuf,
    pub root_file: String,
    sheets: BTreeMap<String, SheetDoc>,
    /// Sheet files referenced by a sheet record but absent on disk.
    pub missing: Vec<String>,
    deleted: BTreeSet<String>,
}

impl Project {
    /// Load a project from a directory (or a path to its root sheet file).
    ///
    /// A directory without a root sheet loads as an empty project whose root
    /// is created on save: first-time generation bootstraps this way. A path
    /// that does not exist, or a root sheet that does not parse, is invalid.
    pub fn load(path: &Path) -> Result<Self, ProjectError> {
        let (dir, root_file) = resolve_root(path)?;
        let mut project = Project {
            dir,
            root_file: root_file.clone(),
            sheets: BTreeMap::new(),
            missing: Vec::new(),
            deleted: BTreeSet::new(),
        };

        let root_path = project.dir.join(&root_file);
        if root_path.exists() {
            project.load_sheet_files(root_file)?;
        } else {
            log::debug!("no root sheet on disk, bootstrapping {root_file}");
            project
                .sheets
                .insert(root_file.clone(), SheetDoc::new_empty(root_file));
        }
        Ok(project)
    }

    /// Breadth-first load of a sheet file and everything its sheet records
    /// reference. Each file loads once even if instantiated repeatedly; a
    /// referenced file absent on disk is recorded and its branch skipped.
    fn load_sheet_files(&mut self, root: String) -> Result<(), ProjectError> {
        let mut queue = VecDeque::from([root]);
        while let Some(file_name) = queue.pop_front() {
            if self.sheets.contains_key(&file_name) {
                continue;
            }
            let path = self.dir.join(&file_name);
            if !path.exists() {
                log::warn!("sheet file missing on disk, treating branch as empty: {file_name}");
                self.missing.push(file_name);
                continue;
            }
            let source = std::fs::read_to_string(&path).map_err(|source| ProjectError::Io {
                file: file_name.clone(),
                source,
            })?;
            let doc = SheetDoc::parse(file_name.clone(), source)?;
            for record in symbol::sheet_records(&doc.doc) {
                if let Some(child) = symbol::sheet_record_file(record) {
                    queue.push_back(child);
                }
            }
            self.sheets.insert(file_name, doc);
        }
        Ok(())
    }

    pub fn root(&self) -> &SheetDoc {
        &self.sheets[&self.root_file]
    }

    pub fn sheet(&self, file_name: &str) -> Option<&SheetDoc> {
        self.sheets.get(file_name)
    }

    pub fn sheet_mut(&mut self, file_name: &str) -> Option<&mut SheetDoc> {
        self.sheets.get_mut(file_name)
    }

    /// All loaded sheets, root included, in file-name order.
    pub fn sheets(&self) -> impl Iterator<Item = &SheetDoc> {
        self.sheets.values()
    }

    /// Register a brand-new sheet file.
    pub fn create_sheet(&mut self, file_name: &str) -> &mut SheetDoc {
        self.deleted.remove(file_name);
        self.sheets
            .entry(file_name.to_owned())
            .or_insert_with(|| SheetDoc::new_empty(file_name))
    }

    /// Mark a sheet file for deletion on save.
    pub fn remove_sheet(&mut self, file_name: &str) {
        if self.sheets.remove(file_name).is_some() {
            self.deleted.insert(file_name.to_owned());
        }
    }

    /// Write every changed sheet via temp-file-then-rename and delete the
    /// removed ones. Unchanged files are left untouched on disk.
    pub fn save(&self) -> Result<Vec<String>, ProjectError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| ProjectError::Io {
            file: self.dir.display().to_string(),
            source,
        })?;

        let mut written = Vec::new();
        for doc in self.sheets.values() {
            let rendered = doc.render();
            if !doc.created && rendered == doc.source {
                continue;
            }
            let path = self.dir.join(&doc.file_name);
            let file = AtomicFile::new(&path, OverwriteBehavior::AllowOverwrite);
            file.write(|f| f.write_all(rendered.as_bytes()))
                .map_err(|err| ProjectError::PartialWrite {
                    file: doc.file_name.clone(),
                    source: match err {
                        atomicwrites::Error::Internal(e) | atomicwrites::Error::User(e) => e,
                    },
                })?;
            log::debug!("wrote {}", doc.file_name);
            written.push(doc.file_name.clone());
        }

        for file_name in &self.deleted {
            let path = self.dir.join(file_name);
            if path.exists() {
                std::fs::remove_file(&path).map_err(|source| ProjectError::PartialWrite {
                    file: file_name.clone(),
                    source,
                })?;
                log::debug!("deleted {file_name}");
            }
        }
        Ok(written)
    }
}

fn resolve_root(path: &Path) -> Result<(PathBuf, String), ProjectError> {
    if path.is_file() {
        if path.extension().and_then(|e| e.to_str()) != Some(SHEET_EXT) {
            return Err(ProjectError::NotAProject(path.to_path_buf()));
        }
        let dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        let file = path
            .file_name()
            .expect("file path has a file name")
            .to_string_lossy()
            .into_owned();
        return Ok((dir, file));
    }
    if !path.is_dir() {
        return Err(ProjectError::NotFound(path.to_path_buf()));
    }

    let dir_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| ProjectError::NotAProject(path.to_path_buf()))?;
    let candidate = format!("{dir_name}.{SHEET_EXT}");
    if path.join(&candidate).exists() {
        return Ok((path.to_path_buf(), candidate));
    }

    // Fall back to a lone sheet file with any name.
    let mut sheet_files: Vec<String> = std::fs::read_dir(path)
        .map_err(|source| ProjectError::Io {
            file: path.display().to_string(),
            source,
        })?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.ends_with(&format!(".{SHEET_EXT}")))
        .collect();
    sheet_files.sort();
    match sheet_files.len() {
        0 => Ok((path.to_path_buf(), candidate)),
        1 => Ok((path.to_path_buf(), sheet_files.remove(0))),
        // Several sheets but none named after the directory: cannot tell
        // which is the root.
        _ => Err(ProjectError::NotAProject(path.to_path_buf())),
    }
}

/// Template for a sheet this engine creates.
fn empty_sheet_text() -> String {
    let node = Sexpr::list(vec![
        Sexpr::sym("kicad_sch"),
        Sexpr::list(vec![Sexpr::sym("version"), Sexpr::int(20240101)]),
        Sexpr::list(vec![Sexpr::sym("generator"), Sexpr::string(GENERATOR)]),
        Sexpr::list(vec![
            Sexpr::sym("uuid"),
            Sexpr::string(uuid::Uuid::new_v4().to_string()),
        ]),
        Sexpr::list(vec![Sexpr::sym("paper"), Sexpr::string("A4")]),
    ]);
    format::render(&node)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: &str = r#"(kicad_sch
	(version 20240101)
	(generator "eeschema")
	(paper "A4")
	(symbol
		(lib_id "Device:R")
		(at 50.8 63.5 0)
		(property "Reference" "R1")
		(property "Value" "10k")
	)
	(sheet
		(at 100 40)
		(property "Sheetname" "Power")
		(property "Sheetfile" "power.kicad_sch")
	)
)
"#;

    const CHILD: &str = r#"(kicad_sch
	(version 20240101)
	(generator "eeschema")
	(paper "A4")
)
"#;

    fn write_project(dir: &Path) {
        let project_dir = dir.join("demo");
        std::fs::create_dir_all(&project_dir).unwrap();
        std::fs::write(project_dir.join("demo.kicad_sch"), ROOT).unwrap();
        std::fs::write(project_dir.join("power.kicad_sch"), CHILD).unwrap();
    }

    #[test]
    fn load_follows_sheet_records() {
        let tmp = tempfile::tempdir().unwrap();
        write_project(tmp.path());

        let project = Project::load(&tmp.path().join("demo")).unwrap();
        assert_eq!(project.root_file, "demo.kicad_sch");
        assert!(project.sheet("power.kicad_sch").is_some());
        assert!(project.missing.is_empty());
    }

    #[test]
    fn missing_child_is_recorded_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let project_dir = tmp.path().join("demo");
        std::fs::create_dir_all(&project_dir).unwrap();
        std::fs::write(project_dir.join("demo.kicad_sch"), ROOT).unwrap();

        let project = Project::load(&project_dir).unwrap();
        assert_eq!(project.missing, vec!["power.kicad_sch".to_owned()]);
        assert!(project.sheet("power.kicad_sch").is_none());
    }

    #[test]
    fn empty_dir_bootstraps_root() {
        let tmp = tempfile::tempdir().unwrap();
        let project_dir = tmp.path().join("fresh");
        std::fs::create_dir_all(&project_dir).unwrap();

        let project = Project::load(&project_dir).unwrap();
        assert_eq!(project.root_file, "fresh.kicad_sch");
        assert!(project.root().is_created());
    }

    #[test]
    fn nonexistent_path_is_not_found() {
        assert!(matches!(
            Project::load(Path::new("/definitely/not/here")),
            Err(ProjectError::NotFound(_))
        ));
    }

    #[test]
    fn unparseable_root_is_a_parse_error() {
        let tmp = tempfile::tempdir().unwrap();
        let project_dir = tmp.path().join("bad");
        std::fs::create_dir_all(&project_dir).unwrap();
        std::fs::write(project_dir.join("bad.kicad_sch"), "(kicad_sch").unwrap();

        assert!(matches!(
            Project::load(&project_dir),
            Err(ProjectError::Parse { .. })
        ));
    }

    #[test]
    fn save_skips_unchanged_files() {
        let tmp = tempfile::tempdir().unwrap();
        write_project(tmp.path());
        let project_dir = tmp.path().join("demo");

        let project = Project::load(&project_dir).unwrap();
        let written = project.save().unwrap();
        assert!(written.is_empty(), "no edits, nothing rewritten");
        assert_eq!(
            std::fs::read_to_string(project_dir.join("demo.kicad_sch")).unwrap(),
            ROOT
        );
    }

    #[test]
    fn append_and_delete_keep_surrounding_text() {
        let mut doc = SheetDoc::parse("t.kicad_sch", ROOT.to_owned()).unwrap();
        let span = doc.doc.find("sheet").unwrap().span();
        doc.delete_node(span);
        let rendered = doc.render();
        assert!(!rendered.contains("Sheetname"));
        assert!(rendered.contains("(property \"Reference\" \"R1\")"));
        assert!(!rendered.contains("\n\n\t"), "no blank hole left behind");
    }

    #[test]
    fn append_node_lands_before_closing_paren() {
        let mut doc = SheetDoc::parse("t.kicad_sch", CHILD.to_owned()).unwrap();
        doc.append_node(&Sexpr::list(vec![
            Sexpr::sym("symbol"),
            Sexpr::list(vec![Sexpr::sym("lib_id"), Sexpr::string("Device:C")]),
        ]));
        let rendered = doc.render();
        assert!(rendered.ends_with("\t(symbol (lib_id \"Device:C\"))\n)\n"));
        csynth_sexpr::parse(&rendered).unwrap();
    }
}
