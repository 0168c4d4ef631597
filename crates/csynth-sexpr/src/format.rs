//! Rendering s-expression trees as KiCad-style indented text.
//!
//! Only used for nodes this engine creates (new symbols, sheet records, fresh
//! sheet files). Existing file text is never re-rendered; it is patched in
//! place through [`crate::PatchSet`].

use crate::Sexpr;

/// Lists whose compact form is at most this wide stay on one line.
const INLINE_WIDTH: usize = 72;

/// Render a node as a complete file body: multi-line, tab-indented,
/// trailing newline.
pub fn render(node: &Sexpr) -> String {
    let mut out = String::new();
    write_node(node, 0, &mut out);
    out.push('\n');
    out
}

/// Render a node for insertion inside an existing file at `indent` tabs.
/// The result starts with the indent and ends with a newline.
pub fn render_indented(node: &Sexpr, indent: usize) -> String {
    let mut out = String::new();
    for _ in 0..indent {
        out.push('\t');
    }
    write_node(node, indent, &mut out);
    out.push('\n');
    out
}

fn write_node(node: &Sexpr, indent: usize, out: &mut String) {
    let Some(items) = node.as_list() else {
        out.push_str(&atom_text(node));
        return;
    };

    let flat = compact(node);
    if !items.iter().any(|item| item.as_list().is_some()) || flat.len() <= INLINE_WIDTH {
        out.push_str(&flat);
        return;
    }

    // Leading atoms share the head line; everything after the first sublist
    // gets its own line.
    out.push('(');
    let head = items.iter().take_while(|i| i.as_list().is_none()).count();
    for (idx, item) in items[..head].iter().enumerate() {
        if idx > 0 {
            out.push(' ');
        }
        out.push_str(&atom_text(item));
    }
    for item in &items[head..] {
        out.push('\n');
        for _ in 0..=indent {
            out.push('\t');
        }
        write_node(item, indent + 1, out);
    }
    out.push('\n');
    for _ in 0..indent {
        out.push('\t');
    }
    out.push(')');
}

/// Single-line rendering of a node.
pub fn compact(node: &Sexpr) -> String {
    match node {
        Sexpr::List(items, _) => {
            let mut out = String::from("(");
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(' ');
                }
                out.push_str(&compact(item));
            }
            out.push(')');
            out
        }
        _ => atom_text(node),
    }
}

fn atom_text(node: &Sexpr) -> String {
    match node {
        Sexpr::Sym(s, _) | Sexpr::Num(s, _) => s.clone(),
        Sexpr::Str(s, _) => quote_string(s),
        Sexpr::List(..) => unreachable!("atom_text called on a list"),
    }
}

/// Quote and escape a string literal.
pub fn quote_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out.push('"');
    out
}

/// Shortest lexeme for a float: `4.0` renders as `4`, `4.70` as `4.7`.
pub(crate) fn trim_float(f: f64) -> String {
    let mut s = f.to_string();
    if s.contains('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
    }
    s
}
