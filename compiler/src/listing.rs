//! Text reports: the source listing and the `--debug` dumps.

use std::fmt::Write as _;

use bytecode::PcodeRecord;
use library::{SourceText, expand_tabs};

use crate::emit::Emitted;
use crate::error::Diagnostic;
use crate::proctab::ProcId;
use crate::quads::QuadListing;
use crate::unit::CompUnit;

/// Numbered source with each diagnostic printed under its line.
pub fn source_listing(source: &str, tab_width: usize, diagnostics: &[Diagnostic]) -> String {
    let text = SourceText::new(source.as_bytes().to_vec());
    let width = text.line_count().max(1).to_string().len();
    let mut out = String::new();
    for n in 1..=text.line_count() {
        let line = String::from_utf8_lossy(text.line(n).unwrap_or_default());
        let _ = writeln!(out, "{n:>width$}  {}", expand_tabs(&line, tab_width));
        for d in diagnostics.iter().filter(|d| d.pos.line as usize == n) {
            let column = d.pos.column.max(1) as usize;
            let _ = writeln!(out, "{:>width$}  {}^ {}", "", " ".repeat(column - 1), d.error);
        }
    }
    out
}

pub fn symtab_listing(unit: &CompUnit<'_>) -> String {
    let mut out = format!("symbol table of {} `{}`\n", unit.kind, unit.name);
    for (id, symbol) in unit.symtab.iter() {
        let offset = symbol.offset.map_or("-".to_string(), |o| o.to_string());
        let _ = writeln!(
            out,
            "  {:>4}  {:<20} {:<10} unit {:>2}  offset {:>5}  {:?}",
            id.index(),
            symbol.name,
            symbol.kind.name(),
            symbol.unit_num,
            offset,
            symbol.flags
        );
    }
    if !unit.slots.is_empty() {
        out.push_str("slots\n");
        for entry in unit.slots.iter() {
            let _ = writeln!(
                out,
                "  {:<20} #{:<4} {}{}{}",
                entry.name,
                entry.number.map_or("-".to_string(), |n| n.to_string()),
                if entry.is_method { "method" } else { "var" },
                if entry.is_public { " public" } else { "" },
                if entry.in_class { "" } else { " (reference)" },
            );
        }
    }
    out
}

pub fn alloc_listing(unit: &CompUnit<'_>) -> String {
    let mut out = format!("storage of `{}`\n", unit.name);
    let root = unit.procs.get(ProcId::ROOT);
    let _ = writeln!(out, "  unit variables: {}", root.symbols.len());
    for pid in unit.procs.depth_first() {
        let proc = unit.procs.get(pid);
        let _ = writeln!(
            out,
            "  {:<20} {:?} at {}  area {}..{}  ({} formals, {} temps)",
            proc.name,
            proc.kind,
            proc.pos,
            proc.spec_offset,
            proc.spec_offset + proc.spec_count,
            proc.formals.len(),
            proc.temp_count
        );
    }
    out
}

pub fn quad_listing(unit: &CompUnit<'_>) -> String {
    let mut out = String::new();
    let mut scopes = vec![ProcId::ROOT];
    scopes.extend(unit.procs.depth_first());
    for pid in scopes {
        let proc = unit.procs.get(pid);
        let scope = if pid == ProcId::ROOT {
            "unit"
        } else {
            "procedure"
        };
        let _ = writeln!(out, "{scope} `{}`:", proc.name);
        let _ = write!(
            out,
            "{}",
            QuadListing {
                quads: &proc.body,
                symtab: &unit.symtab,
            }
        );
    }
    out
}

fn records(out: &mut String, title: &str, records: &[PcodeRecord]) {
    if records.is_empty() {
        return;
    }
    let _ = writeln!(out, "{title}:");
    for (i, record) in records.iter().enumerate() {
        let _ = writeln!(out, "  {i:>5}  {record}");
    }
}

pub fn code_listing(emitted: &Emitted) -> String {
    let mut out = format!("pcode of `{}`\n", emitted.key);
    records(&mut out, "init", &emitted.init);
    records(&mut out, "slot init", &emitted.slot_init);
    records(&mut out, "body", &emitted.body);
    for proc in &emitted.procs {
        let _ = writeln!(
            out,
            "  proc {:<20} offset {:>4} {:?} entry {} area {}+{}",
            proc.name, proc.offset, proc.kind, proc.entry, proc.spec_offset, proc.spec_count
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SemanticError;
    use bytecode::FilePos;

    #[test]
    fn diagnostics_are_marked_under_their_line() {
        let diagnostics = [Diagnostic {
            file: "t.stl".into(),
            pos: FilePos::new(2, 3),
            error: SemanticError::ReadOnly("c".into()),
        }];
        let text = source_listing("program t;\n  c := 1;\nend t;\n", 8, &diagnostics);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[1].ends_with("c := 1;"));
        assert!(lines[2].contains("^ `c` is read-only"));
        assert_eq!(lines[2].find('^'), Some(5));
    }
}
