//! Text dumps of loaded code: `--debug dump` and `--debug profiler`.

use std::fmt::Write;

use bytecode::{Op, PcodeRecord};

use crate::loader::LoadedUnit;

/// Disassembly of one loaded unit, operands already rebased to the image.
pub fn disassemble(unit: &LoadedUnit) -> String {
    let mut out = String::new();
    let kind = unit.kind.map_or("(reserved)", |k| k.name());
    let _ = writeln!(out, "unit {} [{kind}] from {}", unit.name, unit.source_name);
    let _ = writeln!(out, "  {} specifiers, {} procedures", unit.table.len(), unit.procs.len());
    for proc in &unit.procs {
        let _ = writeln!(
            out,
            "  procedure {} at @b{} area {}..{}",
            proc.name,
            proc.entry,
            proc.area_start,
            proc.area_start + proc.area_len
        );
    }
    section(&mut out, "init", &unit.init);
    section(&mut out, "body", &unit.body);
    out
}

fn section(out: &mut String, title: &str, code: &[PcodeRecord]) {
    if code.is_empty() {
        return;
    }
    let _ = writeln!(out, "  {title}:");
    for (at, record) in code.iter().enumerate() {
        let _ = writeln!(out, "  {at:>6}  {:>4}  {record}", record.pos.line);
    }
}

/// Executed opcode counts, most frequent first.
pub fn profile_report(counts: &[u64]) -> String {
    let mut rows: Vec<(Op, u64)> = counts
        .iter()
        .enumerate()
        .filter(|(_, n)| **n > 0)
        .filter_map(|(i, n)| Op::try_from(i as u16).ok().map(|op| (op, *n)))
        .collect();
    rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.name().cmp(b.0.name())));
    let total: u64 = rows.iter().map(|(_, n)| n).sum();
    let mut out = String::from("opcode profile\n");
    for (op, n) in rows {
        let _ = writeln!(out, "  {:<12} {n:>10}", op.name());
    }
    let _ = writeln!(out, "  {:<12} {total:>10}", "total");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_sorts_by_count() {
        let mut counts = vec![0; Op::COUNT];
        counts[Op::Add as usize] = 3;
        counts[Op::Go as usize] = 7;
        let report = profile_report(&counts);
        let lines: Vec<&str> = report.lines().collect();
        assert!(lines[1].trim_start().starts_with("go"));
        assert!(lines[2].trim_start().starts_with("add"));
        assert!(lines[3].ends_with("10"));
    }
}
