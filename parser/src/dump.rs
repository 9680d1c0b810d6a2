//! Indented tree dump of a parsed unit.

use std::fmt::Write;

use crate::ast::{AstArena, Block, Decl, Stmt, StmtKind, Unit, expr_to_string};

pub fn dump_unit(arena: &AstArena, unit: &Unit) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} {}", unit.header.keyword(), unit.name);
    for (name, _) in &unit.uses {
        let _ = writeln!(out, "  use {name}");
    }
    for (name, _) in &unit.inherits {
        let _ = writeln!(out, "  inherit {name}");
    }
    dump_block(arena, &unit.block, 1, &mut out);
    out
}

fn dump_block(arena: &AstArena, block: &Block, depth: usize, out: &mut String) {
    let pad = "  ".repeat(depth);
    for decl in &block.decls {
        match decl {
            Decl::Var(vars) | Decl::Const(vars) => {
                let word = if matches!(decl, Decl::Var(_)) {
                    "var"
                } else {
                    "const"
                };
                for var in vars {
                    match var.init {
                        Some(init) => {
                            let init = expr_to_string(arena, init);
                            let _ = writeln!(out, "{pad}{word} {} := {init}", var.name);
                        }
                        None => {
                            let _ = writeln!(out, "{pad}{word} {}", var.name);
                        }
                    }
                }
            }
            Decl::Sel(names) => {
                for (name, _) in names {
                    let _ = writeln!(out, "{pad}sel {name}");
                }
            }
            Decl::Proc(proc) => {
                let formals: Vec<String> = proc
                    .formals
                    .iter()
                    .map(|f| format!("{:?} {}", f.mode, f.name).to_lowercase())
                    .collect();
                let star = if proc.var_args { "(*)" } else { "" };
                let _ = writeln!(out, "{pad}procedure {}({}{star})", proc.name, formals.join(", "));
                if let Some(body) = &proc.body {
                    dump_block(arena, body, depth + 1, out);
                }
            }
        }
    }
    dump_stmts(arena, &block.stmts, depth, out);
}

fn dump_stmts(arena: &AstArena, stmts: &[Stmt], depth: usize, out: &mut String) {
    let pad = "  ".repeat(depth);
    let e = |id| expr_to_string(arena, id);
    for stmt in stmts {
        let line = stmt.span.start.line;
        match &stmt.kind {
            StmtKind::Assign { target, value } => {
                let _ = writeln!(out, "{pad}[{line}] {} := {}", e(*target), e(*value));
            }
            StmtKind::AssignOp { target, op, value } => {
                let (target, value) = (e(*target), e(*value));
                let _ = writeln!(out, "{pad}[{line}] {target} {}:= {value}", op.symbol());
            }
            StmtKind::From { kind, target, source } => {
                let _ = writeln!(out, "{pad}[{line}] {} {kind:?} {}", e(*target), e(*source));
            }
            StmtKind::Expr(expr) => {
                let _ = writeln!(out, "{pad}[{line}] {}", e(*expr));
            }
            StmtKind::If { arms, otherwise } => {
                for (i, (cond, body)) in arms.iter().enumerate() {
                    let word = if i == 0 { "if" } else { "elseif" };
                    let _ = writeln!(out, "{pad}[{line}] {word} {}", e(*cond));
                    dump_stmts(arena, body, depth + 1, out);
                }
                if !otherwise.is_empty() {
                    let _ = writeln!(out, "{pad}else");
                    dump_stmts(arena, otherwise, depth + 1, out);
                }
            }
            StmtKind::While { cond, body } | StmtKind::Until { cond, body } => {
                let word = match stmt.kind {
                    StmtKind::While { .. } => "while",
                    _ => "until",
                };
                let _ = writeln!(out, "{pad}[{line}] {word} {}", e(*cond));
                dump_stmts(arena, body, depth + 1, out);
            }
            StmtKind::Loop { body } => {
                let _ = writeln!(out, "{pad}[{line}] loop");
                dump_stmts(arena, body, depth + 1, out);
            }
            StmtKind::For { iters, cond, body } => {
                let its: Vec<String> = iters
                    .iter()
                    .map(|it| format!("{} in {}", e(it.target), e(it.source)))
                    .collect();
                let cond = cond.map_or(String::new(), |c| format!(" | {}", e(c)));
                let _ = writeln!(out, "{pad}[{line}] for {}{cond}", its.join(", "));
                dump_stmts(arena, body, depth + 1, out);
            }
            StmtKind::Case {
                subject,
                arms,
                otherwise,
            } => {
                let _ = writeln!(out, "{pad}[{line}] case {}", e(*subject));
                for (values, body) in arms {
                    let values: Vec<String> = values.iter().map(|v| e(*v)).collect();
                    let _ = writeln!(out, "{pad}  ({}):", values.join(", "));
                    dump_stmts(arena, body, depth + 2, out);
                }
                if !otherwise.is_empty() {
                    let _ = writeln!(out, "{pad}  otherwise:");
                    dump_stmts(arena, otherwise, depth + 2, out);
                }
            }
            StmtKind::Exit => {
                let _ = writeln!(out, "{pad}[{line}] exit");
            }
            StmtKind::Continue => {
                let _ = writeln!(out, "{pad}[{line}] continue");
            }
            StmtKind::Return(value) => {
                let value = value.map_or(String::new(), |v| format!(" {}", e(v)));
                let _ = writeln!(out, "{pad}[{line}] return{value}");
            }
            StmtKind::Stop => {
                let _ = writeln!(out, "{pad}[{line}] stop");
            }
        }
    }
}
