//! Quadruple generation.
//!
//! Statements are lowered one at a time into the body of the scope being
//! compiled. Expressions return the operand holding their value; when a
//! destination is supplied and the expression ends in a single quad, that
//! quad writes straight into it.

use bytecode::{BUILTINS, CALL_KEEP_WRITEBACK, CALL_SELF_WRITEBACK, Op};
use library::{SymFlags, SymKind, UnitKind};
use object::{IterKind, LongInt};
use parser::{
    BinOp, ExprId, ExprKind, FormalMode, Former, FromKind, Iter, ProcDecl, Quantifier, Span, Stmt,
    StmtKind, UnOp,
};

use crate::error::{CompileError, SemanticError};
use crate::proctab::{ProcId, ScopeKind};
use crate::quads::{QLabel, QOperand};
use crate::resolve::Binding;
use crate::symtab::SymId;
use crate::unit::{CompUnit, LoopLabels, file_pos};

/// Labels of a nest of iterators opened by [`CompUnit::open_iters`].
struct IterNest {
    /// Head of each iterator, outermost first.
    heads: Vec<QLabel>,
    exit: QLabel,
}

impl IterNest {
    fn innermost(&self) -> QLabel {
        self.heads.last().copied().unwrap_or(self.exit)
    }
}

fn binary_op(op: BinOp) -> Option<Op> {
    Some(match op {
        BinOp::Eq => Op::Eq,
        BinOp::Ne => Op::Ne,
        BinOp::Lt => Op::Lt,
        BinOp::Le => Op::Le,
        BinOp::In => Op::In,
        BinOp::NotIn => Op::NotIn,
        BinOp::Subset => Op::Subset,
        BinOp::Incs => Op::Incs,
        BinOp::Add => Op::Add,
        BinOp::Sub => Op::Sub,
        BinOp::With => Op::With,
        BinOp::Less => Op::Less,
        BinOp::Lessf => Op::Lessf,
        BinOp::Max => Op::Max,
        BinOp::Min => Op::Min,
        BinOp::Mult => Op::Mult,
        BinOp::Div => Op::Div,
        BinOp::IntDiv => Op::IntDiv,
        BinOp::Mod => Op::Mod,
        BinOp::Exp => Op::Exp,
        BinOp::Or | BinOp::And | BinOp::Gt | BinOp::Ge | BinOp::Default => return None,
    })
}

fn unary_op(op: UnOp) -> Op {
    match op {
        UnOp::Neg => Op::Uminus,
        UnOp::Not => Op::Not,
        UnOp::Card => Op::Card,
        UnOp::Arb => Op::Arb,
        UnOp::Domain => Op::Domain,
        UnOp::Range => Op::Range,
        UnOp::Pow => Op::Pow,
    }
}

impl<'a> CompUnit<'a> {
    // ── units and procedures ───────────────────────────────────────

    /// Resolves and generates quads for the whole unit.
    pub fn compile(&mut self) -> Result<(), CompileError> {
        let ast = self.ast;
        self.resolve_header()?;
        if self.is_class() {
            self.declare_initobj();
        }
        let nested = self.declare_block(&ast.block, ProcId::ROOT);
        if let Some(initobj) = self.initobj {
            self.slot_init_len = self.procs.get(initobj).body.len();
        }

        if self.kind.is_spec() {
            if let Some(stmt) = ast.block.stmts.first() {
                self.error(stmt.span, SemanticError::StatementsInSpec(self.kind.name()));
            }
        } else {
            for stmt in &ast.block.stmts {
                self.gen_stmt(stmt);
            }
        }
        self.pos = file_pos(Span::point(ast.span.end));
        match self.kind {
            UnitKind::Program => self.emit(Op::Stop, &[]),
            _ => self.emit(Op::Return, &[QOperand::OMEGA]),
        }
        if let Some(initobj) = self.initobj {
            let saved = self.cur;
            self.cur = initobj;
            self.emit(Op::Return, &[QOperand::OMEGA]);
            self.cur = saved;
        }

        for (pid, decl) in nested {
            self.gen_proc(pid, decl);
        }

        let mut missing: Vec<String> = self
            .spec_literals
            .keys()
            .filter(|name| *name != "initobj")
            .cloned()
            .collect();
        missing.sort();
        for name in missing {
            self.error(ast.span, SemanticError::ForwardReferenceMissing(name));
        }

        self.slots.number(self.slot_numbers);
        let numbered: Vec<(SymId, u32)> =
            self.slots.iter().filter_map(|e| e.symbol.zip(e.number)).collect();
        for (id, number) in numbered {
            self.symtab.get_mut(id).slot_num = Some(number);
        }
        Ok(())
    }

    fn gen_proc(&mut self, pid: ProcId, decl: &'a ProcDecl) {
        let Some(body) = &decl.body else {
            return;
        };
        let saved = self.cur;
        self.cur = pid;
        self.pos = file_pos(decl.span);
        let nested = self.declare_block(body, pid);
        for stmt in &body.stmts {
            self.gen_stmt(stmt);
        }
        self.gen_return(None);
        for (child, decl) in nested {
            self.gen_proc(child, decl);
        }
        self.cur = saved;
    }

    fn gen_return(&mut self, value: Option<ExprId>) {
        let value = match value {
            Some(e) => self.gen_expr(e, None),
            None => QOperand::OMEGA,
        };
        match self.procs.get(self.cur).kind {
            ScopeKind::Unit if self.kind == UnitKind::Program => self.emit(Op::Stop, &[]),
            ScopeKind::Unit | ScopeKind::Initobj => self.emit(Op::Return, &[QOperand::OMEGA]),
            ScopeKind::Procedure | ScopeKind::Method => {
                let formals = self.procs.get(self.cur).formals.clone();
                for formal in formals {
                    if self.symtab.get(formal).flags.contains(SymFlags::WPARAM) {
                        self.emit(Op::Push1, &[QOperand::Sym(formal)]);
                    }
                }
                self.emit(Op::Return, &[value]);
            }
        }
    }

    // ── statements ─────────────────────────────────────────────────

    fn gen_block(&mut self, stmts: &'a [Stmt]) {
        for stmt in stmts {
            self.gen_stmt(stmt);
        }
    }

    pub fn gen_stmt(&mut self, stmt: &'a Stmt) {
        self.pos = file_pos(stmt.span);
        let mark = self.temp_mark();
        match &stmt.kind {
            StmtKind::Assign { target, value } => self.gen_assign(*target, *value),
            StmtKind::AssignOp { target, op, value } => {
                let current = self.gen_expr(*target, None);
                let rhs = self.gen_expr(*value, None);
                let t = self.temp();
                self.gen_binop(*op, t, current, rhs);
                self.gen_store(*target, t);
            }
            StmtKind::From { kind, target, source } => {
                let op = match kind {
                    FromKind::Any => Op::From,
                    FromKind::Begin => Op::Fromb,
                    FromKind::End => Op::Frome,
                };
                let t = self.temp();
                let (place, simple) = self.open_place(*source);
                self.emit(op, &[t, place]);
                self.close_place(*source, place, simple);
                self.gen_store(*target, t);
            }
            StmtKind::Expr(e) => {
                self.gen_expr(*e, None);
            }
            StmtKind::If { arms, otherwise } => {
                let end = self.new_label();
                for (cond, body) in arms {
                    let next = self.new_label();
                    let c = self.gen_expr(*cond, None);
                    self.jump(Op::GoFalse, c, next);
                    self.gen_block(body);
                    self.jump(Op::Go, QOperand::None, end);
                    self.bind(next);
                }
                self.gen_block(otherwise);
                self.bind(end);
            }
            StmtKind::While { cond, body } => {
                let head = self.new_label();
                let exit = self.new_label();
                self.bind(head);
                let c = self.gen_expr(*cond, None);
                self.jump(Op::GoFalse, c, exit);
                self.gen_loop_body(body, head, exit);
                self.jump(Op::Go, QOperand::None, head);
                self.bind(exit);
            }
            StmtKind::Until { cond, body } => {
                let head = self.new_label();
                let next = self.new_label();
                let exit = self.new_label();
                self.bind(head);
                self.gen_loop_body(body, next, exit);
                self.bind(next);
                self.pos = file_pos(stmt.span);
                let c = self.gen_expr(*cond, None);
                self.jump(Op::GoFalse, c, head);
                self.bind(exit);
            }
            StmtKind::Loop { body } => {
                let head = self.new_label();
                let exit = self.new_label();
                self.bind(head);
                self.gen_loop_body(body, head, exit);
                self.jump(Op::Go, QOperand::None, head);
                self.bind(exit);
            }
            StmtKind::For { iters, cond, body } => {
                let nest = self.open_iters(iters, *cond);
                self.gen_loop_body(body, nest.innermost(), nest.exit);
                self.close_iters(nest);
            }
            StmtKind::Case {
                subject,
                arms,
                otherwise,
            } => {
                let s = self.gen_expr(*subject, None);
                let end = self.new_label();
                let labels: Vec<QLabel> = arms.iter().map(|_| self.new_label()).collect();
                let t = self.temp();
                for ((values, _), label) in arms.iter().zip(&labels) {
                    for value in values {
                        let v = self.gen_expr(*value, None);
                        self.emit(Op::Eq, &[t, s, v]);
                        self.jump(Op::GoTrue, t, *label);
                    }
                }
                self.gen_block(otherwise);
                self.jump(Op::Go, QOperand::None, end);
                for ((_, body), label) in arms.iter().zip(labels) {
                    self.bind(label);
                    self.gen_block(body);
                    self.jump(Op::Go, QOperand::None, end);
                }
                self.bind(end);
            }
            StmtKind::Exit => match self.loops.last() {
                Some(labels) => {
                    let exit = labels.exit;
                    self.jump(Op::Go, QOperand::None, exit);
                }
                None => self.error(stmt.span, SemanticError::OutsideLoop("exit")),
            },
            StmtKind::Continue => match self.loops.last() {
                Some(labels) => {
                    let next = labels.next;
                    self.jump(Op::Go, QOperand::None, next);
                }
                None => self.error(stmt.span, SemanticError::OutsideLoop("continue")),
            },
            StmtKind::Return(value) => self.gen_return(*value),
            StmtKind::Stop => self.emit(Op::Stop, &[]),
        }
        self.release_temps(mark);
    }

    fn gen_loop_body(&mut self, body: &'a [Stmt], next: QLabel, exit: QLabel) {
        self.loops.push(LoopLabels { next, exit });
        self.gen_block(body);
        self.loops.pop();
    }

    /// Opens one loop per iterator, outermost first. An exhausted inner
    /// iterator resumes the next outer one.
    fn open_iters(&mut self, iters: &'a [Iter], cond: Option<ExprId>) -> IterNest {
        let exit = self.new_label();
        let mut heads: Vec<QLabel> = Vec::new();
        for iter in iters {
            let source = self.gen_expr(iter.source, None);
            let it = self.temp();
            self.emit(Op::IterStart, &[it, source, QOperand::Int(IterKind::Elements as i32)]);
            let head = self.new_label();
            self.bind(head);
            let outer = heads.last().copied().unwrap_or(exit);
            match self.simple_place(iter.target) {
                Some(place) => self.emit(Op::IterNext, &[place, it, QOperand::Label(outer)]),
                None => {
                    let x = self.temp();
                    self.emit(Op::IterNext, &[x, it, QOperand::Label(outer)]);
                    self.gen_store(iter.target, x);
                }
            }
            heads.push(head);
        }
        let nest = IterNest { heads, exit };
        if let Some(cond) = cond {
            let c = self.gen_expr(cond, None);
            self.jump(Op::GoFalse, c, nest.innermost());
        }
        nest
    }

    fn close_iters(&mut self, nest: IterNest) {
        self.jump(Op::Go, QOperand::None, nest.innermost());
        self.bind(nest.exit);
    }

    // ── stores ─────────────────────────────────────────────────────

    fn gen_assign(&mut self, target: ExprId, value: ExprId) {
        match self.simple_place(target) {
            Some(place) => {
                self.gen_expr(value, Some(place));
            }
            None => {
                let v = self.gen_expr(value, None);
                self.gen_store(target, v);
            }
        }
    }

    /// A plain writable variable of the current unit or an enclosing scope.
    fn simple_place(&mut self, e: ExprId) -> Option<QOperand> {
        let ExprKind::Name(name) = self.arena.kind(e) else {
            return None;
        };
        match self.lookup(name, self.arena.span(e)) {
            Binding::Sym(id) if !self.is_read_only(Binding::Sym(id)) => Some(QOperand::Sym(id)),
            _ => None,
        }
    }

    /// Reads a place into an operand that may be modified in place;
    /// [`CompUnit::close_place`] stores it back when needed.
    fn open_place(&mut self, e: ExprId) -> (QOperand, bool) {
        if let Some(place) = self.simple_place(e) {
            return (place, true);
        }
        let t = self.temp();
        self.gen_expr(e, Some(t));
        (t, false)
    }

    fn close_place(&mut self, e: ExprId, place: QOperand, simple: bool) {
        if !simple {
            self.gen_store(e, place);
        }
    }

    /// Whether `e` can receive a value.
    fn is_place(&mut self, e: ExprId) -> bool {
        match self.arena.kind(e) {
            ExprKind::Name(name) => match self.lookup_existing(name, self.arena.span(e)) {
                Some(binding) => !self.is_read_only(binding),
                None => true,
            },
            ExprKind::Placeholder => true,
            ExprKind::Call { callee, .. } => self.is_place(*callee),
            ExprKind::Image { map, .. } => self.is_place(*map),
            ExprKind::Slice { target, .. } => self.is_place(*target),
            ExprKind::Select { object, .. } => {
                matches!(self.arena.kind(*object), ExprKind::SelfRef) || self.is_place(*object)
            }
            ExprKind::Tuple(Former::Enum(items)) => {
                let items = items.clone();
                items.into_iter().all(|i| self.is_place(i))
            }
            _ => false,
        }
    }

    /// Stores `value` into the place `target`.
    pub fn gen_store(&mut self, target: ExprId, value: QOperand) {
        let span = self.arena.span(target);
        match self.arena.kind(target) {
            ExprKind::Name(name) => {
                let binding = self.lookup(name, span);
                if self.is_read_only(binding) {
                    return self.error(span, SemanticError::ReadOnly(name.clone()));
                }
                match binding {
                    Binding::Sym(id) => self.emit(Op::Assign, &[QOperand::Sym(id), value]),
                    Binding::SelfSlot(slot) => {
                        self.emit(Op::SSlotSelf, &[QOperand::Slot(slot), value])
                    }
                    Binding::Global(index) => self.emit(Op::Sgvar, &[QOperand::Int(index), value]),
                    _ => self.error(span, SemanticError::ReadOnly(name.clone())),
                }
            }
            ExprKind::Placeholder => {}
            ExprKind::Tuple(Former::Enum(items)) => {
                for (i, item) in items.iter().enumerate() {
                    if matches!(self.arena.kind(*item), ExprKind::Placeholder) {
                        continue;
                    }
                    let index = self.int_lit(i as i64 + 1);
                    let t = self.temp();
                    self.emit(Op::Of, &[t, value, index]);
                    self.gen_store(*item, t);
                }
            }
            ExprKind::Call { callee, args } => {
                let key = match args.as_slice() {
                    [one] => self.gen_expr(*one, None),
                    many => self.gen_enum(many, Op::Tuple, None),
                };
                let (place, simple) = self.open_place(*callee);
                self.emit(Op::Sof, &[place, key, value]);
                self.close_place(*callee, place, simple);
            }
            ExprKind::Image { map, arg } => {
                let key = self.gen_expr(*arg, None);
                let (place, simple) = self.open_place(*map);
                self.emit(Op::Sofa, &[place, key, value]);
                self.close_place(*map, place, simple);
            }
            ExprKind::Slice { target: inner, lo, hi } => {
                let lo = self.gen_expr(*lo, None);
                let hi = match hi {
                    Some(hi) => self.gen_expr(*hi, None),
                    None => QOperand::OMEGA,
                };
                let (place, simple) = self.open_place(*inner);
                self.emit(Op::Push2, &[lo, hi]);
                self.emit(Op::Sslice, &[place, value]);
                self.close_place(*inner, place, simple);
            }
            ExprKind::Select { object, name } => self.store_member(*object, name, value, span),
            _ => self.error(span, SemanticError::NotAssignable),
        }
    }

    fn store_member(&mut self, object: ExprId, name: &str, value: QOperand, span: Span) {
        if matches!(self.arena.kind(object), ExprKind::SelfRef) {
            if !self.in_method() {
                return self.error(span, SemanticError::OutsideClass("self"));
            }
            let slot = self.slots.reference(name);
            return self.emit(Op::SSlotSelf, &[QOperand::Slot(slot), value]);
        }
        if let Some(unit_num) = self.unit_qualifier(object) {
            match self.lookup_member(unit_num, name, span) {
                Some(Binding::Sym(id)) if !self.is_read_only(Binding::Sym(id)) => {
                    self.emit(Op::Assign, &[QOperand::Sym(id), value])
                }
                Some(_) => self.error(span, SemanticError::ReadOnly(name.to_string())),
                None => {}
            }
            return;
        }
        let slot = self.slots.reference(name);
        let (place, simple) = self.open_place(object);
        self.emit(Op::SSlot, &[place, QOperand::Slot(slot), value]);
        self.close_place(object, place, simple);
    }

    /// Unit number when `e` names a package or class.
    fn unit_qualifier(&mut self, e: ExprId) -> Option<i16> {
        let ExprKind::Name(name) = self.arena.kind(e) else {
            return None;
        };
        match self.lookup_existing(name, self.arena.span(e)) {
            Some(Binding::Package(u) | Binding::Class(u)) => Some(u),
            _ => None,
        }
    }

    // ── expressions ────────────────────────────────────────────────

    fn int_lit(&mut self, value: i64) -> QOperand {
        QOperand::Sym(self.symtab.integer(LongInt::from_i64(value)))
    }

    fn target(&mut self, dest: Option<QOperand>) -> QOperand {
        match dest {
            Some(d) => d,
            None => self.temp(),
        }
    }

    fn to_dest(&mut self, value: QOperand, dest: Option<QOperand>) -> QOperand {
        match dest {
            Some(d) if d != value => {
                self.emit(Op::Assign, &[d, value]);
                d
            }
            _ => value,
        }
    }

    /// Generates `e` and returns the operand holding its value.
    pub fn gen_expr(&mut self, e: ExprId, dest: Option<QOperand>) -> QOperand {
        let span = self.arena.span(e);
        match self.arena.kind(e) {
            ExprKind::Integer(digits) => {
                let value = match LongInt::parse(digits) {
                    Some(value) => value,
                    None => {
                        self.error(span, SemanticError::BadLiteral(digits.clone()));
                        LongInt::from_i64(0)
                    }
                };
                let lit = QOperand::Sym(self.symtab.integer(value));
                self.to_dest(lit, dest)
            }
            ExprKind::Real(value) => {
                let lit = QOperand::Sym(self.symtab.real(*value));
                self.to_dest(lit, dest)
            }
            ExprKind::String(text) => {
                let lit = QOperand::Sym(self.symtab.string(text.as_bytes()));
                self.to_dest(lit, dest)
            }
            ExprKind::Omega => self.to_dest(QOperand::OMEGA, dest),
            ExprKind::True => self.to_dest(QOperand::TRUE, dest),
            ExprKind::False => self.to_dest(QOperand::FALSE, dest),
            ExprKind::Placeholder => {
                self.error(span, SemanticError::NotAssignable);
                QOperand::OMEGA
            }
            ExprKind::SelfRef => {
                if !self.in_method() {
                    self.error(span, SemanticError::OutsideClass("self"));
                    return QOperand::OMEGA;
                }
                let t = self.target(dest);
                self.emit(Op::SelfVal, &[t]);
                t
            }
            ExprKind::Name(name) => {
                let binding = self.lookup(name, span);
                self.gen_binding(binding, name, span, dest)
            }
            ExprKind::Unary { op, operand } => {
                let a = self.gen_expr(*operand, None);
                let t = self.target(dest);
                self.emit(unary_op(*op), &[t, a]);
                t
            }
            ExprKind::Binary { op, left, right } => self.gen_binary(*op, *left, *right, dest),
            ExprKind::Reduce { op, operand } => self.gen_reduce(*op, *operand, dest),
            ExprKind::Call { callee, args } => self.gen_call(*callee, args, span, dest),
            ExprKind::Image { map, arg } => {
                let m = self.gen_expr(*map, None);
                let a = self.gen_expr(*arg, None);
                let t = self.target(dest);
                self.emit(Op::Ofa, &[t, m, a]);
                t
            }
            ExprKind::Slice { target, lo, hi } => {
                let s = self.gen_expr(*target, None);
                let lo = self.gen_expr(*lo, None);
                let hi = match hi {
                    Some(hi) => self.gen_expr(*hi, None),
                    None => QOperand::OMEGA,
                };
                self.emit(Op::Push2, &[lo, hi]);
                let t = self.target(dest);
                self.emit(Op::Slice, &[t, s]);
                t
            }
            ExprKind::Select { object, name } => self.gen_select(*object, name, span, dest),
            ExprKind::Set(former) => self.gen_former(former, Op::Set, dest),
            ExprKind::Tuple(former) => self.gen_former(former, Op::Tuple, dest),
            ExprKind::Quantified { kind, iters, cond } => {
                let t = self.temp();
                let (start, found) = match kind {
                    Quantifier::Exists => (QOperand::FALSE, QOperand::TRUE),
                    Quantifier::Forall => (QOperand::TRUE, QOperand::FALSE),
                };
                self.emit(Op::Assign, &[t, start]);
                let nest = self.open_iters(iters, None);
                let c = self.gen_expr(*cond, None);
                let skip = match kind {
                    Quantifier::Exists => Op::GoFalse,
                    Quantifier::Forall => Op::GoTrue,
                };
                self.jump(skip, c, nest.innermost());
                self.emit(Op::Assign, &[t, found]);
                self.jump(Op::Go, QOperand::None, nest.exit);
                self.close_iters(nest);
                self.to_dest(t, dest)
            }
        }
    }

    fn gen_binding(
        &mut self,
        binding: Binding,
        name: &str,
        span: Span,
        dest: Option<QOperand>,
    ) -> QOperand {
        match binding {
            Binding::Sym(id) => self.to_dest(QOperand::Sym(id), dest),
            Binding::Proc(id) => {
                let t = self.target(dest);
                self.emit(Op::Proc, &[t, QOperand::Sym(id)]);
                t
            }
            Binding::Builtin(index) => {
                let lit = self.symtab.builtin(index);
                let t = self.target(dest);
                self.emit(Op::Proc, &[t, QOperand::Sym(lit)]);
                t
            }
            Binding::SelfSlot(slot) => {
                let t = self.target(dest);
                self.emit(Op::SlotSelf, &[t, QOperand::Slot(slot)]);
                t
            }
            Binding::Global(index) => {
                let t = self.target(dest);
                self.emit(Op::Gvar, &[t, QOperand::Int(index)]);
                t
            }
            Binding::Class(_) | Binding::Package(_) => {
                self.error(
                    span,
                    SemanticError::NotA {
                        name: name.to_string(),
                        expected: "value",
                    },
                );
                QOperand::OMEGA
            }
        }
    }

    /// `t := a op b` on already evaluated operands.
    fn gen_binop(&mut self, op: BinOp, t: QOperand, a: QOperand, b: QOperand) {
        if let Some(code) = binary_op(op) {
            return self.emit(code, &[t, a, b]);
        }
        match op {
            BinOp::Gt => self.emit(Op::Lt, &[t, b, a]),
            BinOp::Ge => self.emit(Op::Le, &[t, b, a]),
            BinOp::And | BinOp::Or | BinOp::Default => {
                let done = self.new_label();
                let keep = self.temp();
                self.emit(Op::Assign, &[keep, a]);
                match op {
                    BinOp::And => self.jump(Op::GoFalse, keep, done),
                    BinOp::Or => self.jump(Op::GoTrue, keep, done),
                    _ => {
                        let take = self.new_label();
                        self.jump(Op::GoOm, keep, take);
                        self.jump(Op::Go, QOperand::None, done);
                        self.bind(take);
                    }
                }
                self.emit(Op::Assign, &[keep, b]);
                self.bind(done);
                self.emit(Op::Assign, &[t, keep]);
            }
            _ => {}
        }
    }

    fn gen_binary(
        &mut self,
        op: BinOp,
        left: ExprId,
        right: ExprId,
        dest: Option<QOperand>,
    ) -> QOperand {
        match op {
            BinOp::And | BinOp::Or => {
                let t = self.temp();
                let done = self.new_label();
                self.gen_expr(left, Some(t));
                let branch = if op == BinOp::And {
                    Op::GoFalse
                } else {
                    Op::GoTrue
                };
                self.jump(branch, t, done);
                self.gen_expr(right, Some(t));
                self.bind(done);
                self.to_dest(t, dest)
            }
            BinOp::Default => {
                let t = self.temp();
                let take = self.new_label();
                let done = self.new_label();
                self.gen_expr(left, Some(t));
                self.jump(Op::GoOm, t, take);
                self.jump(Op::Go, QOperand::None, done);
                self.bind(take);
                self.gen_expr(right, Some(t));
                self.bind(done);
                self.to_dest(t, dest)
            }
            _ => {
                let a = self.gen_expr(left, None);
                let b = self.gen_expr(right, None);
                let t = self.target(dest);
                self.gen_binop(op, t, a, b);
                t
            }
        }
    }

    /// `op/ s`: the first element seeds the accumulator.
    fn gen_reduce(&mut self, op: BinOp, operand: ExprId, dest: Option<QOperand>) -> QOperand {
        let acc = self.temp();
        let x = self.temp();
        let it = self.temp();
        let source = self.gen_expr(operand, None);
        self.emit(Op::Assign, &[acc, QOperand::OMEGA]);
        self.emit(Op::IterStart, &[it, source, QOperand::Int(IterKind::Elements as i32)]);
        let head = self.new_label();
        let first = self.new_label();
        let done = self.new_label();
        self.bind(head);
        self.emit(Op::IterNext, &[x, it, QOperand::Label(done)]);
        self.jump(Op::GoOm, acc, first);
        self.gen_binop(op, acc, acc, x);
        self.jump(Op::Go, QOperand::None, head);
        self.bind(first);
        self.emit(Op::Assign, &[acc, x]);
        self.jump(Op::Go, QOperand::None, head);
        self.bind(done);
        self.to_dest(acc, dest)
    }

    /// Pushes already evaluated values in groups of at most three.
    fn gen_args(&mut self, args: &[ExprId]) -> Vec<QOperand> {
        args.iter().map(|a| self.gen_expr(*a, None)).collect()
    }

    fn push_values(&mut self, values: &[QOperand]) {
        for chunk in values.chunks(3) {
            match chunk {
                [a, b, c] => self.emit(Op::Push3, &[*a, *b, *c]),
                [a, b] => self.emit(Op::Push2, &[*a, *b]),
                [a] => self.emit(Op::Push1, &[*a]),
                _ => {}
            }
        }
    }

    fn gen_enum(&mut self, items: &[ExprId], op: Op, dest: Option<QOperand>) -> QOperand {
        let values: Vec<QOperand> = items.iter().map(|i| self.gen_expr(*i, None)).collect();
        self.push_values(&values);
        let t = self.target(dest);
        self.emit(op, &[t, QOperand::Int(values.len() as i32)]);
        t
    }

    fn gen_former(&mut self, former: &'a Former, op: Op, dest: Option<QOperand>) -> QOperand {
        match former {
            Former::Enum(items) => self.gen_enum(items, op, dest),
            Former::Range { first, second, last } => {
                let first = self.gen_expr(*first, None);
                let second = match second {
                    Some(second) => self.gen_expr(*second, None),
                    None => QOperand::OMEGA,
                };
                let last = self.gen_expr(*last, None);
                self.emit(Op::Push3, &[first, second, last]);
                let t = self.target(dest);
                let range = if op == Op::Set {
                    Op::SetRange
                } else {
                    Op::TupleRange
                };
                self.emit(range, &[t]);
                t
            }
            Former::Compr { expr, iters, cond } => {
                let acc = self.temp();
                self.emit(op, &[acc, QOperand::Int(0)]);
                let nest = self.open_iters(iters, *cond);
                let item = match (expr, iters.first()) {
                    (Some(e), _) => self.gen_expr(*e, None),
                    (None, Some(iter)) => self.gen_expr(iter.target, None),
                    (None, None) => QOperand::OMEGA,
                };
                self.emit(Op::With, &[acc, acc, item]);
                self.close_iters(nest);
                self.to_dest(acc, dest)
            }
        }
    }

    fn gen_select(
        &mut self,
        object: ExprId,
        name: &str,
        span: Span,
        dest: Option<QOperand>,
    ) -> QOperand {
        if matches!(self.arena.kind(object), ExprKind::SelfRef) {
            if !self.in_method() {
                self.error(span, SemanticError::OutsideClass("self"));
                return QOperand::OMEGA;
            }
            let slot = self.slots.reference(name);
            let t = self.target(dest);
            self.emit(Op::SlotSelf, &[t, QOperand::Slot(slot)]);
            return t;
        }
        if let Some(unit_num) = self.unit_qualifier(object) {
            return match self.lookup_member(unit_num, name, span) {
                Some(binding) => self.gen_binding(binding, name, span, dest),
                None => QOperand::OMEGA,
            };
        }
        let o = self.gen_expr(object, None);
        let slot = self.slots.reference(name);
        let t = self.target(dest);
        self.emit(Op::Slot, &[t, o, QOperand::Slot(slot)]);
        t
    }

    // ── calls ──────────────────────────────────────────────────────

    fn gen_call(
        &mut self,
        callee: ExprId,
        args: &'a [ExprId],
        span: Span,
        dest: Option<QOperand>,
    ) -> QOperand {
        match self.arena.kind(callee) {
            ExprKind::Name(name) => {
                let binding = self.lookup(name, self.arena.span(callee));
                match binding {
                    Binding::Proc(id) => {
                        self.call_known(QOperand::Sym(id), id, args, span, dest, 0)
                    }
                    Binding::Builtin(index) => self.call_builtin(index, args, span, dest),
                    Binding::Class(unit_num) => {
                        let values = self.gen_args(args);
                        self.push_values(&values);
                        let t = self.target(dest);
                        self.emit(
                            Op::New,
                            &[t, QOperand::Class(unit_num), QOperand::Int(values.len() as i32)],
                        );
                        t
                    }
                    Binding::SelfSlot(slot) if self.slots.get(slot).is_method => {
                        let m = self.temp();
                        self.emit(Op::SlotSelf, &[m, QOperand::Slot(slot)]);
                        let values = self.gen_args(args);
                        self.push_values(&values);
                        let t = self.target(dest);
                        let flags = values.len() as i32 | CALL_SELF_WRITEBACK;
                        self.emit(Op::Call, &[t, m, QOperand::Int(flags)]);
                        self.emit(Op::PopSelf, &[]);
                        t
                    }
                    other => {
                        let f = self.gen_binding(other, name, span, None);
                        self.call_value(f, args, dest)
                    }
                }
            }
            ExprKind::Select { object, name } => {
                if matches!(self.arena.kind(*object), ExprKind::SelfRef) {
                    if !self.in_method() {
                        self.error(span, SemanticError::OutsideClass("self"));
                        return QOperand::OMEGA;
                    }
                    let slot = self.slots.reference(name);
                    let m = self.temp();
                    self.emit(Op::SlotSelf, &[m, QOperand::Slot(slot)]);
                    let values = self.gen_args(args);
                    self.push_values(&values);
                    let t = self.target(dest);
                    let flags = values.len() as i32 | CALL_SELF_WRITEBACK;
                    self.emit(Op::Call, &[t, m, QOperand::Int(flags)]);
                    self.emit(Op::PopSelf, &[]);
                    return t;
                }
                if let Some(unit_num) = self.unit_qualifier(*object) {
                    return match self.lookup_member(unit_num, name, span) {
                        Some(Binding::Proc(id)) => {
                            self.call_known(QOperand::Sym(id), id, args, span, dest, 0)
                        }
                        Some(Binding::Builtin(index)) => self.call_builtin(index, args, span, dest),
                        Some(binding) => {
                            let f = self.gen_binding(binding, name, span, None);
                            self.call_value(f, args, dest)
                        }
                        None => QOperand::OMEGA,
                    };
                }
                self.call_method(*object, name, args, dest)
            }
            _ => {
                let f = self.gen_expr(callee, None);
                self.call_value(f, args, dest)
            }
        }
    }

    /// `o.m(args)`: the receiver is written back after the call.
    fn call_method(
        &mut self,
        object: ExprId,
        name: &str,
        args: &'a [ExprId],
        dest: Option<QOperand>,
    ) -> QOperand {
        let writable = self.is_place(object);
        let (o, simple) = if writable {
            self.open_place(object)
        } else {
            (self.gen_expr(object, None), false)
        };
        let slot = self.slots.reference(name);
        let m = self.temp();
        self.emit(Op::Slot, &[m, o, QOperand::Slot(slot)]);
        let values = self.gen_args(args);
        self.push_values(&values);
        let t = self.target(dest);
        let flags = values.len() as i32 | CALL_SELF_WRITEBACK;
        self.emit(Op::Call, &[t, m, QOperand::Int(flags)]);
        if writable {
            self.emit(Op::Pop1, &[o]);
            self.close_place(object, o, simple);
        } else {
            let discard = self.temp();
            self.emit(Op::Pop1, &[discard]);
        }
        t
    }

    /// Call through a value: a procedure, or a map or tuple applied to
    /// its arguments.
    fn call_value(&mut self, f: QOperand, args: &'a [ExprId], dest: Option<QOperand>) -> QOperand {
        let values = self.gen_args(args);
        self.push_values(&values);
        let t = self.target(dest);
        self.emit(Op::Call, &[t, f, QOperand::Int(values.len() as i32)]);
        t
    }

    fn call_builtin(
        &mut self,
        index: u16,
        args: &'a [ExprId],
        span: Span,
        dest: Option<QOperand>,
    ) -> QOperand {
        let spec = BUILTINS[index as usize];
        if !spec.accepts(args.len()) {
            self.error(
                span,
                SemanticError::Arity {
                    name: spec.name.to_string(),
                    expected: spec.formals as usize,
                    found: args.len(),
                },
            );
        }
        let lit = self.symtab.builtin(index);
        self.call_value(QOperand::Sym(lit), args, dest)
    }

    /// Call of a procedure whose formals are known; arguments bound to
    /// `wr` and `rw` formals receive the values the callee leaves on the
    /// stack.
    fn call_known(
        &mut self,
        f: QOperand,
        id: SymId,
        args: &'a [ExprId],
        span: Span,
        dest: Option<QOperand>,
        extra: i32,
    ) -> QOperand {
        let symbol = self.symtab.get(id);
        let name = symbol.name.clone();
        let formals = symbol.formals.clone();
        let var_args = symbol.var_args();
        let own = symbol.is_own() && symbol.kind == SymKind::Procedure;
        let arity_ok = if var_args {
            args.len() + 1 >= formals.len()
        } else {
            args.len() == formals.len()
        };
        if !arity_ok {
            self.error(
                span,
                SemanticError::Arity {
                    name: name.clone(),
                    expected: formals.len(),
                    found: args.len(),
                },
            );
        }

        let mut values = Vec::with_capacity(args.len());
        let mut written = Vec::new();
        for (i, arg) in args.iter().enumerate() {
            let mode = match formals.get(i) {
                Some(formal) if !(var_args && i + 1 >= formals.len()) => formal.mode,
                _ => FormalMode::Rd,
            };
            if mode.writes() {
                if self.is_place(*arg) {
                    written.push(*arg);
                } else {
                    self.error(
                        self.arena.span(*arg),
                        SemanticError::WriteArgument {
                            name: name.clone(),
                            index: i + 1,
                        },
                    );
                }
            }
            let value = match mode {
                FormalMode::Wr => QOperand::OMEGA,
                _ => self.gen_expr(*arg, None),
            };
            values.push(value);
        }
        self.push_values(&values);

        let mut flags = values.len() as i32 | extra;
        if !written.is_empty() {
            flags |= CALL_KEEP_WRITEBACK;
        }
        let self_writeback = own && self.in_method();
        if self_writeback {
            flags |= CALL_KEEP_WRITEBACK | CALL_SELF_WRITEBACK;
        }
        let t = self.target(dest);
        self.emit(Op::Call, &[t, f, QOperand::Int(flags)]);
        if self_writeback {
            self.emit(Op::PopSelf, &[]);
        }
        for arg in written.into_iter().rev() {
            match self.simple_place(arg) {
                Some(place) => self.emit(Op::Pop1, &[place]),
                None => {
                    let v = self.temp();
                    self.emit(Op::Pop1, &[v]);
                    self.gen_store(arg, v);
                }
            }
        }
        t
    }
}
