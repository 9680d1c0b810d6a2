//! Syntax tree.
//!
//! Expressions live in an [`AstArena`] and are referenced by [`ExprId`];
//! statements and declarations are plain owned trees holding those ids.

use crate::span::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprId(u32);

impl ExprId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExprNode {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Default, Clone)]
pub struct AstArena {
    nodes: Vec<ExprNode>,
}

impl AstArena {
    pub fn alloc(&mut self, node: ExprNode) -> ExprId {
        self.nodes.push(node);
        ExprId((self.nodes.len() - 1) as u32)
    }

    pub fn get(&self, id: ExprId) -> &ExprNode {
        &self.nodes[id.index()]
    }

    pub fn get_mut(&mut self, id: ExprId) -> &mut ExprNode {
        &mut self.nodes[id.index()]
    }

    pub fn kind(&self, id: ExprId) -> &ExprKind {
        &self.get(id).kind
    }

    pub fn span(&self, id: ExprId) -> Span {
        self.get(id).span
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

// ── operators ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Subset,
    Incs,
    /// `x ? y`: `x` unless it is om.
    Default,
    Add,
    Sub,
    With,
    Less,
    Lessf,
    Max,
    Min,
    Mult,
    Div,
    IntDiv,
    Mod,
    Exp,
}

impl BinOp {
    pub const fn symbol(self) -> &'static str {
        match self {
            BinOp::Or => "or",
            BinOp::And => "and",
            BinOp::Eq => "=",
            BinOp::Ne => "/=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::In => "in",
            BinOp::NotIn => "notin",
            BinOp::Subset => "subset",
            BinOp::Incs => "incs",
            BinOp::Default => "?",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::With => "with",
            BinOp::Less => "less",
            BinOp::Lessf => "lessf",
            BinOp::Max => "max",
            BinOp::Min => "min",
            BinOp::Mult => "*",
            BinOp::Div => "/",
            BinOp::IntDiv => "div",
            BinOp::Mod => "mod",
            BinOp::Exp => "**",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOp {
    Neg,
    Not,
    Card,
    Arb,
    Domain,
    Range,
    Pow,
}

impl UnOp {
    pub const fn symbol(self) -> &'static str {
        match self {
            UnOp::Neg => "-",
            UnOp::Not => "not",
            UnOp::Card => "#",
            UnOp::Arb => "arb",
            UnOp::Domain => "domain",
            UnOp::Range => "range",
            UnOp::Pow => "pow",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    Exists,
    Forall,
}

// ── expressions ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Decimal digits.
    Integer(String),
    Real(f64),
    String(String),
    Omega,
    True,
    False,
    SelfRef,
    Name(String),
    /// `-` inside a tuple target: the component is skipped.
    Placeholder,

    Unary {
        op: UnOp,
        operand: ExprId,
    },
    Binary {
        op: BinOp,
        left: ExprId,
        right: ExprId,
    },
    /// `op/ s`, folding with `op` from the left.
    Reduce {
        op: BinOp,
        operand: ExprId,
    },
    /// `f(a, b)`: a call or an index, decided by the compiler.
    Call {
        callee: ExprId,
        args: Vec<ExprId>,
    },
    /// `f{x}`
    Image {
        map: ExprId,
        arg: ExprId,
    },
    /// `t(i..j)`, `t(i..)`
    Slice {
        target: ExprId,
        lo: ExprId,
        hi: Option<ExprId>,
    },
    /// `o.x`, also a qualified name `pkg.x`.
    Select {
        object: ExprId,
        name: String,
    },
    Set(Former),
    Tuple(Former),
    Quantified {
        kind: Quantifier,
        iters: Vec<Iter>,
        cond: ExprId,
    },
}

/// Body of a set or tuple former.
#[derive(Debug, Clone, PartialEq)]
pub enum Former {
    Enum(Vec<ExprId>),
    /// `first[, second]..last`
    Range {
        first: ExprId,
        second: Option<ExprId>,
        last: ExprId,
    },
    /// `expr : iters | cond`; without `expr` the first iterator's target
    /// is collected.
    Compr {
        expr: Option<ExprId>,
        iters: Vec<Iter>,
        cond: Option<ExprId>,
    },
}

/// `target in source`
#[derive(Debug, Clone, PartialEq)]
pub struct Iter {
    pub target: ExprId,
    pub source: ExprId,
    pub span: Span,
}

// ── statements ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FromKind {
    /// `x from s`: arbitrary element.
    Any,
    /// `x fromb t`: first element.
    Begin,
    /// `x frome t`: last element.
    End,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Assign {
        target: ExprId,
        value: ExprId,
    },
    AssignOp {
        target: ExprId,
        op: BinOp,
        value: ExprId,
    },
    From {
        kind: FromKind,
        target: ExprId,
        source: ExprId,
    },
    Expr(ExprId),
    If {
        arms: Vec<(ExprId, Vec<Stmt>)>,
        otherwise: Vec<Stmt>,
    },
    While {
        cond: ExprId,
        body: Vec<Stmt>,
    },
    Until {
        cond: ExprId,
        body: Vec<Stmt>,
    },
    Loop {
        body: Vec<Stmt>,
    },
    For {
        iters: Vec<Iter>,
        cond: Option<ExprId>,
        body: Vec<Stmt>,
    },
    Case {
        subject: ExprId,
        arms: Vec<(Vec<ExprId>, Vec<Stmt>)>,
        otherwise: Vec<Stmt>,
    },
    Exit,
    Continue,
    Return(Option<ExprId>),
    Stop,
}

// ── declarations ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormalMode {
    Rd,
    Wr,
    Rw,
}

impl FormalMode {
    pub const fn reads(self) -> bool {
        matches!(self, FormalMode::Rd | FormalMode::Rw)
    }

    pub const fn writes(self) -> bool {
        matches!(self, FormalMode::Wr | FormalMode::Rw)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Formal {
    pub name: String,
    pub mode: FormalMode,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcDecl {
    pub name: String,
    pub formals: Vec<Formal>,
    /// The last formal collects surplus arguments as a tuple.
    pub var_args: bool,
    /// Absent for a header in a specification.
    pub body: Option<Block>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub name: String,
    pub init: Option<ExprId>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decl {
    Var(Vec<VarDecl>),
    Const(Vec<VarDecl>),
    Sel(Vec<(String, Span)>),
    Proc(ProcDecl),
}

/// Declarations and statements of a unit or procedure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    pub decls: Vec<Decl>,
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitHeader {
    Program,
    Package,
    PackageBody,
    Class,
    ClassBody,
    Process,
    ProcessBody,
    NativePackage,
}

impl UnitHeader {
    /// Procedures are headers only.
    pub const fn is_spec(self) -> bool {
        matches!(
            self,
            UnitHeader::Package
                | UnitHeader::Class
                | UnitHeader::Process
                | UnitHeader::NativePackage
        )
    }

    pub const fn keyword(self) -> &'static str {
        match self {
            UnitHeader::Program => "program",
            UnitHeader::Package => "package",
            UnitHeader::PackageBody => "package body",
            UnitHeader::Class => "class",
            UnitHeader::ClassBody => "class body",
            UnitHeader::Process => "process",
            UnitHeader::ProcessBody => "process body",
            UnitHeader::NativePackage => "native package",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    pub header: UnitHeader,
    pub name: String,
    pub uses: Vec<(String, Span)>,
    pub inherits: Vec<(String, Span)>,
    pub block: Block,
    pub span: Span,
}

// ── printing ───────────────────────────────────────────────────────

/// Renders an expression back to source form, for `--debug ast`.
pub fn expr_to_string(arena: &AstArena, id: ExprId) -> String {
    let show = |id: ExprId| expr_to_string(arena, id);
    let list = |ids: &[ExprId]| ids.iter().map(|i| show(*i)).collect::<Vec<_>>().join(", ");
    let iters = |its: &[Iter]| {
        its.iter()
            .map(|it| format!("{} in {}", show(it.target), show(it.source)))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let former = |f: &Former| match f {
        Former::Enum(items) => list(items),
        Former::Range { first, second, last } => match second {
            Some(s) => format!(
                "{}, {}..{}",
                expr_to_string(arena, *first),
                expr_to_string(arena, *s),
                expr_to_string(arena, *last)
            ),
            None => format!("{}..{}", expr_to_string(arena, *first), expr_to_string(arena, *last)),
        },
        Former::Compr { expr, iters: its, cond } => {
            let mut out = match expr {
                Some(e) => format!("{} : {}", expr_to_string(arena, *e), iters(its)),
                None => iters(its),
            };
            if let Some(c) = cond {
                out.push_str(&format!(" | {}", expr_to_string(arena, *c)));
            }
            out
        }
    };
    match arena.kind(id) {
        ExprKind::Integer(text) => text.clone(),
        ExprKind::Real(v) => format!("{v:?}"),
        ExprKind::String(s) => format!("{s:?}"),
        ExprKind::Omega => "om".into(),
        ExprKind::True => "true".into(),
        ExprKind::False => "false".into(),
        ExprKind::SelfRef => "self".into(),
        ExprKind::Name(n) => n.clone(),
        ExprKind::Placeholder => "-".into(),
        ExprKind::Unary { op, operand } => format!("({} {})", op.symbol(), show(*operand)),
        ExprKind::Binary { op, left, right } => format!(
            "({} {} {})",
            expr_to_string(arena, *left),
            op.symbol(),
            expr_to_string(arena, *right)
        ),
        ExprKind::Reduce { op, operand } => format!("({}/ {})", op.symbol(), show(*operand)),
        ExprKind::Call { callee, args } => format!("{}({})", show(*callee), list(args)),
        ExprKind::Image { map, arg } => format!("{}{{{}}}", show(*map), show(*arg)),
        ExprKind::Slice { target, lo, hi } => format!(
            "{}({}..{})",
            expr_to_string(arena, *target),
            expr_to_string(arena, *lo),
            hi.map_or(String::new(), |h| expr_to_string(arena, h))
        ),
        ExprKind::Select { object, name } => format!("{}.{}", expr_to_string(arena, *object), name),
        ExprKind::Set(f) => format!("{{{}}}", former(f)),
        ExprKind::Tuple(f) => format!("[{}]", former(f)),
        ExprKind::Quantified { kind, iters: its, cond } => format!(
            "{} {} | {}",
            if *kind == Quantifier::Exists {
                "exists"
            } else {
                "forall"
            },
            iters(its),
            expr_to_string(arena, *cond)
        ),
    }
}
