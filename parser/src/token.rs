use crate::ast::BinOp;
use crate::span::Span;

/// Reserved words. Matching is case-insensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    And,
    Arb,
    Body,
    Case,
    Class,
    Const,
    Continue,
    Div,
    Domain,
    Else,
    Elseif,
    End,
    Exists,
    Exit,
    False,
    For,
    Forall,
    From,
    Fromb,
    Frome,
    If,
    In,
    Incs,
    Inherit,
    Less,
    Lessf,
    Loop,
    Max,
    Min,
    Mod,
    Native,
    Not,
    Notin,
    Of,
    Om,
    Or,
    Otherwise,
    Package,
    Pow,
    Procedure,
    Process,
    Program,
    Range,
    Rd,
    Return,
    Rw,
    Sel,
    SelfKw,
    Stop,
    Subset,
    Then,
    True,
    Until,
    Use,
    Var,
    While,
    With,
    Wr,
}

impl Keyword {
    pub fn lookup(word: &str) -> Option<Keyword> {
        use Keyword::*;
        Some(match word {
            "and" => And,
            "arb" => Arb,
            "body" => Body,
            "case" => Case,
            "class" => Class,
            "const" => Const,
            "continue" => Continue,
            "div" => Div,
            "domain" => Domain,
            "else" => Else,
            "elseif" => Elseif,
            "end" => End,
            "exists" => Exists,
            "exit" => Exit,
            "false" => False,
            "for" => For,
            "forall" => Forall,
            "from" => From,
            "fromb" => Fromb,
            "frome" => Frome,
            "if" => If,
            "in" => In,
            "incs" => Incs,
            "inherit" => Inherit,
            "less" => Less,
            "lessf" => Lessf,
            "loop" => Loop,
            "max" => Max,
            "min" => Min,
            "mod" => Mod,
            "native" => Native,
            "not" => Not,
            "notin" => Notin,
            "of" => Of,
            "om" => Om,
            "or" => Or,
            "otherwise" => Otherwise,
            "package" => Package,
            "pow" => Pow,
            "procedure" => Procedure,
            "process" => Process,
            "program" => Program,
            "range" => Range,
            "rd" => Rd,
            "return" => Return,
            "rw" => Rw,
            "sel" => Sel,
            "self" => SelfKw,
            "stop" => Stop,
            "subset" => Subset,
            "then" => Then,
            "true" => True,
            "until" => Until,
            "use" => Use,
            "var" => Var,
            "while" => While,
            "with" => With,
            "wr" => Wr,
            _ => return None,
        })
    }

    /// Keywords that name a binary operator usable in `op:=` and `op/`.
    pub fn as_binop(self) -> Option<BinOp> {
        Some(match self {
            Keyword::With => BinOp::With,
            Keyword::Less => BinOp::Less,
            Keyword::Lessf => BinOp::Lessf,
            Keyword::Max => BinOp::Max,
            Keyword::Min => BinOp::Min,
            Keyword::Div => BinOp::IntDiv,
            Keyword::Mod => BinOp::Mod,
            Keyword::And => BinOp::And,
            Keyword::Or => BinOp::Or,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Decimal digits, kept as text so any size survives.
    Integer(String),
    Real(f64),
    String(String),
    /// Lowercased.
    Identifier(String),
    Keyword(Keyword),

    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Colon,
    Dot,
    DotDot,
    Assign,
    Pipe,
    Question,
    Plus,
    Minus,
    Star,
    Slash,
    StarStar,
    Hash,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// `+:=`, `with:=`, ...
    OpAssign(BinOp),
    /// `+/`, `max/`, ...
    Reduce(BinOp),

    Eof,
    Error(String),
}

impl TokenKind {
    pub fn name(&self) -> String {
        match self {
            Self::Integer(_) => "integer".into(),
            Self::Real(_) => "real".into(),
            Self::String(_) => "string".into(),
            Self::Identifier(name) => format!("identifier `{name}`"),
            Self::Keyword(kw) => {
                let word = format!("{kw:?}").to_lowercase();
                format!("`{}`", word.trim_end_matches("kw"))
            }
            Self::LParen => "`(`".into(),
            Self::RParen => "`)`".into(),
            Self::LBrace => "`{`".into(),
            Self::RBrace => "`}`".into(),
            Self::LBracket => "`[`".into(),
            Self::RBracket => "`]`".into(),
            Self::Comma => "`,`".into(),
            Self::Semicolon => "`;`".into(),
            Self::Colon => "`:`".into(),
            Self::Dot => "`.`".into(),
            Self::DotDot => "`..`".into(),
            Self::Assign => "`:=`".into(),
            Self::Pipe => "`|`".into(),
            Self::Question => "`?`".into(),
            Self::Plus => "`+`".into(),
            Self::Minus => "`-`".into(),
            Self::Star => "`*`".into(),
            Self::Slash => "`/`".into(),
            Self::StarStar => "`**`".into(),
            Self::Hash => "`#`".into(),
            Self::Eq => "`=`".into(),
            Self::Ne => "`/=`".into(),
            Self::Lt => "`<`".into(),
            Self::Le => "`<=`".into(),
            Self::Gt => "`>`".into(),
            Self::Ge => "`>=`".into(),
            Self::OpAssign(op) => format!("`{}:=`", op.symbol()),
            Self::Reduce(op) => format!("`{}/`", op.symbol()),
            Self::Eof => "end of input".into(),
            Self::Error(msg) => msg.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn is_eof(&self) -> bool {
        matches!(self.kind, TokenKind::Eof)
    }
}
