//! Abstract syntax tree produced by [`crate::parser`] (spec §4.1).

use crate::error::Location;

/// A parsed program: an ordered sequence of probes.
#[derive(Debug, Clone, PartialEq)]
pub struct AstProgram {
    pub probes: Vec<AstProbe>,
}

/// `spec predicate? action`.
#[derive(Debug, Clone, PartialEq)]
pub struct AstProbe {
    pub spec: AstProbeSpec,
    pub predicate: Option<Expr>,
    pub body: Vec<Stmt>,
    pub at: Location,
}

/// `provider:moduleFunction:probePoint`.
#[derive(Debug, Clone, PartialEq)]
pub struct AstProbeSpec {
    pub provider: Provider,
    pub specifier: String,
    pub target: ProbeTarget,
    pub at: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Fn,
    Py,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeTarget {
    Entry,
    Exit,
    EntryOffset(u32),
    ExitOffset(u32),
}

/// One statement inside a probe's action block.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `$req.name = expr ;`
    RequestAssign { name: String, value: Expr, at: Location },
    /// `sample PERCENT% ;` or `sample A/B ;`
    Sample { rate: SampleRate, at: Location },
    /// `capture(...)` / `send(...)` — semantically identical (spec §4.1).
    Capture { args: Vec<CaptureArg>, at: Location },
}

/// One argument to a `capture`/`send` call: `name = expr` if `name` is
/// `Some`, otherwise a bare positional `expr`. Left unclassified at parse
/// time — [`crate::analyzer`] decides whether the call as a whole is
/// positional or named and rejects a mix (spec §4.2 rule 2).
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureArg {
    pub name: Option<String>,
    pub value: Expr,
}

/// A `sample` directive's ratio, kept symbolic until lowering so the
/// compiler (not the parser) decides how to gate the body (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleRate {
    /// `sample 25%` — stored as a fraction in `[0, 1]`.
    Percent(f64),
    /// `sample 1/4` — stored as the original numerator/denominator so
    /// `BadSample` (zero denominator) can be diagnosed precisely.
    Ratio { numerator: u64, denominator: u64 },
}

/// An expression, as produced by the Pratt-style parser in
/// [`crate::parser`]. Precedence is already resolved by tree shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    IntLit(i64, Location),
    FloatLit(f64, Location),
    StringLit(String, Location),
    BoolLit(bool, Location),
    NoneLit(Location),
    Identifier(String, Location),
    /// `$req.name` / `$request.name`, already canonicalized to one spelling.
    RequestVar(String, Location),
    Attr {
        base: Box<Expr>,
        field: String,
        at: Location,
    },
    Index {
        base: Box<Expr>,
        key: Box<Expr>,
        at: Location,
    },
    Call {
        name: String,
        args: Vec<Expr>,
        at: Location,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        at: Location,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        at: Location,
    },
}

impl Expr {
    #[must_use]
    pub fn location(&self) -> Location {
        match self {
            Self::IntLit(_, at)
            | Self::FloatLit(_, at)
            | Self::StringLit(_, at)
            | Self::BoolLit(_, at)
            | Self::NoneLit(at)
            | Self::Identifier(_, at)
            | Self::RequestVar(_, at)
            | Self::Attr { at, .. }
            | Self::Index { at, .. }
            | Self::Call { at, .. }
            | Self::Unary { at, .. }
            | Self::Binary { at, .. } => *at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}
