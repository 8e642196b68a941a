//! Expression nodes.

use funxy_common::Token;
use num_bigint::BigInt;
use num_rational::BigRational;

use super::{NodeId, Pattern, Stmt, TypeExpr, TypeVarDecl};
use super::types::ConstraintExpr;

/// An expression node.
#[derive(Debug, Clone)]
pub struct Expr {
    pub id: NodeId,
    pub token: Token,
    pub kind: ExprKind,
}

/// A segment of an interpolated string literal.
#[derive(Debug, Clone)]
pub enum InterpPart {
    /// Literal text between interpolations (escapes already decoded).
    Lit(String),
    /// An embedded `${expr}`.
    Expr(Box<Expr>),
}

/// A sequence of statements evaluating to its trailing expression (or nil).
#[derive(Debug, Clone)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

/// One arm of a `match` expression.
#[derive(Debug, Clone)]
pub struct MatchArm {
    pub id: NodeId,
    pub pat: Pattern,
    /// `if guard` -- must type to Bool.
    pub guard: Option<Expr>,
    pub body: Expr,
}

/// A function parameter: `name`, `name: T`, `name: T = default`,
/// `...rest` (variadic, last position only).
#[derive(Debug, Clone)]
pub struct Param {
    pub id: NodeId,
    pub token: Token,
    pub name: String,
    pub ty: Option<TypeExpr>,
    pub default: Option<Expr>,
    pub variadic: bool,
}

/// A function literal: `\x -> e` or `fun(x) { ... }`.
#[derive(Debug, Clone)]
pub struct FunctionLit {
    pub type_params: Vec<TypeVarDecl>,
    pub constraints: Vec<ConstraintExpr>,
    pub params: Vec<Param>,
    pub ret: Option<TypeExpr>,
    pub body: Box<Expr>,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    // ── Literals ───────────────────────────────────────────────────────
    Int(i64),
    BigInt(BigInt),
    Rational(BigRational),
    Float(f64),
    Bool(bool),
    Nil,
    /// Plain string (no `${...}` present), escapes decoded.
    Str(String),
    /// Interpolated string; parts alternate literal text and expressions.
    InterpStr(Vec<InterpPart>),
    Char(char),
    Bytes(Vec<u8>),
    /// Bit string: packed data plus the exact bit length.
    Bits { data: Vec<u8>, len: usize },

    // ── Names and composites ───────────────────────────────────────────
    Ident(String),
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
    Record {
        fields: Vec<(String, Expr)>,
        /// `...base` extension, at most one.
        spread: Option<Box<Expr>>,
    },

    // ── Operators ──────────────────────────────────────────────────────
    Prefix { op: UnOp, rhs: Box<Expr> },
    Infix { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Call { callee: Box<Expr>, args: Vec<Expr> },
    Index { obj: Box<Expr>, index: Box<Expr> },
    Member { obj: Box<Expr>, name: String },
    /// `expr: Type` ascription.
    Annotated { expr: Box<Expr>, ty: TypeExpr },
    /// `target = value` in expression position (statement-position `=`
    /// becomes a const declaration).
    Assign { target: Box<Expr>, value: Box<Expr> },
    /// `expr<T, ...>` explicit type application.
    TypeApp { expr: Box<Expr>, args: Vec<TypeExpr> },

    // ── Control ────────────────────────────────────────────────────────
    Lambda(FunctionLit),
    If {
        cond: Box<Expr>,
        /// Always a block.
        then_branch: Box<Expr>,
        /// A block or a chained `if`.
        else_branch: Option<Box<Expr>>,
    },
    For {
        pat: Pattern,
        iter: Box<Expr>,
        body: Box<Expr>,
    },
    Match {
        scrutinee: Box<Expr>,
        arms: Vec<MatchArm>,
    },
    Block(Block),

    // ── Misc ───────────────────────────────────────────────────────────
    Spread(Box<Expr>),
    Range { start: Box<Expr>, end: Box<Expr> },
}

/// Prefix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    /// `-`
    Neg,
    /// `!`
    Not,
}

/// Infix operators, in increasing precedence groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    /// `$` -- low-precedence application, right-associative.
    Apply,
    /// `||`
    Or,
    /// `&&`
    And,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `>`
    Gt,
    /// `<=`
    Le,
    /// `>=`
    Ge,
    /// `<>` -- semigroup append.
    Combine,
    /// `|` -- union/alternative.
    Alt,
    /// `++` -- concatenation.
    Concat,
    /// `|>` -- pipe; `x |> f` is `f(x)`.
    Pipe,
    /// `>>=` -- monadic bind.
    Bind,
    /// `>>` -- shift right.
    Shr,
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Rem,
    /// `**` -- power, right-associative.
    Pow,
    /// `::` -- cons, right-associative.
    Cons,
    /// `,,` -- composition, right-associative.
    Compose,
}

impl BinOp {
    /// Operator spelling, for diagnostics.
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Apply => "$",
            BinOp::Or => "||",
            BinOp::And => "&&",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::Combine => "<>",
            BinOp::Alt => "|",
            BinOp::Concat => "++",
            BinOp::Pipe => "|>",
            BinOp::Bind => ">>=",
            BinOp::Shr => ">>",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Pow => "**",
            BinOp::Cons => "::",
            BinOp::Compose => ",,",
        }
    }
}
