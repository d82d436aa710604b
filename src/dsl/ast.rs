//! Compiled DSL AST (§4.F). The Play Loader turns the raw YAML grammar into
//! these types exactly once; the hot loop (§4.G evaluator) never touches the
//! raw `serde_yaml::Value` representation again.

use crate::feed::TimeframeRole;
use crate::snapshot::Ref;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// One side of a `Cond`: a bare reference, a literal, or an arithmetic
/// combination of the two (§4.F `Arith` production).
#[derive(Debug, Clone)]
pub enum Operand {
    Ref(Ref),
    Literal(f64),
    Arith(Box<Operand>, ArithOp, Box<Operand>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CondOp {
    Gt,
    Lt,
    Ge,
    Le,
    Between { hi: Box<Operand> },
    NearPct { tolerance: f64 },
    NearAbs { tolerance: f64 },
    Eq,
    Ne,
    In(Vec<f64>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossOp {
    Above,
    Below,
}

/// `anchor_tf` scales a window's `bars` count onto the exec timeframe
/// (§4.G: `effective_lookback = bars * (anchor_tf / exec_tf)`).
#[derive(Debug, Clone, Copy)]
pub struct WindowAnchor {
    pub anchor_tf: Option<TimeframeRole>,
}

#[derive(Debug, Clone)]
pub enum WindowExpr {
    HoldsFor { bars: u32, anchor: WindowAnchor, expr: Box<CompiledExpr> },
    OccurredWithin { bars: u32, anchor: WindowAnchor, expr: Box<CompiledExpr> },
    CountTrue { bars: u32, min_true: u32, anchor: WindowAnchor, expr: Box<CompiledExpr> },
}

#[derive(Debug, Clone)]
pub enum CompiledExpr {
    All(Vec<CompiledExpr>),
    Any(Vec<CompiledExpr>),
    Not(Box<CompiledExpr>),
    Cond { lhs: Operand, op: CondOp, rhs: Operand },
    Cross { lhs: Operand, op: CrossOp, rhs: Operand },
    Window(WindowExpr),
    SetupRef(String),
}

/// Reasons the evaluator surfaces for state tracking and debug artifacts
/// (§4.G). `OK` means a definite true/false result was reached normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasonCode {
    Ok,
    NotReady,
    Missing,
    Threshold,
    Window,
    Cross,
    InternalError,
}
