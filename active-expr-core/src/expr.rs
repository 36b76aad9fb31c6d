//! The compile-time expression tree (§1 "OUT OF SCOPE: the expression-tree data type
//! itself"). Here it's simply owned Rust data rather than a parsed or reflected host
//! type, so `Expr`'s derived `PartialEq`/`Hash` double as the `ExprStructuralEq`
//! capability §6 asks for.

use crate::value::{DynValue, Type};
use arcstr::ArcStr;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicU64, Ordering};
use triomphe::Arc;

/// Monotonically increasing id, handed out per `Parameter` binding site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(u64);

impl ParamId {
    pub fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        ParamId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ParamId {
    fn default() -> Self {
        ParamId::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

/// The closed set of node kinds (C1, §4.1), as a compile-time tree rather than a live
/// node. `compiler::compile` lowers one of these (recursively, bottom-up) into an
/// `ActiveNode` DAG, interning structurally-equal subtrees.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExprKind {
    Constant(DynValue),
    Parameter(ParamId),
    Member {
        source: Option<Arc<Expr>>,
        member: ArcStr,
    },
    Unary {
        op: UnaryOperator,
        operand: Arc<Expr>,
        method: Option<ArcStr>,
    },
    Binary {
        op: BinaryOperator,
        left: Arc<Expr>,
        right: Arc<Expr>,
        method: Option<ArcStr>,
        is_lifted_to_null: bool,
    },
    AndAlso {
        left: Arc<Expr>,
        right: Arc<Expr>,
    },
    OrElse {
        left: Arc<Expr>,
        right: Arc<Expr>,
    },
    Coalesce {
        left: Arc<Expr>,
        right: Arc<Expr>,
        conversion: Option<ArcStr>,
    },
    Conditional {
        test: Arc<Expr>,
        if_true: Arc<Expr>,
        if_false: Arc<Expr>,
    },
    Index {
        receiver: Arc<Expr>,
        index: Arc<Expr>,
    },
    MethodCall {
        receiver: Option<Arc<Expr>>,
        method: ArcStr,
        args: SmallVec<[Arc<Expr>; 4]>,
    },
    Invocation {
        callee: Arc<Expr>,
        args: SmallVec<[Arc<Expr>; 4]>,
    },
    New {
        type_name: ArcStr,
        parameter_types: Arc<[ArcStr]>,
        args: SmallVec<[Arc<Expr>; 4]>,
    },
    NewArrayInit {
        element_type: Type,
        elements: SmallVec<[Arc<Expr>; 4]>,
    },
    TypeBinary {
        operand: Arc<Expr>,
        target_type: ArcStr,
        /// `true` for `as`-style cast, `false` for `is`-style test.
        as_cast: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Expr {
    pub kind: ExprKind,
    pub result_type: Type,
}

impl Expr {
    pub fn new(kind: ExprKind, result_type: Type) -> Arc<Expr> {
        Arc::new(Expr { kind, result_type })
    }

    pub fn constant(value: DynValue) -> Arc<Expr> {
        let ty = value.type_of();
        Expr::new(ExprKind::Constant(value), ty)
    }
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ExprKind::Constant(v) => write!(f, "{v}"),
            ExprKind::Parameter(id) => write!(f, "$p{}", id.0),
            ExprKind::Member { source, member } => match source {
                Some(s) => write!(f, "{s}.{member}"),
                None => write!(f, "{member}"),
            },
            ExprKind::Unary { operand, op, .. } => write!(f, "({}{operand})", unop_symbol(*op)),
            ExprKind::Binary { op, left, right, .. } => {
                write!(f, "({left} {} {right})", binop_symbol(*op))
            }
            ExprKind::AndAlso { left, right } => write!(f, "({left} && {right})"),
            ExprKind::OrElse { left, right } => write!(f, "({left} || {right})"),
            ExprKind::Coalesce { left, right, .. } => write!(f, "({left} ?? {right})"),
            ExprKind::Conditional { test, if_true, if_false } => {
                write!(f, "({test} ? {if_true} : {if_false})")
            }
            ExprKind::Index { receiver, index } => write!(f, "{receiver}[{index}]"),
            ExprKind::MethodCall { receiver, method, args } => {
                match receiver {
                    Some(r) => write!(f, "{r}.{method}(")?,
                    None => write!(f, "{method}(")?,
                }
                write_args(f, args)?;
                write!(f, ")")
            }
            ExprKind::Invocation { callee, args } => {
                write!(f, "{callee}(")?;
                write_args(f, args)?;
                write!(f, ")")
            }
            ExprKind::New { type_name, args, .. } => {
                write!(f, "new {type_name}(")?;
                write_args(f, args)?;
                write!(f, ")")
            }
            ExprKind::NewArrayInit { element_type, elements } => {
                write!(f, "new {element_type}[] {{")?;
                write_args(f, elements)?;
                write!(f, "}}")
            }
            ExprKind::TypeBinary { operand, target_type, as_cast } => {
                if *as_cast {
                    write!(f, "({operand} as {target_type})")
                } else {
                    write!(f, "({operand} is {target_type})")
                }
            }
        }
    }
}

fn write_args(f: &mut std::fmt::Formatter<'_>, args: &[Arc<Expr>]) -> std::fmt::Result {
    for (i, a) in args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{a}")?;
    }
    Ok(())
}

fn unop_symbol(op: UnaryOperator) -> &'static str {
    match op {
        UnaryOperator::Not => "!",
        UnaryOperator::Negate => "-",
    }
}

fn binop_symbol(op: BinaryOperator) -> &'static str {
    use BinaryOperator::*;
    match op {
        Add => "+",
        Subtract => "-",
        Multiply => "*",
        Divide => "/",
        Modulo => "%",
        Equal => "==",
        NotEqual => "!=",
        LessThan => "<",
        LessThanOrEqual => "<=",
        GreaterThan => ">",
        GreaterThanOrEqual => ">=",
    }
}
