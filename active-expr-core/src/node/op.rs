//! Operator delegate cache (C4, §4.3) and the `Unary`/`Binary` node kinds (§4.1). Builds
//! one closure per operator/type combination and caches it; operand types here are a
//! closed, small set (`Type`), so the cache key is plain data rather than reflected
//! metadata.

use crate::expr::{BinaryOperator, UnaryOperator};
use crate::value::{DynValue, Fault, FaultKind, Type};
use arcstr::ArcStr;
use fxhash::FxHashMap;
use parking_lot::Mutex;
use std::cmp::Ordering;
use triomphe::Arc;

pub type UnaryDelegate = Arc<dyn Fn(&DynValue) -> anyhow::Result<DynValue> + Send + Sync>;
pub type BinaryDelegate =
    Arc<dyn Fn(&DynValue, &DynValue) -> anyhow::Result<DynValue> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct UnaryKey {
    op: UnaryOperator,
    operand: Type,
    result: Type,
    method: Option<ArcStr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BinaryKey {
    op: BinaryOperator,
    left: Type,
    right: Type,
    result: Type,
    method: Option<ArcStr>,
}

/// Never evicted: per §4.3, "operators are a small static universe per process."
#[derive(Default)]
pub struct OperatorCache {
    unary: Mutex<FxHashMap<UnaryKey, UnaryDelegate>>,
    binary: Mutex<FxHashMap<BinaryKey, BinaryDelegate>>,
}

impl OperatorCache {
    pub fn unary(
        &self,
        op: UnaryOperator,
        operand: Type,
        result: Type,
        method: Option<ArcStr>,
    ) -> UnaryDelegate {
        let key = UnaryKey { op, operand, result, method: method.clone() };
        let mut table = self.unary.lock();
        table.entry(key).or_insert_with(|| build_unary(op, method)).clone()
    }

    pub fn binary(
        &self,
        op: BinaryOperator,
        left: Type,
        right: Type,
        result: Type,
        method: Option<ArcStr>,
    ) -> BinaryDelegate {
        let key = BinaryKey { op, left, right, result, method: method.clone() };
        let mut table = self.binary.lock();
        table.entry(key).or_insert_with(|| build_binary(op, method)).clone()
    }
}

fn build_unary(op: UnaryOperator, _method: Option<ArcStr>) -> UnaryDelegate {
    match op {
        UnaryOperator::Not => Arc::new(|v: &DynValue| match v {
            DynValue::Bool(b) => Ok(DynValue::Bool(!b)),
            v => anyhow::bail!("cannot apply `!` to {v}"),
        }),
        UnaryOperator::Negate => Arc::new(|v: &DynValue| match v {
            DynValue::Int(i) => Ok(DynValue::Int(-i)),
            DynValue::Float(f) => Ok(DynValue::Float(-f)),
            v => anyhow::bail!("cannot negate {v}"),
        }),
    }
}

fn build_binary(op: BinaryOperator, _method: Option<ArcStr>) -> BinaryDelegate {
    use BinaryOperator::*;
    match op {
        Add => Arc::new(|l, r| arith(l, r, |a, b| a + b, |a, b| a + b)),
        Subtract => Arc::new(|l, r| arith(l, r, |a, b| a - b, |a, b| a - b)),
        Multiply => Arc::new(|l, r| arith(l, r, |a, b| a * b, |a, b| a * b)),
        Divide => Arc::new(|l, r| match (l, r) {
            (DynValue::Int(_), DynValue::Int(0)) => anyhow::bail!("divide by zero"),
            _ => arith(l, r, |a, b| a / b, |a, b| a / b),
        }),
        Modulo => Arc::new(|l, r| match (l, r) {
            (DynValue::Int(_), DynValue::Int(0)) => anyhow::bail!("divide by zero"),
            _ => arith(l, r, |a, b| a % b, |a, b| a % b),
        }),
        Equal => Arc::new(|l, r| Ok(DynValue::Bool(l == r))),
        NotEqual => Arc::new(|l, r| Ok(DynValue::Bool(l != r))),
        LessThan => Arc::new(|l, r| compare(l, r).map(|o| DynValue::Bool(o == Ordering::Less))),
        LessThanOrEqual => {
            Arc::new(|l, r| compare(l, r).map(|o| DynValue::Bool(o != Ordering::Greater)))
        }
        GreaterThan => {
            Arc::new(|l, r| compare(l, r).map(|o| DynValue::Bool(o == Ordering::Greater)))
        }
        GreaterThanOrEqual => {
            Arc::new(|l, r| compare(l, r).map(|o| DynValue::Bool(o != Ordering::Less)))
        }
    }
}

fn arith(
    l: &DynValue,
    r: &DynValue,
    int_op: impl Fn(i64, i64) -> i64,
    float_op: impl Fn(f64, f64) -> f64,
) -> anyhow::Result<DynValue> {
    match (l, r) {
        (DynValue::Int(a), DynValue::Int(b)) => Ok(DynValue::Int(int_op(*a, *b))),
        (DynValue::Float(a), DynValue::Float(b)) => Ok(DynValue::Float(float_op(*a, *b))),
        (DynValue::Int(a), DynValue::Float(b)) => Ok(DynValue::Float(float_op(*a as f64, *b))),
        (DynValue::Float(a), DynValue::Int(b)) => Ok(DynValue::Float(float_op(*a, *b as f64))),
        (DynValue::String(a), DynValue::String(b)) => {
            Ok(DynValue::String(compact_str::format_compact!("{a}{b}")))
        }
        (l, r) => anyhow::bail!("cannot apply arithmetic operator to {l} and {r}"),
    }
}

fn compare(l: &DynValue, r: &DynValue) -> anyhow::Result<Ordering> {
    match (l, r) {
        (DynValue::Int(a), DynValue::Int(b)) => Ok(a.cmp(b)),
        (DynValue::Float(a), DynValue::Float(b)) => {
            a.partial_cmp(b).ok_or_else(|| anyhow::anyhow!("NaN is unordered"))
        }
        (DynValue::Int(a), DynValue::Float(b)) => {
            (*a as f64).partial_cmp(b).ok_or_else(|| anyhow::anyhow!("NaN is unordered"))
        }
        (DynValue::Float(a), DynValue::Int(b)) => {
            a.partial_cmp(&(*b as f64)).ok_or_else(|| anyhow::anyhow!("NaN is unordered"))
        }
        (DynValue::String(a), DynValue::String(b)) => Ok(a.cmp(b)),
        (l, r) => anyhow::bail!("cannot compare {l} and {r}"),
    }
}

/// Evaluates a `Unary` node: fault propagates from the operand (§4.1), otherwise the
/// cached delegate runs.
pub fn evaluate_unary(delegate: &UnaryDelegate, operand: &DynValue) -> Result<DynValue, Fault> {
    crate::wrap!(FaultKind::Evaluation, delegate(operand))
}

/// Evaluates a (non-short-circuit) `Binary` node: both operands are already evaluated
/// eagerly by the caller; this just runs the delegate.
pub fn evaluate_binary(
    delegate: &BinaryDelegate,
    left: &DynValue,
    right: &DynValue,
) -> Result<DynValue, Fault> {
    crate::wrap!(FaultKind::Evaluation, delegate(left, right))
}
