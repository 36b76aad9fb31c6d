//! Short-circuit evaluation family (§4.1): `AndAlso`, `OrElse`, `Coalesce`, `Conditional`.
//! Unlike every other kind these don't run the generic "collect every child fault in
//! operand order" protocol — each has a bespoke rule about which children are even
//! looked at, which is exactly what makes short-circuiting observable (§8 property 4:
//! "a side-effecting member read in right is not invoked") — the kinds whose children
//! aren't all evaluated up front.

use super::{ActiveNode, Kind, NodeRef};
use crate::value::{DynValue, Fault};

/// `left && right`: if `left` faults, propagate; if `left` is false, short-circuit to
/// `false` without ever forcing `right`'s evaluation (§8 property 4); otherwise force
/// `right` and adopt its `(Value, Fault)`.
pub(crate) fn evaluate_and_also(node: &NodeRef) {
    let Kind::AndAlso { left, right } = &node.kind else { unreachable!() };
    if let Some(f) = left.fault() {
        node.set_fault(Fault::from_child(&f));
        return;
    }
    let truthy = left.value().map(|v| v.is_truthy()).unwrap_or(false);
    if !truthy {
        node.set_value(DynValue::Bool(false));
        return;
    }
    right.force_evaluate();
    adopt_child_result(node, right);
}

/// `left || right`: mirror of `evaluate_and_also` — short-circuits to `true` when `left`
/// is already true.
pub(crate) fn evaluate_or_else(node: &NodeRef) {
    let Kind::OrElse { left, right } = &node.kind else { unreachable!() };
    if let Some(f) = left.fault() {
        node.set_fault(Fault::from_child(&f));
        return;
    }
    let truthy = left.value().map(|v| v.is_truthy()).unwrap_or(false);
    if truthy {
        node.set_value(DynValue::Bool(true));
        return;
    }
    right.force_evaluate();
    adopt_child_result(node, right);
}

/// `left ?? right`: if `left` faults, propagate; if `left` is non-null, adopt it
/// (optionally converted); otherwise force `right` and adopt it (optionally converted).
/// `right` is only ever forced when `left` actually evaluates to null (§8 scenario S5).
pub(crate) fn evaluate_coalesce(node: &NodeRef) {
    let Kind::Coalesce { left, right, conversion } = &node.kind else { unreachable!() };
    if let Some(f) = left.fault() {
        node.set_fault(Fault::from_child(&f));
        return;
    }
    match left.value() {
        Some(v) if !v.is_null() => apply_conversion(node, conversion, v),
        _ => {
            right.force_evaluate();
            if let Some(f) = right.fault() {
                node.set_fault(Fault::from_child(&f));
                return;
            }
            let v = right.value().unwrap_or(DynValue::Null);
            apply_conversion(node, conversion, v);
        }
    }
}

fn apply_conversion(
    node: &ActiveNode,
    conversion: &Option<triomphe::Arc<dyn crate::host::Caller>>,
    value: DynValue,
) {
    match conversion {
        None => node.set_value(value),
        Some(caller) => match caller.invoke(None, &[value]) {
            Ok(converted) => node.set_value(converted),
            Err(e) => node.set_fault(Fault::evaluation(e)),
        },
    }
}

/// `test ? if_true : if_false`: the inactive branch is never forced for this evaluation
/// (though both remain subscribed for the lifetime of the node — §4.1 design note: "both
/// are always subscribed and the result picks from the live branch"). Only the live
/// branch's fault or value becomes this node's own.
pub(crate) fn evaluate_conditional(node: &NodeRef) {
    let Kind::Conditional { test, if_true, if_false } = &node.kind else { unreachable!() };
    if let Some(f) = test.fault() {
        node.set_fault(Fault::from_child(&f));
        return;
    }
    let truthy = test.value().map(|v| v.is_truthy()).unwrap_or(false);
    let branch = if truthy { if_true } else { if_false };
    branch.force_evaluate();
    adopt_child_result(node, branch);
}

fn adopt_child_result(node: &ActiveNode, child: &NodeRef) {
    match child.fault() {
        Some(f) => node.set_fault(Fault::from_child(&f)),
        None => node.set_value(child.value().unwrap_or(DynValue::Null)),
    }
}
