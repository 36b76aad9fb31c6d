//! Array and type-query node kinds (§4.1): `Index`, `NewArrayInit`, `TypeBinary`. A
//! fixed-arity node built from a vector of child nodes, same shape as any other
//! multi-child kind but grouped here by "produces or queries array-shaped values."

use super::{ActiveNode, Kind, NodeRef};
use crate::value::{DynValue, Fault};
use smallvec::SmallVec;

/// `receiver[index]` (§4.1 Index): fault dominance over `(receiver, index)` in that
/// order, then the resolved indexer invoked as a single-argument `Caller`.
pub(crate) fn evaluate_index(node: &NodeRef) {
    let Kind::Index { receiver, index, getter } = &node.kind else { unreachable!() };
    if let Some(f) = ActiveNode::dominant_child_fault(&[receiver, index]) {
        node.set_fault(f);
        return;
    }
    let receiver_value = receiver.value().unwrap_or(DynValue::Null);
    let index_value = index.value().unwrap_or(DynValue::Null);
    match getter.invoke(Some(&receiver_value), &[index_value]) {
        Ok(v) => node.set_value(v),
        Err(e) => node.set_fault(Fault::evaluation(e)),
    }
}

/// `new T[] { elements... }` (§4.1 NewArrayInit): fault dominance over every element in
/// order, else the evaluated elements collected into a `DynValue::Array`.
pub(crate) fn evaluate_new_array_init(node: &NodeRef) {
    let Kind::NewArrayInit { elements, .. } = &node.kind else { unreachable!() };
    let refs: SmallVec<[&NodeRef; 4]> = elements.iter().collect();
    if let Some(f) = ActiveNode::dominant_child_fault(&refs) {
        node.set_fault(f);
        return;
    }
    let values: SmallVec<[DynValue; 4]> =
        elements.iter().map(|e| e.value().unwrap_or(DynValue::Null)).collect();
    node.set_value(DynValue::Array(triomphe::Arc::new(values)));
}

/// `operand is T` / `operand as T` (§4.1 TypeBinary): fault dominance from `operand`,
/// then the resolved type-test/cast delegate invoked with no arguments — `as_cast`
/// distinguishes the two only for the binding's own benefit (e.g. choosing whether a
/// mismatch yields `false` or `Null` versus a fault), the node itself just relays the
/// result.
pub(crate) fn evaluate_type_binary(node: &NodeRef) {
    let Kind::TypeBinary { operand, caller, .. } = &node.kind else { unreachable!() };
    if let Some(f) = ActiveNode::dominant_child_fault(&[operand]) {
        node.set_fault(f);
        return;
    }
    let operand_value = operand.value().unwrap_or(DynValue::Null);
    match caller.invoke(Some(&operand_value), &[]) {
        Ok(v) => node.set_value(v),
        Err(e) => node.set_fault(Fault::evaluation(e)),
    }
}
