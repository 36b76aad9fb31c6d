//! Call-shaped node kinds (§4.1): `MethodCall`, `Invocation`, `New` — each a node whose
//! value comes from invoking a resolved callable against its evaluated children.

use super::genn::dispose_value_if_mandated;
use super::{ActiveNode, Kind, NodeRef};
use crate::value::{DynValue, Fault};
use smallvec::SmallVec;

/// `receiver.method(args...)` / `Type.StaticMethod(args...)` (§4.1 MethodCall): fault
/// dominance over `(receiver?, args...)` in that order; on re-evaluation the previous
/// value is disposed first if `Options` mandates it for this method.
pub(crate) fn evaluate_method_call(node: &NodeRef) {
    let Kind::MethodCall { receiver, args, caller, .. } = &node.kind else { unreachable!() };
    let mut refs: SmallVec<[&NodeRef; 4]> = SmallVec::new();
    refs.extend(receiver.as_ref());
    refs.extend(args.iter());
    if let Some(f) = ActiveNode::dominant_child_fault(&refs) {
        node.set_fault(f);
        return;
    }
    dispose_value_if_mandated(node);
    let receiver_value = receiver.as_ref().map(|r| r.value().unwrap_or(DynValue::Null));
    let arg_values: SmallVec<[DynValue; 4]> =
        args.iter().map(|a| a.value().unwrap_or(DynValue::Null)).collect();
    match caller.invoke(receiver_value.as_ref(), &arg_values) {
        Ok(v) => node.set_value(v),
        Err(e) => node.set_fault(Fault::evaluation(e)),
    }
}

/// `callee(args...)` (§4.1 MethodCall/Invocation): the evaluated `callee` is expected to
/// be a `DynValue::Object` standing for a callable (delegate/closure) host value, invoked
/// via `HostObject::invoke` (mirrors the embedding platform's `DynamicInvoke` on a
/// resolved delegate value — there is no separate fast-caller binding for this kind since
/// the callable itself, not a static member name, is what's being invoked).
pub(crate) fn evaluate_invocation(node: &NodeRef) {
    let Kind::Invocation { callee, args } = &node.kind else { unreachable!() };
    let mut refs: SmallVec<[&NodeRef; 4]> = SmallVec::new();
    refs.push(callee);
    refs.extend(args.iter());
    if let Some(f) = ActiveNode::dominant_child_fault(&refs) {
        node.set_fault(f);
        return;
    }
    let arg_values: SmallVec<[DynValue; 4]> =
        args.iter().map(|a| a.value().unwrap_or(DynValue::Null)).collect();
    let result = match callee.value() {
        Some(DynValue::Object(obj)) => obj.invoke(&arg_values),
        Some(other) => Err(anyhow::anyhow!("{other} is not invocable")),
        None => Ok(DynValue::Null),
    };
    match result {
        Ok(v) => node.set_value(v),
        Err(e) => node.set_fault(Fault::evaluation(e)),
    }
}

/// `new Type(args...)` (§4.1 New): fault dominance over the constructor arguments in
/// order; on re-evaluation the previous instance is disposed first if
/// `disposeConstructedTypes` mandates it for `(type_name, parameter_types)`.
pub(crate) fn evaluate_new(node: &NodeRef) {
    let Kind::New { args, caller, .. } = &node.kind else { unreachable!() };
    let refs: SmallVec<[&NodeRef; 4]> = args.iter().collect();
    if let Some(f) = ActiveNode::dominant_child_fault(&refs) {
        node.set_fault(f);
        return;
    }
    dispose_value_if_mandated(node);
    let arg_values: SmallVec<[DynValue; 4]> =
        args.iter().map(|a| a.value().unwrap_or(DynValue::Null)).collect();
    match caller.invoke(None, &arg_values) {
        Ok(v) => node.set_value(v),
        Err(e) => node.set_fault(Fault::evaluation(e)),
    }
}
