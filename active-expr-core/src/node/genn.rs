//! Generic node-construction and evaluation helpers shared across every kind: the
//! recursive `build` that lowers one `Expr` into an `ActiveNode` (§4.2 `Create`, §7
//! "Initialization fault" rollback), the `Unary`/`Binary` evaluation protocol (§4.1), the
//! value-disposal dispatch driven by `Options` (§3 `Options`), and the diagnostic
//! `Display` impl (§6 `ToString`) — the small node-building utilities shared by every
//! other node module.

use super::op::{evaluate_binary as run_binary, evaluate_unary as run_unary};
use super::{ActiveNode, Engine, Kind, NodeRef};
use crate::expr::{Expr, ExprKind};
use crate::host::Bindings;
use crate::options::Options;
use crate::value::{DynValue, Fault};
use smallvec::SmallVec;
use triomphe::Arc;

/// Recursively lowers `expr` into an `ActiveNode`, creating (interning) every child
/// first (§3 Lifecycle "children are created before parents" — this is also why the DAG
/// can never cycle, §3 invariant 6). On any child-creation or binding-resolution failure,
/// every child created so far for *this* node is disposed before the error is returned
/// (§7 "Initialization fault": "the partially built node MUST roll back").
pub(crate) fn build(
    engine: &Engine,
    expr: Arc<Expr>,
    options: Option<Arc<Options>>,
    bindings: &dyn Bindings,
    defer: bool,
) -> anyhow::Result<NodeRef> {
    let mut created: SmallVec<[NodeRef; 4]> = SmallVec::new();
    let result = try_build(engine, &expr, &options, bindings, defer, &mut created);
    match result {
        Ok(node) => Ok(node),
        Err(e) => {
            for child in created {
                engine.dispose(child);
            }
            Err(e)
        }
    }
}

fn create_child(
    engine: &Engine,
    expr: Arc<Expr>,
    options: &Option<Arc<Options>>,
    bindings: &dyn Bindings,
    defer: bool,
    created: &mut SmallVec<[NodeRef; 4]>,
) -> anyhow::Result<NodeRef> {
    let node = engine.create(expr, options.clone(), bindings, defer)?;
    created.push(node.clone());
    Ok(node)
}

fn try_build(
    engine: &Engine,
    expr: &Arc<Expr>,
    options: &Option<Arc<Options>>,
    bindings: &dyn Bindings,
    defer: bool,
    created: &mut SmallVec<[NodeRef; 4]>,
) -> anyhow::Result<NodeRef> {
    let result_type = expr.result_type.clone();
    let kind = match &expr.kind {
        ExprKind::Constant(v) => Kind::Constant { value: v.clone() },
        ExprKind::Parameter(id) => Kind::Parameter { id: *id },
        ExprKind::Member { source, member } => {
            let source_node = match source {
                Some(s) => {
                    Some(create_child(engine, s.clone(), options, bindings, defer, created)?)
                }
                None => None,
            };
            let owner_type = source_node.as_ref().map(|n| n.result_type.clone());
            let getter = bindings.getter(owner_type.as_ref(), member)?;
            Kind::Member { source: source_node, member: member.clone(), getter }
        }
        ExprKind::Unary { op, operand, method } => {
            let operand_node =
                create_child(engine, operand.clone(), options, bindings, defer, created)?;
            let delegate = engine.operators.unary(
                *op,
                operand_node.result_type.clone(),
                result_type.clone(),
                method.clone(),
            );
            Kind::Unary { operand: operand_node, op: *op, delegate }
        }
        ExprKind::Binary { op, left, right, method, .. } => {
            let left_node =
                create_child(engine, left.clone(), options, bindings, defer, created)?;
            let right_node =
                create_child(engine, right.clone(), options, bindings, defer, created)?;
            let delegate = engine.operators.binary(
                *op,
                left_node.result_type.clone(),
                right_node.result_type.clone(),
                result_type.clone(),
                method.clone(),
            );
            Kind::Binary { left: left_node, right: right_node, op: *op, delegate }
        }
        ExprKind::AndAlso { left, right } => {
            let left_node =
                create_child(engine, left.clone(), options, bindings, defer, created)?;
            // Right operand always constructed deferred (§3 Lifecycle, §4.1 AndAlso/OrElse).
            let right_node =
                create_child(engine, right.clone(), options, bindings, true, created)?;
            Kind::AndAlso { left: left_node, right: right_node }
        }
        ExprKind::OrElse { left, right } => {
            let left_node =
                create_child(engine, left.clone(), options, bindings, defer, created)?;
            let right_node =
                create_child(engine, right.clone(), options, bindings, true, created)?;
            Kind::OrElse { left: left_node, right: right_node }
        }
        ExprKind::Coalesce { left, right, conversion } => {
            let left_node =
                create_child(engine, left.clone(), options, bindings, defer, created)?;
            let right_node =
                create_child(engine, right.clone(), options, bindings, true, created)?;
            let conversion = match conversion {
                Some(name) => Some(bindings.method(
                    Some(&left_node.result_type),
                    name,
                    &[right_node.result_type.clone()],
                )?),
                None => None,
            };
            Kind::Coalesce { left: left_node, right: right_node, conversion }
        }
        ExprKind::Conditional { test, if_true, if_false } => {
            let test_node =
                create_child(engine, test.clone(), options, bindings, defer, created)?;
            // Both branches deferred: only the live one is ever forced (§4.1 Conditional).
            let if_true_node =
                create_child(engine, if_true.clone(), options, bindings, true, created)?;
            let if_false_node =
                create_child(engine, if_false.clone(), options, bindings, true, created)?;
            Kind::Conditional { test: test_node, if_true: if_true_node, if_false: if_false_node }
        }
        ExprKind::Index { receiver, index } => {
            let receiver_node =
                create_child(engine, receiver.clone(), options, bindings, defer, created)?;
            let index_node =
                create_child(engine, index.clone(), options, bindings, defer, created)?;
            let getter = bindings.indexer(&receiver_node.result_type)?;
            Kind::Index { receiver: receiver_node, index: index_node, getter }
        }
        ExprKind::MethodCall { receiver, method, args } => {
            let receiver_node = match receiver {
                Some(r) => {
                    Some(create_child(engine, r.clone(), options, bindings, defer, created)?)
                }
                None => None,
            };
            let mut arg_nodes: SmallVec<[NodeRef; 4]> = SmallVec::new();
            for a in args {
                arg_nodes
                    .push(create_child(engine, a.clone(), options, bindings, defer, created)?);
            }
            let owner_type = receiver_node.as_ref().map(|n| n.result_type.clone());
            let arg_types: SmallVec<[_; 4]> =
                arg_nodes.iter().map(|n| n.result_type.clone()).collect();
            let caller = bindings.method(owner_type.as_ref(), method, &arg_types)?;
            Kind::MethodCall {
                receiver: receiver_node,
                method: method.clone(),
                args: arg_nodes,
                caller,
            }
        }
        ExprKind::Invocation { callee, args } => {
            let callee_node =
                create_child(engine, callee.clone(), options, bindings, defer, created)?;
            let mut arg_nodes: SmallVec<[NodeRef; 4]> = SmallVec::new();
            for a in args {
                arg_nodes
                    .push(create_child(engine, a.clone(), options, bindings, defer, created)?);
            }
            Kind::Invocation { callee: callee_node, args: arg_nodes }
        }
        ExprKind::New { type_name, parameter_types, args } => {
            let mut arg_nodes: SmallVec<[NodeRef; 4]> = SmallVec::new();
            for a in args {
                arg_nodes
                    .push(create_child(engine, a.clone(), options, bindings, defer, created)?);
            }
            let caller = bindings.constructor(type_name, parameter_types)?;
            Kind::New {
                type_name: type_name.clone(),
                parameter_types: parameter_types.clone(),
                args: arg_nodes,
                caller,
            }
        }
        ExprKind::NewArrayInit { element_type, elements } => {
            let mut elem_nodes: SmallVec<[NodeRef; 4]> = SmallVec::new();
            for e in elements {
                elem_nodes
                    .push(create_child(engine, e.clone(), options, bindings, defer, created)?);
            }
            Kind::NewArrayInit { element_type: element_type.clone(), elements: elem_nodes }
        }
        ExprKind::TypeBinary { operand, target_type, as_cast } => {
            let operand_node =
                create_child(engine, operand.clone(), options, bindings, defer, created)?;
            let caller = bindings.type_binary(target_type, *as_cast);
            Kind::TypeBinary {
                operand: operand_node,
                target_type: target_type.clone(),
                as_cast: *as_cast,
                caller,
            }
        }
    };
    let node = ActiveNode::new(expr.clone(), options.clone(), kind, defer);
    for child in children(&node) {
        node.listen_to_child(&child);
    }
    node.evaluate_if_not_deferred();
    Ok(node)
}

/// Every direct child of `node`, in operand order, used both for teardown recursion and
/// for wiring the parent→child change subscription at construction time.
pub(crate) fn children(node: &ActiveNode) -> SmallVec<[NodeRef; 4]> {
    let mut out: SmallVec<[NodeRef; 4]> = SmallVec::new();
    match &node.kind {
        Kind::Constant { .. } | Kind::Parameter { .. } => {}
        Kind::Member { source, .. } => out.extend(source.clone()),
        Kind::Unary { operand, .. } => out.push(operand.clone()),
        Kind::Binary { left, right, .. } => {
            out.push(left.clone());
            out.push(right.clone());
        }
        Kind::AndAlso { left, right } | Kind::OrElse { left, right } => {
            out.push(left.clone());
            out.push(right.clone());
        }
        Kind::Coalesce { left, right, .. } => {
            out.push(left.clone());
            out.push(right.clone());
        }
        Kind::Conditional { test, if_true, if_false } => {
            out.push(test.clone());
            out.push(if_true.clone());
            out.push(if_false.clone());
        }
        Kind::Index { receiver, index, .. } => {
            out.push(receiver.clone());
            out.push(index.clone());
        }
        Kind::MethodCall { receiver, args, .. } => {
            out.extend(receiver.clone());
            out.extend(args.iter().cloned());
        }
        Kind::Invocation { callee, args } => {
            out.push(callee.clone());
            out.extend(args.iter().cloned());
        }
        Kind::New { args, .. } => out.extend(args.iter().cloned()),
        Kind::NewArrayInit { elements, .. } => out.extend(elements.iter().cloned()),
        Kind::TypeBinary { operand, .. } => out.push(operand.clone()),
    }
    out
}

/// Evaluates a `Unary` node (§4.1): fault dominance from the operand, then the cached
/// delegate.
pub(crate) fn evaluate_unary(node: &NodeRef) {
    let Kind::Unary { operand, delegate, .. } = &node.kind else { unreachable!() };
    if let Some(f) = ActiveNode::dominant_child_fault(&[operand]) {
        node.set_fault(f);
        return;
    }
    let v = operand.value().unwrap_or(DynValue::Null);
    match run_unary(delegate, &v) {
        Ok(result) => node.set_value(result),
        Err(f) => node.set_fault(f),
    }
}

/// Evaluates a (non-short-circuit) `Binary` node (§4.1): both operands evaluated
/// eagerly by the caller already; fault dominance in operand order, then the delegate.
pub(crate) fn evaluate_binary(node: &NodeRef) {
    let Kind::Binary { left, right, delegate, .. } = &node.kind else { unreachable!() };
    if let Some(f) = ActiveNode::dominant_child_fault(&[left, right]) {
        node.set_fault(f);
        return;
    }
    let l = left.value().unwrap_or(DynValue::Null);
    let r = right.value().unwrap_or(DynValue::Null);
    match run_binary(delegate, &l, &r) {
        Ok(result) => node.set_value(result),
        Err(f) => node.set_fault(f),
    }
}

/// Disposes `node`'s current value if its `Options` mandate it for this kind (§3 `Options`
/// `disposeConstructedTypes`/`disposeMethodReturnValues`/`disposeStaticMethodReturnValues`;
/// §8 property 6). A failing disposal predicate is itself an Options-contract fault on the
/// node, not a panic (§7 "Options-contract fault").
pub(crate) fn dispose_value_if_mandated(node: &ActiveNode) {
    let should = match should_dispose(node) {
        Ok(b) => b,
        Err(e) => {
            node.set_fault(Fault::options_contract(e));
            return;
        }
    };
    if should {
        if let Some(DynValue::Object(obj)) = node.value() {
            obj.dispose();
        }
    }
}

fn should_dispose(node: &ActiveNode) -> anyhow::Result<bool> {
    let Some(options) = node.options.as_ref() else { return Ok(false) };
    Ok(match &node.kind {
        Kind::New { type_name, parameter_types, .. } => {
            options.should_dispose_constructed_type(type_name, parameter_types)
        }
        Kind::MethodCall { receiver, method, .. } => {
            options.should_dispose_method_return(method, receiver.is_none())
        }
        Kind::Member { source, member, .. } => {
            options.should_dispose_method_return(member, source.is_none())
        }
        _ => false,
    })
}

impl std::fmt::Display for ActiveNode {
    /// Renders the originating expression with node-specific syntax, followed by a
    /// diagnostic tag (§6: "followed by a suffix diagnostic tag; useful for debugging
    /// only and not part of the equality contract").
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (value, fault) = self.value_and_fault();
        write!(f, "{}", self.expr)?;
        match fault {
            Some(fault) => write!(f, " /* fault: {fault} */"),
            None => match value {
                Some(v) => write!(f, " /* = {v} */"),
                None => write!(f, " /* deferred */"),
            },
        }
    }
}
