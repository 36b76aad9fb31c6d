//! End-to-end scenarios (§8 S1-S6) exercised purely through the public façade, plus smoke
//! tests for the façade's own lifecycle (`Clone`/`Drop`/`PartialEq`) and config builder.

use crate::{create, ActiveExpressionConfig};
use active_expr_core::expr::{BinaryOperator, Expr, ExprKind, ParamId};
use active_expr_core::host::{
    Bindings, Caller, ChangeHandler, Getter, Notify, SubscriptionToken,
};
use active_expr_core::value::{DynValue, HostObject, Type};
use arcstr::{literal, ArcStr};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc as StdArc;
use triomphe::Arc;

#[derive(Clone)]
struct TestObject(StdArc<TestObjectInner>);

struct TestObjectInner {
    fields: Mutex<HashMap<ArcStr, DynValue>>,
    observers: Mutex<Vec<(u64, Option<ArcStr>, ChangeHandler)>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for TestObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestObject").field("fields", &self.0.fields.lock()).finish()
    }
}

impl TestObject {
    fn new() -> Self {
        TestObject(StdArc::new(TestObjectInner {
            fields: Mutex::new(HashMap::new()),
            observers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }))
    }

    fn set(&self, field: &str, value: DynValue) {
        let field: ArcStr = field.into();
        self.0.fields.lock().insert(field.clone(), value);
        for (_, f, handler) in self.0.observers.lock().iter() {
            if f.is_none() || f.as_ref() == Some(&field) {
                handler();
            }
        }
    }

    fn field(&self, name: &str) -> DynValue {
        self.0.fields.lock().get(name).cloned().unwrap_or(DynValue::Null)
    }
}

impl HostObject for TestObject {
    fn type_name(&self) -> ArcStr {
        literal!("TestObject")
    }

    fn as_notify(&self) -> Option<&dyn Notify> {
        Some(self)
    }
}

impl Notify for TestObject {
    fn subscribe(&self, field: Option<ArcStr>, handler: ChangeHandler) -> SubscriptionToken {
        let id = self.0.next_id.fetch_add(1, Ordering::Relaxed);
        self.0.observers.lock().push((id, field, handler));
        SubscriptionToken(id)
    }

    fn unsubscribe(&self, token: SubscriptionToken) {
        self.0.observers.lock().retain(|(id, _, _)| *id != token.0);
    }
}

fn obj_value(o: &TestObject) -> DynValue {
    DynValue::Object(Arc::new(o.clone()))
}

#[derive(Debug, Default)]
struct TestBindings {
    invocations: StdArc<Mutex<HashMap<ArcStr, usize>>>,
}

impl TestBindings {
    fn count(&self, name: &str) -> usize {
        self.invocations.lock().get(name).copied().unwrap_or(0)
    }
}

struct FieldGetter {
    member: ArcStr,
    invocations: StdArc<Mutex<HashMap<ArcStr, usize>>>,
}

impl Getter for FieldGetter {
    fn get(&self, instance: Option<&DynValue>) -> anyhow::Result<DynValue> {
        *self.invocations.lock().entry(self.member.clone()).or_insert(0) += 1;
        match instance {
            Some(DynValue::Object(obj)) => {
                let obj =
                    obj.as_any().downcast_ref::<TestObject>().expect("TestObject instance");
                Ok(obj.field(&self.member))
            }
            _ => anyhow::bail!("member {} needs an instance", self.member),
        }
    }
}

struct FixedCaller {
    name: ArcStr,
    invocations: StdArc<Mutex<HashMap<ArcStr, usize>>>,
    result: DynValue,
}

impl Caller for FixedCaller {
    fn invoke(&self, _instance: Option<&DynValue>, _args: &[DynValue]) -> anyhow::Result<DynValue> {
        *self.invocations.lock().entry(self.name.clone()).or_insert(0) += 1;
        Ok(self.result.clone())
    }
}

impl Bindings for TestBindings {
    fn getter(&self, _owner: Option<&Type>, member: &ArcStr) -> anyhow::Result<Arc<dyn Getter>> {
        Ok(Arc::new(FieldGetter { member: member.clone(), invocations: self.invocations.clone() }))
    }

    fn method(
        &self,
        _owner: Option<&Type>,
        method: &ArcStr,
        _arg_types: &[Type],
    ) -> anyhow::Result<Arc<dyn Caller>> {
        Ok(Arc::new(FixedCaller {
            name: method.clone(),
            invocations: self.invocations.clone(),
            result: DynValue::Int(42),
        }))
    }

    fn constructor(
        &self,
        type_name: &ArcStr,
        _parameter_types: &[ArcStr],
    ) -> anyhow::Result<Arc<dyn Caller>> {
        anyhow::bail!("no constructor bound for {type_name}")
    }

    fn indexer(&self, _owner: &Type) -> anyhow::Result<Arc<dyn Caller>> {
        anyhow::bail!("no indexer bound")
    }

    fn type_binary(&self, target_type: &ArcStr, _as_cast: bool) -> Arc<dyn Caller> {
        Arc::new(FixedCaller {
            name: literal!("type_binary"),
            invocations: self.invocations.clone(),
            result: DynValue::String(target_type.as_str().into()),
        })
    }
}

fn member_expr(source: Option<Arc<Expr>>, member: &str, ty: Type) -> Arc<Expr> {
    Expr::new(ExprKind::Member { source, member: member.into() }, ty)
}

/// S1: creating an active expression over a `Member` reflects both the initial read and
/// every subsequent property change, through the public façade only.
#[test]
fn member_change_flows_through_facade() {
    let bindings = TestBindings::default();
    let p = TestObject::new();
    p.set("Name", DynValue::String("Alice".into()));
    let source = Expr::constant(obj_value(&p));
    let expr = member_expr(Some(source), "Name", Type::String);

    let ae = create(expr, &bindings, &ActiveExpressionConfig::default()).unwrap();
    assert_eq!(ae.value(), Some(DynValue::String("Alice".into())));

    let fired = StdArc::new(AtomicUsize::new(0));
    let fired_for_handler = fired.clone();
    let _sub = ae.subscribe(move || {
        fired_for_handler.fetch_add(1, Ordering::SeqCst);
    });

    p.set("Name", DynValue::String("Bob".into()));
    assert_eq!(ae.value(), Some(DynValue::String("Bob".into())));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

/// S2: `OrElse` short-circuits to `true` without ever reading its right operand.
#[test]
fn or_else_short_circuits_through_facade() {
    let bindings = TestBindings::default();
    let p = TestObject::new();
    p.set("Ready", DynValue::Bool(true));
    p.set("Backup", DynValue::Bool(false));

    let source = Expr::constant(obj_value(&p));
    let left = member_expr(Some(source.clone()), "Ready", Type::Bool);
    let right = member_expr(Some(source), "Backup", Type::Bool);
    let expr = Expr::new(ExprKind::OrElse { left, right }, Type::Bool);

    let ae = create(expr, &bindings, &ActiveExpressionConfig::default()).unwrap();
    assert_eq!(ae.value(), Some(DynValue::Bool(true)));
    assert_eq!(bindings.count("Backup"), 0, "true left operand must short-circuit OrElse");
}

/// S3: a faulting child propagates through the façade's `(Value, Fault)` pair.
#[test]
fn fault_propagates_through_facade() {
    let bindings = TestBindings::default();
    let expr = Expr::new(
        ExprKind::Binary {
            op: BinaryOperator::Divide,
            left: Expr::constant(DynValue::Int(10)),
            right: Expr::constant(DynValue::Int(0)),
            method: None,
            is_lifted_to_null: false,
        },
        Type::Int,
    );

    let ae = create(expr, &bindings, &ActiveExpressionConfig::default()).unwrap();
    let (value, fault) = ae.value_and_fault();
    assert!(value.is_none());
    assert!(fault.unwrap().to_string().contains("divide by zero"));
}

/// S4: two `create` calls with structurally-equal expressions and equal config intern to
/// the same root, and `ActiveExpression` equality tracks that identity.
#[test]
fn equal_expressions_intern_to_equal_handles() {
    let bindings = TestBindings::default();
    let expr1 = Expr::constant(DynValue::Int(99));
    let expr2 = Expr::constant(DynValue::Int(99));

    let a = create(expr1, &bindings, &ActiveExpressionConfig::default()).unwrap();
    let b = create(expr2, &bindings, &ActiveExpressionConfig::default()).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.value(), Some(DynValue::Int(99)));
}

/// Cloning bumps the shared node's refcount rather than rebuilding; dropping every clone
/// (including the original) is what finally tears the node down. There's no public way to
/// observe the intern table directly from this crate, so this only exercises that Clone and
/// Drop don't panic and that a clone observes the same live value as the original.
#[test]
fn clone_and_drop_share_the_same_node() {
    let bindings = TestBindings::default();
    let expr = Expr::constant(DynValue::Int(7));
    let a = create(expr, &bindings, &ActiveExpressionConfig::default()).unwrap();
    let b = a.clone();
    assert_eq!(a, b);
    drop(a);
    assert_eq!(b.value(), Some(DynValue::Int(7)));
}

/// A `Parameter` node bound after construction notifies dependents exactly like any other
/// child, and `bind_parameter` reports `false` for an id that isn't part of the tree.
#[test]
fn bind_parameter_updates_dependents() {
    let bindings = TestBindings::default();
    let id = ParamId::new();
    let other_id = ParamId::new();
    let expr = Expr::new(
        ExprKind::Binary {
            op: BinaryOperator::Add,
            left: Expr::new(ExprKind::Parameter(id), Type::Int),
            right: Expr::constant(DynValue::Int(1)),
            method: None,
            is_lifted_to_null: false,
        },
        Type::Int,
    );

    let ae = create(expr, &bindings, &ActiveExpressionConfig::default()).unwrap();
    assert!(ae.bind_parameter(id, DynValue::Int(10)));
    assert_eq!(ae.value(), Some(DynValue::Int(11)));
    assert!(!ae.bind_parameter(other_id, DynValue::Int(0)));
}

/// `ActiveExpressionConfig::builder()` (A3) follows the same `derive_builder` pattern as
/// `Options`, including its `cfg!(debug_assertions)` default.
#[test]
fn config_builder_defaults_log_fault_transitions_to_debug_assertions() {
    let config = ActiveExpressionConfig::builder().build().unwrap();
    assert_eq!(config.log_fault_transitions, cfg!(debug_assertions));
    assert!(config.options.is_none());
}

/// `Display`/`Debug` render the underlying expression; exact wording isn't contractual, but
/// both should mention the constant's value.
#[test]
fn display_and_debug_mention_the_expression() {
    let bindings = TestBindings::default();
    let ae = create(
        Expr::constant(DynValue::Int(5)),
        &bindings,
        &ActiveExpressionConfig::default(),
    )
    .unwrap();
    assert!(format!("{ae}").contains('5'));
    assert!(format!("{ae:?}").contains('5'));
}
