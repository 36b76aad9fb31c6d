//! Component-level tests for the active node engine (§8 Testable Properties). Named
//! `tests.rs` and pulled in via `#[cfg(test)] mod tests;` from `node/mod.rs`.

use super::*;
use crate::expr::{BinaryOperator, Expr, ExprKind, UnaryOperator};
use crate::host::{Bindings, Caller, ChangeHandler, Getter, Notify, SubscriptionToken};
use crate::options::{ConstructedTypeKey, Options};
use crate::value::{DynValue, HostObject, Type};
use arcstr::{literal, ArcStr};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc as StdArc;

/// A minimal host object exposing named fields and a `Notify` fan-out, standing in for a
/// real reflected instance (§6 `PropertyChanged`).
#[derive(Clone)]
struct TestObject(StdArc<TestObjectInner>);

struct TestObjectInner {
    fields: Mutex<HashMap<ArcStr, DynValue>>,
    observers: Mutex<Vec<(u64, Option<ArcStr>, ChangeHandler)>>,
    next_id: AtomicU64,
    disposed: AtomicUsize,
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
            disposed: AtomicUsize::new(0),
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

    fn dispose_count(&self) -> usize {
        self.0.disposed.load(Ordering::SeqCst)
    }
}

impl HostObject for TestObject {
    fn type_name(&self) -> ArcStr {
        literal!("TestObject")
    }

    fn as_notify(&self) -> Option<&dyn Notify> {
        Some(self)
    }

    fn dispose(&self) {
        self.0.disposed.fetch_add(1, Ordering::SeqCst);
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

fn obj_type() -> Type {
    Type::Object(literal!("TestObject"))
}

fn obj_value(o: &TestObject) -> DynValue {
    DynValue::Object(Arc::new(o.clone()))
}

/// Resolves field reads by name off a `TestObject` instance, and a handful of fixed
/// methods/constructors used across these tests. Counts how many times each named
/// getter/method actually ran, so short-circuit tests can assert a side effect never fired
/// (§8 property 4).
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

/// A constructor whose produced value disposes through `TestObject::dispose` so
/// `disposeConstructedTypes` (§3 Options, §8 property 6) has something observable to check.
struct CounterConstructor {
    invocations: StdArc<Mutex<HashMap<ArcStr, usize>>>,
}

impl Caller for CounterConstructor {
    fn invoke(&self, _instance: Option<&DynValue>, _args: &[DynValue]) -> anyhow::Result<DynValue> {
        *self.invocations.lock().entry(literal!("new")).or_insert(0) += 1;
        Ok(obj_value(&TestObject::new()))
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
        _type_name: &ArcStr,
        _parameter_types: &[ArcStr],
    ) -> anyhow::Result<Arc<dyn Caller>> {
        Ok(Arc::new(CounterConstructor { invocations: self.invocations.clone() }))
    }

    fn indexer(&self, _owner: &Type) -> anyhow::Result<Arc<dyn Caller>> {
        Ok(Arc::new(FixedCaller {
            name: literal!("index"),
            invocations: self.invocations.clone(),
            result: DynValue::Null,
        }))
    }

    fn type_binary(&self, _target_type: &ArcStr, _as_cast: bool) -> Arc<dyn Caller> {
        Arc::new(FixedCaller {
            name: literal!("type_binary"),
            invocations: self.invocations.clone(),
            result: DynValue::Bool(true),
        })
    }
}

fn member_expr(source: Option<Arc<Expr>>, member: &str, ty: Type) -> Arc<Expr> {
    Expr::new(ExprKind::Member { source, member: member.into() }, ty)
}

/// S1: a `Member` node tracks its source object's property changes.
#[test]
fn member_tracks_property_change() {
    let engine = Engine::new();
    let bindings = TestBindings::default();
    let p = TestObject::new();
    p.set("Name", DynValue::String("Alice".into()));
    let source = Expr::constant(obj_value(&p));
    let expr = member_expr(Some(source), "Name", Type::String);

    let node = engine.create(expr, None, &bindings, false).unwrap();
    assert_eq!(node.value(), Some(DynValue::String("Alice".into())));

    let fired = StdArc::new(AtomicUsize::new(0));
    let fired_for_handler = fired.clone();
    let _sub = node.subscribe_change(Box::new(move || {
        fired_for_handler.fetch_add(1, Ordering::SeqCst);
    }));
    p.set("Name", DynValue::String("Bob".into()));
    assert_eq!(node.value(), Some(DynValue::String("Bob".into())));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

/// S2 / §8 property 4: `AndAlso`'s right operand is never forced once the left operand is
/// false.
#[test]
fn and_also_short_circuits() {
    let engine = Engine::new();
    let bindings = TestBindings::default();
    let p = TestObject::new();
    p.set("Enabled", DynValue::Bool(true));
    p.set("Count", DynValue::Int(5));

    let source = Expr::constant(obj_value(&p));
    let left = member_expr(Some(source.clone()), "Enabled", Type::Bool);
    let right = member_expr(Some(source), "Count", Type::Int);
    let expr = Expr::new(ExprKind::AndAlso { left, right }, Type::Bool);

    let node = engine.create(expr, None, &bindings, false).unwrap();
    assert_eq!(node.value(), Some(DynValue::Bool(true)));
    assert!(bindings.count("Count") >= 1);

    let before = bindings.count("Count");
    p.set("Enabled", DynValue::Bool(false));
    assert_eq!(node.value(), Some(DynValue::Bool(false)));
    assert_eq!(bindings.count("Count"), before, "right operand must not be read again");
}

/// S3: a binary node captures an evaluation fault and clears it once the operand changes.
#[test]
fn divide_by_zero_faults_then_clears() {
    let engine = Engine::new();
    let bindings = TestBindings::default();
    let x = TestObject::new();
    x.set("X", DynValue::Int(0));

    let one = Expr::constant(DynValue::Int(1));
    let source = Expr::constant(obj_value(&x));
    let x_member = member_expr(Some(source), "X", Type::Int);
    let expr = Expr::new(
        ExprKind::Binary {
            op: BinaryOperator::Divide,
            left: one,
            right: x_member,
            method: None,
            is_lifted_to_null: false,
        },
        Type::Int,
    );

    let node = engine.create(expr, None, &bindings, false).unwrap();
    assert!(node.fault().is_some());
    assert!(node.value().is_none());

    x.set("X", DynValue::Int(2));
    assert!(node.fault().is_none());
    assert_eq!(node.value(), Some(DynValue::Int(0)));
}

/// §8 property 3: fault dominance is operand-order, left before right.
#[test]
fn fault_dominance_is_left_first() {
    let engine = Engine::new();
    let bindings = TestBindings::default();

    let left = Expr::new(
        ExprKind::Binary {
            op: BinaryOperator::Divide,
            left: Expr::constant(DynValue::Int(1)),
            right: Expr::constant(DynValue::Int(0)),
            method: None,
            is_lifted_to_null: false,
        },
        Type::Int,
    );
    let right = Expr::new(
        ExprKind::Unary {
            op: UnaryOperator::Negate,
            operand: Expr::constant(DynValue::String("not a number".into())),
            method: None,
        },
        Type::Int,
    );
    let expr = Expr::new(
        ExprKind::Binary {
            op: BinaryOperator::Add,
            left,
            right,
            method: None,
            is_lifted_to_null: false,
        },
        Type::Int,
    );

    let node = engine.create(expr, None, &bindings, false).unwrap();
    let fault = node.fault().expect("both operands fault; node should too");
    assert!(fault.to_string().contains("divide by zero"));
}

/// S4 / §8 property 1 & 2: structurally-equal expressions share a node, and it is only
/// evicted once every outstanding `Create` has a matching `Dispose`.
#[test]
fn interning_and_refcount() {
    let engine = Engine::new();
    let bindings = TestBindings::default();
    let e1 = Expr::constant(DynValue::Int(7));
    let e2 = Expr::constant(DynValue::Int(7));
    assert!(e1 == e2 && !Arc::ptr_eq(&e1, &e2), "fixture should be equal but distinct");

    let a = engine.create(e1, None, &bindings, false).unwrap();
    let b = engine.create(e2, None, &bindings, false).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(engine.table_len(NodeType::Constant), 1);

    engine.dispose(a);
    assert_eq!(engine.table_len(NodeType::Constant), 1, "b still holds a share");
    engine.dispose(b);
    assert_eq!(engine.table_len(NodeType::Constant), 0);
}

/// §9 DESIGN NOTES open question (resolved): two otherwise-identical nodes with different
/// `Options` intern separately.
#[test]
fn options_participate_in_interning_key() {
    let engine = Engine::new();
    let bindings = TestBindings::default();
    let e1 = Expr::constant(DynValue::Int(1));
    let e2 = Expr::constant(DynValue::Int(1));
    let opts = Arc::new(Options {
        dispose_constructed_types: Arc::new(vec![ConstructedTypeKey {
            type_name: literal!("T"),
            parameter_types: Arc::from(Vec::<ArcStr>::new()),
        }]),
        ..Default::default()
    });

    let a = engine.create(e1, None, &bindings, false).unwrap();
    let b = engine.create(e2, Some(opts), &bindings, false).unwrap();
    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(engine.table_len(NodeType::Constant), 2);
}

/// S5: `Coalesce`'s right operand is only forced when the left operand is null.
#[test]
fn coalesce_defers_right_until_null() {
    let engine = Engine::new();
    let bindings = TestBindings::default();
    let p = TestObject::new();
    p.set("Maybe", DynValue::String("here".into()));

    let source = Expr::constant(obj_value(&p));
    let left = member_expr(Some(source), "Maybe", Type::String);
    let right = Expr::new(
        ExprKind::MethodCall { receiver: None, method: "ExpensiveRead".into(), args: Default::default() },
        Type::Int,
    );
    let expr =
        Expr::new(ExprKind::Coalesce { left, right, conversion: None }, Type::String);

    let node = engine.create(expr, None, &bindings, false).unwrap();
    assert_eq!(node.value(), Some(DynValue::String("here".into())));
    assert_eq!(bindings.count("ExpensiveRead"), 0);

    p.set("Maybe", DynValue::Null);
    assert_eq!(node.value(), Some(DynValue::Int(42)));
    assert_eq!(bindings.count("ExpensiveRead"), 1);
}

/// S6: `NewArrayInit` re-evaluates to a same-length array reflecting one changed element.
#[test]
fn array_init_tracks_element_change() {
    let engine = Engine::new();
    let bindings = TestBindings::default();
    let p = TestObject::new();
    p.set("A", DynValue::Int(1));
    p.set("B", DynValue::Int(2));

    let source = Expr::constant(obj_value(&p));
    let a = member_expr(Some(source.clone()), "A", Type::Int);
    let b = member_expr(Some(source), "B", Type::Int);
    let expr = Expr::new(
        ExprKind::NewArrayInit { element_type: Type::Int, elements: smallvec::smallvec![a, b] },
        Type::Array(Box::new(Type::Int)),
    );

    let node = engine.create(expr, None, &bindings, false).unwrap();
    let fired = StdArc::new(AtomicUsize::new(0));
    let fired_for_handler = fired.clone();
    node.subscribe_change(Box::new(move || {
        fired_for_handler.fetch_add(1, Ordering::SeqCst);
    }));

    p.set("A", DynValue::Int(7));
    match node.value() {
        Some(DynValue::Array(arr)) => {
            assert_eq!(arr.len(), 2);
            assert_eq!(arr[0], DynValue::Int(7));
            assert_eq!(arr[1], DynValue::Int(2));
        }
        other => panic!("expected array, got {other:?}"),
    }
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

/// §8 property 6: a `New` node whose type is in `disposeConstructedTypes` disposes its
/// prior value exactly once per re-evaluation, and once more at teardown.
#[test]
fn new_disposes_prior_value_on_reevaluation_and_teardown() {
    let engine = Engine::new();
    let bindings = TestBindings::default();
    let opts = Arc::new(Options {
        dispose_constructed_types: Arc::new(vec![ConstructedTypeKey {
            type_name: literal!("Counter"),
            parameter_types: Arc::from(Vec::<ArcStr>::new()),
        }]),
        ..Default::default()
    });
    let expr = Expr::new(
        ExprKind::New { type_name: literal!("Counter"), parameter_types: Arc::from(Vec::<ArcStr>::new()), args: Default::default() },
        obj_type(),
    );

    let node = engine.create(expr, Some(opts), &bindings, false).unwrap();
    let first = match node.value() {
        Some(DynValue::Object(o)) => o,
        _ => panic!("expected object"),
    };
    let first = first.as_any().downcast_ref::<TestObject>().unwrap().clone();
    assert_eq!(first.dispose_count(), 0);

    // Force a re-evaluation (the node has no children, so evaluate() directly).
    node.evaluate();
    assert_eq!(first.dispose_count(), 1, "prior value disposed on re-evaluation");

    let second = match node.value() {
        Some(DynValue::Object(o)) => o,
        _ => panic!("expected object"),
    };
    let second = second.as_any().downcast_ref::<TestObject>().unwrap().clone();

    engine.dispose(node);
    assert_eq!(second.dispose_count(), 1, "disposed exactly once at teardown");
}

/// §8 property 7: after root disposal, no further notifications are delivered even though
/// the leaf source keeps changing.
#[test]
fn no_dangling_subscriptions_after_dispose() {
    let engine = Engine::new();
    let bindings = TestBindings::default();
    let p = TestObject::new();
    p.set("Name", DynValue::String("Alice".into()));
    let source = Expr::constant(obj_value(&p));
    let expr = member_expr(Some(source), "Name", Type::String);

    let node = engine.create(expr, None, &bindings, false).unwrap();
    let fired = StdArc::new(AtomicUsize::new(0));
    let fired_for_handler = fired.clone();
    node.subscribe_change(Box::new(move || {
        fired_for_handler.fetch_add(1, Ordering::SeqCst);
    }));

    p.set("Name", DynValue::String("Bob".into()));
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    engine.dispose(node);
    p.set("Name", DynValue::String("Carol".into()));
    assert_eq!(fired.load(Ordering::SeqCst), 1, "no notification after dispose");
}

mod proptests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Clone, Debug)]
    enum SmallExpr {
        Const(i64),
        Add(Box<SmallExpr>, Box<SmallExpr>),
        Div(Box<SmallExpr>, Box<SmallExpr>),
    }

    fn small_expr(depth: u32) -> impl Strategy<Value = SmallExpr> {
        let leaf = (-5i64..5).prop_map(SmallExpr::Const);
        leaf.prop_recursive(depth, 16, 2, |inner| {
            prop_oneof![
                (inner.clone(), inner.clone())
                    .prop_map(|(l, r)| SmallExpr::Add(Box::new(l), Box::new(r))),
                (inner.clone(), inner)
                    .prop_map(|(l, r)| SmallExpr::Div(Box::new(l), Box::new(r))),
            ]
        })
    }

    fn lower(e: &SmallExpr) -> Arc<Expr> {
        match e {
            SmallExpr::Const(i) => Expr::constant(DynValue::Int(*i)),
            SmallExpr::Add(l, r) => Expr::new(
                ExprKind::Binary {
                    op: BinaryOperator::Add,
                    left: lower(l),
                    right: lower(r),
                    method: None,
                    is_lifted_to_null: false,
                },
                Type::Int,
            ),
            SmallExpr::Div(l, r) => Expr::new(
                ExprKind::Binary {
                    op: BinaryOperator::Divide,
                    left: lower(l),
                    right: lower(r),
                    method: None,
                    is_lifted_to_null: false,
                },
                Type::Int,
            ),
        }
    }

    /// Whether evaluating `e` directly (not through the engine) would divide by zero
    /// anywhere, used as an oracle for whether the node should end up faulted.
    fn would_fault(e: &SmallExpr) -> bool {
        fn value(e: &SmallExpr) -> Option<i64> {
            match e {
                SmallExpr::Const(i) => Some(*i),
                SmallExpr::Add(l, r) => Some(value(l)? + value(r)?),
                SmallExpr::Div(l, r) => {
                    let (l, r) = (value(l)?, value(r)?);
                    if r == 0 {
                        None
                    } else {
                        Some(l / r)
                    }
                }
            }
        }
        value(e).is_none()
    }

    proptest! {
        /// §8 property 1 & 2: arbitrary bounded-depth expression trees still intern by
        /// structural equality and release cleanly.
        #[test]
        fn interning_holds_for_random_shapes(e in small_expr(4)) {
            let engine = Engine::new();
            let bindings = TestBindings::default();
            let expr1 = lower(&e);
            let expr2 = lower(&e);
            prop_assert!(expr1 == expr2);

            let a = engine.create(expr1, None, &bindings, false).unwrap();
            let b = engine.create(expr2, None, &bindings, false).unwrap();
            prop_assert!(Arc::ptr_eq(&a, &b));
            prop_assert!(a.fault().is_some() == would_fault(&e));

            engine.dispose(a);
            engine.dispose(b);
            prop_assert_eq!(engine.table_len(NodeType::Constant), 0);
            prop_assert_eq!(engine.table_len(NodeType::Binary), 0);
        }
    }
}
