//! The active node DAG (C5 "Active node base", C6 "Evaluate & propagate engine", C7
//! "Lifecycle & subscription bookkeeping"). There is no scheduler here, so the closed
//! kind hierarchy is a single concrete struct (`ActiveNode`) with a tagged `Kind` payload
//! (§9 DESIGN NOTES: "prefer a tagged variant... over open polymorphism") driven by
//! change-notification callbacks fired directly from children and host objects.

pub(crate) mod array;
pub(crate) mod callsite;
pub(crate) mod data;
pub(crate) mod genn;
pub(crate) mod op;
pub(crate) mod select;
#[cfg(test)]
mod tests;

use crate::expr::{BinaryOperator, Expr, ExprKind, ParamId, UnaryOperator};
use crate::host::{Bindings, Caller, ChangeHandler, Getter};
use crate::intern::{InternCache, RefCounted};
use crate::options::Options;
use crate::subscription::SubscriptionGuard;
use crate::value::{DynValue, Fault, Type};
use arcstr::ArcStr;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::LazyLock;
use triomphe::Arc;

pub use op::OperatorCache;

/// Closed set of node kinds (C1, §4.1), used to tag nodes and to select the per-kind
/// intern table (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Constant,
    Parameter,
    Member,
    Unary,
    Binary,
    AndAlso,
    OrElse,
    Coalesce,
    Conditional,
    Index,
    MethodCall,
    Invocation,
    New,
    NewArrayInit,
    TypeBinary,
}

impl NodeType {
    fn of(kind: &ExprKind) -> NodeType {
        match kind {
            ExprKind::Constant(_) => NodeType::Constant,
            ExprKind::Parameter(_) => NodeType::Parameter,
            ExprKind::Member { .. } => NodeType::Member,
            ExprKind::Unary { .. } => NodeType::Unary,
            ExprKind::Binary { .. } => NodeType::Binary,
            ExprKind::AndAlso { .. } => NodeType::AndAlso,
            ExprKind::OrElse { .. } => NodeType::OrElse,
            ExprKind::Coalesce { .. } => NodeType::Coalesce,
            ExprKind::Conditional { .. } => NodeType::Conditional,
            ExprKind::Index { .. } => NodeType::Index,
            ExprKind::MethodCall { .. } => NodeType::MethodCall,
            ExprKind::Invocation { .. } => NodeType::Invocation,
            ExprKind::New { .. } => NodeType::New,
            ExprKind::NewArrayInit { .. } => NodeType::NewArrayInit,
            ExprKind::TypeBinary { .. } => NodeType::TypeBinary,
        }
    }
}

pub type NodeRef = Arc<ActiveNode>;

/// Per-kind payload (§4.1). Children are held as strong `NodeRef`s; the DAG's ownership
/// direction is parent → child exactly as in the source expression tree (possibly shared
/// after interning), never the reverse.
pub(crate) enum Kind {
    Constant { value: DynValue },
    Parameter { id: ParamId },
    Member { source: Option<NodeRef>, member: ArcStr, getter: Arc<dyn Getter> },
    Unary { operand: NodeRef, op: UnaryOperator, delegate: op::UnaryDelegate },
    Binary {
        left: NodeRef,
        right: NodeRef,
        op: BinaryOperator,
        delegate: op::BinaryDelegate,
    },
    AndAlso { left: NodeRef, right: NodeRef },
    OrElse { left: NodeRef, right: NodeRef },
    Coalesce { left: NodeRef, right: NodeRef, conversion: Option<Arc<dyn Caller>> },
    Conditional { test: NodeRef, if_true: NodeRef, if_false: NodeRef },
    Index { receiver: NodeRef, index: NodeRef, getter: Arc<dyn Caller> },
    MethodCall {
        receiver: Option<NodeRef>,
        method: ArcStr,
        args: SmallVec<[NodeRef; 4]>,
        caller: Arc<dyn Caller>,
    },
    Invocation { callee: NodeRef, args: SmallVec<[NodeRef; 4]> },
    New {
        type_name: ArcStr,
        parameter_types: Arc<[ArcStr]>,
        args: SmallVec<[NodeRef; 4]>,
        caller: Arc<dyn Caller>,
    },
    NewArrayInit { element_type: Type, elements: SmallVec<[NodeRef; 4]> },
    TypeBinary { operand: NodeRef, target_type: ArcStr, as_cast: bool, caller: Arc<dyn Caller> },
}

/// Mutable fields behind the per-node lock (§5: "if external notification sources are
/// multi-threaded the implementer must interpose a lock *per node*"). Everything
/// structural (children, cached delegates) lives outside the lock on `ActiveNode` itself
/// so evaluating a child never requires holding the parent's lock.
struct NodeState {
    value: Option<DynValue>,
    fault: Option<Fault>,
    is_deferring_evaluation: bool,
    observers: Vec<(u64, ChangeHandler)>,
    next_observer_id: u64,
    /// Guards for this node's subscriptions to each child's change notification.
    child_subs: SmallVec<[SubscriptionGuard; 2]>,
    /// Guards for subscriptions attached to this node's current *value* (Member's source
    /// object, or a generated-type field's collection/dictionary change) and, for
    /// `Conditional`, the live branch's deferred-evaluation force.
    value_subs: SmallVec<[SubscriptionGuard; 1]>,
}

pub struct ActiveNode {
    pub node_type: NodeType,
    pub result_type: Type,
    pub options: Option<Arc<Options>>,
    pub(crate) expr: Arc<Expr>,
    pub(crate) kind: Kind,
    state: Mutex<NodeState>,
}

impl std::fmt::Debug for ActiveNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ActiveNode({:?}: {})", self.node_type, self.expr)
    }
}

impl ActiveNode {
    /// Current `(Value, Fault)` pair, read atomically under the node's lock (§3 invariant
    /// 5: "`Value` and `Fault` are only both updated inside a single `Evaluate` call").
    pub fn value_and_fault(&self) -> (Option<DynValue>, Option<Fault>) {
        let s = self.state.lock();
        (s.value.clone(), s.fault.clone())
    }

    pub fn value(&self) -> Option<DynValue> {
        self.state.lock().value.clone()
    }

    pub fn fault(&self) -> Option<Fault> {
        self.state.lock().fault.clone()
    }

    pub fn is_deferring_evaluation(&self) -> bool {
        self.state.lock().is_deferring_evaluation
    }

    /// Registers `handler` to be called after every future `(Value, Fault)` change;
    /// returns a token for `unsubscribe_change`.
    pub fn subscribe_change(&self, handler: ChangeHandler) -> u64 {
        let mut s = self.state.lock();
        let id = s.next_observer_id;
        s.next_observer_id += 1;
        s.observers.push((id, handler));
        id
    }

    pub fn unsubscribe_change(&self, id: u64) {
        let mut s = self.state.lock();
        s.observers.retain(|(oid, _)| *oid != id);
    }

    /// Fires every registered observer (§3 invariant 5: "Notifications fire after both
    /// fields settle"). Per §5 "delivery must not hold the lock", each handler is taken
    /// out of the list, run unlocked, then put back unless the handler itself removed it
    /// (e.g. by unsubscribing) — this also tolerates a handler that re-enters this same
    /// node (§5 "Re-entrancy").
    fn fire_changed(&self) {
        let ids: SmallVec<[u64; 4]> =
            self.state.lock().observers.iter().map(|(id, _)| *id).collect();
        for id in ids {
            self.run_observer(id);
        }
    }

    fn run_observer(&self, id: u64) {
        let taken = {
            let mut s = self.state.lock();
            let pos = s.observers.iter().position(|(oid, _)| *oid == id);
            pos.map(|i| s.observers.remove(i))
        };
        if let Some((oid, handler)) = taken {
            handler();
            let mut s = self.state.lock();
            if !s.observers.iter().any(|(o, _)| *o == oid) {
                s.observers.push((oid, handler));
            }
        }
    }

    /// Sets `Fault`, clearing `Value` (§3 invariant 3). Fires a change notification only
    /// if the `(Value, Fault)` pair actually changed.
    pub(crate) fn set_fault(&self, fault: Fault) {
        let log_line = crate::log_fault_transitions().then(|| fault.to_string());
        let changed = {
            let mut s = self.state.lock();
            let changed = s.value.is_some() || s.fault.as_ref() != Some(&fault);
            s.value = None;
            s.fault = Some(fault);
            changed
        };
        if changed {
            if let Some(line) = log_line {
                log::warn!("{} faulted: {line}", self.expr);
            }
            self.fire_changed();
        }
    }

    /// Sets `Value`, clearing `Fault` (§3 invariant 3 / §4.1 step 4).
    pub(crate) fn set_value(&self, value: DynValue) {
        let changed = {
            let mut s = self.state.lock();
            let changed = s.fault.is_some() || s.value.as_ref() != Some(&value);
            s.fault = None;
            s.value = Some(value);
            changed
        };
        if changed {
            self.fire_changed();
        }
    }

    /// The first child whose `Fault` is set, in the given operand order, re-tagged as
    /// this node's own fault per §3 invariant 3 / §4.1 step 1. `None` if every child is
    /// clean.
    pub(crate) fn dominant_child_fault(children: &[&NodeRef]) -> Option<Fault> {
        for child in children {
            if let Some(f) = child.fault() {
                return Some(Fault::from_child(&f));
            }
        }
        None
    }

    /// Runs the per-kind evaluation dispatch (§4.1 "Evaluation protocol").
    pub(crate) fn evaluate(self: &NodeRef) {
        match &self.kind {
            Kind::Constant { .. } => data::initialize_constant(self),
            Kind::Parameter { .. } => {
                // Bound externally via `bind_parameter`, never through `Evaluate` itself.
            }
            Kind::Member { .. } => data::evaluate_member(self),
            Kind::Unary { .. } => genn::evaluate_unary(self),
            Kind::Binary { .. } => genn::evaluate_binary(self),
            Kind::AndAlso { .. } => select::evaluate_and_also(self),
            Kind::OrElse { .. } => select::evaluate_or_else(self),
            Kind::Coalesce { .. } => select::evaluate_coalesce(self),
            Kind::Conditional { .. } => select::evaluate_conditional(self),
            Kind::Index { .. } => array::evaluate_index(self),
            Kind::MethodCall { .. } => callsite::evaluate_method_call(self),
            Kind::Invocation { .. } => callsite::evaluate_invocation(self),
            Kind::New { .. } => callsite::evaluate_new(self),
            Kind::NewArrayInit { .. } => array::evaluate_new_array_init(self),
            Kind::TypeBinary { .. } => array::evaluate_type_binary(self),
        }
    }

    /// Runs `Evaluate` only if the node isn't currently deferring its first evaluation;
    /// called unconditionally at the end of `Create` (§3 Lifecycle).
    pub(crate) fn evaluate_if_not_deferred(self: &NodeRef) {
        if self.state.lock().is_deferring_evaluation {
            return;
        }
        self.evaluate();
    }

    /// Clears `IsDeferringEvaluation` and runs the first `Evaluate`, establishing this
    /// node's (and transitively its children's) host-level subscriptions. A no-op if the
    /// node was never deferring (§9 DESIGN NOTES "Deferred evaluation").
    pub(crate) fn force_evaluate(self: &NodeRef) {
        let was_deferring = {
            let mut s = self.state.lock();
            let w = s.is_deferring_evaluation;
            s.is_deferring_evaluation = false;
            w
        };
        if was_deferring {
            self.evaluate();
        }
    }

    /// Subscribes to `child`'s change notification, storing the teardown guard in this
    /// node's `child_subs` so it is released symmetrically on `teardown` (§3 invariant 4).
    pub(crate) fn listen_to_child(self: &NodeRef, child: &NodeRef) {
        let parent = self.clone();
        let child_for_guard = child.clone();
        let id = child.subscribe_change(Box::new(move || {
            parent.evaluate();
        }));
        let guard = SubscriptionGuard::new(move || child_for_guard.unsubscribe_change(id));
        self.state.lock().child_subs.push(guard);
    }

    /// Adds a guard to `value_subs`, e.g. a `Member`'s subscription to its source value's
    /// `PropertyChanged`, or a `Conditional`'s subscription to the currently-live branch.
    pub(crate) fn push_value_sub(&self, guard: SubscriptionGuard) {
        self.state.lock().value_subs.push(guard);
    }

    /// Drops every `value_subs` guard (running their teardown), used when a node's value
    /// source changes out from under it (e.g. `Member`'s source re-evaluates to a
    /// different object, or `Conditional` switches the live branch).
    pub(crate) fn clear_value_subs(&self) {
        self.state.lock().value_subs.clear();
    }

    /// Binds a `Parameter` node's value from outside the DAG (§4.1 Parameter). The
    /// façade is responsible for locating the right `Parameter` node — by `ParamId` — and
    /// calling this whenever the bound value changes; dependents react exactly as they
    /// would to any other child's change.
    pub fn bind_parameter(&self, value: DynValue) {
        data::bind_parameter(self, value);
    }

    /// The `ParamId` this node was created for, if it is a `Parameter` (used by the
    /// façade to find the right node in a DAG walk).
    pub fn param_id(&self) -> Option<ParamId> {
        match &self.kind {
            Kind::Parameter { id } => Some(*id),
            _ => None,
        }
    }

    /// Depth-first search for the `Parameter` node bound to `id` anywhere in this node's
    /// subtree (§4.4: "the façade is responsible for locating the right `Parameter` node").
    /// Interning can turn the tree into a DAG, so a pointer-identity visited set keeps a
    /// diamond-shaped subtree from being walked twice.
    pub fn find_parameter(self: &NodeRef, id: ParamId) -> Option<NodeRef> {
        let mut seen: std::collections::HashSet<*const ActiveNode> =
            std::collections::HashSet::new();
        find_parameter_rec(self, id, &mut seen)
    }

    fn new(expr: Arc<Expr>, options: Option<Arc<Options>>, kind: Kind, defer: bool) -> NodeRef {
        let node_type = NodeType::of(&expr.kind);
        let result_type = expr.result_type.clone();
        log::trace!("constructing {node_type:?} node for {expr}");
        Arc::new(ActiveNode {
            node_type,
            result_type,
            options,
            expr,
            kind,
            state: Mutex::new(NodeState {
                value: None,
                fault: None,
                is_deferring_evaluation: defer,
                observers: Vec::new(),
                next_observer_id: 0,
                child_subs: SmallVec::new(),
                value_subs: SmallVec::new(),
            }),
        })
    }

    /// Authoritative teardown (§3 Lifecycle "Destroyed", §4.2 Dispose): releases every
    /// subscription, disposes the current value if this kind's options mandate it, and
    /// recurses into every child. Never touches the intern table itself; `Engine::dispose`
    /// is responsible for the refcount/table interaction so this user-observable work
    /// never runs with the table lock held.
    pub(crate) fn teardown(&self, engine: &Engine) {
        {
            let mut s = self.state.lock();
            s.child_subs.clear();
            s.value_subs.clear();
        }
        genn::dispose_value_if_mandated(self);
        for child in genn::children(self) {
            engine.dispose(child);
        }
    }
}

fn find_parameter_rec(
    node: &NodeRef,
    id: ParamId,
    seen: &mut std::collections::HashSet<*const ActiveNode>,
) -> Option<NodeRef> {
    if !seen.insert(Arc::as_ptr(node)) {
        return None;
    }
    if node.param_id() == Some(id) {
        return Some(node.clone());
    }
    genn::children(node).into_iter().find_map(|child| find_parameter_rec(&child, id, seen))
}

/// `(structural-expression-key, Options)` (§3 "InternKey"). `Expr`/`Options` both derive
/// structural `PartialEq`/`Hash`, and `Arc`'s own impls forward to the pointee, so this
/// tuple is exactly the `ExprEq`-keyed table entry §4.2 asks for without a bespoke
/// comparer: the expression-tree type itself is out of scope (§1), so our in-process
/// `Expr` already *is* the structural key. (Constant's two-map split in §4.1 — one keyed
/// by `ExprEq` for expression-valued constants, one by `(Type, Value, options)` — collapses
/// to one map here because `DynValue` has no "boxed sub-expression" variant to begin with.)
pub(crate) type InternKey = (Arc<Expr>, Option<Arc<Options>>);

/// One refcounted table per `NodeType` (§4.2: "Per-kind associative map"). A single outer
/// map keyed by the kind tag, behind one re-entrant mutex, realizes a strategy
/// equivalent to one mutex per kind ("A uniform strategy: one global re-entrant mutex"),
/// without fifteen near-identical struct fields.
#[derive(Default)]
pub struct InternTables {
    tables: fxhash::FxHashMap<NodeType, RefCounted<InternKey, NodeRef>>,
}

/// Process-wide shared state (§4.2, §4.3: "The intern cache and operator cache are
/// shared"): the interning tables and the compiled-operator-delegate cache. Stateless
/// with respect to any particular evaluation — there is no scheduler here, only shared
/// caches.
pub struct Engine {
    interned: InternCache<InternTables>,
    pub(crate) operators: OperatorCache,
}

impl Engine {
    pub fn new() -> Engine {
        Engine { interned: InternCache::default(), operators: OperatorCache::default() }
    }

    /// The process-wide default engine. A single global instance is appropriate here
    /// because interning's entire purpose (§3 invariant 1) is deduplicating equal
    /// expressions *anywhere* in the process, not just within one root.
    pub fn global() -> &'static Engine {
        static ENGINE: LazyLock<Engine> = LazyLock::new(Engine::new);
        &ENGINE
    }

    /// `Create` (§4.2, §4.4): looks up `(expr, options)` in the table for `expr`'s kind;
    /// on a hit bumps the refcount and returns the shared node. On a miss, builds one
    /// *without* holding the table lock — construction recurses into `Create` for every
    /// child, possibly re-entering this same table for a nested occurrence of the same
    /// kind, which the lock must already be clear of — then races to insert it: if another
    /// `Create` for the same key won in the meantime, the freshly built (but redundant)
    /// node is disposed and the winner's node is returned instead. `bindings` resolves
    /// member/method/constructor access (§6).
    pub fn create(
        &self,
        expr: Arc<Expr>,
        options: Option<Arc<Options>>,
        bindings: &dyn Bindings,
        defer: bool,
    ) -> anyhow::Result<NodeRef> {
        let node_type = NodeType::of(&expr.kind);
        let key: InternKey = (expr.clone(), options.clone());
        if let Some(node) = self
            .interned
            .with(|tables| tables.tables.entry(node_type).or_default().try_acquire(&key))
        {
            return Ok(node);
        }
        let built = genn::build(self, expr, options.clone(), bindings, defer)?;
        let key: InternKey = (built.expr.clone(), options);
        let shared = self.interned.with(|tables| {
            tables.tables.entry(node_type).or_default().insert_or_share(key, built.clone())
        });
        if !Arc::ptr_eq(&shared, &built) {
            // `insert_or_share` already bumped the winner's table entry to account for our
            // acquisition and handed it back; `built` itself was never inserted, so
            // `self.dispose(built)` would decrement the *winner*'s refcount instead (same
            // structural key) and never run `built`'s own teardown. Tear `built` down
            // directly: release the table entries its own construction acquired for its
            // children, without touching a table entry it was never given.
            built.teardown(self);
        }
        Ok(shared)
    }

    /// Bumps `node`'s refcount without rebuilding it (§4.4 "Equality of root handles":
    /// used when a façade handle is cloned rather than freshly `Create`d). The caller
    /// must already hold a live reference to `node`, so its table entry is guaranteed
    /// present.
    pub fn retain(&self, node: &NodeRef) {
        let key: InternKey = (node.expr.clone(), node.options.clone());
        self.interned.with(|tables| tables.tables.entry(node.node_type).or_default().bump(&key));
    }

    /// `Dispose` (§4.2): decrements the refcount for `node`'s key; on reaching zero,
    /// removes the table entry and runs teardown *after* releasing the table lock, so
    /// user-observable callbacks (subscription teardown, value disposal) never run with
    /// the lock held (§4.2 final paragraph).
    pub fn dispose(&self, node: NodeRef) {
        let node_type = node.node_type;
        let key: InternKey = (node.expr.clone(), node.options.clone());
        let removed = self
            .interned
            .with(|tables| tables.tables.entry(node_type).or_default().release(&key));
        if let Some(n) = removed {
            n.teardown(self);
        }
    }
}

impl Default for Engine {
    fn default() -> Engine {
        Engine::new()
    }
}

#[cfg(test)]
impl Engine {
    /// Test-only introspection of a per-kind table's live entry count, used to exercise
    /// §8 property 2 (refcount correctness) directly rather than inferring it from
    /// observable side effects.
    pub(crate) fn table_len(&self, node_type: NodeType) -> usize {
        self.interned.with(|tables| tables.tables.get(&node_type).map(|t| t.len()).unwrap_or(0))
    }
}
