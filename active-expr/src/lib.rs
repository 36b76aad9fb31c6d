//! The public façade for active expressions (C8, §4.4): accepts a pre-built [`Expr`] tree
//! plus the host capabilities it needs (§6) and returns an [`ActiveExpression`] — a live,
//! reference-counted handle onto the interned node graph `active-expr-core` builds and
//! maintains. Everything here is a thin wrapper; the tagged node hierarchy, interning,
//! evaluation, and subscription bookkeeping all live in `active-expr-core`.
//!
//! Re-exports the pieces of `active-expr-core` a caller needs to build an `Expr` tree and
//! implement the host capabilities (`Bindings`, `Getter`, `Caller`, `Notify`, ...) without
//! depending on that crate directly.

pub use active_expr_core::{expr, host, options, value};

use active_expr_core::{
    expr::{Expr, ParamId},
    host::Bindings,
    node::{Engine, NodeRef},
    options::Options,
    value::{DynValue, Fault},
};
use derive_builder::Builder;
use std::fmt;
use triomphe::Arc;

#[cfg(test)]
mod tests;

/// Process-wide tuning on top of `Options` (A3, §4.4): the configuration object passed to
/// [`create`]. `options` feeds the intern key exactly as any other `Create` call's options
/// would; `log_fault_transitions` is process-wide (it only ever toggles the core crate's
/// `log::warn!` gate, §7 Logging) rather than per-node, so setting it here affects every
/// active expression in the process, not just the one being created.
#[derive(Debug, Clone, Default, Builder)]
#[builder(default, setter(into, strip_option))]
pub struct ActiveExpressionConfig {
    pub options: Option<Arc<Options>>,
    /// Defaults to on in debug builds, off in release (`cfg!(debug_assertions)`).
    #[builder(default = "cfg!(debug_assertions)")]
    pub log_fault_transitions: bool,
}

impl ActiveExpressionConfig {
    pub fn builder() -> ActiveExpressionConfigBuilder {
        ActiveExpressionConfigBuilder::default()
    }
}

/// `Create(rootExpression, options) → RootHandle` (§4.4). Lowers `expr` into the interned
/// node DAG (sharing structurally-equal subtrees per §3 invariant 1) and returns a handle
/// that keeps the root — and transitively every node it depends on — alive until dropped.
///
/// `bindings` resolves member/method/constructor access (§6 `FastGetter`/`FastCaller`);
/// it's consulted once per distinct node built, at `Create` time, and never again.
pub fn create(
    expr: Arc<Expr>,
    bindings: &dyn Bindings,
    config: &ActiveExpressionConfig,
) -> anyhow::Result<ActiveExpression> {
    active_expr_core::set_log_fault_transitions(config.log_fault_transitions);
    let node = Engine::global().create(expr, config.options.clone(), bindings, false)?;
    Ok(ActiveExpression { node })
}

/// A live handle onto the root of an active-expression DAG (§4.4 `RootHandle`). Dropping
/// it releases this `Create` call's share of the root's refcount (§3 Lifecycle); when the
/// last handle for a given interned node goes away, that node — and every child it alone
/// was keeping alive — tears down (unsubscribe, value disposal, table removal).
///
/// Cloning acquires a fresh share of the same underlying node (bumping its refcount,
/// mirroring what a second `create` call with a structurally-equal expression would do)
/// rather than copying it, so `ActiveExpression` is not `Copy`.
pub struct ActiveExpression {
    node: NodeRef,
}

impl ActiveExpression {
    /// The most recently computed value, or `None` if the last evaluation faulted or the
    /// node is still deferring its first evaluation (§3 `DefaultResultOnFault`: check
    /// [`Self::fault`] first).
    pub fn value(&self) -> Option<DynValue> {
        self.node.value()
    }

    /// The most recently captured fault, if any (§7).
    pub fn fault(&self) -> Option<Fault> {
        self.node.fault()
    }

    /// Reads `(Value, Fault)` as a single consistent pair (§3 invariant 5).
    pub fn value_and_fault(&self) -> (Option<DynValue>, Option<Fault>) {
        self.node.value_and_fault()
    }

    /// Registers `handler` to run after every future `(Value, Fault)` change. Drop the
    /// returned [`ChangeSubscription`] to unsubscribe; it is also torn down automatically
    /// on root disposal, since disposal clears every observer along with the node itself.
    pub fn subscribe(
        &self,
        handler: impl Fn() + Send + Sync + 'static,
    ) -> ChangeSubscription {
        let id = self.node.subscribe_change(Box::new(handler));
        ChangeSubscription { node: self.node.clone(), id }
    }

    /// Binds a `Parameter` node reachable from this root (§4.1 Parameter), locating it by
    /// `ParamId` via a DAG walk (§4.4). Dependents react exactly as they would to any
    /// other child's change. Returns `false` if no reachable node was created for `id`.
    pub fn bind_parameter(&self, id: ParamId, value: DynValue) -> bool {
        match self.node.find_parameter(id) {
            Some(param) => {
                param.bind_parameter(value);
                true
            }
            None => false,
        }
    }
}

impl Clone for ActiveExpression {
    fn clone(&self) -> Self {
        Engine::global().retain(&self.node);
        ActiveExpression { node: self.node.clone() }
    }
}

impl Drop for ActiveExpression {
    fn drop(&mut self) {
        Engine::global().dispose(self.node.clone());
    }
}

/// Equality of root handles follows intern-cache identity (§4.4): two handles compare
/// equal exactly when they share the same underlying node, not when their expressions are
/// merely structurally equal (two un-interned-together `Create` calls with equal options
/// *would* share a node and thus compare equal; this is just `Arc::ptr_eq` made visible).
impl PartialEq for ActiveExpression {
    fn eq(&self, other: &Self) -> bool {
        triomphe::Arc::ptr_eq(&self.node, &other.node)
    }
}

impl Eq for ActiveExpression {}

impl fmt::Debug for ActiveExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActiveExpression({})", self.node)
    }
}

/// A `Display` rendering of the underlying expression with node-specific syntax, followed
/// by a diagnostic `Value`/`Fault` suffix (§6: "useful for debugging only and not part of
/// the equality contract").
impl fmt::Display for ActiveExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.node)
    }
}

/// Guard returned by [`ActiveExpression::subscribe`]; unsubscribes on drop. Mirrors
/// `active-expr-core`'s `SubscriptionGuard` (§9 DESIGN NOTES "per-kind subscription
/// lifetime") but for the façade's own externally-visible subscription, rather than one
/// node's subscription to another.
pub struct ChangeSubscription {
    node: NodeRef,
    id: u64,
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        self.node.unsubscribe_change(self.id);
    }
}

impl fmt::Debug for ChangeSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChangeSubscription({:?})", self.id)
    }
}
