//! The active-expression engine (C1-C7): a closed hierarchy of reactive computation
//! nodes, structurally interned and deduplicated, that turns a compile-time [`expr::Expr`]
//! tree into a live graph re-evaluating itself on every observable change. See
//! `active-expr` for the thin public façade built on top of this crate.

pub mod expr;
pub mod host;
pub mod intern;
pub mod node;
pub mod options;
pub mod subscription;
pub mod value;

use std::sync::atomic::{AtomicBool, Ordering};

/// Whether a node's `Fault` transition (`None → Some`, or `Some(a) → Some(b)` where
/// `a != b`) is logged at `log::warn!`. Written by `active-expr`'s `ActiveExpressionConfig`
/// at `Create` time; defaults to on in debug builds, off in release.
static LOG_FAULT_TRANSITIONS: AtomicBool = AtomicBool::new(cfg!(debug_assertions));

pub fn set_log_fault_transitions(enabled: bool) {
    LOG_FAULT_TRANSITIONS.store(enabled, Ordering::Relaxed);
}

pub(crate) fn log_fault_transitions() -> bool {
    LOG_FAULT_TRANSITIONS.load(Ordering::Relaxed)
}
