//! Dynamic value representation and the static result type that an [`Expr`](crate::expr::Expr)
//! carries. Stands in for the embedding platform's boxed `object`/`Type` pair.

use arcstr::ArcStr;
use compact_str::CompactString;
use smallvec::SmallVec;
use std::{
    fmt,
    hash::{Hash, Hasher},
    mem,
};
use triomphe::Arc;

/// A host object reachable from a [`DynValue::Object`]. Member/method access on it goes
/// through the `Getter`/`Caller` capabilities in [`crate::host`]; change notification goes
/// through [`crate::host::Notify`] and friends, obtained via `as_notify`/`as_notify_collection`.
pub trait HostObject: fmt::Debug + Send + Sync + 'static {
    fn type_name(&self) -> ArcStr;

    /// Downcast support for `Bindings` implementations that need to recover a concrete
    /// host type from a `DynValue::Object` before reading a field or invoking a method
    /// cached against that concrete type (§6 `FastGetter`/`FastCaller`: the embedding
    /// reflection façade is expected to key its caches on the concrete host type, not on
    /// this trait object).
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_notify(&self) -> Option<&dyn crate::host::Notify> {
        None
    }

    fn as_notify_collection(&self) -> Option<&dyn crate::host::NotifyCollection> {
        None
    }

    fn as_notify_dictionary(&self) -> Option<&dyn crate::host::NotifyDictionary> {
        None
    }

    /// Runs this object's disposal side effect, if any. Most host objects are inert;
    /// only ones captured by an `Options` disposal policy need to override this.
    fn dispose(&self) {}

    /// Invokes this object as a callable value (§4.1 `Invocation`: "callee is evaluated,
    /// the result is invoked with the evaluated args"). Most host objects aren't
    /// invocable; only ones representing a delegate/closure value need to override this.
    fn invoke(&self, _args: &[DynValue]) -> anyhow::Result<DynValue> {
        anyhow::bail!("{} is not invocable", self.type_name())
    }
}

#[derive(Clone)]
pub enum DynValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(CompactString),
    Array(Arc<SmallVec<[DynValue; 4]>>),
    Object(Arc<dyn HostObject>),
}

impl fmt::Debug for DynValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DynValue::Null => write!(f, "null"),
            DynValue::Bool(b) => write!(f, "{b}"),
            DynValue::Int(i) => write!(f, "{i}"),
            DynValue::Float(v) => write!(f, "{v}"),
            DynValue::String(s) => write!(f, "{s:?}"),
            DynValue::Array(a) => f.debug_list().entries(a.iter()).finish(),
            DynValue::Object(o) => write!(f, "<{}>", o.type_name()),
        }
    }
}

impl fmt::Display for DynValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DynValue::Null => write!(f, "null"),
            DynValue::Bool(b) => write!(f, "{b}"),
            DynValue::Int(i) => write!(f, "{i}"),
            DynValue::Float(v) => write!(f, "{v}"),
            DynValue::String(s) => write!(f, "{s}"),
            DynValue::Array(a) => {
                write!(f, "[")?;
                for (i, v) in a.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            DynValue::Object(o) => write!(f, "<{}>", o.type_name()),
        }
    }
}

impl PartialEq for DynValue {
    fn eq(&self, other: &Self) -> bool {
        use DynValue::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (String(a), String(b)) => a == b,
            (Array(a), Array(b)) => a == b,
            (Object(a), Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for DynValue {}

// The open question in DESIGN NOTES is preserved here deliberately: the hash mixes the
// value only, not a separate `Type` tag, so e.g. Int(0) and Float(0.0) collide.
impl Hash for DynValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        mem::discriminant(self).hash(state);
        match self {
            DynValue::Null => {}
            DynValue::Bool(b) => b.hash(state),
            DynValue::Int(i) => i.hash(state),
            DynValue::Float(v) => v.to_bits().hash(state),
            DynValue::String(s) => s.hash(state),
            DynValue::Array(a) => a.hash(state),
            DynValue::Object(o) => (Arc::as_ptr(o) as *const () as usize).hash(state),
        }
    }
}

impl DynValue {
    pub fn is_null(&self) -> bool {
        matches!(self, DynValue::Null)
    }

    /// C#-style truthiness used by `AndAlso`/`OrElse`: anything other than `Bool(false)`
    /// or `Null` counts as true. Non-bool non-null operands are a host misuse but we
    /// don't reject them here; the compiled operator delegate would have faulted earlier
    /// if the static type disagreed.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, DynValue::Bool(false) | DynValue::Null)
    }

    pub fn type_of(&self) -> Type {
        match self {
            DynValue::Null => Type::Any,
            DynValue::Bool(_) => Type::Bool,
            DynValue::Int(_) => Type::Int,
            DynValue::Float(_) => Type::Float,
            DynValue::String(_) => Type::String,
            DynValue::Array(a) => {
                let elem = a.first().map(|v| v.type_of()).unwrap_or(Type::Any);
                Type::Array(std::boxed::Box::new(elem))
            }
            DynValue::Object(o) => Type::Object(o.type_name()),
        }
    }
}

/// The static result type carried by an `Expr`/`ActiveNode`. Deliberately minimal: the
/// source expression library is assumed to have already type-checked, so this crate only
/// needs enough type information to key the operator-delegate cache (§4.3) and the
/// `disposeConstructedTypes` option (§3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Any,
    Bool,
    Int,
    Float,
    String,
    Array(std::boxed::Box<Type>),
    Object(ArcStr),
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Any => write!(f, "any"),
            Type::Bool => write!(f, "bool"),
            Type::Int => write!(f, "int"),
            Type::Float => write!(f, "float"),
            Type::String => write!(f, "string"),
            Type::Array(t) => write!(f, "{t}[]"),
            Type::Object(name) => write!(f, "{name}"),
        }
    }
}

/// Captured failure from a node's own computation or propagated from a child (§7).
#[derive(Clone, Debug)]
pub struct Fault {
    pub kind: FaultKind,
    pub error: Arc<anyhow::Error>,
}

impl Fault {
    pub fn new(kind: FaultKind, error: anyhow::Error) -> Self {
        Fault { kind, error: Arc::new(error) }
    }

    pub fn evaluation(error: anyhow::Error) -> Self {
        Fault::new(FaultKind::Evaluation, error)
    }

    pub fn initialization(error: anyhow::Error) -> Self {
        Fault::new(FaultKind::Initialization, error)
    }

    pub fn options_contract(error: anyhow::Error) -> Self {
        Fault::new(FaultKind::OptionsContract, error)
    }

    /// A child's fault, re-tagged as this node's own so the dominance chain (§3 invariant
    /// 3) records where the fault currently sits without losing the original cause.
    pub fn from_child(child: &Fault) -> Self {
        Fault { kind: FaultKind::Child, error: child.error.clone() }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.error)
    }
}

impl PartialEq for Fault {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && Arc::ptr_eq(&self.error, &other.error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Evaluation,
    Child,
    Initialization,
    OptionsContract,
}

/// Wraps a fallible evaluation step into a [`Fault`] of the given kind — a small
/// context-wrapping macro that tags the error with its fault kind instead of re-raising.
#[macro_export]
macro_rules! wrap {
    ($kind:expr, $e:expr) => {
        match $e {
            Ok(v) => Ok(v),
            Err(e) => Err($crate::value::Fault::new($kind, e)),
        }
    };
}
