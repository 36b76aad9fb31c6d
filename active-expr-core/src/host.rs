//! Opaque host capabilities the core consumes but never implements (§6): attaching to a
//! host object's change notifications, and invoking a cached member getter / method
//! caller. Kept as trait objects rather than a generic parameter so `ActiveNode` stays a
//! single concrete type per node kind instead of one monomorphization per host type.

use crate::value::DynValue;
use arcstr::ArcStr;
use std::fmt;
use triomphe::Arc;

/// Opaque handle returned by `Notify::subscribe`, passed back to `unsubscribe`. Carries
/// no meaning beyond identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(pub u64);

pub type ChangeHandler = std::boxed::Box<dyn Fn() + Send + Sync>;

/// Property-changed capability (§6 `PropertyChanged`). `field` is `None` to mean "any
/// field changed", matching the multicast semantics of the source `PropertyChanged` event.
pub trait Notify: fmt::Debug + Send + Sync {
    fn subscribe(&self, field: Option<ArcStr>, handler: ChangeHandler) -> SubscriptionToken;
    fn unsubscribe(&self, token: SubscriptionToken);
}

/// `CollectionChanged` capability, attached to a member's *value* rather than its source
/// object when the value is itself a collection (§4.1 Member special case).
pub trait NotifyCollection: Notify {}

/// `DictionaryChanged` capability, analogous to [`NotifyCollection`].
pub trait NotifyDictionary: Notify {}

/// Reads a field or property off an optional receiver (`None` for a static member).
/// Cached per-member by the embedding reflection façade (§6 `FastGetter`).
pub trait Getter: Send + Sync {
    fn get(&self, instance: Option<&DynValue>) -> anyhow::Result<DynValue>;

    /// Whether the getter targets an instance property carrying a
    /// `DoNotListenForPropertyChanges` marker (§4.1 Member), suppressing the
    /// instance-level subscription that would otherwise be attached.
    fn suppresses_instance_subscription(&self) -> bool {
        false
    }
}

/// Invokes a method or constructor. Cached per-member by the embedding reflection façade
/// (§6 `FastCaller`).
pub trait Caller: Send + Sync {
    fn invoke(&self, instance: Option<&DynValue>, args: &[DynValue]) -> anyhow::Result<DynValue>;
}

/// A plain function pointer satisfies `Getter`/`Caller` for simple cases (field access,
/// free functions) without requiring a full trait object implementation from the caller.
impl<F: Fn(Option<&DynValue>) -> anyhow::Result<DynValue> + Send + Sync> Getter for F {
    fn get(&self, instance: Option<&DynValue>) -> anyhow::Result<DynValue> {
        (self)(instance)
    }
}

impl<F: Fn(Option<&DynValue>, &[DynValue]) -> anyhow::Result<DynValue> + Send + Sync> Caller
    for F
{
    fn invoke(&self, instance: Option<&DynValue>, args: &[DynValue]) -> anyhow::Result<DynValue> {
        (self)(instance, args)
    }
}

impl fmt::Debug for dyn Getter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<getter>")
    }
}

impl fmt::Debug for dyn Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<caller>")
    }
}

/// The embedding reflection façade (§1 "OUT OF SCOPE: reflection/invoker façade"; §6
/// `FastGetter`/`FastCaller`). Resolves a member/method/constructor name against a static
/// `Type` into a cached `Getter`/`Caller`; the core calls this exactly once per compiled
/// node (at `Create` time) and holds on to the result for the node's lifetime, so any
/// caching of the reflection lookup itself happens on the embedder's side of this trait.
pub trait Bindings: fmt::Debug + Send + Sync {
    /// Resolve a field or property read. `owner` is `None` for a static member.
    fn getter(
        &self,
        owner: Option<&crate::value::Type>,
        member: &ArcStr,
    ) -> anyhow::Result<Arc<dyn Getter>>;

    /// Resolve an instance or static method call.
    fn method(
        &self,
        owner: Option<&crate::value::Type>,
        method: &ArcStr,
        arg_types: &[crate::value::Type],
    ) -> anyhow::Result<Arc<dyn Caller>>;

    /// Resolve a constructor for `New`.
    fn constructor(
        &self,
        type_name: &ArcStr,
        parameter_types: &[ArcStr],
    ) -> anyhow::Result<Arc<dyn Caller>>;

    /// Resolve an indexer (array element or indexed property) read, modeled as a
    /// single-argument `Caller` invoked with `args = [index]`.
    fn indexer(&self, owner: &crate::value::Type) -> anyhow::Result<Arc<dyn Caller>>;

    /// Resolve the delegate backing an `as`/`is` `TypeBinary` node.
    fn type_binary(&self, target_type: &ArcStr, as_cast: bool) -> Arc<dyn Caller>;
}
