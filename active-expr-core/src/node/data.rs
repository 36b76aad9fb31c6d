//! Leaf and near-leaf node kinds (§4.1): `Constant`, `Parameter`, `Member` — the
//! always-present data-carrying leaves of the node DAG.

use super::{ActiveNode, Kind, NodeRef};
use crate::value::{DynValue, Fault};

/// `Constant`'s value is set exactly once, at construction, bypassing the generic
/// `Evaluate` dispatch entirely — it has no children to react to and nothing ever makes
/// it re-evaluate (§4.1 Constant: "Pure leaf. No subscriptions, no evaluation").
pub(crate) fn initialize_constant(node: &NodeRef) {
    let Kind::Constant { value } = &node.kind else { unreachable!() };
    node.set_value(value.clone());
}

/// `Parameter` starts with no value; it is bound externally by whichever enclosing
/// construct supplies it (§4.1 Parameter: "value is supplied externally via the façade's
/// invocation binding"). Binding goes through `ActiveNode::bind_parameter` directly,
/// which reuses `set_value`'s change-firing so dependents re-evaluate exactly like any
/// other node kind.
pub(crate) fn bind_parameter(node: &ActiveNode, value: DynValue) {
    debug_assert!(matches!(node.kind, Kind::Parameter { .. }));
    node.set_value(value);
}

/// Evaluates a `Member` node (§4.1 Member): reads `source`'s fault first; on success,
/// reads the member off `source`'s current value (or off no instance, for a static
/// member), then re-attaches the value-side subscriptions the new reading implies.
pub(crate) fn evaluate_member(node: &NodeRef) {
    let Kind::Member { source, member, getter } = &node.kind else { unreachable!() };
    if let Some(source_node) = source {
        if let Some(f) = source_node.fault() {
            node.set_fault(Fault::from_child(&f));
            return;
        }
    }
    let instance = source.as_ref().and_then(|s| s.value());
    super::genn::dispose_value_if_mandated(node);
    match getter.get(instance.as_ref()) {
        Ok(v) => {
            attach_value_subscriptions(node, source, member, getter, &instance, &v);
            node.set_value(v);
        }
        Err(e) => {
            node.clear_value_subs();
            node.set_fault(Fault::evaluation(e));
        }
    }
}

fn attach_value_subscriptions(
    node: &NodeRef,
    source: &Option<NodeRef>,
    member: &arcstr::ArcStr,
    getter: &triomphe::Arc<dyn crate::host::Getter>,
    instance: &Option<DynValue>,
    new_value: &DynValue,
) {
    node.clear_value_subs();

    // Instance-level `PropertyChanged` subscription (§4.1 Member), unless the getter
    // targets a property carrying a `DoNotListenForPropertyChanges` marker.
    if !getter.suppresses_instance_subscription() {
        if let Some(DynValue::Object(obj)) = instance {
            if let Some(notify) = obj.as_notify() {
                let weak_node = node.clone();
                let member = member.clone();
                let token = notify.subscribe(
                    Some(member),
                    Box::new(move || weak_node.evaluate()),
                );
                let obj = obj.clone();
                node.push_value_sub(crate::subscription::SubscriptionGuard::new(move || {
                    if let Some(notify) = obj.as_notify() {
                        notify.unsubscribe(token);
                    }
                }));
            }
        }
    }

    // Generated-capture-class field holding a collection/dictionary (§4.1 Member special
    // case): only when the source's *static* type looks compiler-synthesized and the
    // matching option is enabled.
    let Some(options) = node.options.as_ref() else { return };
    let is_generated_source = source
        .as_ref()
        .map(|s| matches!(&s.result_type, crate::value::Type::Object(name) if name.starts_with('<')))
        .unwrap_or(false);
    if !is_generated_source {
        return;
    }
    if let DynValue::Object(obj) = new_value {
        if options.listens_generated_fields_collection_changed() {
            if let Some(nc) = obj.as_notify_collection() {
                subscribe_generated(node, obj.clone(), nc, |o| o.as_notify_collection());
            }
        }
        if options.listens_generated_fields_dictionary_changed() {
            if let Some(nd) = obj.as_notify_dictionary() {
                subscribe_generated(node, obj.clone(), nd, |o| o.as_notify_dictionary());
            }
        }
    }
}

fn subscribe_generated<N: crate::host::Notify + ?Sized>(
    node: &NodeRef,
    obj: triomphe::Arc<dyn crate::value::HostObject>,
    notify: &N,
    accessor: impl Fn(&dyn crate::value::HostObject) -> Option<&N> + Send + Sync + 'static,
) {
    let weak_node = node.clone();
    let token = notify.subscribe(None, Box::new(move || weak_node.evaluate()));
    node.push_value_sub(crate::subscription::SubscriptionGuard::new(move || {
        if let Some(n) = accessor(&*obj) {
            n.unsubscribe(token);
        }
    }));
}
