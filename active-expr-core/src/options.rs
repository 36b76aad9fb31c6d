//! Structurally-compared configuration (C2, §3 Options). Two `Options` instances that
//! compare equal are treated as the same intern-cache key component even if they are
//! different allocations, so every field here must be `PartialEq + Eq + Hash`.

use arcstr::ArcStr;
use derive_builder::Builder;
use enumflags2::{bitflags, BitFlags};
use std::hash::{Hash, Hasher};
use triomphe::Arc;

/// The handful of independent booleans in `Options` packed into one bitset rather than
/// loose `bool` fields once more than a couple accumulate.
#[bitflags]
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OptionFlag {
    DisposeStaticMethodReturnValues,
    ListenGeneratedFieldsCollectionChanged,
    ListenGeneratedFieldsDictionaryChanged,
}

/// `(Type, parameterTypes)` key identifying a constructor whose return value should be
/// disposed (§3 Options, `disposeConstructedTypes`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConstructedTypeKey {
    pub type_name: ArcStr,
    pub parameter_types: Arc<[ArcStr]>,
}

#[derive(Debug, Clone, Default, Builder)]
#[builder(default, setter(into))]
pub struct Options {
    pub dispose_constructed_types: Arc<Vec<ConstructedTypeKey>>,
    pub dispose_method_return_values: Arc<Vec<ArcStr>>,
    pub flags: BitFlagsWrapper,
}

/// `enumflags2::BitFlags` doesn't implement `Default`/`Hash` directly in a way
/// `derive_builder`'s `#[builder(default)]` can drive, so it's wrapped here; the wrapper
/// forwards every operation that matters (`PartialEq`, `Eq`, `Hash`, `Default`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BitFlagsWrapper(pub BitFlags<OptionFlag>);

impl Hash for BitFlagsWrapper {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.bits().hash(state)
    }
}

impl From<BitFlags<OptionFlag>> for BitFlagsWrapper {
    fn from(f: BitFlags<OptionFlag>) -> Self {
        BitFlagsWrapper(f)
    }
}

impl PartialEq for Options {
    fn eq(&self, other: &Self) -> bool {
        self.dispose_constructed_types == other.dispose_constructed_types
            && self.dispose_method_return_values == other.dispose_method_return_values
            && self.flags == other.flags
    }
}

impl Eq for Options {}

impl Hash for Options {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.dispose_constructed_types.hash(state);
        self.dispose_method_return_values.hash(state);
        self.flags.hash(state);
    }
}

impl Options {
    pub fn dispose_static_method_return_values(&self) -> bool {
        self.flags.0.contains(OptionFlag::DisposeStaticMethodReturnValues)
    }

    pub fn listens_generated_fields_collection_changed(&self) -> bool {
        self.flags.0.contains(OptionFlag::ListenGeneratedFieldsCollectionChanged)
    }

    pub fn listens_generated_fields_dictionary_changed(&self) -> bool {
        self.flags.0.contains(OptionFlag::ListenGeneratedFieldsDictionaryChanged)
    }

    pub fn should_dispose_constructed_type(&self, type_name: &str, parameter_types: &[ArcStr]) -> bool {
        self.dispose_constructed_types
            .iter()
            .any(|k| &*k.type_name == type_name && &*k.parameter_types == parameter_types)
    }

    pub fn should_dispose_method_return(&self, method: &ArcStr, is_static: bool) -> bool {
        if is_static && self.dispose_static_method_return_values() {
            return true;
        }
        self.dispose_method_return_values.iter().any(|m| m == method)
    }
}
