//! Per-kind intern cache (C3, §4.2): `(structural-expression-key, Options) → node`, with
//! reference counting and eviction on last release.
//!
//! Node construction recurses into `Create` for children, so the table is guarded by a
//! single re-entrant mutex rather than one lock per table (§4.2: "A uniform strategy: one
//! global re-entrant mutex"). The refcount entry-API idiom below — bump-on-hit,
//! insert-on-miss, decrement-then-remove-at-zero — generalizes the usual bind-refcounting
//! pattern for variable references to one table per node kind.

use fxhash::FxHashMap;
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::hash::Hash;

/// A refcounted keyed cache. Not thread-safe on its own — callers hold the surrounding
/// `InternTables`'s re-entrant mutex for the duration of any `try_acquire`/`insert_or_share`/
/// `release` call, per §4.2's locking discipline.
pub struct RefCounted<K, V> {
    map: FxHashMap<K, (V, usize)>,
}

impl<K: Eq + Hash, V: Clone> Default for RefCounted<K, V> {
    fn default() -> Self {
        RefCounted { map: FxHashMap::default() }
    }
}

impl<K: Eq + Hash, V: Clone> RefCounted<K, V> {
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Fast path of `Create` (§4.2 step 3): bumps and returns the cached value on a hit,
    /// without running anything besides the lookup. Kept deliberately non-recursive —
    /// building a node needs to recurse into `Create` for its children, and that
    /// recursion must never happen while this table's lock is held (see
    /// [`InternCache::with`]'s docs), so construction is never inlined into this method.
    pub fn try_acquire(&mut self, key: &K) -> Option<V> {
        let (v, count) = self.map.get_mut(key)?;
        *count += 1;
        Some(v.clone())
    }

    /// Miss path of `Create` (§4.2 step 4): inserts `value` as the entry for `key` with
    /// refcount 1, unless another `Create` raced and already won — in that case the
    /// existing entry's refcount is bumped instead and the caller's `value` is handed
    /// back unused (the caller is responsible for disposing it, since by the time this
    /// runs `value`'s own children are already interned and need releasing).
    pub fn insert_or_share(&mut self, key: K, value: V) -> V {
        if let Some((v, count)) = self.map.get_mut(&key) {
            *count += 1;
            return v.clone();
        }
        self.map.insert(key, (value.clone(), 1));
        value
    }

    /// Bumps the refcount for an already-live `key` without otherwise touching the entry
    /// (used by [`crate::node::Engine::retain`] when a caller clones a [`crate::node::NodeRef`]
    /// handle it already holds rather than going through `Create` from scratch). A no-op
    /// if `key` isn't present, which shouldn't happen for a node the caller still holds.
    pub fn bump(&mut self, key: &K) {
        if let Some((_, count)) = self.map.get_mut(key) {
            *count += 1;
        }
    }

    /// Decrements the refcount for `key`; if it reaches zero the entry is removed and
    /// its value handed back to the caller so the (potentially expensive, user-observable)
    /// teardown can happen *after* the lock is released (§4.2 invariant).
    pub fn release(&mut self, key: &K) -> Option<V> {
        let hit_zero = match self.map.get_mut(key) {
            Some((_, count)) => {
                *count -= 1;
                *count == 0
            }
            None => return None,
        };
        if hit_zero { self.map.remove(key).map(|(v, _)| v) } else { None }
    }
}

/// A single global, re-entrant-locked bundle of per-kind intern tables. `T` is whatever
/// aggregate struct the core defines to hold one `RefCounted<K, V>` field per node kind
/// (`node::InternTables`); kept generic here so the locking/re-entrancy policy is
/// independent of the concrete node types.
pub struct InternCache<T> {
    inner: ReentrantMutex<RefCell<T>>,
}

impl<T: Default> Default for InternCache<T> {
    fn default() -> Self {
        InternCache { inner: ReentrantMutex::new(RefCell::new(T::default())) }
    }
}

impl<T> InternCache<T> {
    pub fn new(tables: T) -> Self {
        InternCache { inner: ReentrantMutex::new(RefCell::new(tables)) }
    }

    /// Runs `f` with exclusive access to the tables, for the duration of `f` only. The
    /// re-entrant mutex means a nested call to `with` from the *same thread* does not
    /// deadlock, but the `RefCell` underneath still forbids two overlapping `borrow_mut`s
    /// — so `f` itself must stay a short, non-recursive critical section (a lookup, an
    /// insert, a refcount bump). Node construction recurses into `Create` for children,
    /// so it must happen *between* two separate `with` calls, never inside one; see
    /// `node::Engine::create` for the build-outside-the-lock / insert-or-share pattern
    /// this implies.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let guard = self.inner.lock();
        f(&mut *guard.borrow_mut())
    }
}
