//! Dynamic-scoped context values threaded through a [`crate::blueprint`] body.
//!
//! A [`ContextKey`] names a slot; [`ContextMap`] is the persistent map a
//! `provide` call extends. Because `ContextMap` is cheap to clone (an `Arc`
//! behind the scenes), a child scope can fork it without touching the
//! parent's — ordinary Rust shadowing of the `ctx` binding then stands in
//! for "push a value, run some code, pop it back off" without needing an
//! explicit pop at all.

use crate::error::ReactiveError;
use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

/// Identifies a context slot of type `T`. Two keys are the same slot iff
/// they carry the same `name`; there is no central registry, so picking a
/// unique name is the caller's responsibility, same as an environment
/// variable name.
pub struct ContextKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ContextKey<T> {
    /// Build a key identified by `name`.
    pub const fn new(name: &'static str) -> ContextKey<T> {
        ContextKey {
            name,
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for ContextKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ContextKey<T> {}

#[derive(Clone)]
pub(crate) struct ContextMap(Arc<HashMap<&'static str, Arc<dyn Any + Send + Sync>>>);

impl ContextMap {
    pub(crate) fn new() -> ContextMap {
        ContextMap(Arc::new(HashMap::new()))
    }

    pub(crate) fn provide<T: Send + Sync + 'static>(&self, key: ContextKey<T>, value: T) -> ContextMap {
        let mut next = (*self.0).clone();
        next.insert(key.name, Arc::new(value));
        ContextMap(Arc::new(next))
    }

    pub(crate) fn consume<T: Clone + Send + Sync + 'static>(
        &self,
        key: ContextKey<T>,
    ) -> Result<T, ReactiveError> {
        self.0
            .get(key.name)
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
            .ok_or_else(|| ReactiveError::MissingContext(key.name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_without_provide_is_missing_context() {
        let key: ContextKey<i32> = ContextKey::new("answer");
        let map = ContextMap::new();
        match map.consume(key) {
            Err(ReactiveError::MissingContext(name)) => assert_eq!(name, "answer"),
            other => panic!("expected MissingContext, got {other:?}"),
        }
    }

    #[test]
    fn provide_then_consume_round_trips() {
        let key: ContextKey<i32> = ContextKey::new("answer");
        let map = ContextMap::new().provide(key, 42);
        assert_eq!(map.consume(key).unwrap(), 42);
    }

    #[test]
    fn providing_on_a_fork_does_not_leak_back_to_the_parent() {
        let key: ContextKey<i32> = ContextKey::new("answer");
        let parent = ContextMap::new().provide(key, 1);
        let child = parent.provide(key, 2);
        assert_eq!(parent.consume(key).unwrap(), 1);
        assert_eq!(child.consume(key).unwrap(), 2);
    }
}
