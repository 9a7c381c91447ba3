//! [`Realm`]: the abstract value-producer at the center of the crate.
//!
//! A `Realm<T>` publishes values of type `T` to an observer; every value it
//! publishes is owned by the observation that received it (see the crate
//! root docs for the full contract). Publishing and releasing are the only
//! two observable events — combinators must preserve that and must never
//! introduce hidden buffering, reordering, or batching.

use crate::basic_realm::BasicRealm;
use crate::resource::Resource;
use std::sync::Arc;

/// A callback a [`Realm`] invokes with each value it publishes. Returns the
/// [`Resource`] that owns whatever the caller built in response.
pub type Observer<T> = Arc<dyn Fn(T) -> Resource + Send + Sync>;

/// An abstract value-producer. See the module docs for the ownership
/// contract every implementation must uphold.
pub trait Realm<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    /// Begin observing this realm. Every value published to `observer`
    /// before the returned [`Resource`] is released is owned by this
    /// observation: releasing it must release every child `Resource`
    /// `observer` returned.
    fn instantiate(&self, observer: Observer<T>) -> Resource;
}

impl<T, R> Realm<T> for Arc<R>
where
    T: Send + Sync + 'static,
    R: Realm<T> + ?Sized,
{
    fn instantiate(&self, observer: Observer<T>) -> Resource {
        (**self).instantiate(observer)
    }
}

/// Combinators available on every `Realm`. A blanket extension trait rather
/// than default methods on [`Realm`] itself, so that `Realm<T>` stays
/// object-safe and usable as `Arc<dyn Realm<T>>`.
pub trait RealmExt<T>: Realm<T> + Sized + 'static
where
    T: Send + Sync + 'static,
{
    /// Publish `f(value)` for every value this realm publishes.
    fn map<U, F>(self, f: F) -> BasicRealm<U>
    where
        U: Send + Sync + 'static,
        F: Fn(T) -> U + Send + Sync + Clone + 'static,
    {
        let parent = Arc::new(self);
        BasicRealm::new(move |observer: Observer<U>| {
            let f = f.clone();
            parent.instantiate(Arc::new(move |value: T| observer(f(value))))
        })
    }

    /// Publish only the values for which `predicate` holds. Other values are
    /// dropped silently; their (nonexistent) child resource is a noop.
    fn filter<F>(self, predicate: F) -> BasicRealm<T>
    where
        F: Fn(&T) -> bool + Send + Sync + Clone + 'static,
    {
        let parent = Arc::new(self);
        BasicRealm::new(move |observer: Observer<T>| {
            let predicate = predicate.clone();
            parent.instantiate(Arc::new(move |value: T| {
                if predicate(&value) {
                    observer(value)
                } else {
                    Resource::noop()
                }
            }))
        })
    }

    /// Publish every value either this realm or `other` publishes.
    fn merge<R2>(self, other: R2) -> BasicRealm<T>
    where
        R2: Realm<T> + 'static,
    {
        let left = Arc::new(self);
        let right = Arc::new(other);
        BasicRealm::new(move |observer: Observer<T>| {
            let left_obs = left.instantiate(observer.clone());
            let right_obs = right.instantiate(observer.clone());
            Resource::parallel([left_obs, right_obs])
        })
    }

    /// For every value this realm publishes, instantiate `f(value)` against
    /// the downstream observer. The child realm's publications are owned by
    /// the outer value's observation, per the ownership contract.
    fn flat_map<U, R2, F>(self, f: F) -> BasicRealm<U>
    where
        U: Send + Sync + 'static,
        R2: Realm<U> + 'static,
        F: Fn(T) -> R2 + Send + Sync + Clone + 'static,
    {
        let parent = Arc::new(self);
        BasicRealm::new(move |observer: Observer<U>| {
            let f = f.clone();
            parent.instantiate(Arc::new(move |value: T| f(value).instantiate(observer.clone())))
        })
    }
}

impl<T, R> RealmExt<T> for R
where
    T: Send + Sync + 'static,
    R: Realm<T> + 'static,
{
}

/// A realm that calls the observer exactly once, synchronously, with `v`.
/// Releasing the returned resource releases the child resource and nothing
/// else.
pub struct Pure<T>(T);

impl<T: Clone + Send + Sync + 'static> Realm<T> for Pure<T> {
    fn instantiate(&self, observer: Observer<T>) -> Resource {
        observer(self.0.clone())
    }
}

/// Build a realm that publishes `value` exactly once, synchronously.
pub fn pure<T: Clone + Send + Sync + 'static>(value: T) -> Pure<T> {
    Pure(value)
}

/// A realm that never publishes anything.
pub struct Never<T>(std::marker::PhantomData<T>);

impl<T: Send + Sync + 'static> Realm<T> for Never<T> {
    fn instantiate(&self, _observer: Observer<T>) -> Resource {
        Resource::noop()
    }
}

/// Build a realm that never publishes. `instantiate` returns a noop resource
/// immediately and never invokes the observer.
pub fn never<T: Send + Sync + 'static>() -> Never<T> {
    Never(std::marker::PhantomData)
}

/// A realm that defers construction of its underlying realm until
/// `instantiate` is called, so each observation gets an independently built
/// realm from `builder`.
pub struct Lazy<T, F> {
    builder: F,
    _marker: std::marker::PhantomData<T>,
}

impl<T, R, F> Realm<T> for Lazy<T, F>
where
    T: Send + Sync + 'static,
    R: Realm<T> + 'static,
    F: Fn() -> R + Send + Sync,
{
    fn instantiate(&self, observer: Observer<T>) -> Resource {
        (self.builder)().instantiate(observer)
    }
}

/// Build a realm whose underlying realm is constructed fresh, by calling
/// `builder`, on every `instantiate` call.
pub fn lazy<T, R, F>(builder: F) -> Lazy<T, F>
where
    T: Send + Sync + 'static,
    R: Realm<T> + 'static,
    F: Fn() -> R + Send + Sync,
{
    Lazy {
        builder,
        _marker: std::marker::PhantomData,
    }
}
