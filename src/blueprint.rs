//! [`to_realm`]: turn a straight-line function that calls [`BlueprintCtx::use_in`]
//! into a lazy [`Realm`].
//!
//! Rust has no ambient-exception unwind a library can install around
//! arbitrary caller code, so suspension is implemented by **replay plus a
//! typed short-circuit** instead: `use_in` returns `Result<T, Suspended>`,
//! the body propagates with `?`, and a body run is replayed from the start
//! on every new source value, consuming cached results out of its history
//! until it reaches the first value not yet known — exactly the point
//! where it suspended (or completed) last time.
//!
//! Native `async`/`await` was not used for this because it resumes a
//! suspended function exactly where it left off, not by replaying from the
//! top; this crate's ownership model depends on the replay, since a
//! `use_in` call before the one that suspended must be able to observe a
//! *different* value on a later replay (its source republished) without the
//! body needing to be restructured as a state machine by hand.

use crate::context::ContextMap;
use crate::error::ReactiveError;
use crate::realm::{Observer, Realm};
use crate::resource::Resource;
use std::any::Any;
use std::sync::{Arc, Mutex};

/// Returned by [`BlueprintCtx::use_in`] when the realm being observed has
/// not yet published synchronously. The body propagates it with `?`;
/// nothing outside this crate can construct one.
pub struct Suspended(pub(crate) ());

/// The error type a blueprint body returns. `Suspended` arrives only via
/// `?` on a [`BlueprintCtx::use_in`] call; `User` carries every other
/// failure the body itself produces.
pub enum BlueprintError {
    Suspended,
    User(ReactiveError),
}

impl From<Suspended> for BlueprintError {
    fn from(_: Suspended) -> Self {
        BlueprintError::Suspended
    }
}

impl From<ReactiveError> for BlueprintError {
    fn from(error: ReactiveError) -> Self {
        BlueprintError::User(error)
    }
}

type BodyFn<T> = Arc<dyn Fn(BlueprintCtx<T>) -> Result<T, BlueprintError> + Send + Sync>;
type HistoryEntry = Arc<dyn Any + Send + Sync>;

/// Builds an accumulator other use-points can push child resources into,
/// plus the `Resource` that releases everything pushed into it — in
/// reverse of the order it was pushed, i.e. last-acquired released first.
fn accumulator() -> (Arc<Mutex<Vec<Resource>>>, Resource) {
    let items: Arc<Mutex<Vec<Resource>>> = Arc::new(Mutex::new(Vec::new()));
    let items_for_release = items.clone();
    let resource = Resource::new(move || async move {
        let collected = std::mem::take(&mut *items_for_release.lock().unwrap());
        Resource::sequential(collected.into_iter().rev()).release().await
    });
    (items, resource)
}

struct CursorState<T> {
    history: Arc<Vec<HistoryEntry>>,
    cursor: usize,
    /// The accumulator that the *next* use-point's subscription, or the
    /// body's final published value, belongs to.
    current: Arc<Mutex<Vec<Resource>>>,
    outer_observer: Observer<T>,
    body: BodyFn<T>,
}

/// The context argument every blueprint body receives. Carries both the
/// dynamic-scoped [`ContextMap`] (`provide`/`consume`) and the internal
/// replay cursor `use_in` drives — passed explicitly rather than through an
/// OS thread-local, since the driver is single-threaded and cooperative.
pub struct BlueprintCtx<T> {
    contexts: ContextMap,
    cursor: Arc<Mutex<CursorState<T>>>,
}

impl<T> Clone for BlueprintCtx<T> {
    fn clone(&self) -> Self {
        BlueprintCtx {
            contexts: self.contexts.clone(),
            cursor: self.cursor.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> BlueprintCtx<T> {
    /// Extract a value from `realm`. On the first pass through this call
    /// site, this either returns the value immediately (if `realm`
    /// publishes synchronously) or returns `Err(Suspended)` and arranges
    /// for a fresh, independent pass to run — with this value now part of
    /// its replay history — whenever `realm` eventually does publish. On
    /// every later pass that reaches this call site, the cached value from
    /// history is returned without touching `realm` again.
    pub fn use_in<U, R>(&self, realm: R) -> Result<U, Suspended>
    where
        U: Clone + Send + Sync + 'static,
        R: Realm<U> + 'static,
    {
        {
            let mut state = self.cursor.lock().unwrap();
            if state.cursor < state.history.len() {
                let cached = state.history[state.cursor].clone();
                state.cursor += 1;
                let value = cached
                    .downcast_ref::<U>()
                    .expect("blueprint history type mismatch: use_in call sites must be reached in the same order on every replay")
                    .clone();
                return Ok(value);
            }
        }

        let history_for_reentry = self.cursor.lock().unwrap().history.clone();
        let contexts_for_reentry = self.contexts.clone();
        let body_for_reentry = self.cursor.lock().unwrap().body.clone();
        let outer_observer_for_reentry = self.cursor.lock().unwrap().outer_observer.clone();

        let first_handled = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let instantiate_finished = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let sync_value: Arc<Mutex<Option<U>>> = Arc::new(Mutex::new(None));
        let sync_downstream: Arc<Mutex<Option<(Arc<Mutex<Vec<Resource>>>, Resource)>>> =
            Arc::new(Mutex::new(None));

        let first_handled_obs = first_handled.clone();
        let instantiate_finished_obs = instantiate_finished.clone();
        let sync_value_obs = sync_value.clone();
        let sync_downstream_obs = sync_downstream.clone();
        let wrapped: Observer<U> = Arc::new(move |value: U| {
            let is_first = !first_handled_obs.swap(true, std::sync::atomic::Ordering::SeqCst);
            let still_sync = !instantiate_finished_obs.load(std::sync::atomic::Ordering::SeqCst);

            if is_first && still_sync {
                let (downstream_items, downstream_resource) = accumulator();
                *sync_value_obs.lock().unwrap() = Some(value);
                *sync_downstream_obs.lock().unwrap() = Some((downstream_items, downstream_resource.clone()));
                downstream_resource
            } else {
                let mut replay_history = (*history_for_reentry).clone();
                replay_history.push(Arc::new(value) as HistoryEntry);
                run_pass(
                    body_for_reentry.clone(),
                    Arc::new(replay_history),
                    contexts_for_reentry.clone(),
                    outer_observer_for_reentry.clone(),
                )
            }
        });

        let subscription = realm.instantiate(wrapped);
        instantiate_finished.store(true, std::sync::atomic::Ordering::SeqCst);

        let maybe_value = sync_value.lock().unwrap().take();
        let mut state = self.cursor.lock().unwrap();
        state.current.lock().unwrap().push(subscription);
        match maybe_value {
            Some(value) => {
                let (next_items, _next_resource) = sync_downstream
                    .lock()
                    .unwrap()
                    .take()
                    .expect("synchronous use_in value always allocates its downstream accumulator");
                state.current = next_items;
                Arc::make_mut(&mut state.history).push(Arc::new(value.clone()) as HistoryEntry);
                state.cursor += 1;
                Ok(value)
            }
            None => Err(Suspended(())),
        }
    }

    /// Return a child context with `key` bound to `value`, scoped to
    /// wherever the returned `BlueprintCtx` is used — ordinary lexical
    /// shadowing restores the parent's view once that scope ends.
    pub fn provide<V: Send + Sync + 'static>(
        &self,
        key: crate::context::ContextKey<V>,
        value: V,
    ) -> BlueprintCtx<T> {
        BlueprintCtx {
            contexts: self.contexts.provide(key, value),
            cursor: self.cursor.clone(),
        }
    }

    /// Read `key` from the current context, or `Err(MissingContext)`.
    pub fn consume<V: Clone + Send + Sync + 'static>(
        &self,
        key: crate::context::ContextKey<V>,
    ) -> Result<V, ReactiveError> {
        self.contexts.consume(key)
    }
}

fn run_pass<T: Clone + Send + Sync + 'static>(
    body: BodyFn<T>,
    history: Arc<Vec<HistoryEntry>>,
    contexts: ContextMap,
    outer_observer: Observer<T>,
) -> Resource {
    let (root_items, root_resource) = accumulator();
    let state = CursorState {
        history,
        cursor: 0,
        current: root_items,
        outer_observer: outer_observer.clone(),
        body: body.clone(),
    };
    let ctx = BlueprintCtx {
        contexts,
        cursor: Arc::new(Mutex::new(state)),
    };

    match (body)(ctx.clone()) {
        Ok(value) => {
            let observation = outer_observer(value);
            let current = ctx.cursor.lock().unwrap().current.clone();
            current.lock().unwrap().push(observation);
            root_resource
        }
        Err(BlueprintError::Suspended) => root_resource,
        Err(BlueprintError::User(error)) => {
            tracing::warn!(error = %error, "blueprint body returned an error; releasing the partial observation");
            let to_release = root_resource.clone();
            tokio::spawn(async move {
                let _ = to_release.release().await;
            });
            root_resource
        }
    }
}

struct BlueprintRealm<T> {
    body: BodyFn<T>,
}

impl<T: Clone + Send + Sync + 'static> Realm<T> for BlueprintRealm<T> {
    fn instantiate(&self, observer: Observer<T>) -> Resource {
        run_pass(self.body.clone(), Arc::new(Vec::new()), ContextMap::new(), observer)
    }
}

/// Compile a blueprint body into a lazy [`Realm`]. Each observation of the
/// returned realm runs `body` from the start, replaying cached `use_in`
/// results until it reaches a use-point whose value isn't known yet.
pub fn to_realm<T, F>(body: F) -> impl Realm<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(BlueprintCtx<T>) -> Result<T, BlueprintError> + Send + Sync + 'static,
{
    BlueprintRealm {
        body: Arc::new(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realm::pure;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn single_synchronous_use_publishes_immediately() {
        let realm = to_realm(|ctx: BlueprintCtx<i32>| {
            let v = ctx.use_in(pure(5))?;
            Ok(v + 1)
        });

        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();
        let resource = realm.instantiate(Arc::new(move |v: i32| {
            *seen_clone.lock().unwrap() = Some(v);
            Resource::noop()
        }));
        resource.release().await.unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(6));
    }

    #[tokio::test]
    async fn two_sequential_synchronous_uses_compose() {
        let realm = to_realm(|ctx: BlueprintCtx<i32>| {
            let a = ctx.use_in(pure(2))?;
            let b = ctx.use_in(pure(3))?;
            Ok(a * b)
        });

        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();
        let resource = realm.instantiate(Arc::new(move |v: i32| {
            *seen_clone.lock().unwrap() = Some(v);
            Resource::noop()
        }));
        resource.release().await.unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(6));
    }

    #[tokio::test]
    async fn releasing_tears_down_in_reverse_acquisition_order() {
        let order = Arc::new(Mutex::new(Vec::new()));

        let order_a = order.clone();
        let realm_a = Arc::new(crate::basic_realm::BasicRealm::new(move |observer: Observer<i32>| {
            order_a.lock().unwrap().push("acquire a".to_string());
            let order_a = order_a.clone();
            let child = observer(1);
            Resource::new(move || async move {
                child.release().await?;
                order_a.lock().unwrap().push("release a".to_string());
                Ok(())
            })
        }));

        let order_b = order.clone();
        let realm_b = Arc::new(crate::basic_realm::BasicRealm::new(move |observer: Observer<i32>| {
            order_b.lock().unwrap().push("acquire b".to_string());
            let order_b = order_b.clone();
            let child = observer(10);
            Resource::new(move || async move {
                child.release().await?;
                order_b.lock().unwrap().push("release b".to_string());
                Ok(())
            })
        }));

        // Arc<BasicRealm<_>> implements Realm via the blanket impl, and is
        // cheap to clone across the (at most one, here) body invocations a
        // `Fn` body must support.
        let realm = to_realm(move |ctx: BlueprintCtx<i32>| {
            let a = ctx.use_in(realm_a.clone())?;
            let b = ctx.use_in(realm_b.clone())?;
            Ok(a + b)
        });

        let resource = realm.instantiate(Arc::new(|_v: i32| Resource::noop()));
        resource.release().await.unwrap();

        let log = order.lock().unwrap().clone();
        assert_eq!(
            log,
            vec!["acquire a", "acquire b", "release b", "release a"]
        );
    }

    #[tokio::test]
    async fn suspension_on_never_registers_subscription_without_publishing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let realm = to_realm(move |ctx: BlueprintCtx<i32>| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            let v = ctx.use_in(crate::realm::never::<i32>())?;
            Ok(v)
        });

        let resource = realm.instantiate(Arc::new(|_v: i32| Resource::noop()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        resource.release().await.unwrap();
    }
}
