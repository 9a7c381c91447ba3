//! Thin convenience façades over [`crate::effect_realm`], the containers,
//! and [`crate::blueprint`]. None of these carry state machinery of their
//! own — each is a one- or two-line call into the core types, named here so
//! their signatures read as a single cohesive surface.

use crate::basic_realm::BasicRealm;
use crate::blueprint::{BlueprintCtx, Suspended};
use crate::cell::{CellRealm, Structural};
use crate::effect_realm::{AbortSignal, AddResource, EffectOutcome, EffectRealm};
use crate::portal::portal;
use crate::realm::{never, Never, Observer, Realm};
use crate::resource::Resource;
use crate::store::Store;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Run `maker` at most once per observation, synchronously or
/// asynchronously. A thin alias for [`EffectRealm::new`].
pub fn use_effect<T, F>(maker: F) -> EffectRealm<T, F>
where
    F: Fn(AddResource, AbortSignal) -> EffectOutcome<T> + Send + Sync,
{
    EffectRealm::new(maker)
}

/// Publish `()` after `duration` elapses on the ambient clock. Releasing
/// the observation before the timer fires cancels it — the maker races
/// the sleep against the abort signal rather than letting it run to
/// completion unobserved.
pub fn use_timeout(duration: Duration) -> impl Realm<()> {
    EffectRealm::new(move |_add_resource: AddResource, mut abort: AbortSignal| {
        EffectOutcome::Pending(Box::pin(async move {
            tokio::select! {
                _ = tokio::time::sleep(duration) => Ok(()),
                _ = abort.changed() => Err(crate::error::ReactiveError::EffectFailed(
                    "use_timeout cancelled before it elapsed".to_string(),
                )),
            }
        }))
    })
}

/// Publish `()` exactly when `predicate()` holds at observation time.
/// Otherwise publishes nothing.
pub fn use_guard<F>(predicate: F) -> BasicRealm<()>
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    BasicRealm::new(move |observer: Observer<()>| {
        if predicate() {
            observer(())
        } else {
            Resource::noop()
        }
    })
}

/// Publish every item of `items`, in order. Releasing the observation
/// releases them in the reverse of that order.
pub fn use_iterable<T, I>(items: I) -> BasicRealm<T>
where
    T: Send + Sync + 'static,
    I: IntoIterator<Item = T> + Send + Sync + Clone + 'static,
{
    BasicRealm::new(move |observer: Observer<T>| {
        let published: Vec<Resource> = items.clone().into_iter().map(|value| observer(value)).collect();
        Resource::sequential(published.into_iter().rev())
    })
}

/// Publish nothing, ever. A thin alias for [`crate::realm::never`].
pub fn use_never<T: Send + Sync + 'static>() -> Never<T> {
    never()
}

/// Wrap `realm` in a memoizing [`Store`]. A thin alias for [`Store::new`],
/// outside any blueprint body — the store's lifetime is the caller's to
/// manage directly.
pub fn to_store<T, R>(realm: R) -> Store<T>
where
    T: Clone + Send + Sync + 'static,
    R: Realm<T> + 'static,
{
    Store::new(realm)
}

/// Blueprint-scope sugar: allocate a [`CellRealm`] whose lifetime is tied to
/// the enclosing use-point, exactly as one constructed directly in the body
/// would be, but without losing its identity across replays — later passes
/// through this call site return the same cell rather than a fresh one.
pub fn use_cell<O, T>(ctx: &BlueprintCtx<O>, initial: T) -> Result<Arc<CellRealm<T>>, Suspended>
where
    O: Clone + Send + Sync + 'static,
    T: Structural,
{
    ctx.use_in(EffectRealm::new(move |add_resource: AddResource, _abort| {
        let cell = Arc::new(CellRealm::new(initial.clone()));
        let cell_for_release = cell.clone();
        add_resource(Resource::new(move || async move { cell_for_release.release().await }));
        EffectOutcome::Ready(cell)
    }))
}

/// Blueprint-scope sugar: allocate a [`portal`] whose store's lifetime is
/// tied to the enclosing use-point.
pub fn use_portal<O, T>(
    ctx: &BlueprintCtx<O>,
) -> Result<(Arc<Store<T>>, impl Fn(T) -> Resource + Clone), Suspended>
where
    O: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    ctx.use_in(EffectRealm::new(move |add_resource: AddResource, _abort| {
        let (store, publish) = portal::<T>();
        let store = Arc::new(store);
        let store_for_release = store.clone();
        add_resource(Resource::new(move || async move { store_for_release.release().await }));
        EffectOutcome::Ready((store, publish))
    }))
}

/// Blueprint-scope sugar: wrap `realm` in a [`Store`] whose lifetime is tied
/// to the enclosing use-point.
pub fn use_store<O, T, R>(ctx: &BlueprintCtx<O>, realm: R) -> Result<Arc<Store<T>>, Suspended>
where
    O: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    R: Realm<T> + Send + Sync + 'static,
{
    let slot = Arc::new(Mutex::new(Some(realm)));
    ctx.use_in(EffectRealm::new(move |add_resource: AddResource, _abort| {
        let realm = slot
            .lock()
            .unwrap()
            .take()
            .expect("use_store's maker runs at most once per allocation");
        let store = Arc::new(to_store(realm));
        let store_for_release = store.clone();
        add_resource(Resource::new(move || async move { store_for_release.release().await }));
        EffectOutcome::Ready(store)
    }))
}
