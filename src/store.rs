//! [`Store`]: memoization plus fan-out. One observation of a source realm is
//! shared by many observers; each (live value, observer) pair owns exactly
//! one child [`Resource`], tracked in a bidirectional link map.

use crate::error::ReactiveError;
use crate::realm::{Observer, Realm};
use crate::resource::Resource;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

struct LinkMapInner {
    links: HashMap<(u64, u64), Resource>,
    by_value: HashMap<u64, Vec<u64>>,
    by_observer: HashMap<u64, Vec<u64>>,
}

/// Indexes child resources from both the live-value side and the observer
/// side of a [`Store`]'s fan-out.
struct LinkMap(Mutex<LinkMapInner>);

impl LinkMap {
    fn new() -> LinkMap {
        LinkMap(Mutex::new(LinkMapInner {
            links: HashMap::new(),
            by_value: HashMap::new(),
            by_observer: HashMap::new(),
        }))
    }

    /// Link `value_id` and `observer_id` to `resource`. If the pair already
    /// exists — not expected during normal `Store` operation, since value
    /// and observer ids are never reused while live — the displaced
    /// resource is released in the background rather than blocking this
    /// (synchronous) call.
    fn link(&self, value_id: u64, observer_id: u64, resource: Resource) {
        let displaced = {
            let mut guard = self.0.lock().unwrap();
            let key = (value_id, observer_id);
            let displaced = guard.links.insert(key, resource);
            if displaced.is_none() {
                guard.by_value.entry(value_id).or_default().push(observer_id);
                guard.by_observer.entry(observer_id).or_default().push(value_id);
            }
            displaced
        };
        if let Some(old) = displaced {
            tokio::spawn(async move {
                let _ = old.release().await;
            });
        }
    }

    async fn unlink_all_a(&self, value_id: u64) -> Result<(), ReactiveError> {
        let resources = {
            let mut guard = self.0.lock().unwrap();
            let observer_ids = guard.by_value.remove(&value_id).unwrap_or_default();
            observer_ids
                .into_iter()
                .filter_map(|oid| {
                    let resource = guard.links.remove(&(value_id, oid));
                    if let Some(values) = guard.by_observer.get_mut(&oid) {
                        values.retain(|v| *v != value_id);
                    }
                    resource
                })
                .collect::<Vec<_>>()
        };
        Resource::parallel(resources).release().await
    }

    async fn unlink_all_b(&self, observer_id: u64) -> Result<(), ReactiveError> {
        let resources = {
            let mut guard = self.0.lock().unwrap();
            let value_ids = guard.by_observer.remove(&observer_id).unwrap_or_default();
            value_ids
                .into_iter()
                .filter_map(|vid| {
                    let resource = guard.links.remove(&(vid, observer_id));
                    if let Some(observers) = guard.by_value.get_mut(&vid) {
                        observers.retain(|o| *o != observer_id);
                    }
                    resource
                })
                .collect::<Vec<_>>()
        };
        Resource::parallel(resources).release().await
    }

    async fn unlink_all(&self) -> Result<(), ReactiveError> {
        let resources = {
            let mut guard = self.0.lock().unwrap();
            let all = std::mem::take(&mut guard.links);
            guard.by_value.clear();
            guard.by_observer.clear();
            all.into_values().collect::<Vec<_>>()
        };
        Resource::parallel(resources).release().await
    }
}

struct StoreInner<T> {
    source_resource: Mutex<Option<Resource>>,
    live_values: Mutex<HashMap<u64, T>>,
    next_value_id: AtomicU64,
    observers: Mutex<HashMap<u64, Observer<T>>>,
    next_observer_id: AtomicU64,
    links: LinkMap,
}

/// A memoizing [`Realm`]: instantiates its source exactly once, fans out to
/// many observers, and tracks which values are currently live.
pub struct Store<T> {
    inner: Arc<StoreInner<T>>,
    lifecycle: Resource,
}

impl<T: Clone + Send + Sync + 'static> Store<T> {
    /// Instantiate `source` exactly once and begin memoizing its values.
    pub fn new(source: impl Realm<T> + 'static) -> Store<T> {
        let inner = Arc::new(StoreInner {
            source_resource: Mutex::new(None),
            live_values: Mutex::new(HashMap::new()),
            next_value_id: AtomicU64::new(0),
            observers: Mutex::new(HashMap::new()),
            next_observer_id: AtomicU64::new(0),
            links: LinkMap::new(),
        });

        let inner_for_create = inner.clone();
        let create_fn: Observer<T> = Arc::new(move |value: T| {
            let inner = inner_for_create.clone();
            let value_id = inner.next_value_id.fetch_add(1, Ordering::SeqCst);
            inner
                .live_values
                .lock()
                .unwrap()
                .insert(value_id, value.clone());

            let observers: Vec<(u64, Observer<T>)> = inner
                .observers
                .lock()
                .unwrap()
                .iter()
                .map(|(id, obs)| (*id, obs.clone()))
                .collect();
            for (observer_id, observer) in observers {
                let child = observer(value.clone());
                inner.links.link(value_id, observer_id, child);
            }

            let inner_for_remove = inner.clone();
            Resource::new(move || async move {
                inner_for_remove.live_values.lock().unwrap().remove(&value_id);
                inner_for_remove.links.unlink_all_a(value_id).await
            })
        });

        let source_resource = source.instantiate(create_fn);
        *inner.source_resource.lock().unwrap() = Some(source_resource);

        let inner_for_lifecycle = inner.clone();
        let lifecycle = Resource::new(move || async move {
            let source_resource = inner_for_lifecycle
                .source_resource
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(Resource::noop);
            let (source_result, links_result) = tokio::join!(
                source_resource.release(),
                inner_for_lifecycle.links.unlink_all()
            );
            match (source_result, links_result) {
                (Ok(()), Ok(())) => Ok(()),
                (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
                (Err(e1), Err(e2)) => {
                    Err(crate::error::ReleaseError::from_many(vec![e1, e2]).into())
                }
            }
        });

        Store { inner, lifecycle }
    }

    /// Snapshot of the currently live values. Iteration order is
    /// unspecified.
    pub fn peek(&self) -> Vec<T> {
        self.inner.live_values.lock().unwrap().values().cloned().collect()
    }

    /// Release the source observation and every link. Idempotent.
    pub async fn release(&self) -> Result<(), ReactiveError> {
        self.lifecycle.release().await
    }
}

impl<T: Clone + Send + Sync + 'static> Realm<T> for Store<T> {
    fn instantiate(&self, observer: Observer<T>) -> Resource {
        let inner = self.inner.clone();
        let observer_id = inner.next_observer_id.fetch_add(1, Ordering::SeqCst);
        inner
            .observers
            .lock()
            .unwrap()
            .insert(observer_id, observer.clone());

        let values: Vec<(u64, T)> = inner
            .live_values
            .lock()
            .unwrap()
            .iter()
            .map(|(id, v)| (*id, v.clone()))
            .collect();
        for (value_id, value) in values {
            let child = observer(value);
            inner.links.link(value_id, observer_id, child);
        }

        let inner_for_release = inner.clone();
        Resource::new(move || async move {
            inner_for_release.observers.lock().unwrap().remove(&observer_id);
            inner_for_release.links.unlink_all_b(observer_id).await
        })
    }
}
