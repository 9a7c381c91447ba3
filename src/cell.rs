//! [`CellRealm`]: a single mutable value, observed and updated in place.
//!
//! Setting a new value that is [`Structural`]ly equal to the current one is
//! a no-op. Otherwise every observer is re-invoked with the new value and
//! the previous child resource's release is kicked off as a detached task —
//! `set` does not wait for it. The new value is visible to observers before
//! the old one has finished tearing down.

use crate::error::ReactiveError;
use crate::realm::{Observer, Realm};
use crate::resource::Resource;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Values a [`CellRealm`] can hold must know how to compare themselves for
/// equality, so `set` can deduplicate. Blanket-implemented for anything
/// that's already `PartialEq + Clone` and realm-safe — there's nothing to
/// opt into, this just names the bound `CellRealm` needs.
pub trait Structural: PartialEq + Clone + Send + Sync + 'static {}

impl<T: PartialEq + Clone + Send + Sync + 'static> Structural for T {}

struct CellInner<T> {
    value: Mutex<T>,
    observers: Mutex<HashMap<u64, (Observer<T>, Resource)>>,
    /// Keyed by a pending-release id; the value pairs the displaced
    /// observer's id with the detached release task, so a single
    /// observer's own teardown can await just its own prior releases.
    pending_releases: Mutex<HashMap<u64, (u64, JoinHandle<()>)>>,
    next_observer_id: AtomicU64,
    next_pending_id: AtomicU64,
    releasing: AtomicBool,
}

/// A mutable-cell [`Realm`]. See the module docs for the update protocol.
pub struct CellRealm<T> {
    inner: Arc<CellInner<T>>,
}

impl<T: Structural> CellRealm<T> {
    /// Build a cell holding `initial`.
    pub fn new(initial: T) -> CellRealm<T> {
        CellRealm {
            inner: Arc::new(CellInner {
                value: Mutex::new(initial),
                observers: Mutex::new(HashMap::new()),
                pending_releases: Mutex::new(HashMap::new()),
                next_observer_id: AtomicU64::new(0),
                next_pending_id: AtomicU64::new(0),
                releasing: AtomicBool::new(false),
            }),
        }
    }

    /// The current value.
    pub fn peek(&self) -> T {
        self.inner.value.lock().unwrap().clone()
    }

    /// Replace the cell's value. A no-op if the cell is releasing, or if
    /// `new_value` is structurally equal to the current value. Otherwise
    /// every live observer is called with `new_value` and the previous
    /// child resource's release is started — but not awaited — as a
    /// detached task.
    pub async fn set(&self, new_value: T) -> Result<(), ReactiveError> {
        if self.inner.releasing.load(Ordering::SeqCst) {
            return Ok(());
        }
        {
            let mut current = self.inner.value.lock().unwrap();
            if *current == new_value {
                return Ok(());
            }
            *current = new_value.clone();
        }

        let observers: Vec<(u64, Observer<T>)> = self
            .inner
            .observers
            .lock()
            .unwrap()
            .iter()
            .map(|(id, (observer, _))| (*id, observer.clone()))
            .collect();

        for (id, observer) in observers {
            let new_child = observer(new_value.clone());
            let displaced = {
                let mut map = self.inner.observers.lock().unwrap();
                map.get_mut(&id).map(|entry| std::mem::replace(&mut entry.1, new_child.clone()))
            };
            match displaced {
                Some(old) => self.spawn_release(id, old),
                // Observer released between the snapshot and this call; its
                // freshly minted child resource has no one to own it.
                None => new_child.release().await?,
            }
        }

        Ok(())
    }

    /// Replace the cell's value with `f(current)`.
    pub async fn modify<F>(&self, f: F) -> Result<(), ReactiveError>
    where
        F: FnOnce(&T) -> T,
    {
        let next = f(&self.peek());
        self.set(next).await
    }

    fn spawn_release(&self, observer_id: u64, resource: Resource) {
        let inner = self.inner.clone();
        let pending_id = inner.next_pending_id.fetch_add(1, Ordering::SeqCst);
        let inner_for_task = inner.clone();
        let handle = tokio::spawn(async move {
            let _ = resource.release().await;
            inner_for_task.pending_releases.lock().unwrap().remove(&pending_id);
        });
        inner
            .pending_releases
            .lock()
            .unwrap()
            .insert(pending_id, (observer_id, handle));
    }

    /// Mark the cell as releasing, await every in-flight detached release,
    /// then release each observer's current sub-resource and forget them.
    pub async fn release(&self) -> Result<(), ReactiveError> {
        self.inner.releasing.store(true, Ordering::SeqCst);

        let pending: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.pending_releases.lock().unwrap())
            .into_values()
            .map(|(_, handle)| handle)
            .collect();
        for handle in pending {
            let _ = handle.await;
        }

        let resources: Vec<Resource> = std::mem::take(&mut *self.inner.observers.lock().unwrap())
            .into_values()
            .map(|(_, resource)| resource)
            .collect();
        Resource::parallel(resources).release().await
    }
}

impl<T: Structural> Realm<T> for CellRealm<T> {
    fn instantiate(&self, observer: Observer<T>) -> Resource {
        let id = self.inner.next_observer_id.fetch_add(1, Ordering::SeqCst);
        let value = self.peek();
        let child = observer(value);
        self.inner
            .observers
            .lock()
            .unwrap()
            .insert(id, (observer, child));

        let inner = self.inner.clone();
        Resource::new(move || async move {
            let own_pending: Vec<JoinHandle<()>> = {
                let mut map = inner.pending_releases.lock().unwrap();
                let keys: Vec<u64> = map
                    .iter()
                    .filter(|(_, (owner, _))| *owner == id)
                    .map(|(pending_id, _)| *pending_id)
                    .collect();
                keys.into_iter()
                    .filter_map(|pending_id| map.remove(&pending_id).map(|(_, handle)| handle))
                    .collect()
            };
            for handle in own_pending {
                let _ = handle.await;
            }

            let entry = inner.observers.lock().unwrap().remove(&id);
            match entry {
                Some((_, resource)) => resource.release().await,
                None => Ok(()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn instance_release_awaits_its_own_pending_release_first() {
        let cell = CellRealm::new(10);
        let order = Arc::new(Mutex::new(Vec::new()));

        let order_for_observe = order.clone();
        let resource = cell.instantiate(Arc::new(move |v: i32| {
            let order = order_for_observe.clone();
            Resource::new(move || async move {
                if v == 10 {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                order.lock().unwrap().push(format!("release({v})"));
                Ok(())
            })
        }));

        cell.set(20).await.unwrap();
        // The displaced value=10 resource's release is still in flight
        // (it sleeps 20ms); releasing this instance's own resource must
        // await that detached release before releasing the current one,
        // so "release(10)" is guaranteed to precede "release(20)" here.
        resource.release().await.unwrap();

        assert_eq!(
            order.lock().unwrap().as_slice(),
            ["release(10)", "release(20)"]
        );

        cell.release().await.unwrap();
    }

    #[tokio::test]
    async fn set_skips_structurally_equal_values() {
        let cell = CellRealm::new(1);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let resource = cell.instantiate(Arc::new(move |_v: i32| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Resource::noop()
        }));

        cell.set(1).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cell.set(2).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cell.peek(), 2);

        resource.release().await.unwrap();
        cell.release().await.unwrap();
    }

    #[tokio::test]
    async fn new_observer_call_precedes_old_release() {
        let cell = CellRealm::new(10);
        let order = Arc::new(Mutex::new(Vec::new()));

        let order_for_observe = order.clone();
        let resource = cell.instantiate(Arc::new(move |v: i32| {
            order_for_observe.lock().unwrap().push(format!("observe({v})"));
            let order = order_for_observe.clone();
            Resource::new(move || async move {
                order.lock().unwrap().push("release".to_string());
                Ok(())
            })
        }));

        cell.set(20).await.unwrap();
        // Old-value release is a detached task; draining it here via
        // release() is the supported way to observe its completion.
        assert_eq!(
            order.lock().unwrap().as_slice(),
            ["observe(10)", "observe(20)"]
        );

        resource.release().await.unwrap();
        cell.release().await.unwrap();
        assert!(order.lock().unwrap().contains(&"release".to_string()));
    }

    #[tokio::test]
    async fn modify_derives_next_value_from_current() {
        let cell = CellRealm::new(5);
        cell.modify(|v| v + 1).await.unwrap();
        assert_eq!(cell.peek(), 6);
        cell.release().await.unwrap();
    }
}
