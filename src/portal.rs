//! [`portal`]: an externally-fed, multi-value container. Unlike
//! [`crate::cell::CellRealm`], a portal has no current value to replay to
//! late observers — only values published after an observer joins reach it.
//! Past values published before a given observer joined are never replayed
//! to it, but every observer present at publish time receives it, fanned
//! out and tracked the same way a [`crate::store::Store`] tracks its source.

use crate::realm::{Observer, Realm};
use crate::resource::Resource;
use crate::store::Store;
use std::sync::{Arc, Mutex};

struct ManualSource<T> {
    observer_slot: Arc<Mutex<Option<Observer<T>>>>,
}

impl<T: Send + Sync + 'static> Realm<T> for ManualSource<T> {
    fn instantiate(&self, observer: Observer<T>) -> Resource {
        *self.observer_slot.lock().unwrap() = Some(observer);
        Resource::noop()
    }
}

/// Build a portal: a [`Store`] with no source of its own, paired with a
/// `publish` function that feeds it. Calling `publish` before any observer
/// has joined is harmless but the value reaches no one — nothing retains
/// it for later.
pub fn portal<T: Clone + Send + Sync + 'static>() -> (Store<T>, impl Fn(T) -> Resource + Clone) {
    let observer_slot: Arc<Mutex<Option<Observer<T>>>> = Arc::new(Mutex::new(None));
    let source = ManualSource {
        observer_slot: observer_slot.clone(),
    };
    let store = Store::new(source);

    let publish = move |value: T| {
        let observer = observer_slot.lock().unwrap().clone();
        match observer {
            Some(observer) => observer(value),
            None => Resource::noop(),
        }
    };

    (store, publish)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn published_values_fan_out_to_observers() {
        let (store, publish) = portal::<i32>();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let obs_resource = store.instantiate(Arc::new(move |v: i32| {
            seen_clone.lock().unwrap().push(v);
            Resource::noop()
        }));

        publish(1).release().await.unwrap();
        publish(2).release().await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);

        obs_resource.release().await.unwrap();
        store.release().await.unwrap();
    }

    #[tokio::test]
    async fn publish_before_any_observer_reaches_no_one() {
        let (_store, publish) = portal::<i32>();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        drop(calls_clone);
        // No observer joined yet: publish is a noop in terms of fan-out.
        publish(7).release().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
