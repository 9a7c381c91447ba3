//! [`BasicRealm`]: a [`Realm`] built from a raw subscribe function, plus the
//! bookkeeping that makes sure a released observation releases every value
//! it ever published — even if the subscribe function itself doesn't bother
//! to track that.

use crate::error::ReactiveError;
use crate::realm::{Observer, Realm};
use crate::resource::Resource;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

type Subscribe<T> = Arc<dyn Fn(Observer<T>) -> Resource + Send + Sync>;

struct LiveEntry {
    resource: Resource,
    releasing: AtomicBool,
}

/// A [`Realm`] constructed from a subscribe closure `(observer) -> Resource`.
///
/// `BasicRealm` is the escape hatch the rest of the crate's combinators
/// (`map`, `filter`, `merge`, `flat_map`) are built on: every value the
/// subscribe closure hands to its observer is recorded, so that releasing
/// the observation's `Resource` releases every still-live value even if the
/// subscribe closure's own `Resource` doesn't already account for it.
pub struct BasicRealm<T> {
    subscribe: Subscribe<T>,
}

impl<T: Send + Sync + 'static> BasicRealm<T> {
    /// Build a `BasicRealm` from a subscribe function.
    pub fn new<F>(subscribe: F) -> BasicRealm<T>
    where
        F: Fn(Observer<T>) -> Resource + Send + Sync + 'static,
    {
        BasicRealm {
            subscribe: Arc::new(subscribe),
        }
    }
}

impl<T: Send + Sync + 'static> Realm<T> for BasicRealm<T> {
    fn instantiate(&self, observer: Observer<T>) -> Resource {
        let live: Arc<Mutex<HashMap<u64, LiveEntry>>> = Arc::new(Mutex::new(HashMap::new()));
        let next_id = Arc::new(AtomicU64::new(0));

        let live_for_tracking = live.clone();
        let next_for_tracking = next_id.clone();
        let tracking_observer: Observer<T> = Arc::new(move |value: T| {
            let child = observer(value);
            let id = next_for_tracking.fetch_add(1, Ordering::SeqCst);
            live_for_tracking.lock().unwrap().insert(
                id,
                LiveEntry {
                    resource: child.clone(),
                    releasing: AtomicBool::new(false),
                },
            );
            child
        });

        let subscription = (self.subscribe)(tracking_observer);

        Resource::new(move || async move {
            subscription.release().await?;

            let to_release: Vec<Resource> = {
                let map = live.lock().unwrap();
                map.values()
                    .filter(|entry| entry.releasing.compare_exchange(
                        false,
                        true,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    ).is_ok())
                    .map(|entry| entry.resource.clone())
                    .collect()
            };

            let errors: Vec<ReactiveError> = futures::future::join_all(
                to_release.iter().map(|r| r.release()),
            )
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();

            live.lock().unwrap().clear();

            if errors.is_empty() {
                Ok(())
            } else {
                Err(crate::error::ReleaseError::from_many(errors).into())
            }
        })
    }
}
