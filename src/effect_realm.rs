//! [`EffectRealm`]: a realm that runs a maker at most once per observation,
//! synchronously or asynchronously, with cancellation.

use crate::error::ReactiveError;
use crate::realm::{Observer, Realm};
use crate::resource::Resource;
use futures::future::BoxFuture;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::warn;

/// Lets an effect maker register a [`Resource`] it allocated while computing
/// its value, so that resource is released alongside the published value.
pub type AddResource = Arc<dyn Fn(Resource) + Send + Sync>;

/// Signals to an in-flight asynchronous maker that its observation has been
/// released. Makers that honor this should complete or abandon quickly;
/// there is no hard timeout, the driver waits for the maker either way.
pub type AbortSignal = watch::Receiver<bool>;

/// What policy to apply when an asynchronous maker's future resolves to an
/// error. The default, matching the behavior documented for this family of
/// runtimes, is to log and swallow so one failed effect can't poison release
/// of the rest of the graph; tests that want to assert on the failure can
/// opt into propagation instead.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum FailurePolicy {
    #[default]
    LogAndSwallow,
    Propagate,
}

/// The result of running an [`EffectRealm`]'s maker.
pub enum EffectOutcome<T> {
    /// The value is available immediately.
    Ready(T),
    /// The value will arrive later.
    Pending(BoxFuture<'static, Result<T, ReactiveError>>),
}

enum PendingState {
    Running,
    Resolved(Resource),
    Failed(ReactiveError),
    Released,
}

/// A realm whose single value comes from running `maker` once per
/// observation.
pub struct EffectRealm<T, F> {
    maker: F,
    failure_policy: FailurePolicy,
    _marker: PhantomData<T>,
}

impl<T, F> EffectRealm<T, F>
where
    F: Fn(AddResource, AbortSignal) -> EffectOutcome<T> + Send + Sync,
{
    /// Build an `EffectRealm` that logs and swallows async maker failures.
    pub fn new(maker: F) -> EffectRealm<T, F> {
        EffectRealm {
            maker,
            failure_policy: FailurePolicy::LogAndSwallow,
            _marker: PhantomData,
        }
    }

    /// Build an `EffectRealm` with an explicit failure policy.
    pub fn with_failure_policy(maker: F, failure_policy: FailurePolicy) -> EffectRealm<T, F> {
        EffectRealm {
            maker,
            failure_policy,
            _marker: PhantomData,
        }
    }
}

impl<T, F> Realm<T> for EffectRealm<T, F>
where
    T: Send + Sync + 'static,
    F: Fn(AddResource, AbortSignal) -> EffectOutcome<T> + Send + Sync,
{
    fn instantiate(&self, observer: Observer<T>) -> Resource {
        let (abort_tx, abort_rx) = watch::channel(false);
        let computation: Arc<Mutex<Vec<Resource>>> = Arc::new(Mutex::new(Vec::new()));
        let computation_for_add = computation.clone();
        let add_resource: AddResource =
            Arc::new(move |r| computation_for_add.lock().unwrap().push(r));

        match (self.maker)(add_resource, abort_rx) {
            EffectOutcome::Ready(value) => {
                let observation = observer(value);
                let computation_resource =
                    Resource::parallel(std::mem::take(&mut *computation.lock().unwrap()));
                Resource::sequential([observation, computation_resource])
            }
            EffectOutcome::Pending(fut) => {
                let state = Arc::new(Mutex::new(PendingState::Running));
                let state_for_task = state.clone();
                let failure_policy = self.failure_policy;
                let handle = tokio::spawn(async move {
                    match fut.await {
                        Ok(value) => {
                            let mut guard = state_for_task.lock().unwrap();
                            if matches!(*guard, PendingState::Running) {
                                *guard = PendingState::Resolved(observer(value));
                            }
                        }
                        Err(e) => match failure_policy {
                            FailurePolicy::LogAndSwallow => {
                                warn!(error = %e, "effect maker failed");
                            }
                            FailurePolicy::Propagate => {
                                let mut guard = state_for_task.lock().unwrap();
                                if matches!(*guard, PendingState::Running) {
                                    *guard = PendingState::Failed(e);
                                }
                            }
                        },
                    }
                });

                Resource::new(move || async move {
                    let _ = abort_tx.send(true);
                    let _ = handle.await;

                    let resolved = {
                        let mut guard = state.lock().unwrap();
                        std::mem::replace(&mut *guard, PendingState::Released)
                    };
                    let computation_resource =
                        Resource::parallel(std::mem::take(&mut *computation.lock().unwrap()));

                    match resolved {
                        PendingState::Resolved(observation) => {
                            Resource::sequential([observation, computation_resource])
                                .release()
                                .await
                        }
                        PendingState::Failed(e) => {
                            computation_resource.release().await?;
                            Err(e)
                        }
                        _ => computation_resource.release().await,
                    }
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn synchronous_maker_publishes_immediately() {
        let received = Arc::new(Mutex::new(None));
        let received_clone = received.clone();
        let realm = EffectRealm::new(move |_add, _abort| EffectOutcome::Ready(7));
        let resource = realm.instantiate(Arc::new(move |v: i32| {
            *received_clone.lock().unwrap() = Some(v);
            Resource::noop()
        }));
        resource.release().await.unwrap();
        assert_eq!(*received.lock().unwrap(), Some(7));
    }

    #[tokio::test]
    async fn async_maker_publishes_after_completion() {
        let received = Arc::new(Mutex::new(None));
        let received_clone = received.clone();
        let realm = EffectRealm::new(move |_add, _abort| {
            EffectOutcome::Pending(Box::pin(async move {
                tokio::time::sleep(StdDuration::from_millis(5)).await;
                Ok(99)
            }))
        });
        let resource = realm.instantiate(Arc::new(move |v: i32| {
            *received_clone.lock().unwrap() = Some(v);
            Resource::noop()
        }));
        // release() awaits the maker's task to completion itself, so no
        // extra synchronization is needed here.
        resource.release().await.unwrap();
        assert_eq!(*received.lock().unwrap(), Some(99));
    }

    #[tokio::test]
    async fn failed_async_maker_is_swallowed_by_default() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let realm = EffectRealm::new(move |_add, _abort| {
            EffectOutcome::Pending(Box::pin(
                async move { Err(ReactiveError::EffectFailed("boom".into())) },
            ))
        });
        let resource = realm.instantiate(Arc::new(move |_v: i32| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Resource::noop()
        }));
        resource.release().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_async_maker_propagates_when_opted_in() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let realm = EffectRealm::with_failure_policy(
            move |_add, _abort| {
                EffectOutcome::Pending(Box::pin(
                    async move { Err(ReactiveError::EffectFailed("boom".into())) },
                ))
            },
            FailurePolicy::Propagate,
        );
        let resource = realm.instantiate(Arc::new(move |_v: i32| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Resource::noop()
        }));

        let err = resource.release().await.unwrap_err();
        assert!(matches!(err, ReactiveError::EffectFailed(_)));
        // The maker never resolved to a value, so the observer was never
        // called.
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
