//! [`Resource`]: a scoped, idempotent, composable release handle.
//!
//! Every value a [`crate::Realm`] publishes is owned by the observation that
//! received it (see the crate root docs). `Resource` is the handle that
//! makes that ownership concrete: releasing it tears down whatever the
//! observer built in response to the value, and never does so twice.

use crate::error::{ReactiveError, ReleaseError};
use futures::future::{join_all, BoxFuture};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::warn;

type ReleaseFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), ReactiveError>> + Send>;

struct Inner {
    release: Mutex<Option<ReleaseFn>>,
    result: OnceCell<Result<(), ReactiveError>>,
}

/// A scoped release handle. Cloning a `Resource` shares the same underlying
/// release action — calling `release` on any clone runs it exactly once, and
/// every clone observes the same outcome.
#[derive(Clone)]
pub struct Resource {
    inner: Arc<Inner>,
}

impl Resource {
    /// Build a `Resource` from a release action. The action runs at most
    /// once, no matter how many times or from how many clones `release` is
    /// called.
    pub fn new<F, Fut>(release: F) -> Resource
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(), ReactiveError>> + Send + 'static,
    {
        let boxed: ReleaseFn = Box::new(move || Box::pin(release()));
        Resource {
            inner: Arc::new(Inner {
                release: Mutex::new(Some(boxed)),
                result: OnceCell::new(),
            }),
        }
    }

    /// A `Resource` whose release is a no-op.
    pub fn noop() -> Resource {
        Resource::new(|| async { Ok(()) })
    }

    /// Release this resource. Idempotent: the second and later calls return
    /// the same result as the first without re-running the release action.
    pub async fn release(&self) -> Result<(), ReactiveError> {
        let inner = self.inner.clone();
        self.inner
            .result
            .get_or_init(|| async move {
                let action = inner.release.lock().await.take();
                match action {
                    Some(action) => action().await,
                    None => Ok(()),
                }
            })
            .await
            .clone()
    }

    /// Release every item in order, awaiting each before starting the next.
    /// Stops and surfaces the first error; siblings after the failing one
    /// are left un-released by this call (a consumer who wants them torn
    /// down anyway should release them directly).
    pub fn sequential(items: impl IntoIterator<Item = Resource>) -> Resource {
        let items: Vec<_> = items.into_iter().collect();
        Resource::new(move || async move {
            for item in items {
                item.release().await?;
            }
            Ok(())
        })
    }

    /// Release every item concurrently and wait for all of them to settle.
    /// Every failure is collected; if more than one occurred they are
    /// surfaced together as [`ReleaseError::Aggregate`].
    pub fn parallel(items: impl IntoIterator<Item = Resource>) -> Resource {
        let items: Vec<_> = items.into_iter().collect();
        Resource::new(move || async move {
            let results = join_all(items.iter().map(|r| r.release())).await;
            let errors: Vec<ReactiveError> =
                results.into_iter().filter_map(Result::err).collect();
            if errors.is_empty() {
                Ok(())
            } else {
                if errors.len() > 1 {
                    warn!(count = errors.len(), "multiple resources failed to release");
                }
                Err(ReleaseError::from_many(errors).into())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn release_is_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let resource = Resource::new(move || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        resource.release().await.unwrap();
        resource.release().await.unwrap();
        resource.release().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn noop_releases_cleanly() {
        Resource::noop().release().await.unwrap();
    }

    #[tokio::test]
    async fn sequential_runs_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut items = Vec::new();
        for i in 0..3 {
            let order = order.clone();
            items.push(Resource::new(move || async move {
                order.lock().await.push(i);
                Ok(())
            }));
        }
        Resource::sequential(items).release().await.unwrap();
        assert_eq!(*order.lock().await, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn parallel_collects_all_errors() {
        let failing = Resource::new(|| async { Err(ReactiveError::EffectFailed("a".into())) });
        let also_failing = Resource::new(|| async { Err(ReactiveError::EffectFailed("b".into())) });
        let err = Resource::parallel([failing, also_failing])
            .release()
            .await
            .unwrap_err();
        match err {
            ReactiveError::Release(ReleaseError::Aggregate(errs)) => assert_eq!(errs.len(), 2),
            other => panic!("expected aggregate, got {other:?}"),
        }
    }
}
