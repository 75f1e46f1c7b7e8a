//! Event bus and subscriber traits.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use unitscope_core::RequestContext;

/// Subscriber that runs inline, inside the publisher's transaction scope.
///
/// Sees the publisher's uncommitted writes and shares its eventual commit or
/// rollback. An error aborts the publish and propagates to the publisher.
///
/// Used as `Arc<dyn SyncSubscriber<E>>`.
#[async_trait]
pub trait SyncSubscriber<E>: Send + Sync
where
    E: Send + Sync + 'static,
{
    /// Name used in log fields.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn on_event(&self, ctx: &RequestContext, event: &E) -> anyhow::Result<()>;
}

/// Subscriber that runs after `publish` returns, on its own task.
///
/// Receives a detached context (same identity, no token) and an owned copy
/// of the event. Whatever it writes persists under its own scope. Errors are
/// logged, never returned to the publisher.
///
/// Used as `Arc<dyn DeferredSubscriber<E>>`.
#[async_trait]
pub trait DeferredSubscriber<E>: Send + Sync
where
    E: Send + Sync + 'static,
{
    /// Name used in log fields.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn on_event(&self, ctx: RequestContext, event: E) -> anyhow::Result<()>;
}

/// Publish/subscribe fan-out for one event type.
pub struct EventBus<E>
where
    E: Send + Sync + 'static,
{
    sync: RwLock<Vec<Arc<dyn SyncSubscriber<E>>>>,
    deferred: RwLock<Vec<Arc<dyn DeferredSubscriber<E>>>>,
}

impl<E> Default for EventBus<E>
where
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self {
            sync: RwLock::new(Vec::new()),
            deferred: RwLock::new(Vec::new()),
        }
    }
}

impl<E> EventBus<E>
where
    E: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe_sync(&self, subscriber: Arc<dyn SyncSubscriber<E>>) {
        self.sync.write().push(subscriber);
    }

    pub fn subscribe_deferred(&self, subscriber: Arc<dyn DeferredSubscriber<E>>) {
        self.deferred.write().push(subscriber);
    }

    /// Number of registered subscribers as `(sync, deferred)`.
    #[must_use]
    pub fn subscriber_counts(&self) -> (usize, usize) {
        (self.sync.read().len(), self.deferred.read().len())
    }

    /// Delivers `event` to every subscriber.
    ///
    /// Sync subscribers are awaited in registration order with `ctx` itself.
    /// Deferred subscribers are then spawned with `ctx.detached()`; they are
    /// not started if a sync subscriber failed.
    ///
    /// # Errors
    ///
    /// Returns the first sync subscriber error.
    pub async fn publish(&self, ctx: &RequestContext, event: E) -> anyhow::Result<DeferredDispatch> {
        let sync: Vec<_> = self.sync.read().clone();
        for subscriber in &sync {
            debug!(subscriber = subscriber.name(), "delivering event inline");
            subscriber.on_event(ctx, &event).await?;
        }

        let deferred: Vec<_> = self.deferred.read().clone();
        let tasks = deferred
            .into_iter()
            .map(|subscriber| {
                let ctx = ctx.detached();
                let event = event.clone();
                tokio::spawn(async move {
                    if let Err(e) = subscriber.on_event(ctx, event).await {
                        warn!(
                            subscriber = subscriber.name(),
                            error = %e,
                            "deferred subscriber failed"
                        );
                    }
                })
            })
            .collect();

        Ok(DeferredDispatch { tasks })
    }
}

/// Deliveries to deferred subscribers started by one `publish`.
///
/// Dropping it leaves the deliveries running.
#[derive(Debug)]
pub struct DeferredDispatch {
    tasks: Vec<JoinHandle<()>>,
}

impl DeferredDispatch {
    /// Number of deferred deliveries started.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Waits for every deferred delivery to finish.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "deferred subscriber task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::anyhow;
    use unitscope_core::Identity;

    use super::*;

    #[derive(Debug, Clone)]
    struct UserCreated {
        id: i64,
    }

    #[derive(Default)]
    struct Counting {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl SyncSubscriber<UserCreated> for Counting {
        async fn on_event(&self, _ctx: &RequestContext, event: &UserCreated) -> anyhow::Result<()> {
            assert_eq!(event.id, 7);
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl SyncSubscriber<UserCreated> for Failing {
        async fn on_event(&self, _ctx: &RequestContext, _event: &UserCreated) -> anyhow::Result<()> {
            Err(anyhow!("welcome mail rejected"))
        }
    }

    #[derive(Default)]
    struct TokenRecorder {
        had_token: parking_lot::Mutex<Option<bool>>,
    }

    #[async_trait]
    impl DeferredSubscriber<UserCreated> for TokenRecorder {
        async fn on_event(&self, ctx: RequestContext, _event: UserCreated) -> anyhow::Result<()> {
            *self.had_token.lock() = Some(ctx.token().is_some());
            Ok(())
        }
    }

    struct DeferredFailing;

    #[async_trait]
    impl DeferredSubscriber<UserCreated> for DeferredFailing {
        async fn on_event(&self, _ctx: RequestContext, _event: UserCreated) -> anyhow::Result<()> {
            Err(anyhow!("index unavailable"))
        }
    }

    #[tokio::test]
    async fn sync_subscribers_run_before_publish_returns() {
        let bus: EventBus<UserCreated> = EventBus::new();
        let counting = Arc::new(Counting::default());
        bus.subscribe_sync(counting.clone());
        bus.subscribe_sync(counting.clone());

        let ctx = RequestContext::new(Identity::default());
        let dispatch = bus.publish(&ctx, UserCreated { id: 7 }).await.unwrap();

        assert_eq!(counting.seen.load(Ordering::SeqCst), 2);
        assert!(dispatch.is_empty());
    }

    #[tokio::test]
    async fn sync_error_stops_delivery() {
        let bus: EventBus<UserCreated> = EventBus::new();
        let counting = Arc::new(Counting::default());
        let recorder = Arc::new(TokenRecorder::default());
        bus.subscribe_sync(Arc::new(Failing));
        bus.subscribe_sync(counting.clone());
        bus.subscribe_deferred(recorder.clone());

        let ctx = RequestContext::new(Identity::default());
        let err = bus.publish(&ctx, UserCreated { id: 7 }).await.unwrap_err();

        assert_eq!(err.to_string(), "welcome mail rejected");
        assert_eq!(counting.seen.load(Ordering::SeqCst), 0);
        assert!(recorder.had_token.lock().is_none());
    }

    #[tokio::test]
    async fn deferred_subscribers_get_a_detached_context() {
        let bus: EventBus<UserCreated> = EventBus::new();
        let recorder = Arc::new(TokenRecorder::default());
        bus.subscribe_deferred(recorder.clone());
        bus.subscribe_deferred(Arc::new(DeferredFailing));
        assert_eq!(bus.subscriber_counts(), (0, 2));

        let ctx = RequestContext::new(Identity::default());
        ctx.ensure_token();
        let dispatch = bus.publish(&ctx, UserCreated { id: 7 }).await.unwrap();
        assert_eq!(dispatch.len(), 2);
        dispatch.join().await;

        assert_eq!(*recorder.had_token.lock(), Some(false));
    }

    #[test]
    fn subscribers_are_object_safe() {
        fn _sync(_: &Arc<dyn SyncSubscriber<UserCreated>>) {}
        fn _deferred(_: &Arc<dyn DeferredSubscriber<UserCreated>>) {}
    }
}
