use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, error};

use super::{EventKind, MonitorEvent, RedirectEvent, SslEvent, UptimeEvent};

type Subscribers<E> = Arc<Mutex<Vec<mpsc::UnboundedSender<E>>>>;

/// In-process publish/subscribe hub with one subscriber list per [`EventKind`].
///
/// Every subscriber owns an unbounded queue, so `publish` never waits and no
/// event is dropped for a slow handler. Each subscription runs its handler on
/// its own task; a handler that fails or panics is logged and keeps receiving
/// later events.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    monitor_up: Subscribers<UptimeEvent>,
    monitor_down: Subscribers<UptimeEvent>,
    redirect: Subscribers<RedirectEvent>,
    ssl_valid: Subscribers<SslEvent>,
    ssl_will_expire: Subscribers<SslEvent>,
    ssl_invalid: Subscribers<SslEvent>,
}

/// Handle to a running subscriber task
#[derive(Debug)]
pub struct Subscription {
    kind: EventKind,
    task: AbortHandle,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Stop receiving events. Dropping the handle leaves the subscriber running.
    pub fn cancel(self) {
        self.task.abort();
    }
}

fn subscribers<E>(list: &Subscribers<E>) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<E>>> {
    list.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Queue `event` for every live subscriber, forgetting cancelled ones
fn deliver<E: Clone>(list: &Subscribers<E>, event: E) -> usize {
    let mut list = subscribers(list);
    list.retain(|tx| tx.send(event.clone()).is_ok());
    list.len()
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand an event to the subscribers of its kind
    pub fn publish(&self, event: impl Into<MonitorEvent>) {
        let event = event.into();
        let kind = event.kind();
        let monitor = event.monitor().id;

        let receivers = match event {
            MonitorEvent::Uptime(event) => match kind {
                EventKind::MonitorUp => deliver(&self.monitor_up, event),
                _ => deliver(&self.monitor_down, event),
            },
            MonitorEvent::Redirect(event) => deliver(&self.redirect, event),
            MonitorEvent::Ssl(event) => match kind {
                EventKind::SslValid => deliver(&self.ssl_valid, event),
                EventKind::SslWillExpire => deliver(&self.ssl_will_expire, event),
                _ => deliver(&self.ssl_invalid, event),
            },
        };

        if receivers == 0 {
            debug!(monitor, kind = %kind, "Event published without subscribers");
        } else {
            debug!(monitor, kind = %kind, receivers, "Event published");
        }
    }

    pub fn subscribe_to_monitor_up_events<F, Fut>(&self, handler: F) -> Subscription
    where
        F: Fn(UptimeEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        spawn_subscriber(EventKind::MonitorUp, &self.monitor_up, handler)
    }

    pub fn subscribe_to_monitor_down_events<F, Fut>(&self, handler: F) -> Subscription
    where
        F: Fn(UptimeEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        spawn_subscriber(EventKind::MonitorDown, &self.monitor_down, handler)
    }

    pub fn subscribe_to_redirect_events<F, Fut>(&self, handler: F) -> Subscription
    where
        F: Fn(RedirectEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        spawn_subscriber(EventKind::Redirect, &self.redirect, handler)
    }

    pub fn subscribe_to_ssl_valid_events<F, Fut>(&self, handler: F) -> Subscription
    where
        F: Fn(SslEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        spawn_subscriber(EventKind::SslValid, &self.ssl_valid, handler)
    }

    pub fn subscribe_to_ssl_will_expire_events<F, Fut>(&self, handler: F) -> Subscription
    where
        F: Fn(SslEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        spawn_subscriber(EventKind::SslWillExpire, &self.ssl_will_expire, handler)
    }

    pub fn subscribe_to_ssl_invalid_events<F, Fut>(&self, handler: F) -> Subscription
    where
        F: Fn(SslEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        spawn_subscriber(EventKind::SslInvalid, &self.ssl_invalid, handler)
    }
}

fn spawn_subscriber<E, F, Fut>(kind: EventKind, list: &Subscribers<E>, handler: F) -> Subscription
where
    E: Send + 'static,
    F: Fn(E) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel();
    subscribers(list).push(tx);

    let task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            // The handler call sits inside the future so a panic while
            // building it is caught as well
            let run = AssertUnwindSafe(async { handler(event).await }).catch_unwind();
            match run.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(kind = %kind, error = %e, "Event handler failed"),
                Err(_) => error!(kind = %kind, "Event handler panicked"),
            }
        }
    });

    Subscription { kind, task: task.abort_handle() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{SslOutcome, UptimeOutcome};
    use crate::testutils::test_monitor;
    use anyhow::bail;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn up_event(latency_ms: u64) -> UptimeEvent {
        UptimeEvent::new(Arc::new(test_monitor()), None, UptimeOutcome::Up { status: 200, latency_ms })
    }

    #[tokio::test]
    async fn test_failing_handler_keeps_receiving() {
        let bus = EventBus::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let _subscription = bus.subscribe_to_monitor_up_events(move |event| {
            let tx = tx.clone();
            let call = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if call == 0 {
                    bail!("handler failure on the first event");
                }
                let _ = tx.send(event.http_status());
                Ok(())
            }
        });

        bus.publish(up_event(1));
        bus.publish(up_event(2));

        let received = timeout(Duration::from_secs(2), rx.recv()).await.expect("timed out");
        assert_eq!(received, Some(Some(200)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_panicking_handler_keeps_receiving() {
        let bus = EventBus::default();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let _subscription = bus.subscribe_to_monitor_up_events(move |event| {
            let tx = tx.clone();
            async move {
                if let UptimeOutcome::Up { latency_ms: 1, .. } = event.outcome {
                    panic!("handler panic");
                }
                let _ = tx.send(event.outcome.clone());
                Ok(())
            }
        });

        bus.publish(up_event(1));
        bus.publish(up_event(2));

        let received = timeout(Duration::from_secs(2), rx.recv()).await.expect("timed out");
        assert!(matches!(received, Some(UptimeOutcome::Up { latency_ms: 2, .. })));
    }

    #[tokio::test]
    async fn test_events_only_reach_their_kind() {
        let bus = EventBus::default();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let _subscription = bus.subscribe_to_ssl_invalid_events(move |event| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(event.error().map(str::to_owned));
                Ok(())
            }
        });

        bus.publish(up_event(1));
        bus.publish(SslEvent::new(
            Arc::new(test_monitor()),
            None,
            SslOutcome::Invalid { error: "handshake failed".into() },
        ));

        let received = timeout(Duration::from_secs(2), rx.recv()).await.expect("timed out");
        assert_eq!(received, Some(Some("handshake failed".to_string())));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_does_not_fail() {
        let bus = EventBus::new();
        bus.publish(up_event(1));
        bus.publish(RedirectEvent::new(
            Arc::new(test_monitor()),
            url::Url::parse("https://example.com/next").expect("valid url"),
        ));
    }

    #[tokio::test]
    async fn test_slow_handler_receives_every_event() {
        let bus = EventBus::default();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let _subscription = bus.subscribe_to_monitor_up_events(move |event| {
            let tx = tx.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                let _ = tx.send(event.outcome);
                Ok(())
            }
        });

        for latency_ms in 0..20 {
            bus.publish(up_event(latency_ms));
        }

        let mut seen = Vec::new();
        while seen.len() < 20 {
            match timeout(Duration::from_secs(5), rx.recv()).await.expect("timed out") {
                Some(UptimeOutcome::Up { latency_ms, .. }) => seen.push(latency_ms),
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_cancelled_subscription_stops_receiving() {
        let bus = EventBus::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let subscription = bus.subscribe_to_monitor_up_events(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        });
        assert_eq!(subscription.kind(), EventKind::MonitorUp);
        subscription.cancel();
        tokio::task::yield_now().await;

        bus.publish(up_event(1));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
