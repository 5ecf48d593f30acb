//! Event fan-out hub.
//!
//! One background task owns the upstream runtime feed. It moves through
//! `Disconnected -> Connecting -> Streaming` and falls back to
//! `Disconnected` on any read failure, then waits out a backoff delay and
//! connects again. It never gives up while the process lives.
//!
//! Surviving events are offered to every registered subscriber's bounded
//! queue. Offers never wait: a full queue evicts its oldest event. Subscribers
//! stay registered across upstream outages and only see a gap.

mod backoff;
mod queue;
mod source;

pub use backoff::BackoffPolicy;
pub use source::{EventSource, EventStream, UpstreamError};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use dockward_events::{EventEnvelope, IgnoreSet};
use dockward_id::SubscriberId;
use futures_core::Stream;
use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, instrument, trace, warn};

use queue::{Push, SubscriberQueue};

/// Hub settings, fixed at startup.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Actions never forwarded to subscribers.
    pub ignored: IgnoreSet,

    /// Events buffered per subscriber before the oldest is evicted.
    pub queue_capacity: usize,

    /// Delay schedule between reconnect attempts.
    pub backoff: BackoffPolicy,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            ignored: IgnoreSet::with_defaults(),
            queue_capacity: 256,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Connection state of the upstream feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HubState {
    Disconnected,
    Connecting,
    Streaming,
}

/// Point-in-time hub counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub state: HubState,
    pub subscribers: usize,
    pub reconnect_attempts: u64,
    /// One per subscriber an event was queued for.
    pub events_delivered: u64,
    pub events_ignored: u64,
}

struct HubShared {
    subscribers: Mutex<HashMap<SubscriberId, Arc<SubscriberQueue>>>,
    queue_capacity: usize,
    state: watch::Sender<HubState>,
    stopped: AtomicBool,
    reconnect_attempts: AtomicU64,
    events_delivered: AtomicU64,
    events_ignored: AtomicU64,
}

impl HubShared {
    fn registry(&self) -> MutexGuard<'_, HashMap<SubscriberId, Arc<SubscriberQueue>>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remove(&self, id: &SubscriberId) -> bool {
        match self.registry().remove(id) {
            Some(queue) => {
                queue.close();
                debug!(subscriber_id = %id, "Subscriber removed");
                true
            }
            None => false,
        }
    }
}

/// Cloneable handle for registering subscribers and reading hub status.
#[derive(Clone)]
pub struct HubHandle {
    shared: Arc<HubShared>,
}

impl HubHandle {
    /// Register a new subscriber. Events arriving after this call are
    /// delivered to it until it is dropped or unsubscribed.
    pub fn subscribe(&self) -> Subscription {
        let id = SubscriberId::new();
        let queue = Arc::new(SubscriberQueue::new(self.shared.queue_capacity));

        {
            let mut registry = self.shared.registry();
            // Checked under the registry lock so shutdown cannot miss this queue.
            if self.shared.stopped.load(Ordering::Acquire) {
                queue.close();
            } else {
                registry.insert(id.clone(), queue.clone());
            }
        }
        debug!(subscriber_id = %id, "Subscriber registered");

        Subscription {
            id,
            queue,
            shared: self.shared.clone(),
        }
    }

    /// Remove a subscriber immediately. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: &SubscriberId) -> bool {
        self.shared.remove(id)
    }

    pub fn state(&self) -> HubState {
        *self.shared.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<HubState> {
        self.shared.state.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.registry().len()
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            state: self.state(),
            subscribers: self.subscriber_count(),
            reconnect_attempts: self.shared.reconnect_attempts.load(Ordering::Relaxed),
            events_delivered: self.shared.events_delivered.load(Ordering::Relaxed),
            events_ignored: self.shared.events_ignored.load(Ordering::Relaxed),
        }
    }
}

/// A registered delivery target.
///
/// Dropping it unsubscribes.
pub struct Subscription {
    id: SubscriberId,
    queue: Arc<SubscriberQueue>,
    shared: Arc<HubShared>,
}

impl Subscription {
    pub fn id(&self) -> &SubscriberId {
        &self.id
    }

    /// Next event, or `None` once the subscription has ended.
    pub async fn next(&mut self) -> Option<Arc<EventEnvelope>> {
        self.queue.pop().await
    }

    /// Events evicted from this subscriber's queue because it fell behind.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }

    /// Events buffered and not yet taken.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    /// Consume the subscription as a stream. Dropping the stream unsubscribes.
    pub fn into_stream(self) -> impl Stream<Item = Arc<EventEnvelope>> + Send + 'static {
        futures_util::stream::unfold(self, |mut sub| async move {
            let event = sub.next().await?;
            Some((event, sub))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shared.remove(&self.id);
    }
}

/// The upstream reader. Run it once with [`EventHub::run`].
pub struct EventHub {
    source: Arc<dyn EventSource>,
    config: HubConfig,
    shared: Arc<HubShared>,
}

impl EventHub {
    pub fn new(source: Arc<dyn EventSource>, config: HubConfig) -> Self {
        let (state, _) = watch::channel(HubState::Disconnected);
        let shared = Arc::new(HubShared {
            subscribers: Mutex::new(HashMap::new()),
            queue_capacity: config.queue_capacity.max(1),
            state,
            stopped: AtomicBool::new(false),
            reconnect_attempts: AtomicU64::new(0),
            events_delivered: AtomicU64::new(0),
            events_ignored: AtomicU64::new(0),
        });

        Self {
            source,
            config,
            shared,
        }
    }

    pub fn handle(&self) -> HubHandle {
        HubHandle {
            shared: self.shared.clone(),
        }
    }

    /// Read the upstream feed until shutdown is signaled.
    ///
    /// Every failure is a state transition followed by a backoff wait; none
    /// of them ends this loop. On shutdown all subscriptions are closed.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            ignored = ?self.config.ignored.entries(),
            queue_capacity = self.shared.queue_capacity,
            "Starting event hub"
        );

        let mut attempt: u32 = 0;

        'outer: loop {
            self.set_state(HubState::Connecting);

            let opened = tokio::select! {
                opened = self.source.open() => opened,
                _ = shutdown_signaled(&mut shutdown) => break 'outer,
            };

            match opened {
                Ok(mut stream) => {
                    attempt = 0;
                    self.set_state(HubState::Streaming);
                    info!("Upstream event feed connected");

                    loop {
                        tokio::select! {
                            item = stream.next() => match item {
                                Some(Ok(event)) => self.dispatch(event),
                                Some(Err(e)) => {
                                    warn!(error = %e, "Upstream event feed failed");
                                    break;
                                }
                                None => {
                                    warn!("Upstream event feed closed");
                                    break;
                                }
                            },
                            _ = shutdown_signaled(&mut shutdown) => break 'outer,
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, attempt, "Failed to open upstream event feed");
                }
            }

            self.set_state(HubState::Disconnected);

            let delay = self.config.backoff.delay(attempt);
            attempt = attempt.saturating_add(1);
            self.shared.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
            debug!(delay_ms = delay.as_millis() as u64, attempt, "Waiting before reconnect");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_signaled(&mut shutdown) => break 'outer,
            }
        }

        self.stop();
        info!("Event hub shut down");
    }

    fn dispatch(&self, event: EventEnvelope) {
        if self.config.ignored.matches(&event.event_type) {
            self.shared.events_ignored.fetch_add(1, Ordering::Relaxed);
            trace!(action = %event.event_type, "Ignored event");
            return;
        }

        let event = Arc::new(event);
        let targets: Vec<(SubscriberId, Arc<SubscriberQueue>)> = self
            .shared
            .registry()
            .iter()
            .map(|(id, queue)| (id.clone(), queue.clone()))
            .collect();

        self.shared
            .events_delivered
            .fetch_add(targets.len() as u64, Ordering::Relaxed);
        for (id, queue) in targets {
            if queue.push(event.clone()) == Push::Evicted {
                trace!(subscriber_id = %id, "Subscriber queue full, evicted oldest event");
            }
        }
    }

    fn set_state(&self, state: HubState) {
        self.shared.state.send_replace(state);
    }

    fn stop(&self) {
        self.set_state(HubState::Disconnected);
        let mut registry = self.shared.registry();
        self.shared.stopped.store(true, Ordering::Release);
        for (_, queue) in registry.drain() {
            queue.close();
        }
    }
}

/// Resolves once shutdown is requested or the sender is gone.
async fn shutdown_signaled(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
