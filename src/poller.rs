//! Background polling loop for pending triggered events.
//!
//! Remote runners have no push intake, so pending `.triggered` events are
//! pulled from the control plane on a fixed interval and dispatched. The
//! control plane keeps returning an event until its `.started` reply is
//! processed, so dispatched ids are remembered in a bounded cache to keep
//! slow handlers from being re-invoked every cycle.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dispatch::Dispatcher;
use crate::event::EVENT_TYPE_PREFIX;

/// Capacity of the seen-event cache.
pub const SEEN_CACHE_CAPACITY: usize = 4096;

/// Bounded set of event ids that were already handed to dispatch.
///
/// Eviction is strictly insertion-ordered: once full, the oldest id leaves
/// and is no longer suppressed. Re-inserting a present id does not refresh
/// its position.
pub struct SeenCache {
    inner: Mutex<SeenInner>,
}

struct SeenInner {
    ids: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl SeenCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(SeenInner {
                ids: HashSet::new(),
                order: VecDeque::new(),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Record an id. Returns `false` when it was already present.
    pub fn insert(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if !inner.ids.insert(id.to_string()) {
            return false;
        }
        inner.order.push_back(id.to_string());
        while inner.order.len() > inner.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.ids.remove(&oldest);
            }
        }
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().unwrap().ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().ids.is_empty()
    }
}

/// Spawn the background task that polls for pending triggered events and
/// dispatches the unseen ones.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop
/// polling; in-flight handler invocations are not awaited, only reported.
pub fn spawn_event_poller(
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        let task_types = dispatcher.registry().triggered_identities();
        if task_types.is_empty() {
            warn!("Event poller started with no triggered identities registered");
        }
        info!(
            "Event poller started, polling {} event type(s) every {}s",
            task_types.len(),
            interval.as_secs()
        );

        let seen = SeenCache::new(SEEN_CACHE_CAPACITY);
        let mut dispatches: Vec<JoinHandle<()>> = Vec::new();
        let mut tick = tokio::time::interval(interval);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                dispatches.retain(|handle| !handle.is_finished());
                if dispatches.is_empty() {
                    info!("Event poller shutting down");
                } else {
                    warn!(
                        in_flight = dispatches.len(),
                        "Event poller shutting down with dispatches still running"
                    );
                }
                return;
            }

            poll_cycle(&dispatcher, &task_types, &seen, &shutdown, &mut dispatches).await;
            dispatches.retain(|handle| !handle.is_finished());
        }
    });

    (handle, shutdown_flag)
}

/// Run a single poll cycle: fetch pending events per task type, in
/// registration order, and dispatch each unseen one on its own task.
async fn poll_cycle(
    dispatcher: &Arc<Dispatcher>,
    task_types: &[String],
    seen: &SeenCache,
    shutdown: &AtomicBool,
    dispatches: &mut Vec<JoinHandle<()>>,
) {
    for identity in task_types {
        if shutdown.load(Ordering::Relaxed) {
            return;
        }

        let event_type = format!("{EVENT_TYPE_PREFIX}{identity}");
        let page = match dispatcher.connection().triggered_events(&event_type).await {
            Ok(page) => page,
            Err(e) => {
                warn!(event_type = %event_type, error = %e, "Polling triggered events failed");
                continue;
            }
        };

        if page.events.is_empty() {
            continue;
        }
        debug!(
            event_type = %event_type,
            count = page.events.len(),
            total = page.total_count,
            "Fetched pending triggered events"
        );

        for event in page.events {
            if let Err(e) = event.task_data() {
                warn!(id = %event.id, error = %e, "Dropping triggered event with invalid payload");
                continue;
            }
            if !seen.insert(&event.id) {
                debug!(id = %event.id, "Skipping already-dispatched event");
                continue;
            }

            let dispatcher = Arc::clone(dispatcher);
            dispatches.push(tokio::spawn(async move {
                if let Err(e) = dispatcher.dispatch(&event).await {
                    error!(id = %event.id, error = %e, "Polled event handler failed");
                }
            }));
        }
    }
}
