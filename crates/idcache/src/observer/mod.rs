//! Event fan-out to observers
//!
//! Every observer gets its own bounded queue and worker thread. Publishing
//! never blocks: when an observer's queue is full the event is dropped for
//! that observer and counted.

mod audit;
mod logging;
mod metrics;
mod performance;

pub use audit::{AuditEntry, AuditObserver, DEFAULT_AUDIT_CAPACITY};
pub use logging::LoggingObserver;
pub use metrics::{AlertKind, AlertThresholds, CacheAlert, MetricsObserver, MetricsSummary};
pub use performance::{PerformanceMonitor, Recommendation, Severity};

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::event::CacheEvent;

/// Receives cache events on its own worker thread
pub trait CacheObserver: Send + Sync + 'static {
    /// Handle one event
    fn on_event(&self, event: &CacheEvent);

    /// Name used for the worker thread and in logs
    fn name(&self) -> &str {
        "observer"
    }
}

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Events queued but not yet handled, across all observers
#[derive(Default)]
struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Pending {
    fn add(&self) {
        *self.count.lock() += 1;
    }

    fn done(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut count = self.count.lock();
        while *count > 0 {
            match deadline {
                Some(deadline) => {
                    if self.idle.wait_until(&mut count, deadline).timed_out() {
                        return *count == 0;
                    }
                }
                None => self.idle.wait(&mut count),
            }
        }
        true
    }
}

struct Subscriber {
    id: ObserverId,
    name: String,
    sender: Sender<Arc<CacheEvent>>,
    handle: JoinHandle<()>,
    dropped: AtomicU64,
}

/// Bounded, per-observer event dispatcher
pub struct ObserverBus {
    subscribers: Mutex<Vec<Subscriber>>,
    capacity: usize,
    next_id: AtomicU64,
    pending: Arc<Pending>,
    dropped: AtomicU64,
}

impl ObserverBus {
    /// Create a bus whose observers each get a queue of `capacity` events
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
            pending: Arc::new(Pending::default()),
            dropped: AtomicU64::new(0),
        }
    }

    /// Attach an observer and start its worker thread
    pub fn subscribe(&self, observer: Arc<dyn CacheObserver>) -> Result<ObserverId> {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let name = observer.name().to_string();
        let (sender, receiver) = bounded::<Arc<CacheEvent>>(self.capacity);
        let pending = Arc::clone(&self.pending);

        let handle = thread::Builder::new()
            .name(format!("idcache-{}", name))
            .spawn(move || {
                let mut panicked = false;
                for event in receiver {
                    let handled =
                        panic::catch_unwind(AssertUnwindSafe(|| observer.on_event(&event)));
                    if handled.is_err() && !panicked {
                        panicked = true;
                        warn!(
                            observer = %observer.name(),
                            kind = ?event.kind,
                            "observer panicked handling event"
                        );
                    }
                    pending.done();
                }
            })
            .map_err(|source| Error::Spawn {
                name: "observer",
                source,
            })?;

        debug!(observer = %name, "observer subscribed");
        self.subscribers.lock().push(Subscriber {
            id,
            name,
            sender,
            handle,
            dropped: AtomicU64::new(0),
        });
        Ok(id)
    }

    /// Detach an observer. Events already queued for it are still handled.
    ///
    /// Returns false if `id` is unknown.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let removed = {
            let mut subscribers = self.subscribers.lock();
            subscribers
                .iter()
                .position(|s| s.id == id)
                .map(|pos| subscribers.remove(pos))
        };
        match removed {
            Some(subscriber) => {
                debug!(observer = %subscriber.name, "observer unsubscribed");
                Self::finish(subscriber);
                true
            }
            None => false,
        }
    }

    /// Queue `event` for every observer without blocking
    pub fn publish(&self, event: CacheEvent) {
        let subscribers = self.subscribers.lock();
        if subscribers.is_empty() {
            return;
        }
        let event = Arc::new(event);
        for subscriber in subscribers.iter() {
            self.pending.add();
            match subscriber.sender.try_send(Arc::clone(&event)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                    self.pending.done();
                    subscriber.dropped.fetch_add(1, Ordering::Relaxed);
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Block until every queued event has been handled, or `timeout` passes.
    ///
    /// Returns whether the bus went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.pending.wait_idle(timeout)
    }

    /// Events dropped because an observer's queue was full
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Events dropped for one observer
    pub fn dropped_for(&self, id: ObserverId) -> Option<u64> {
        self.subscribers
            .lock()
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.dropped.load(Ordering::Relaxed))
    }

    /// Number of attached observers
    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Whether no observer is attached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn finish(subscriber: Subscriber) {
        let Subscriber {
            name,
            sender,
            handle,
            ..
        } = subscriber;
        drop(sender);
        if handle.join().is_err() {
            warn!(observer = %name, "observer worker panicked");
        }
    }
}

impl Drop for ObserverBus {
    fn drop(&mut self) {
        let subscribers = std::mem::take(self.subscribers.get_mut());
        for subscriber in subscribers {
            Self::finish(subscriber);
        }
    }
}
