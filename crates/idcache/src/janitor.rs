//! Background sweeper for expired entries
//!
//! The janitor wakes on a ticker, removes every expired entry and also
//! drains keys that readers found expired and handed over instead of
//! deleting them inline. Ticks that arrive while a sweep is running are
//! coalesced by the ticker channel.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::cache::Shared;
use crate::error::{Error, Result};
use crate::key::CacheKey;

/// Depth of the expired-key handoff channel
pub(crate) const EXPIRED_QUEUE_CAPACITY: usize = 256;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Source of entries loaded into the cache when it starts
pub trait WarmupSource<V>: Send + Sync {
    /// Entries to insert, each stored under its type's configured TTL
    fn load(&self) -> Result<Vec<(CacheKey, V)>>;
}

impl<V, F> WarmupSource<V> for F
where
    F: Fn() -> Result<Vec<(CacheKey, V)>> + Send + Sync,
{
    fn load(&self) -> Result<Vec<(CacheKey, V)>> {
        self()
    }
}

/// Running janitor thread
pub(crate) struct Janitor {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl Janitor {
    /// Spawn the sweeper. Returns the janitor and the sender readers use to
    /// hand over expired keys.
    pub(crate) fn spawn<V>(shared: Arc<Shared<V>>, interval: Duration) -> Result<(Self, Sender<CacheKey>)>
    where
        V: Send + Sync + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (expired_tx, expired_rx) = bounded::<CacheKey>(EXPIRED_QUEUE_CAPACITY);

        let handle = thread::Builder::new()
            .name("idcache-janitor".to_string())
            .spawn(move || run(shared, interval, stop_rx, expired_rx))
            .map_err(|source| Error::Spawn {
                name: "janitor",
                source,
            })?;

        info!(interval_secs = interval.as_secs_f64(), "cache janitor started");
        Ok((
            Self {
                stop: stop_tx,
                handle,
            },
            expired_tx,
        ))
    }

    /// Signal the thread and wait for it to exit
    pub(crate) fn shutdown(self) {
        let _ = self.stop.send(());
        if self.handle.join().is_err() {
            warn!("cache janitor panicked");
        }
        info!("cache janitor stopped");
    }
}

fn run<V>(shared: Arc<Shared<V>>, interval: Duration, stop: Receiver<()>, expired: Receiver<CacheKey>)
where
    V: Send + Sync + 'static,
{
    let ticker = tick(interval.max(MIN_INTERVAL));
    loop {
        select! {
            recv(stop) -> _ => break,
            recv(ticker) -> _ => {
                let removed = shared.sweep_expired();
                if removed > 0 {
                    debug!(removed, "janitor sweep");
                }
            }
            recv(expired) -> msg => match msg {
                Ok(key) => {
                    shared.remove_expired(&key);
                }
                Err(_) => break,
            },
        }
    }
}
