// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./counter_cache_test.rs"]
mod counter_cache_test;

use hashbrown::HashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

type Table<T> = Mutex<HashMap<String, CacheEntry<T>, ahash::RandomState>>;

struct CacheEntry<T> {
  value: T,
  last_seen: Instant,
}

struct Janitor {
  shutdown: oneshot::Sender<()>,
  handle: JoinHandle<()>,
}

// Record a new observation and return the delta against the previous live one. Returns None when
// there is no previous observation or it has been idle for longer than the timeout.
fn observe<T: Copy>(
  table: &Table<T>,
  timeout: Duration,
  name: &str,
  value: T,
  delta: impl FnOnce(T, T) -> T,
) -> Option<T> {
  let now = Instant::now();
  let mut table = table.lock();
  if let Some(entry) = table.get_mut(name) {
    let live = now.duration_since(entry.last_seen) <= timeout;
    let previous = entry.value;
    entry.value = value;
    entry.last_seen = now;
    return live.then(|| delta(previous, value));
  }

  table.insert(
    name.to_string(),
    CacheEntry {
      value,
      last_seen: now,
    },
  );
  None
}

fn evict<T>(table: &Table<T>, timeout: Duration, now: Instant) -> usize {
  let mut table = table.lock();
  let before = table.len();
  table.retain(|_, entry| now.duration_since(entry.last_seen) <= timeout);
  before - table.len()
}

//
// CounterCache
//

// Converts monotonically increasing counters into per interval deltas. Integer and float counters
// live in separate tables. The first observation of a counter, and any observation after a reset
// (a value lower than the previous one), yields a rate of 0. Entries idle for longer than the
// timeout are treated as unseen and are removed by the janitor task once started.
pub struct CounterCache {
  ints: Table<u64>,
  floats: Table<f64>,
  timeout: Duration,
  janitor: Mutex<Option<Janitor>>,
}

impl CounterCache {
  #[must_use]
  pub fn new(timeout: Duration) -> Arc<Self> {
    Arc::new(Self {
      ints: Mutex::default(),
      floats: Mutex::default(),
      timeout,
      janitor: Mutex::default(),
    })
  }

  #[must_use]
  pub const fn timeout(&self) -> Duration {
    self.timeout
  }

  // The integer rate, or None if the counter was not live before this observation.
  pub fn try_rate_u64(&self, name: &str, value: u64) -> Option<u64> {
    observe(&self.ints, self.timeout, name, value, |previous, current| {
      current.saturating_sub(previous)
    })
  }

  pub fn try_rate_f64(&self, name: &str, value: f64) -> Option<f64> {
    observe(&self.floats, self.timeout, name, value, |previous, current| {
      if current < previous {
        0.0
      } else {
        current - previous
      }
    })
  }

  pub fn rate_u64(&self, name: &str, value: u64) -> u64 {
    self.try_rate_u64(name, value).unwrap_or(0)
  }

  pub fn rate_f64(&self, name: &str, value: f64) -> f64 {
    self.try_rate_f64(name, value).unwrap_or(0.0)
  }

  // Remove every entry idle for longer than the timeout, returning how many were removed.
  pub fn evict_expired(&self) -> usize {
    let now = Instant::now();
    evict(&self.ints, self.timeout, now) + evict(&self.floats, self.timeout, now)
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.ints.lock().len() + self.floats.lock().len()
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  // Spawn the janitor task which sweeps expired entries every timeout period. Calling start on an
  // already started cache does nothing. The task only holds a weak reference to the cache.
  pub fn start(self: &Arc<Self>) {
    let mut janitor = self.janitor.lock();
    if janitor.is_some() {
      return;
    }
    if self.timeout.is_zero() {
      log::warn!("counter cache timeout is zero, not starting the janitor");
      return;
    }

    let (shutdown, mut shutdown_rx) = oneshot::channel();
    let cache = Arc::downgrade(self);
    let timeout = self.timeout;
    // Sweeps are anchored to start(), not to the task's first poll.
    let first = Instant::now() + timeout;
    let handle = tokio::spawn(async move {
      let mut ticker = tokio::time::interval_at(first, timeout);
      loop {
        tokio::select! {
          _ = &mut shutdown_rx => {
            log::debug!("counter cache janitor shutting down");
            return;
          },
          _ = ticker.tick() => {},
        }

        let Some(cache) = cache.upgrade() else {
          return;
        };
        let evicted = cache.evict_expired();
        log::trace!("counter cache evicted {evicted} expired entries");
      }
    });

    *janitor = Some(Janitor { shutdown, handle });
  }

  // Signal the janitor and wait for it to exit. No sweep runs after this returns.
  pub async fn stop(&self) {
    let Some(janitor) = self.janitor.lock().take() else {
      return;
    };

    let _ignored = janitor.shutdown.send(());
    if let Err(e) = janitor.handle.await {
      log::warn!("counter cache janitor failed: {e}");
    }
  }
}
