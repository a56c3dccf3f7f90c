use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::trace;

/// Error surfaced by [`WorkCache::get`].
///
/// Compute failures are shared between all concurrent waiters, hence the
/// `Arc`. `Cancelled` is only observed by waiters whose in-flight computation
/// was torn down by [`WorkCache::clear`].
#[derive(Debug, Error)]
pub enum CacheError<E> {
    #[error("{0}")]
    Compute(Arc<E>),
    #[error("computation cancelled")]
    Cancelled,
}

type Outcome<V, E> = Option<Result<V, Arc<E>>>;

enum Slot<V, E> {
    Ready(V),
    Pending {
        rx: watch::Receiver<Outcome<V, E>>,
        handle: JoinHandle<()>,
    },
}

struct Inner<K, V, E> {
    slots: Mutex<HashMap<K, Slot<V, E>>>,
    generation: AtomicU64,
}

/// Single-flight keyed cache.
///
/// For a fixed key, concurrent `get` calls run the supplied compute at most
/// once; every caller receives the same resolved value or the same error.
/// Successful results are retained until `clear`. Failed computations are
/// evicted so the next `get` retries fresh instead of replaying a transient
/// error forever.
///
/// Table mutations happen under one mutex; the compute itself runs on a
/// spawned task outside the lock, so a slow computation for key A never
/// blocks lookups for key B, and the work survives any individual caller
/// dropping its future mid-await.
pub struct WorkCache<K, V, E> {
    inner: Arc<Inner<K, V, E>>,
}

impl<K, V, E> Clone for WorkCache<K, V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V, E> Default for WorkCache<K, V, E>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, E> WorkCache<K, V, E>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub async fn get<F, Fut>(&self, key: K, compute: F) -> Result<V, CacheError<E>>
    where
        K: Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
        E: Send + Sync + 'static,
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let mut rx = {
            let mut slots = self.inner.slots.lock();
            match slots.get(&key) {
                Some(Slot::Ready(value)) => {
                    trace!("work cache hit");
                    return Ok(value.clone());
                }
                Some(Slot::Pending { rx, .. }) => rx.clone(),
                None => {
                    let (tx, rx) = watch::channel(None);
                    let generation = self.inner.generation.load(Ordering::SeqCst);
                    let future = compute(key.clone());
                    let inner = Arc::clone(&self.inner);
                    let task_key = key.clone();
                    let handle = tokio::spawn(async move {
                        let result = future.await;
                        let shared = result.map_err(Arc::new);
                        {
                            let mut slots = inner.slots.lock();
                            if inner.generation.load(Ordering::SeqCst) == generation {
                                match &shared {
                                    Ok(value) => {
                                        slots.insert(task_key, Slot::Ready(value.clone()));
                                    }
                                    Err(_) => {
                                        // Do not cache the failure: evict so a
                                        // later get retries the computation.
                                        slots.remove(&task_key);
                                    }
                                }
                            }
                        }
                        let _ = tx.send(Some(shared));
                    });
                    slots.insert(
                        key,
                        Slot::Pending {
                            rx: rx.clone(),
                            handle,
                        },
                    );
                    rx
                }
            }
        };

        loop {
            let settled = rx.borrow().clone();
            if let Some(result) = settled {
                return result.map_err(CacheError::Compute);
            }
            if rx.changed().await.is_err() {
                return Err(CacheError::Cancelled);
            }
        }
    }

    /// Drops every entry and aborts in-flight computations. Completions from
    /// before the clear are never re-inserted.
    pub fn clear(&self) {
        let mut slots = self.inner.slots.lock();
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        for (_, slot) in slots.drain() {
            if let Slot::Pending { handle, .. } = slot {
                handle.abort();
            }
        }
    }

    /// Number of entries, resolved or in flight.
    pub fn len(&self) -> usize {
        self.inner.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
