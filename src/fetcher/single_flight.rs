use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::debug;

use crate::app::{PortalError, Result};

type SharedResult<V> = Shared<BoxFuture<'static, Result<V>>>;

struct Flight<V> {
    id: u64,
    future: SharedResult<V>,
}

struct Registry<K, V> {
    next_id: u64,
    flights: HashMap<K, Flight<V>>,
}

/// Collapses concurrent identical operations into one shared execution.
///
/// The first caller for a key starts the operation on its own task; later
/// callers for the same key await that task's result. The registry entry is
/// removed when the operation finishes, successfully or not. A caller that
/// stops awaiting does not cancel the shared operation.
pub struct SingleFlight<K, V> {
    inner: Arc<Mutex<Registry<K, V>>>,
}

impl<K, V> Clone for SingleFlight<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry {
                next_id: 0,
                flights: HashMap::new(),
            })),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `make()` for `key` unless an operation for `key` is already in
    /// flight, in which case its result is shared.
    pub async fn run<F, Fut>(&self, key: K, make: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let future = {
            let mut registry = lock(&self.inner);
            match registry.flights.get(&key) {
                Some(flight) => {
                    debug!(?key, "joining in-flight operation");
                    flight.future.clone()
                }
                None => {
                    registry.next_id += 1;
                    let id = registry.next_id;
                    let work = make();
                    let inner = Arc::clone(&self.inner);
                    let task_key = key.clone();

                    let handle = tokio::spawn(async move {
                        let result = work.await;
                        let mut registry = lock(&inner);
                        if registry.flights.get(&task_key).is_some_and(|f| f.id == id) {
                            registry.flights.remove(&task_key);
                        }
                        result
                    });

                    let future = async move {
                        match handle.await {
                            Ok(result) => result,
                            Err(e) if e.is_cancelled() => Err(PortalError::Cancelled),
                            Err(e) => Err(PortalError::Other(format!("in-flight task failed: {e}"))),
                        }
                    }
                    .boxed()
                    .shared();

                    registry.flights.insert(
                        key,
                        Flight {
                            id,
                            future: future.clone(),
                        },
                    );
                    future
                }
            }
        };

        future.await
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        lock(&self.inner).flights.contains_key(key)
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).flights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock<K, V>(inner: &Mutex<Registry<K, V>>) -> MutexGuard<'_, Registry<K, V>> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}
