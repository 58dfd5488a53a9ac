//! Deferred, shared computations: [`Thunk`].
use std::{collections::BTreeMap, future::Future, pin::Pin, sync::Arc};
use tokio::sync::{Mutex, OnceCell};

type BoxedFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// A future that runs at most once, shared between all clones of the thunk.
/// Every caller of [`Thunk::force`] observes the same result.
pub struct Thunk<T> {
    state: Arc<ThunkState<T>>,
}
impl<T> Thunk<T> {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Thunk {
            state: Arc::new(ThunkState {
                cell: OnceCell::new(),
                future: Mutex::new(Some(Box::pin(future))),
            }),
        }
    }

    /// Drive the computation to completion if nobody has yet, and return its
    /// result.
    pub async fn force(&self) -> &T {
        self.state.force().await
    }

    /// Whether the result is available without waiting.
    pub fn is_done(&self) -> bool {
        self.state.cell.initialized()
    }

    /// Force every thunk of a map, in key order.
    pub async fn force_into_map<Key: Ord>(map: BTreeMap<Key, Thunk<T>>) -> BTreeMap<Key, T>
    where
        T: Clone,
    {
        let mut results = BTreeMap::new();
        for (key, thunk) in map {
            let value = thunk.force().await.clone();
            results.insert(key, value);
        }
        results
    }
}
impl<T> Clone for Thunk<T> {
    fn clone(&self) -> Self {
        Thunk {
            state: self.state.clone(),
        }
    }
}

struct ThunkState<T> {
    cell: OnceCell<T>,
    /// Taken by whichever caller initializes `cell`.
    future: Mutex<Option<BoxedFuture<T>>>,
}
impl<T> ThunkState<T> {
    async fn force(&self) -> &T {
        self.cell
            .get_or_init(|| async {
                let future = self.future.lock().await.take();
                match future {
                    Some(future) => future.await,
                    // Only reachable if an earlier initialization was
                    // cancelled half way, which this crate never does.
                    None => panic!("thunk future was dropped before completing"),
                }
            })
            .await
    }
}
