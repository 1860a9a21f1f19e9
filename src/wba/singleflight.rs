//! Per-key single-flight: collapse concurrent computations into one.
//!
//! The first caller for a key becomes the leader and runs the work; everyone
//! else waits on a watch channel and receives the leader's result. Errors
//! are shared too, wrapped in [`AuthError::Shared`] so the kind stays
//! matchable. The slot is removed once the leader publishes, so a later
//! call starts a fresh flight.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::error::{AuthError, Result};

type FlightResult = std::result::Result<String, Arc<AuthError>>;
type Slot = watch::Receiver<Option<FlightResult>>;

#[derive(Debug, Default)]
pub(crate) struct Group {
    inflight: Mutex<HashMap<String, (u64, Slot)>>,
    next_id: AtomicU64,
}

enum Role {
    Leader(u64, watch::Sender<Option<FlightResult>>),
    Waiter(u64, Slot),
}

impl Group {
    /// Runs `work` for `key`, deduplicating against concurrent callers.
    ///
    /// `work` is invoked at most once per flight; if a leader is cancelled
    /// before publishing, the next caller starts a new flight.
    pub(crate) async fn run<F, Fut>(&self, key: &str, work: F) -> Result<String>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        loop {
            let role = {
                let mut inflight = self.inflight.lock().expect("singleflight lock poisoned");
                if let Some((id, rx)) = inflight.get(key) {
                    Role::Waiter(*id, rx.clone())
                } else {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let (tx, rx) = watch::channel(None);
                    inflight.insert(key.to_owned(), (id, rx));
                    Role::Leader(id, tx)
                }
            };

            match role {
                Role::Leader(id, tx) => {
                    let outcome = work().await;
                    let (flight, result) = match outcome {
                        Ok(value) => (Ok(value.clone()), Ok(value)),
                        Err(err) => {
                            let shared = Arc::new(err);
                            (Err(Arc::clone(&shared)), Err(AuthError::Shared(shared)))
                        }
                    };
                    let _ = tx.send(Some(flight));
                    self.remove_if_current(key, id);
                    return result;
                }
                Role::Waiter(id, mut rx) => {
                    loop {
                        let published = rx.borrow_and_update().clone();
                        if let Some(flight) = published {
                            return match flight {
                                Ok(value) => Ok(value),
                                Err(shared) => Err(AuthError::Shared(shared)),
                            };
                        }
                        if rx.changed().await.is_err() {
                            // Leader vanished without publishing; clear the
                            // stale slot and contend for leadership again.
                            self.remove_if_current(key, id);
                            break;
                        }
                    }
                }
            }
        }
    }

    fn remove_if_current(&self, key: &str, id: u64) {
        let mut inflight = self.inflight.lock().expect("singleflight lock poisoned");
        if inflight.get(key).is_some_and(|(current, _)| *current == id) {
            inflight.remove(key);
        }
    }
}
