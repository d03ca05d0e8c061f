/// Request/response correlation
///
/// MC responses carry no request identifier, so the n-th response on a
/// connection answers the n-th outstanding request. The correlator keeps the
/// outstanding requests in send order and resolves each one exactly once:
/// by a response, by its timeout, or by a connection-wide abort.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{McError, McResult};

/// Identifier assigned to each registered request
pub type RequestId = u64;

/// Outcome delivered to a waiting request
pub type Reply = McResult<Vec<i16>>;

struct PendingRequest {
    id: RequestId,
    reply: oneshot::Sender<Reply>,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct State {
    next_id: RequestId,
    pending: VecDeque<PendingRequest>,
    /// Set by `abort_all`; later registrations fail with this error
    closed: Option<McError>,
}

/// FIFO correlator for one connection
#[derive(Clone, Default)]
pub struct Correlator {
    state: Arc<Mutex<State>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a request that has just been sent
    ///
    /// Must be called in send order. The returned receiver yields exactly one
    /// reply: the decoded response, `RequestTimeout` once `timeout` elapses,
    /// or the error passed to `abort_all`.
    pub fn register(&self, timeout: Duration) -> McResult<(RequestId, oneshot::Receiver<Reply>)> {
        let (reply, receiver) = oneshot::channel();
        let mut state = self.lock();
        if let Some(err) = &state.closed {
            return Err(err.clone());
        }

        state.next_id += 1;
        let id = state.next_id;
        let timer = spawn_timer(Arc::downgrade(&self.state), id, timeout);
        state.pending.push_back(PendingRequest { id, reply, timer });

        debug!(request_id = id, pending = state.pending.len(), "request registered");
        Ok((id, receiver))
    }

    /// Deliver a response outcome to the oldest pending request
    ///
    /// Returns false when nothing is pending; the outcome is discarded.
    pub fn complete(&self, reply: Reply) -> bool {
        let next = self.lock().pending.pop_front();
        match next {
            Some(request) => {
                request.timer.abort();
                debug!(request_id = request.id, ok = reply.is_ok(), "request completed");
                // receiver may have been dropped by a cancelled caller
                let _ = request.reply.send(reply);
                true
            }
            None => {
                warn!("response received with no pending request, discarding");
                false
            }
        }
    }

    /// Fail every pending request with `err` and refuse new registrations
    ///
    /// Returns the number of requests that were aborted.
    pub fn abort_all(&self, err: McError) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut state = self.lock();
            state.closed = Some(err.clone());
            state.pending.drain(..).collect()
        };

        let count = drained.len();
        for request in drained {
            request.timer.abort();
            let _ = request.reply.send(Err(err.clone()));
        }
        if count > 0 {
            debug!(aborted = count, error = %err, "pending requests aborted");
        }
        count
    }

    /// Number of requests awaiting a response
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed.is_some()
    }

    /// Remove a request whose timer fired and fail it with `RequestTimeout`
    fn expire(&self, id: RequestId, timeout: Duration) -> bool {
        let expired = {
            let mut state = self.lock();
            state
                .pending
                .iter()
                .position(|request| request.id == id)
                .and_then(|index| state.pending.remove(index))
        };

        match expired {
            Some(request) => {
                let timeout_ms = timeout.as_millis() as u64;
                warn!(request_id = id, timeout_ms, "request timed out");
                let _ = request.reply.send(Err(McError::request_timeout(id, timeout_ms)));
                true
            }
            None => false,
        }
    }
}

fn spawn_timer(state: Weak<Mutex<State>>, id: RequestId, timeout: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        if let Some(state) = state.upgrade() {
            Correlator { state }.expire(id, timeout);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LONG: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_fifo_completion() {
        let correlator = Correlator::new();
        let (first_id, first) = correlator.register(LONG).unwrap();
        let (second_id, second) = correlator.register(LONG).unwrap();
        assert!(second_id > first_id);
        assert_eq!(correlator.pending_count(), 2);

        assert!(correlator.complete(Ok(vec![1])));
        assert!(correlator.complete(Ok(vec![2])));

        assert_eq!(first.await.unwrap().unwrap(), vec![1]);
        assert_eq!(second.await.unwrap().unwrap(), vec![2]);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_complete_with_nothing_pending() {
        let correlator = Correlator::new();
        assert!(!correlator.complete(Ok(vec![])));
    }

    #[tokio::test]
    async fn test_timeout_removes_entry() {
        let correlator = Correlator::new();
        let (id, receiver) = correlator.register(Duration::from_millis(20)).unwrap();

        let reply = receiver.await.unwrap();
        assert_eq!(reply, Err(McError::request_timeout(id, 20)));
        assert_eq!(correlator.pending_count(), 0);

        // a late response finds nothing to resolve
        assert!(!correlator.complete(Ok(vec![5])));
    }

    #[tokio::test]
    async fn test_timeout_keeps_order_of_others() {
        let correlator = Correlator::new();
        let (_, slow) = correlator.register(LONG).unwrap();
        let (_, fast) = correlator.register(Duration::from_millis(10)).unwrap();

        assert!(matches!(fast.await.unwrap(), Err(McError::RequestTimeout { .. })));
        assert_eq!(correlator.pending_count(), 1);

        assert!(correlator.complete(Ok(vec![9])));
        assert_eq!(slow.await.unwrap().unwrap(), vec![9]);
    }

    #[tokio::test]
    async fn test_abort_all() {
        let correlator = Correlator::new();
        let (_, first) = correlator.register(LONG).unwrap();
        let (_, second) = correlator.register(LONG).unwrap();

        let closed = McError::connection_closed("peer closed");
        assert_eq!(correlator.abort_all(closed.clone()), 2);
        assert_eq!(first.await.unwrap(), Err(closed.clone()));
        assert_eq!(second.await.unwrap(), Err(closed.clone()));

        assert!(correlator.is_closed());
        assert_eq!(correlator.register(LONG).unwrap_err(), closed);
    }
}
