// cqlkit/src/future.rs
//
// ResponseFuture - single-assignment result cell for asynchronous statements
// Completion callbacks run on whichever thread completes the cell
//

use parking_lot::{Condvar, Mutex};
use std::future::{Future, IntoFuture};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tracing::{debug, error};
use uuid::Uuid;

use crate::errors::DriverError;
use crate::metrics;
use crate::types::ResultSet;

pub type QueryOutcome = Result<ResultSet, DriverError>;

type SuccessFn = Box<dyn FnOnce(&ResultSet) + Send + 'static>;
type ErrorFn = Box<dyn FnOnce(&DriverError) + Send + 'static>;

enum Callback {
    Success(SuccessFn),
    Error(ErrorFn),
}

enum State {
    Pending(Vec<Callback>),
    Done(Arc<QueryOutcome>),
}

struct Shared {
    id: Uuid,
    state: Mutex<State>,
    done: Condvar,
    notify: Notify,
    abort: Mutex<Option<AbortHandle>>,
}

/// Handle to the pending or completed outcome of an asynchronous statement.
///
/// The outcome is assigned exactly once. Clones share the same cell.
/// Callbacks must not block: they run on a runtime worker shared with
/// other completions.
#[derive(Clone)]
pub struct ResponseFuture {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ResponseFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseFuture")
            .field("id", &self.shared.id)
            .field("done", &self.is_done())
            .finish()
    }
}

impl ResponseFuture {
    pub(crate) fn pending() -> Self {
        Self {
            shared: Arc::new(Shared {
                id: Uuid::new_v4(),
                state: Mutex::new(State::Pending(Vec::new())),
                done: Condvar::new(),
                notify: Notify::new(),
                abort: Mutex::new(None),
            }),
        }
    }

    /// A future that is already completed with `outcome`
    pub fn ready(outcome: QueryOutcome) -> Self {
        let future = Self::pending();
        future.complete(outcome);
        future
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Assigns the outcome and fires registered callbacks on the calling
    /// thread. Returns false if the future was already completed.
    pub(crate) fn complete(&self, outcome: QueryOutcome) -> bool {
        let outcome = Arc::new(outcome);
        let previous = {
            let mut state = self.shared.state.lock();
            if matches!(*state, State::Done(_)) {
                return false;
            }
            std::mem::replace(&mut *state, State::Done(outcome.clone()))
        };
        let callbacks = match previous {
            State::Pending(callbacks) => callbacks,
            State::Done(_) => Vec::new(),
        };

        self.shared.done.notify_all();
        self.shared.notify.notify_waiters();

        for callback in callbacks {
            self.invoke(callback, &outcome);
        }
        true
    }

    pub(crate) fn set_abort_handle(&self, handle: AbortHandle) {
        *self.shared.abort.lock() = Some(handle);
    }

    pub fn is_done(&self) -> bool {
        matches!(*self.shared.state.lock(), State::Done(_))
    }

    /// The outcome if the future has completed
    pub fn try_result(&self) -> Option<QueryOutcome> {
        match &*self.shared.state.lock() {
            State::Done(outcome) => Some((**outcome).clone()),
            State::Pending(_) => None,
        }
    }

    /// Blocks the calling thread until the outcome is known.
    ///
    /// Must not be called from a runtime worker thread; use `wait` or
    /// `.await` inside async code.
    pub fn result(&self) -> QueryOutcome {
        let mut state = self.shared.state.lock();
        loop {
            if let State::Done(outcome) = &*state {
                return (**outcome).clone();
            }
            self.shared.done.wait(&mut state);
        }
    }

    /// Suspends the calling task until the outcome is known
    pub async fn wait(&self) -> QueryOutcome {
        loop {
            let notified = self.shared.notify.notified();
            if let Some(outcome) = self.try_result() {
                return outcome;
            }
            notified.await;
        }
    }

    pub fn add_callback<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&ResultSet) + Send + 'static,
    {
        self.register(Callback::Success(Box::new(callback)));
        self
    }

    pub fn add_errback<F>(&self, errback: F) -> &Self
    where
        F: FnOnce(&DriverError) + Send + 'static,
    {
        self.register(Callback::Error(Box::new(errback)));
        self
    }

    pub fn add_callbacks<F, E>(&self, callback: F, errback: E) -> &Self
    where
        F: FnOnce(&ResultSet) + Send + 'static,
        E: FnOnce(&DriverError) + Send + 'static,
    {
        self.add_callback(callback);
        self.add_errback(errback)
    }

    /// Best-effort cancellation: succeeds only while the outcome is unknown.
    /// A request already written to a connection may still be applied.
    pub fn cancel(&self) -> bool {
        if !self.complete(Err(DriverError::Cancelled)) {
            return false;
        }
        if let Some(handle) = self.shared.abort.lock().take() {
            handle.abort();
        }
        debug!("Request {} cancelled", self.shared.id);
        true
    }

    fn register(&self, callback: Callback) {
        let outcome = {
            let mut state = self.shared.state.lock();
            match &mut *state {
                State::Pending(callbacks) => {
                    callbacks.push(callback);
                    return;
                }
                State::Done(outcome) => outcome.clone(),
            }
        };
        self.invoke(callback, &outcome);
    }

    fn invoke(&self, callback: Callback, outcome: &QueryOutcome) {
        let result = match (callback, outcome) {
            (Callback::Success(f), Ok(rows)) => catch_unwind(AssertUnwindSafe(|| f(rows))),
            (Callback::Error(f), Err(err)) => catch_unwind(AssertUnwindSafe(|| f(err))),
            _ => return,
        };

        if let Err(payload) = result {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            let err = DriverError::CallbackError(message);
            error!("Ignoring failed callback for request {}: {}", self.shared.id, err);
            metrics::record_callback_error();
        }
    }
}

impl IntoFuture for ResponseFuture {
    type Output = QueryOutcome;
    type IntoFuture = Pin<Box<dyn Future<Output = QueryOutcome> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.wait().await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ColumnSpec, ColumnType, CqlValue};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn one_row() -> ResultSet {
        ResultSet::rows(
            vec![ColumnSpec {
                keyspace: "elko".to_string(),
                table: "Team_Members".to_string(),
                name: "team_name".to_string(),
                typ: ColumnType::Text,
            }],
            vec![vec![CqlValue::from("Bobs Team")]],
        )
    }

    #[test]
    fn test_completes_exactly_once() {
        let future = ResponseFuture::pending();
        assert!(future.try_result().is_none());

        assert!(future.complete(Ok(one_row())));
        assert!(!future.complete(Err(DriverError::Cancelled)));
        assert!(future.result().is_ok());
        assert!(!future.cancel());
    }

    #[test]
    fn test_callback_after_completion_runs_synchronously() {
        let future = ResponseFuture::ready(Ok(one_row()));
        let calls = Arc::new(AtomicUsize::new(0));
        let caller = std::thread::current().id();

        let counter = calls.clone();
        future.add_callback(move |rows| {
            assert_eq!(std::thread::current().id(), caller);
            assert_eq!(rows.len(), 1);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        // Already ran by the time add_callback returned
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pending_callbacks_fire_once_on_completing_thread() {
        let future = ResponseFuture::pending();
        let calls = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        let completer_thread = Arc::new(Mutex::new(None));

        let (counter, errs, seen) = (calls.clone(), errors.clone(), completer_thread.clone());
        future.add_callbacks(
            move |_| {
                *seen.lock() = Some(std::thread::current().id());
                counter.fetch_add(1, Ordering::SeqCst);
            },
            move |_| {
                errs.fetch_add(1, Ordering::SeqCst);
            },
        );

        let completer = future.clone();
        let handle = std::thread::spawn(move || {
            completer.complete(Ok(one_row()));
            completer.complete(Ok(one_row()));
            std::thread::current().id()
        });
        let completing_id = handle.join().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 0);
        assert_eq!(*completer_thread.lock(), Some(completing_id));
    }

    #[test]
    fn test_panicking_callback_is_isolated() {
        let future = ResponseFuture::pending();
        let later = Arc::new(AtomicUsize::new(0));

        future.add_callback(|_| panic!("boom"));
        let counter = later.clone();
        future.add_callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(future.complete(Ok(one_row())));
        assert_eq!(later.load(Ordering::SeqCst), 1);
        assert!(future.result().is_ok());
    }

    #[test]
    fn test_errback_only_on_failure() {
        let future = ResponseFuture::pending();
        let successes = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(Mutex::new(Vec::new()));

        let (ok, failed) = (successes.clone(), failures.clone());
        future.add_callbacks(
            move |_| {
                ok.fetch_add(1, Ordering::SeqCst);
            },
            move |err| failed.lock().push(err.clone()),
        );
        future.complete(Err(DriverError::invalid("unconfigured table")));

        assert_eq!(successes.load(Ordering::SeqCst), 0);
        assert_eq!(failures.lock().len(), 1);
    }

    #[test]
    fn test_result_blocks_until_completed() {
        let future = ResponseFuture::pending();
        let completer = future.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            completer.complete(Ok(one_row()));
        });

        let rows = future.result().unwrap();
        assert_eq!(rows.first().unwrap().get_as::<String>("team_name").unwrap(), "Bobs Team");
    }

    #[tokio::test]
    async fn test_await_and_cancel() {
        let future = ResponseFuture::pending();
        let completer = future.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            completer.complete(Ok(one_row()));
        });
        assert!(future.clone().await.is_ok());

        let pending = ResponseFuture::pending();
        assert!(pending.cancel());
        assert_eq!(pending.wait().await, Err(DriverError::Cancelled));
    }
}
