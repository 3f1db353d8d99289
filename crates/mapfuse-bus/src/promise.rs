//! [`Promise`] – a single-assignment container for the result of an event.
//!
//! The bus creates one promise per posted event and hands a clone to the
//! sender; the consumer resolves it through `complete`. Resolution is
//! idempotent: the first value wins, every later attempt is a no-op, and all
//! current and future waiters observe the same value.
//!
//! Built on [`tokio::sync::watch`] so that `resolve` happens-before any
//! successful [`Promise::value`]; no waiter can observe a partially written
//! result.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// A promised result that will eventually hold a value of type `T`.
///
/// Clones share the same underlying cell.
///
/// # Example
///
/// ```rust
/// use mapfuse_bus::Promise;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let promise: Promise<bool> = Promise::new();
/// assert!(!promise.is_ready());
///
/// promise.resolve(true);
/// promise.resolve(false); // ignored: already resolved
///
/// assert_eq!(promise.value().await, true);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct Promise<T> {
    cell: Arc<watch::Sender<Option<T>>>,
}

impl<T: Clone> Promise<T> {
    /// Create an unresolved promise.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { cell: Arc::new(tx) }
    }

    /// Fill the cell exactly once and wake all waiters.
    ///
    /// Returns `true` if this call performed the assignment, `false` if the
    /// promise was already resolved (the value is dropped).
    pub fn resolve(&self, value: T) -> bool {
        self.cell.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(value);
                true
            } else {
                false
            }
        })
    }

    /// Whether the promise has been resolved.
    pub fn is_ready(&self) -> bool {
        self.cell.borrow().is_some()
    }

    /// The resolved value, if any, without waiting.
    pub fn try_value(&self) -> Option<T> {
        self.cell.borrow().clone()
    }

    /// Wait until the promise is resolved and return the value.
    pub async fn value(&self) -> T {
        let mut rx = self.cell.subscribe();
        loop {
            if let Some(value) = rx.borrow_and_update().as_ref() {
                return value.clone();
            }
            // Cannot fail while `self` keeps the sender half alive.
            let _ = rx.changed().await;
        }
    }

    /// Wait at most `timeout` for resolution; `None` on expiry.
    pub async fn value_timeout(&self, timeout: Duration) -> Option<T> {
        tokio::time::timeout(timeout, self.value()).await.ok()
    }
}

impl<T: Clone> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
