//! Single-flight refresh of a shared value
//!
//! Many tasks may ask for the value at once. When it is missing or stale,
//! exactly one of them performs the refresh and the rest reuse its result.
//! A task only refreshes if the value is still the one it observed before
//! taking the lock, so a refresh that completed while it was waiting is
//! never repeated.

use std::future::Future;
use std::sync::RwLock;

use tokio::sync::Mutex;

#[derive(Debug, Default)]
pub struct SingleFlight<T> {
    value: RwLock<Option<T>>,
    refresh: Mutex<()>,
}

impl<T> SingleFlight<T>
where
    T: Clone + PartialEq,
{
    pub fn new() -> Self {
        Self {
            value: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    /// The current value, without refreshing.
    pub fn current(&self) -> Option<T> {
        match self.value.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Returns the value, initialising it once if nobody has yet.
    pub async fn get_or_try_init<F, Fut, E>(&self, init: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let observed = self.current();
        if let Some(value) = observed {
            return Ok(value);
        }
        self.refresh_if_unchanged(None, init).await
    }

    /// Refreshes the value unless another task already replaced `observed`.
    ///
    /// The refresh lock is held only while `refresh` runs.
    pub async fn refresh_if_unchanged<F, Fut, E>(&self, observed: Option<T>, refresh: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let _guard = self.refresh.lock().await;
        let current = self.current();
        if let Some(value) = current.clone() {
            if current != observed {
                return Ok(value);
            }
        }
        let value = refresh().await?;
        self.store(Some(value.clone()));
        Ok(value)
    }

    /// Drops the current value so the next caller refreshes it.
    pub fn invalidate(&self) {
        self.store(None);
    }

    fn store(&self, value: Option<T>) {
        match self.value.write() {
            Ok(mut guard) => *guard = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }
}
