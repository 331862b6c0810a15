//! Per-object delayed tasks.
//!
//! Each schedule has at most one pending deletion task, keyed by
//! `namespace/name`. Installing a task aborts the previous one for the same
//! key first, so two tasks for one schedule never overlap.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct ScheduleTimers {
    handles: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl ScheduleTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the task for `key` with `task`
    pub fn install<F>(&self, key: &str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Ok(mut handles) = self.handles.lock() else {
            warn!("Failed to lock timers, not scheduling {}", key);
            return;
        };
        if let Some(previous) = handles.remove(key) {
            debug!("Cancelling previous timer for {}", key);
            previous.abort();
        }
        handles.insert(key.to_string(), tokio::spawn(task));
    }

    /// Aborts the task for `key`, returning whether one was installed
    pub fn cancel(&self, key: &str) -> bool {
        let Ok(mut handles) = self.handles.lock() else {
            return false;
        };
        match handles.remove(key) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Whether `key` has a task that has not completed yet
    pub fn is_pending(&self, key: &str) -> bool {
        self.handles
            .lock()
            .map(|handles| handles.get(key).is_some_and(|handle| !handle.is_finished()))
            .unwrap_or(false)
    }
}
