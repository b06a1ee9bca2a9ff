//! Shutdown barrier for asynchronous work.
//!
//! Each async unit of work holds a [`TaskToken`] while it runs. Once
//! [`TaskSuspender::suspend`] has been called no new tokens may be handed
//! out, and the returned future resolves when the last token is dropped.

use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

#[derive(Debug, Default)]
struct State {
    active: usize,
    suspended: bool,
    waiters: Vec<oneshot::Sender<()>>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskSuspender {
    state: Arc<Mutex<State>>,
}

/// Keeps the owning suspender from finishing its drain while alive.
#[derive(Debug)]
#[must_use = "the task is finished as soon as the token is dropped"]
pub struct TaskToken {
    state: Arc<Mutex<State>>,
}

impl TaskSuspender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a task.
    ///
    /// # Panics
    ///
    /// Panics if the suspender has already been suspended. Starting work
    /// after the drain began is a lifetime bug in the caller.
    pub fn start_task(&self) -> TaskToken {
        match self.try_start_task() {
            Some(token) => token,
            None => panic!("TaskSuspender: start_task called after suspend"),
        }
    }

    /// Starts tracking a task unless the suspender is suspended.
    pub fn try_start_task(&self) -> Option<TaskToken> {
        let mut state = lock(&self.state);
        if state.suspended {
            return None;
        }
        state.active += 1;
        Some(TaskToken { state: self.state.clone() })
    }

    pub fn is_suspended(&self) -> bool {
        lock(&self.state).suspended
    }

    pub fn active_tasks(&self) -> usize {
        lock(&self.state).active
    }

    /// Closes the suspender to new tasks. The future resolves once every
    /// outstanding token has been dropped, or right away if there are none.
    pub fn suspend(&self) -> impl Future<Output = ()> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        let ready = {
            let mut state = lock(&self.state);
            if state.suspended {
                log::warn!("TaskSuspender: suspend called more than once");
            }
            state.suspended = true;
            if state.active == 0 {
                Some(tx)
            } else {
                state.waiters.push(tx);
                None
            }
        };

        if let Some(tx) = ready {
            let _ = tx.send(());
        }

        async move {
            let _ = rx.await;
        }
    }
}

impl Drop for TaskToken {
    fn drop(&mut self) {
        let waiters = {
            let mut state = lock(&self.state);
            state.active -= 1;
            if state.active == 0 && state.suspended {
                std::mem::take(&mut state.waiters)
            } else {
                Vec::new()
            }
        };

        for tx in waiters {
            let _ = tx.send(());
        }
    }
}

/// Locks a mutex, recovering the guard from a poisoned lock.
pub(crate) fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
