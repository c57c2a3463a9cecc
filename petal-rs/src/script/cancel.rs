//! Cooperative cancellation for script executions.
//!
//! A [`CancelToken`] combines an external trigger (shared by every clone) with
//! an optional deadline.  The evaluator calls [`CancelToken::check`] before
//! dispatching each AST node and races every host suspension point against
//! [`CancelToken::cancelled`], so a script stops at the next node or the
//! next host wait, whichever comes first.
//!
//! The token also counts the script calls currently on the stack, so runaway
//! recursion fails with a Runtime error instead of exhausting the thread's
//! stack.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use super::error::{Result, ScriptError};

#[derive(Debug, Default)]
struct Trigger {
    fired: AtomicBool,
    notify: Notify,
}

/// Nested script calls allowed unless configured otherwise.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 48;

/// Cloneable cancellation handle; safe to trigger from another task or thread.
#[derive(Debug, Clone)]
pub struct CancelToken {
    trigger: Arc<Trigger>,
    deadline: Option<(Instant, Duration)>,
    calls: Arc<AtomicUsize>,
    max_calls: usize,
}

impl Default for CancelToken {
    fn default() -> Self {
        CancelToken {
            trigger: Arc::default(),
            deadline: None,
            calls: Arc::default(),
            max_calls: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

/// Held for the duration of one script call; releases its slot on drop.
#[derive(Debug)]
pub struct CallGuard(Arc<AtomicUsize>);

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token sharing this one's trigger and call counter, allowing at most
    /// `depth` nested script calls.
    pub fn with_max_call_depth(&self, depth: usize) -> CancelToken {
        CancelToken {
            max_calls: depth,
            ..self.clone()
        }
    }

    /// Claim a call slot, failing once `max_calls` calls are already active.
    pub fn enter_call(&self) -> Result<CallGuard> {
        let active = self.calls.fetch_add(1, Ordering::AcqRel);
        let guard = CallGuard(Arc::clone(&self.calls));
        if active >= self.max_calls {
            return Err(ScriptError::runtime("Maximum call depth exceeded"));
        }
        Ok(guard)
    }

    /// Script calls currently in progress.
    pub fn call_depth(&self) -> usize {
        self.calls.load(Ordering::Acquire)
    }

    /// A token sharing this one's trigger that additionally expires after
    /// `timeout`.  An earlier existing deadline is kept.
    pub fn with_timeout(&self, timeout: Duration) -> CancelToken {
        let deadline = Instant::now()
            .checked_add(timeout)
            .map(|at| (at, timeout));
        let deadline = match (self.deadline, deadline) {
            (Some(old), Some(new)) if old.0 <= new.0 => Some(old),
            (old, None) => old,
            (_, new) => new,
        };
        CancelToken {
            deadline,
            ..self.clone()
        }
    }

    /// Fire the trigger.  Every clone observes it.
    pub fn cancel(&self) {
        self.trigger.fired.store(true, Ordering::Release);
        self.trigger.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.trigger.fired.load(Ordering::Acquire)
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|(at, _)| Instant::now() >= at)
    }

    /// `Err` once cancelled or past the deadline.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(ScriptError::Cancelled);
        }
        match self.deadline {
            Some((at, timeout)) if Instant::now() >= at => Err(ScriptError::TimedOut(timeout)),
            _ => Ok(()),
        }
    }

    /// Resolves with the cancellation error once the trigger fires or the
    /// deadline passes.
    pub async fn cancelled(&self) -> ScriptError {
        let fired = async {
            loop {
                // Register before testing the flag so a concurrent cancel()
                // cannot slip between the two.
                let notified = self.trigger.notify.notified();
                if self.is_cancelled() {
                    return;
                }
                notified.await;
            }
        };
        let expired = async {
            match self.deadline {
                Some((at, timeout)) => {
                    tokio::time::sleep_until(at).await;
                    timeout
                }
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            biased;
            () = fired => ScriptError::Cancelled,
            timeout = expired => ScriptError::TimedOut(timeout),
        }
    }

    /// Drive `fut` to completion unless the token fires first.
    pub async fn run<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        self.check()?;
        tokio::select! {
            biased;
            err = self.cancelled() => Err(err),
            res = fut => res,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
