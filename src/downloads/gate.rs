use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::core::error::{Error, Result};

/// Cooperative cancellation flag shared between the controller and a transfer.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Blocks a transfer loop while paused. Starts open.
#[derive(Debug)]
pub struct ResumeGate {
    open: Mutex<bool>,
    changed: Condvar,
}

impl ResumeGate {
    #[must_use]
    pub fn new() -> Self {
        Self {
            open: Mutex::new(true),
            changed: Condvar::new(),
        }
    }

    pub fn close(&self) {
        *self.open.lock() = false;
    }

    pub fn open(&self) {
        *self.open.lock() = true;
        self.changed.notify_all();
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.open.lock()
    }

    /// Wakes waiters without opening, so they can observe cancellation.
    /// Must be called after `CancelToken::cancel`.
    pub fn wake(&self) {
        let _guard = self.open.lock();
        self.changed.notify_all();
    }

    /// Returns once the gate is open, or `Cancelled` if the token fires first.
    pub fn wait(&self, cancel: &CancelToken) -> Result<()> {
        let mut open = self.open.lock();
        while !*open {
            cancel.check()?;
            self.changed.wait(&mut open);
        }
        cancel.check()
    }
}

impl Default for ResumeGate {
    fn default() -> Self {
        Self::new()
    }
}
