// Copyright 2023 RangeKV Project Authors. Licensed under Apache-2.0.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::Notify;

use crate::Error;
use crate::Result;

/// A sticky cancellation flag shared between a caller and in-flight tasks.
///
/// Cancellation is cooperative: tasks check the flag at suspension points
/// (task submission, result waits, backoff sleeps) and bail out with
/// [`Error::Interrupted`]. Once set, the flag never resets.
#[derive(Clone, Debug, Default)]
pub struct Interrupt {
    inner: Arc<InterruptInner>,
}

#[derive(Debug, Default)]
struct InterruptInner {
    interrupted: AtomicBool,
    notify: Notify,
}

impl Interrupt {
    pub fn new() -> Interrupt {
        Interrupt::default()
    }

    /// Request cancellation and wake every task parked on [`interrupted`].
    ///
    /// [`interrupted`]: Interrupt::interrupted
    pub fn interrupt(&self) {
        self.inner.interrupted.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_interrupted(&self) -> bool {
        self.inner.interrupted.load(Ordering::Acquire)
    }

    /// Error out if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_interrupted() {
            Err(Error::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Resolve when cancellation is requested. Intended for `select!`-style
    /// racing against useful work.
    pub async fn interrupted(&self) {
        if self.is_interrupted() {
            return;
        }
        let notified = self.inner.notify.notified();
        if self.is_interrupted() {
            return;
        }
        notified.await;
    }
}
