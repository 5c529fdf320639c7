// Copyright 2023 RangeKV Project Authors. Licensed under Apache-2.0.

use std::time::Duration;
use std::time::Instant;

/// An absolute point in time bounding an operation.
///
/// Every suspending call takes the remaining budget from the same deadline,
/// so time spent in one phase (a metadata lookup, a backoff sleep) shrinks
/// what the next phase may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    when: Instant,
}

impl Deadline {
    /// A deadline `timeout` from now.
    pub fn from_now(timeout: Duration) -> Deadline {
        Deadline {
            when: Instant::now() + timeout,
        }
    }

    /// The budget left, or `None` once the deadline elapsed.
    pub fn remaining(&self) -> Option<Duration> {
        self.when.checked_duration_since(Instant::now())
    }

    pub fn is_elapsed(&self) -> bool {
        self.remaining().is_none()
    }
}
