// Copyright 2023 RangeKV Project Authors. Licensed under Apache-2.0.

//! Inter-attempt delay schedules.
//!
//! A [`Backoff`] is an attempt-budgeted sequence of delays injected into the
//! dispatcher. Exponential strategies with several jitter flavors are
//! provided; `next_delay_duration` returns `None` once the attempt budget is
//! spent, which ends the retry loop.

use std::time::Duration;

use rand::thread_rng;
use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BackoffKind {
    None,
    NoJitter,
    FullJitter,
    EqualJitter,
    DecorrelatedJitter,
}

/// A deterministic-budget schedule of inter-attempt delays.
#[derive(Debug, Clone)]
pub struct Backoff {
    kind: BackoffKind,
    current_attempts: u32,
    max_attempts: u32,
    base_delay_ms: u64,
    current_delay_ms: u64,
    max_delay_ms: u64,
}

impl Backoff {
    /// No delay and no retries: the first attempt is the only one.
    pub const fn no_backoff() -> Backoff {
        Backoff {
            kind: BackoffKind::None,
            current_attempts: 0,
            max_attempts: 0,
            base_delay_ms: 0,
            current_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Exponential backoff with no jitter:
    /// `delay = min(base * 2^attempt, max)`.
    pub const fn no_jitter_backoff(
        base_delay_ms: u64,
        max_delay_ms: u64,
        max_attempts: u32,
    ) -> Backoff {
        Backoff {
            kind: BackoffKind::NoJitter,
            current_attempts: 0,
            max_attempts,
            base_delay_ms,
            current_delay_ms: base_delay_ms,
            max_delay_ms,
        }
    }

    /// Exponential backoff where the whole delay is drawn uniformly from
    /// `[0, min(base * 2^attempt, max))`.
    pub fn full_jitter_backoff(
        base_delay_ms: u64,
        max_delay_ms: u64,
        max_attempts: u32,
    ) -> Backoff {
        assert!(
            base_delay_ms > 0 && max_delay_ms > 0,
            "Both base_delay_ms and max_delay_ms must be positive"
        );
        Backoff {
            kind: BackoffKind::FullJitter,
            current_attempts: 0,
            max_attempts,
            base_delay_ms,
            current_delay_ms: base_delay_ms,
            max_delay_ms,
        }
    }

    /// Exponential backoff keeping half the exponential delay and drawing the
    /// other half uniformly.
    pub fn equal_jitter_backoff(
        base_delay_ms: u64,
        max_delay_ms: u64,
        max_attempts: u32,
    ) -> Backoff {
        assert!(
            base_delay_ms > 1 && max_delay_ms > 1,
            "Both base_delay_ms and max_delay_ms must be greater than 1"
        );
        Backoff {
            kind: BackoffKind::EqualJitter,
            current_attempts: 0,
            max_attempts,
            base_delay_ms,
            current_delay_ms: base_delay_ms,
            max_delay_ms,
        }
    }

    /// Decorrelated jitter: `delay = min(max, rand_between(base, last * 3))`.
    pub fn decorrelated_jitter_backoff(
        base_delay_ms: u64,
        max_delay_ms: u64,
        max_attempts: u32,
    ) -> Backoff {
        assert!(base_delay_ms > 0, "base_delay_ms must be positive");
        Backoff {
            kind: BackoffKind::DecorrelatedJitter,
            current_attempts: 0,
            max_attempts,
            base_delay_ms,
            current_delay_ms: base_delay_ms,
            max_delay_ms,
        }
    }

    /// The delay to sleep before the next attempt, or `None` when the attempt
    /// budget is exhausted.
    pub fn next_delay_duration(&mut self) -> Option<Duration> {
        if self.current_attempts >= self.max_attempts {
            return None;
        }
        self.current_attempts += 1;

        match self.kind {
            BackoffKind::None => None,
            BackoffKind::NoJitter => {
                let delay_ms = self.current_delay_ms.min(self.max_delay_ms);
                self.current_delay_ms = self.current_delay_ms.saturating_mul(2);
                Some(Duration::from_millis(delay_ms))
            }
            BackoffKind::FullJitter => {
                let cap = self.current_delay_ms.min(self.max_delay_ms);
                self.current_delay_ms = self.current_delay_ms.saturating_mul(2);
                let delay_ms = thread_rng().gen_range(0..=cap);
                Some(Duration::from_millis(delay_ms))
            }
            BackoffKind::EqualJitter => {
                let cap = self.current_delay_ms.min(self.max_delay_ms);
                self.current_delay_ms = self.current_delay_ms.saturating_mul(2);
                let half = cap / 2;
                let delay_ms = half + thread_rng().gen_range(0..=half);
                Some(Duration::from_millis(delay_ms))
            }
            BackoffKind::DecorrelatedJitter => {
                let upper = self.current_delay_ms.saturating_mul(3);
                let delay_ms = thread_rng()
                    .gen_range(self.base_delay_ms..=upper.max(self.base_delay_ms))
                    .min(self.max_delay_ms);
                self.current_delay_ms = delay_ms;
                Some(Duration::from_millis(delay_ms))
            }
        }
    }

    /// Whether this schedule never sleeps nor retries.
    pub fn is_none(&self) -> bool {
        self.kind == BackoffKind::None
    }
}

// The default matches the cluster's expected leader-election convergence:
// 2ms doubling to a 500ms cap over 10 attempts is roughly 1.5s in total.
pub const DEFAULT_REGION_BACKOFF: Backoff = Backoff::no_jitter_backoff(2, 500, 10);
