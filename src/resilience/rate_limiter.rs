//! # Rate Limiter
//!
//! Fixed-window capacity gate for outbound workspace API calls. Answers two
//! questions: "may I call now" ([`RateLimiter::try_acquire`], non-blocking,
//! consumes a unit) and "when may I call next" ([`RateLimiter::next_available_at`],
//! advisory). The gate knows nothing about tasks; any caller that talks to the
//! external API can share one instance.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::RateLimitConfig;

/// Window counters, guarded by a mutex so concurrent callers see a consistent
/// acquire-or-reject decision.
#[derive(Debug)]
struct WindowState {
    window_start: Instant,
    count: u32,
}

/// Point-in-time view of the limiter for stats and logging.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterSnapshot {
    /// Units consumed in the current window
    pub used: u32,
    /// Window budget
    pub budget: u32,
    /// Time until the current window rolls over
    pub window_remaining: Duration,
}

/// Fixed-window request budget over the external workspace API.
#[derive(Debug)]
pub struct RateLimiter {
    budget: u32,
    window: Duration,
    state: Mutex<WindowState>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        info!(
            budget = config.max_requests_per_window,
            window_ms = config.window_ms,
            "🚦 Rate limiter initialized"
        );

        Self {
            budget: config.max_requests_per_window,
            window: config.window(),
            state: Mutex::new(WindowState {
                window_start: Instant::now(),
                count: 0,
            }),
        }
    }

    /// Try to consume one unit of budget. Returns `false` when the window is
    /// exhausted; the caller should defer until [`Self::next_available_at`].
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        self.roll_window(&mut state);

        if state.count < self.budget {
            state.count += 1;
            true
        } else {
            debug!(
                budget = self.budget,
                window_ms = self.window.as_millis() as u64,
                "Rate budget exhausted for current window"
            );
            false
        }
    }

    /// Earliest instant at which budget is guaranteed to be available again.
    /// Advisory only: another caller may consume the freed budget first.
    pub fn next_available_at(&self) -> Instant {
        let mut state = self.state.lock();
        self.roll_window(&mut state);

        if state.count < self.budget {
            Instant::now()
        } else {
            state.window_start + self.window
        }
    }

    /// Current window usage.
    pub fn snapshot(&self) -> RateLimiterSnapshot {
        let mut state = self.state.lock();
        self.roll_window(&mut state);

        RateLimiterSnapshot {
            used: state.count,
            budget: self.budget,
            window_remaining: self
                .window
                .saturating_sub(state.window_start.elapsed()),
        }
    }

    fn roll_window(&self, state: &mut WindowState) {
        let elapsed = state.window_start.elapsed();
        if elapsed >= self.window {
            // Align the new window to the rollover boundary, not to this call,
            // so a saturated caller cannot stretch the window by polling.
            let windows_passed = elapsed.as_nanos() / self.window.as_nanos().max(1);
            state.window_start += self.window * windows_passed as u32;
            state.count = 0;
        }
    }
}
