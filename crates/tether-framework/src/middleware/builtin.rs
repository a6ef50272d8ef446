//! Built-in middlewares.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tether_core::EventKind;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use super::{Middleware, Next, from_fn};
use crate::context::DispatchContext;
use crate::error::DispatchError;

/// Logs the outcome and duration of every dispatch cycle.
pub fn logging() -> impl Middleware {
    from_fn("logging", |ctx: Arc<DispatchContext>, next: Next| async move {
        let result = next.run(Arc::clone(&ctx)).await;
        let elapsed_ms = ctx.elapsed().as_millis() as u64;

        match &result {
            Ok(outcome) => debug!(
                cycle = outcome.cycle,
                matched = outcome.matched,
                handled = outcome.handled,
                elapsed_ms,
                "Dispatch completed"
            ),
            Err(DispatchError::NoMatchingRule) => {
                trace!(cycle = ctx.cycle(), elapsed_ms, "No matcher accepted the event")
            }
            Err(e) => warn!(cycle = ctx.cycle(), elapsed_ms, error = %e, "Dispatch failed"),
        }
        result
    })
}

/// Turns a panic anywhere further down the chain into [`DispatchError::Panicked`].
pub fn recovery() -> impl Middleware {
    from_fn("recovery", |ctx: Arc<DispatchContext>, next: Next| async move {
        let cycle = ctx.cycle();
        match AssertUnwindSafe(next.run(ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(cycle, panic = %message, "Handler panicked");
                Err(DispatchError::Panicked(message))
            }
        }
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Fails the cycle with [`DispatchError::TimedOut`] once `limit` elapses.
pub fn timeout(limit: Duration) -> impl Middleware {
    from_fn("timeout", move |ctx: Arc<DispatchContext>, next: Next| async move {
        match tokio::time::timeout(limit, next.run(ctx)).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::TimedOut(limit)),
        }
    })
}

/// Allows each user at most `max` messages per sliding `window`. Other events pass unchecked.
pub fn rate_limit(max: usize, window: Duration) -> impl Middleware {
    let limiter = RateLimiter::new(max, window);

    from_fn("rate_limit", move |ctx: Arc<DispatchContext>, next: Next| {
        let event = ctx.event();
        let limited = match event.user_id() {
            Some(user_id) if event.kind() == EventKind::Message => {
                (!limiter.admit(user_id, Instant::now())).then_some(user_id)
            }
            _ => None,
        };
        async move {
            match limited {
                Some(user_id) => {
                    debug!(user_id, "Rate limit exceeded");
                    Err(DispatchError::RateLimited { user_id })
                }
                None => next.run(ctx).await,
            }
        }
    })
}

/// Sliding-window counters per user.
///
/// Users idle for a whole window are swept at most once per window, so the table only holds
/// recently active users.
struct RateLimiter {
    max: usize,
    window: Duration,
    state: Mutex<LimiterState>,
}

struct LimiterState {
    users: HashMap<i64, VecDeque<Instant>>,
    last_sweep: Instant,
}

impl RateLimiter {
    fn new(max: usize, window: Duration) -> Self {
        Self {
            max,
            window,
            state: Mutex::new(LimiterState {
                users: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    fn admit(&self, user_id: i64, now: Instant) -> bool {
        let window = self.window;
        let mut state = self.state.lock();

        if now.duration_since(state.last_sweep) >= window {
            state
                .users
                .retain(|_, stamps| stamps.back().is_some_and(|t| now.duration_since(*t) < window));
            state.last_sweep = now;
        }

        let stamps = state.users.entry(user_id).or_default();
        while stamps
            .front()
            .is_some_and(|t| now.duration_since(*t) >= window)
        {
            stamps.pop_front();
        }
        if stamps.len() >= self.max {
            return false;
        }
        stamps.push_back(now);
        true
    }

    fn tracked(&self) -> usize {
        self.state.lock().users.len()
    }
}
