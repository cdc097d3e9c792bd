//! Retry strategies for handling transient failures.
//!
//! A strategy is attached to a request through [`RetryStrategyOption`] and
//! consulted by the [`RetryLoader`](crate::loaders::RetryLoader) after every
//! attempt. Strategies are stateful: each logical load works on its own copy,
//! consuming delays as it goes, while the request keeps the pristine original.

use crate::options::HttpOption;
use crate::response::{HttpResult, HttpResultExt};
use crate::HttpRequest;
use rand::Rng;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Decides whether, and after how long, a request should be attempted again.
///
/// # Examples
///
/// ```
/// use loadchain::retry::RetryStrategy;
/// use loadchain::{ErrorCode, HttpResult};
/// use std::time::Duration;
///
/// /// Retries timeouts forever, once a second.
/// #[derive(Clone)]
/// struct RetryTimeouts;
///
/// impl RetryStrategy for RetryTimeouts {
///     fn next_delay(&mut self, result: &HttpResult) -> Option<Duration> {
///         match result {
///             Err(e) if e.code() == ErrorCode::TimedOut => Some(Duration::from_secs(1)),
///             _ => None,
///         }
///     }
/// }
/// ```
pub trait RetryStrategy: RetryStrategyClone + Send + Sync {
    /// Returns the delay before the next attempt, or `None` to stop.
    ///
    /// Called once after every attempt, including the last one.
    fn next_delay(&mut self, result: &HttpResult) -> Option<Duration>;
}

/// Object-safe cloning for boxed strategies. Implemented for every `Clone` strategy.
pub trait RetryStrategyClone {
    fn clone_box(&self) -> Box<dyn RetryStrategy>;
}

impl<T> RetryStrategyClone for T
where
    T: RetryStrategy + Clone + 'static,
{
    fn clone_box(&self) -> Box<dyn RetryStrategy> {
        Box::new(self.clone())
    }
}

impl Clone for Box<dyn RetryStrategy> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

impl fmt::Debug for dyn RetryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RetryStrategy")
    }
}

/// A queue of delays consumed front to back, one per failed attempt.
///
/// # Examples
///
/// ```
/// use loadchain::retry::BackoffRetry;
/// use std::time::Duration;
///
/// // 1s, 1.5s, 2.25s, 3.375s
/// let exponential = BackoffRetry::exponential(4);
/// assert_eq!(exponential.remaining(), 4);
///
/// // Three attempts in total, 250ms apart.
/// let linear = BackoffRetry::linear(Duration::from_millis(250), 3);
/// assert_eq!(linear.remaining(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct BackoffRetry {
    delays: VecDeque<Duration>,
}

impl BackoffRetry {
    /// Retries without waiting, for at most `max_attempts` attempts in total.
    pub fn immediately(max_attempts: usize) -> Self {
        Self::linear(Duration::ZERO, max_attempts)
    }

    /// Retries after a fixed delay, for at most `max_attempts` attempts in total.
    pub fn linear(delay: Duration, max_attempts: usize) -> Self {
        let count = max_attempts.saturating_sub(1);
        Self::explicit(std::iter::repeat(delay).take(count))
    }

    /// Queues `count` delays of `1.5^i` seconds, for `i` in `0..count`.
    pub fn exponential(count: usize) -> Self {
        Self::explicit((0..count).map(|i| Duration::from_secs_f64(1.5_f64.powi(i as i32))))
    }

    /// Uses the given delays, in order.
    pub fn explicit(delays: impl IntoIterator<Item = Duration>) -> Self {
        Self {
            delays: delays.into_iter().collect(),
        }
    }

    /// Scales every queued delay by a random factor between 50% and 100%.
    ///
    /// Spreads out retries from many clients failing at the same moment.
    pub fn with_jitter(mut self) -> Self {
        let mut rng = rand::thread_rng();
        for delay in self.delays.iter_mut() {
            *delay = delay.mul_f64(rng.gen_range(0.5..=1.0));
        }
        self
    }

    /// Number of retries left.
    pub fn remaining(&self) -> usize {
        self.delays.len()
    }
}

impl RetryStrategy for BackoffRetry {
    fn next_delay(&mut self, result: &HttpResult) -> Option<Duration> {
        if !result.is_failure() {
            return None;
        }
        self.delays.pop_front()
    }
}

/// A strategy backed by a closure.
///
/// The closure sees every result, successful or not, and may decide to retry
/// either; for example, to retry `503 Service Unavailable` responses.
#[derive(Clone)]
pub struct CustomRetry {
    delay_fn: Arc<dyn Fn(&HttpResult) -> Option<Duration> + Send + Sync>,
}

impl CustomRetry {
    pub fn new(delay_fn: impl Fn(&HttpResult) -> Option<Duration> + Send + Sync + 'static) -> Self {
        Self {
            delay_fn: Arc::new(delay_fn),
        }
    }
}

impl RetryStrategy for CustomRetry {
    fn next_delay(&mut self, result: &HttpResult) -> Option<Duration> {
        (self.delay_fn)(result)
    }
}

/// The retry strategy of a request. Defaults to `None`: no retries.
pub enum RetryStrategyOption {}

impl HttpOption for RetryStrategyOption {
    type Value = Option<Box<dyn RetryStrategy>>;

    fn default_value() -> Self::Value {
        None
    }
}

impl HttpRequest {
    /// Sets the strategy a [`RetryLoader`](crate::loaders::RetryLoader) applies to this request.
    pub fn with_retry_strategy(self, strategy: impl RetryStrategy + 'static) -> Self {
        self.with_option::<RetryStrategyOption>(Some(Box::new(strategy)))
    }
}
