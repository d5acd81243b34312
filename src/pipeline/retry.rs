//! Retry with exponential backoff for rate-limited upstream calls.
//!
//! Vision endpoints throttle aggressively (HTTP 429, or vendor code 1305 in
//! the body). Those failures are transient and worth waiting out; anything
//! else (bad key, malformed request, unparseable reply) will fail the same way
//! again and is returned immediately.
//!
//! ## Schedule
//!
//! After the n-th rate-limited failure the wrapper sleeps
//!
//! ```text
//! min(cap, base × 2^min(n, 10)) + uniform(0, min(jitter_ceiling, base))
//! ```
//!
//! With the defaults (base 1.5 s, cap 30 s) that is ~3 s, 6 s, 12 s, 24 s,
//! then 30 s for every further attempt. `max_attempts == 0` retries forever;
//! set [`RetryPolicy::deadline`] to bound the total time instead.
//!
//! Sleeping and jitter go through the [`Sleeper`] and [`Jitter`] traits so
//! tests can run the schedule without waiting.

use crate::error::IngestError;
use std::fmt::Display;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Environment variable: backoff base in seconds.
pub const ENV_BACKOFF_BASE: &str = "VISION_RETRY_BACKOFF_BASE_S";
/// Environment variable: backoff cap in seconds.
pub const ENV_BACKOFF_CAP: &str = "VISION_RETRY_BACKOFF_CAP_S";
/// Environment variable: attempt cap (`0` or unset = unlimited).
pub const ENV_MAX_ATTEMPTS: &str = "VISION_RETRY_MAX_ATTEMPTS";

/// Highest exponent applied to the base.
const MAX_EXPONENT: u32 = 10;

/// When and how long to retry.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total calls allowed, counting the first. `0` = unlimited.
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
    /// Upper bound of the random jitter; the effective bound is
    /// `min(jitter_ceiling, base)`.
    pub jitter_ceiling: Duration,
    /// Overall time budget across all attempts and waits.
    pub deadline: Option<Duration>,
    /// Substrings that mark an error message as a rate limit. Any message
    /// containing "rate" (case-insensitive) also qualifies.
    pub retry_markers: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            base: Duration::from_millis(1500),
            cap: Duration::from_secs(30),
            jitter_ceiling: Duration::from_millis(500),
            deadline: None,
            retry_markers: vec![
                "429".to_string(),
                "1305".to_string(),
                "rate limited".to_string(),
                "请求过多".to_string(),
            ],
        }
    }
}

impl RetryPolicy {
    /// Defaults overridden by `VISION_RETRY_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an arbitrary variable source.
    /// Unparseable values are ignored with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut policy = Self::default();
        if let Some(base) = lookup(ENV_BACKOFF_BASE).and_then(|v| parse_secs(ENV_BACKOFF_BASE, &v)) {
            policy.base = base;
        }
        if let Some(cap) = lookup(ENV_BACKOFF_CAP).and_then(|v| parse_secs(ENV_BACKOFF_CAP, &v)) {
            policy.cap = cap;
        }
        if let Some(raw) = lookup(ENV_MAX_ATTEMPTS) {
            let raw = raw.trim();
            match raw.parse::<u32>() {
                Ok(n) if raw.chars().all(|c| c.is_ascii_digit()) => policy.max_attempts = n,
                _ => warn!("Ignoring {}={:?}: not a non-negative integer", ENV_MAX_ATTEMPTS, raw),
            }
        }
        policy
    }

    /// Whether an error message describes a rate limit.
    pub fn is_retryable(&self, message: &str) -> bool {
        self.retry_markers.iter().any(|m| message.contains(m.as_str()))
            || message.to_lowercase().contains("rate")
    }

    /// Wait before the next call, excluding jitter, after `failures`
    /// rate-limited failures.
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = 1u32 << failures.min(MAX_EXPONENT);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Upper bound of the jitter added to each wait.
    pub fn jitter_bound(&self) -> Duration {
        self.jitter_ceiling.min(self.base)
    }
}

fn parse_secs(key: &str, raw: &str) -> Option<Duration> {
    let parsed = raw
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok());
    if parsed.is_none() {
        warn!("Ignoring {}={:?}: not a representable non-negative number of seconds", key, raw);
    }
    parsed
}

// ── Injectable time ──────────────────────────────────────────────────────

/// Blocks the calling thread.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by `std::thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Random extra wait drawn from `[0, bound]`.
pub trait Jitter: Send + Sync {
    fn sample(&self, bound: Duration) -> Duration;
}

/// Uniform jitter from the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomJitter;

impl Jitter for RandomJitter {
    fn sample(&self, bound: Duration) -> Duration {
        use rand::Rng;
        if bound.is_zero() {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(rand::rng().random_range(0.0..=bound.as_secs_f64()))
    }
}

/// No jitter at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoJitter;

impl Jitter for NoJitter {
    fn sample(&self, _bound: Duration) -> Duration {
        Duration::ZERO
    }
}

// ── Runner ───────────────────────────────────────────────────────────────

/// A [`RetryPolicy`] bound to a sleeper and a jitter source.
pub struct RetryRunner {
    policy: RetryPolicy,
    sleeper: Box<dyn Sleeper>,
    jitter: Box<dyn Jitter>,
}

impl std::fmt::Debug for RetryRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryRunner")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RetryRunner {
    /// Real sleeps and random jitter.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            sleeper: Box::new(ThreadSleeper),
            jitter: Box::new(RandomJitter),
        }
    }

    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    pub fn with_jitter(mut self, jitter: impl Jitter + 'static) -> Self {
        self.jitter = Box::new(jitter);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Sleep for a fixed pause (inter-request pacing) through the same
    /// sleeper the backoff uses.
    pub fn pause(&self, duration: Duration) {
        if !duration.is_zero() {
            self.sleeper.sleep(duration);
        }
    }

    /// Call `do_call` until it succeeds, fails with a non-rate-limit error,
    /// or the policy gives up.
    ///
    /// # Errors
    /// * the call's own error, converted, when it is not a rate limit;
    /// * [`IngestError::RetriesExhausted`] when `max_attempts` is reached;
    /// * [`IngestError::DeadlineExceeded`] when the next wait would overrun
    ///   the deadline.
    pub fn run<T, E, F>(&self, mut do_call: F) -> Result<T, IngestError>
    where
        F: FnMut() -> Result<T, E>,
        E: Display + Into<IngestError>,
    {
        let started = Instant::now();
        let mut failures: u32 = 0;

        loop {
            let err = match do_call() {
                Ok(value) => {
                    if failures > 0 {
                        debug!("Call succeeded after {} rate-limited attempts", failures);
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            let message = err.to_string();
            if !self.policy.is_retryable(&message) {
                return Err(err.into());
            }

            failures += 1;
            if self.policy.max_attempts > 0 && failures >= self.policy.max_attempts {
                return Err(IngestError::RetriesExhausted {
                    attempts: failures,
                    message,
                });
            }

            let wait = self.policy.backoff(failures) + self.jitter.sample(self.policy.jitter_bound());
            if let Some(budget) = self.policy.deadline {
                if started.elapsed() + wait > budget {
                    return Err(IngestError::DeadlineExceeded {
                        attempts: failures,
                        budget_ms: budget.as_millis() as u64,
                        message,
                    });
                }
            }

            warn!(
                "Rate limited (attempt {}), retrying in {:.1}s: {}",
                failures,
                wait.as_secs_f64(),
                message
            );
            self.sleeper.sleep(wait);
        }
    }
}

/// [`RetryRunner::run`] with real sleeps and random jitter.
pub fn call_with_retry<T, E, F>(policy: &RetryPolicy, do_call: F) -> Result<T, IngestError>
where
    F: FnMut() -> Result<T, E>,
    E: Display + Into<IngestError>,
{
    RetryRunner::new(policy.clone()).run(do_call)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VisionError;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingSleeper(Arc<Mutex<Vec<Duration>>>);

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.0.lock().unwrap().push(duration);
        }
    }

    fn runner(policy: RetryPolicy) -> (RetryRunner, RecordingSleeper) {
        let sleeper = RecordingSleeper::default();
        let runner = RetryRunner::new(policy)
            .with_sleeper(sleeper.clone())
            .with_jitter(NoJitter);
        (runner, sleeper)
    }

    fn status(code: u16) -> VisionError {
        VisionError::Status {
            status: code,
            body: "upstream said no".into(),
        }
    }

    #[test]
    fn two_rate_limits_then_success() {
        let (runner, sleeper) = runner(RetryPolicy::default());
        let mut calls = 0;
        let result = runner.run(|| {
            calls += 1;
            if calls <= 2 {
                Err(status(429))
            } else {
                Ok("done")
            }
        });
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls, 3);
        let waits = sleeper.0.lock().unwrap().clone();
        assert_eq!(waits.len(), 2);
        assert!(waits[0] <= waits[1], "waits: {waits:?}");
        assert_eq!(waits[0], Duration::from_secs(3));
    }

    #[test]
    fn auth_failure_is_not_retried() {
        let (runner, sleeper) = runner(RetryPolicy::default());
        let mut calls = 0;
        let result: Result<(), _> = runner.run(|| {
            calls += 1;
            Err(status(401))
        });
        assert_eq!(calls, 1);
        assert!(sleeper.0.lock().unwrap().is_empty());
        match result {
            Err(IngestError::Upstream { message }) => assert!(message.contains("401"), "got: {message}"),
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[test]
    fn attempt_cap_reports_count_and_message() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        let (runner, sleeper) = runner(policy);
        let result: Result<(), _> = runner.run(|| Err(IngestError::Upstream {
            message: "code 1305: busy".into(),
        }));
        match result {
            Err(IngestError::RetriesExhausted { attempts, message }) => {
                assert_eq!(attempts, 3);
                assert!(message.contains("1305"));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(sleeper.0.lock().unwrap().len(), 2);
    }

    #[test]
    fn deadline_bounds_unlimited_retries() {
        let policy = RetryPolicy {
            deadline: Some(Duration::from_secs(1)),
            ..RetryPolicy::default()
        };
        let (runner, sleeper) = runner(policy);
        let result: Result<(), _> = runner.run(|| Err(status(429)));
        assert!(matches!(
            result,
            Err(IngestError::DeadlineExceeded { attempts: 1, .. })
        ));
        assert!(sleeper.0.lock().unwrap().is_empty());
    }

    #[test]
    fn classification() {
        let p = RetryPolicy::default();
        assert!(p.is_retryable("HTTP 429 Too Many Requests"));
        assert!(p.is_retryable("{\"error\":{\"code\":\"1305\"}}"));
        assert!(p.is_retryable("您的账户已达到速率限制，请求过多"));
        assert!(p.is_retryable("Rate limit reached"));
        assert!(!p.is_retryable("vision upstream error: 401: invalid api key"));
        assert!(!p.is_retryable("connection reset"));
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff(1), Duration::from_secs(3));
        assert_eq!(p.backoff(2), Duration::from_secs(6));
        assert_eq!(p.backoff(4), Duration::from_secs(24));
        assert_eq!(p.backoff(5), Duration::from_secs(30));
        assert_eq!(p.backoff(50), Duration::from_secs(30));
    }

    #[test]
    fn jitter_bound_is_min_of_ceiling_and_base() {
        let p = RetryPolicy {
            base: Duration::from_millis(200),
            ..RetryPolicy::default()
        };
        assert_eq!(p.jitter_bound(), Duration::from_millis(200));
        assert_eq!(RetryPolicy::default().jitter_bound(), Duration::from_millis(500));
    }

    #[test]
    fn random_jitter_stays_in_bounds() {
        let bound = Duration::from_millis(500);
        for _ in 0..100 {
            assert!(RandomJitter.sample(bound) <= bound);
        }
        assert_eq!(RandomJitter.sample(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn env_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_BACKOFF_BASE, "0.25"),
            (ENV_BACKOFF_CAP, "4"),
            (ENV_MAX_ATTEMPTS, "7"),
        ]
        .into_iter()
        .collect();
        let p = RetryPolicy::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(p.base, Duration::from_millis(250));
        assert_eq!(p.cap, Duration::from_secs(4));
        assert_eq!(p.max_attempts, 7);
    }

    #[test]
    fn bad_env_values_keep_defaults() {
        let p = RetryPolicy::from_lookup(|k| match k {
            ENV_BACKOFF_BASE => Some("fast".into()),
            ENV_MAX_ATTEMPTS => Some("-3".into()),
            _ => None,
        });
        assert_eq!(p, RetryPolicy::default());
    }

    #[test]
    fn out_of_range_env_values_keep_defaults() {
        for raw in ["1e30", "inf", "NaN", "-0.5"] {
            let p = RetryPolicy::from_lookup(|k| match k {
                ENV_BACKOFF_CAP | ENV_BACKOFF_BASE => Some(raw.into()),
                _ => None,
            });
            assert_eq!(p, RetryPolicy::default(), "value {raw}");
        }
    }

    #[test]
    fn pause_skips_zero() {
        let (runner, sleeper) = runner(RetryPolicy::default());
        runner.pause(Duration::ZERO);
        runner.pause(Duration::from_millis(300));
        assert_eq!(*sleeper.0.lock().unwrap(), vec![Duration::from_millis(300)]);
    }
}
