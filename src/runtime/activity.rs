/// Activities invoked by chat instances and the engine-side invoker
///
/// An activity is a named `String -> String` operation registered on a
/// worker. The invoker owns the time budget and the retry policy; the
/// control loop itself never retries.

use crate::error::ActivityError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// A named operation executed on behalf of a workflow instance
#[async_trait]
pub trait Activity: Send + Sync + std::fmt::Debug {
    /// Registration name, used in logs
    fn name(&self) -> &str;

    /// Run one attempt
    async fn execute(&self, input: String) -> Result<String, ActivityError>;
}

/// Pure greeting transform: `Hello, <input>!`
pub fn greet(input: &str) -> String {
    format!("Hello, {}!", input)
}

/// The Greet activity registered by the chat worker
#[derive(Debug, Default, Clone)]
pub struct GreetActivity;

#[async_trait]
impl Activity for GreetActivity {
    fn name(&self) -> &str {
        "Greet"
    }

    async fn execute(&self, input: String) -> Result<String, ActivityError> {
        Ok(greet(&input))
    }
}

/// Engine retry policy for activities that could not be reached
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the second attempt
    pub initial_interval: Duration,
    /// Multiplier applied to the delay after each retry
    pub backoff_coefficient: f64,
    /// Upper bound for a single delay
    pub maximum_interval: Duration,
    /// Total attempts including the first one
    pub maximum_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(100),
            backoff_coefficient: 2.0,
            maximum_interval: Duration::from_secs(5),
            maximum_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Delay after the given (1-based) failed attempt
    fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.backoff_coefficient.powi(attempt.saturating_sub(1) as i32);
        self.initial_interval
            .mul_f64(factor)
            .min(self.maximum_interval)
    }
}

/// Options applied to every activity attempt of an instance
#[derive(Debug, Clone)]
pub struct ActivityOptions {
    /// Budget for a single attempt
    pub start_to_close_timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            start_to_close_timeout: Duration::from_secs(10),
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Runs an activity under its options
#[derive(Debug, Clone)]
pub struct ActivityInvoker {
    activity: Arc<dyn Activity>,
    options: ActivityOptions,
}

impl ActivityInvoker {
    pub fn new(activity: Arc<dyn Activity>, options: ActivityOptions) -> Self {
        Self { activity, options }
    }

    pub fn activity_name(&self) -> &str {
        self.activity.name()
    }

    /// Invoke the activity, retrying only `Unavailable` failures
    pub async fn invoke(&self, input: &str) -> Result<String, ActivityError> {
        let policy = &self.options.retry_policy;
        let mut attempt = 1;

        loop {
            let outcome = tokio::time::timeout(
                self.options.start_to_close_timeout,
                self.activity.execute(input.to_string()),
            )
            .await
            .unwrap_or(Err(ActivityError::TimedOut(self.options.start_to_close_timeout)));

            match outcome {
                Err(ActivityError::Unavailable(reason)) if attempt < policy.maximum_attempts => {
                    let delay = policy.delay_after(attempt);
                    tracing::warn!(
                        activity = self.activity.name(),
                        attempt,
                        ?delay,
                        "activity unavailable, retrying: {}",
                        reason
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
