use std::time::Duration;
use tracing::warn;

use crate::errors::{DriverError, ServerErrorCode};

/// What the executor should do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetrySameNode(Duration),
    RetryNextNode(Duration),
    DontRetry,
}

/// Facts about a failed attempt the policy decides on
#[derive(Debug)]
pub struct RetryContext<'a> {
    pub error: &'a DriverError,
    pub idempotent: bool,
    /// Retries already performed for this submission
    pub retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Backoff {
    None,
    Constant(Duration),
    Exponential {
        initial_delay: Duration,
        max_delay: Duration,
        exponential_base: f64,
    },
}

/// Bounded retry policy applied per submission.
///
/// Connection-level unavailability is always safe to reroute because the
/// request never reached a coordinator. Timeouts and overload are rerouted
/// only for idempotent statements. Everything else is returned as is.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(Duration::from_millis(100), Duration::from_secs(10), 2.0, 2)
    }
}

impl RetryPolicy {
    pub fn fallthrough() -> Self {
        Self {
            max_retries: 0,
            backoff: Backoff::None,
        }
    }

    pub fn constant(delay: Duration, max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Constant(delay),
        }
    }

    pub fn exponential(
        initial_delay: Duration,
        max_delay: Duration,
        exponential_base: f64,
        max_retries: u32,
    ) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Exponential {
                initial_delay,
                max_delay,
                exponential_base,
            },
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before the retry following `retries` earlier retries
    pub fn delay_for(&self, retries: u32) -> Duration {
        match self.backoff {
            Backoff::None => Duration::ZERO,
            Backoff::Constant(delay) => delay,
            Backoff::Exponential {
                initial_delay,
                max_delay,
                exponential_base,
            } => {
                let factor = exponential_base.powi(retries as i32);
                let delay = initial_delay.as_secs_f64() * factor;
                if !delay.is_finite() || delay >= max_delay.as_secs_f64() {
                    max_delay
                } else {
                    Duration::from_secs_f64(delay)
                }
            }
        }
    }

    pub fn decide(&self, ctx: &RetryContext<'_>) -> RetryDecision {
        if ctx.retries >= self.max_retries {
            if self.max_retries > 0 {
                warn!("Giving up after {} retries: {}", ctx.retries, ctx.error);
            }
            return RetryDecision::DontRetry;
        }

        let delay = self.delay_for(ctx.retries);
        match ctx.error {
            DriverError::UnavailableError(_) => RetryDecision::RetryNextNode(delay),
            DriverError::TimeoutError(_) if ctx.idempotent => RetryDecision::RetryNextNode(delay),
            DriverError::ServerError {
                code: ServerErrorCode::Overloaded | ServerErrorCode::IsBootstrapping,
                ..
            } if ctx.idempotent => RetryDecision::RetryNextNode(delay),
            _ => RetryDecision::DontRetry,
        }
    }
}

/// Schedule for bringing a node that went down back into the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectionPolicy {
    Constant { delay: Duration },
    Exponential { base_delay: Duration, max_delay: Duration },
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        ReconnectionPolicy::Exponential {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(600),
        }
    }
}

impl ReconnectionPolicy {
    /// Delay before reconnection attempt number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            ReconnectionPolicy::Constant { delay } => delay,
            ReconnectionPolicy::Exponential {
                base_delay,
                max_delay,
            } => {
                let factor = 2u32.checked_pow(attempt.min(31)).unwrap_or(u32::MAX);
                base_delay
                    .checked_mul(factor)
                    .map(|d| d.min(max_delay))
                    .unwrap_or(max_delay)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(error: &DriverError, idempotent: bool, retries: u32) -> RetryContext<'_> {
        RetryContext {
            error,
            idempotent,
            retries,
        }
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let policy =
            RetryPolicy::exponential(Duration::from_millis(100), Duration::from_secs(1), 2.0, 10);
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(9), Duration::from_secs(1));
    }

    #[test]
    fn test_timeout_retried_only_when_idempotent() {
        let policy = RetryPolicy::constant(Duration::from_millis(5), 3);
        let err = DriverError::TimeoutError(Duration::from_secs(15));

        assert_eq!(
            policy.decide(&ctx(&err, true, 0)),
            RetryDecision::RetryNextNode(Duration::from_millis(5))
        );
        assert_eq!(policy.decide(&ctx(&err, false, 0)), RetryDecision::DontRetry);
    }

    #[test]
    fn test_unavailable_rerouted_until_bound() {
        let policy = RetryPolicy::constant(Duration::ZERO, 2);
        let err = DriverError::UnavailableError("node down".to_string());

        assert!(matches!(
            policy.decide(&ctx(&err, false, 1)),
            RetryDecision::RetryNextNode(_)
        ));
        assert_eq!(policy.decide(&ctx(&err, false, 2)), RetryDecision::DontRetry);
    }

    #[test]
    fn test_server_errors_not_retried() {
        let policy = RetryPolicy::default();
        let err = DriverError::invalid("unconfigured table");
        assert_eq!(policy.decide(&ctx(&err, true, 0)), RetryDecision::DontRetry);

        let fallthrough = RetryPolicy::fallthrough();
        let err = DriverError::UnavailableError("node down".to_string());
        assert_eq!(fallthrough.decide(&ctx(&err, true, 0)), RetryDecision::DontRetry);
    }

    #[test]
    fn test_reconnection_schedule() {
        let constant = ReconnectionPolicy::Constant {
            delay: Duration::from_secs(10),
        };
        assert_eq!(constant.delay_for(7), Duration::from_secs(10));

        let exponential = ReconnectionPolicy::Exponential {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        };
        assert_eq!(exponential.delay_for(0), Duration::from_secs(1));
        assert_eq!(exponential.delay_for(3), Duration::from_secs(8));
        assert_eq!(exponential.delay_for(40), Duration::from_secs(60));
    }
}
