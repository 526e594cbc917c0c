//! Health verification
//!
//! After the supervisor has (re)started the daemon, the run only succeeds
//! once the daemon answers a health check through the store's own client.
//! Polling uses a fixed interval and a bounded number of attempts; running
//! out of attempts is fatal and is not retried at a higher level.

use std::thread;
use std::time::Duration;
use tracing::{debug, info};

use crate::client::MembershipClient;
use crate::error::{MemberError, MemberResult};

/// Retry budget for health polling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    /// Maximum number of health checks
    pub max_attempts: u32,
    /// Pause between consecutive checks
    pub interval: Duration,
}

impl Default for HealthPolicy {
    /// 20 attempts, 2 seconds apart
    fn default() -> Self {
        HealthPolicy {
            max_attempts: 20,
            interval: Duration::from_secs(2),
        }
    }
}

impl HealthPolicy {
    /// Upper bound on time spent sleeping between checks
    pub fn ceiling(&self) -> Duration {
        self.interval * self.max_attempts.saturating_sub(1)
    }
}

/// Polls a daemon's endpoint until it reports healthy
pub struct HealthVerifier<'a, C: MembershipClient> {
    client: &'a C,
    policy: HealthPolicy,
}

impl<'a, C: MembershipClient> HealthVerifier<'a, C> {
    pub fn new(client: &'a C, policy: HealthPolicy) -> Self {
        Self { client, policy }
    }

    /// Poll `endpoint`; returns the number of attempts used
    pub fn verify(&self, endpoint: &str) -> MemberResult<u32> {
        let endpoints = [endpoint.to_string()];
        let mut last_error = String::from("no health check attempted");
        info!(
            endpoint,
            attempts = self.policy.max_attempts,
            ceiling_secs = self.policy.ceiling().as_secs(),
            "waiting for daemon to report healthy"
        );

        for attempt in 1..=self.policy.max_attempts {
            match self.client.endpoint_health(&endpoints) {
                Ok(()) => {
                    info!(endpoint, attempt, "daemon reports healthy");
                    return Ok(attempt);
                }
                Err(err) => {
                    debug!(endpoint, attempt, error = %err, "daemon not healthy yet");
                    last_error = err.to_string();
                }
            }
            if attempt < self.policy.max_attempts {
                thread::sleep(self.policy.interval);
            }
        }

        Err(MemberError::HealthTimeout {
            attempts: self.policy.max_attempts,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockMembershipClient;

    const ENDPOINT: &str = "http://10.0.0.1:2379";

    fn fast(max_attempts: u32) -> HealthPolicy {
        HealthPolicy {
            max_attempts,
            interval: Duration::ZERO,
        }
    }

    #[test]
    fn test_default_policy_is_twenty_attempts_two_seconds_apart() {
        let policy = HealthPolicy::default();
        assert_eq!(policy.max_attempts, 20);
        assert_eq!(policy.interval, Duration::from_secs(2));
        assert_eq!(policy.ceiling(), Duration::from_secs(38));
    }

    #[test]
    fn test_healthy_on_first_attempt() {
        let client = MockMembershipClient::new().with_healthy_endpoint(ENDPOINT);
        let attempts = HealthVerifier::new(&client, fast(20)).verify(ENDPOINT).unwrap();
        assert_eq!(attempts, 1);
    }

    #[test]
    fn test_becomes_healthy_within_budget() {
        let client = MockMembershipClient::new().healthy_after(ENDPOINT, 4);
        let attempts = HealthVerifier::new(&client, fast(20)).verify(ENDPOINT).unwrap();
        assert_eq!(attempts, 5);
        assert_eq!(client.health_checks(ENDPOINT), 5);
    }

    #[test]
    fn test_never_healthy_times_out() {
        let client = MockMembershipClient::new();
        let err = HealthVerifier::new(&client, fast(20)).verify(ENDPOINT).unwrap_err();
        match err {
            MemberError::HealthTimeout { attempts, .. } => assert_eq!(attempts, 20),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(client.health_checks(ENDPOINT), 20);
    }

    #[test]
    fn test_healthy_too_late_times_out() {
        let client = MockMembershipClient::new().healthy_after(ENDPOINT, 3);
        let err = HealthVerifier::new(&client, fast(3)).verify(ENDPOINT).unwrap_err();
        assert_eq!(err.exit_code(), 5);
    }
}
