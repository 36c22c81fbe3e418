//! Configuration for the frontend.

use rand::Rng;
use shardline_access::{
    AbiVersion, ClientIdentifier, FrontendIdentifier, FrontendType, InvalidIdentifierError,
    MemberName,
};
use std::time::Duration;

/// Configuration for a frontend client.
#[derive(Debug, Clone)]
pub struct FrontendConfig {
    /// Cluster member hosting the frontend.
    pub member_name: MemberName,
    /// Kind of frontend on that member.
    pub frontend_type: FrontendType,
    /// Incarnation of the frontend; bump it on every restart.
    pub generation: u64,
    /// Oldest ABI version offered at connect.
    pub min_version: AbiVersion,
    /// Newest ABI version offered at connect.
    pub max_version: AbiVersion,
    /// Overall deadline for one request, retries included.
    pub request_timeout: Duration,
    /// Retry configuration.
    pub retry: RetryConfig,
}

impl FrontendConfig {
    /// Creates a configuration offering every released version.
    pub fn new(member_name: MemberName, frontend_type: FrontendType) -> Self {
        Self {
            member_name,
            frontend_type,
            generation: 0,
            min_version: AbiVersion::Boron,
            max_version: AbiVersion::current(),
            request_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }

    /// Creates a configuration from plain names.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidIdentifierError`] if either name is invalid.
    pub fn for_member(
        member_name: &str,
        frontend_type: &str,
    ) -> Result<Self, InvalidIdentifierError> {
        Ok(Self::new(MemberName::new(member_name)?, FrontendType::new(frontend_type)?))
    }

    /// Sets the generation.
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    /// Sets the offered version range.
    pub fn with_versions(mut self, min: AbiVersion, max: AbiVersion) -> Self {
        self.min_version = min;
        self.max_version = max;
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Identifier of this frontend generation.
    pub fn client_identifier(&self) -> ClientIdentifier {
        let frontend =
            FrontendIdentifier::new(self.member_name.clone(), self.frontend_type.clone());
        ClientIdentifier::new(frontend, self.generation)
    }
}

/// Resend policy for requests that got a retriable failure or no reply.
///
/// Every resend reuses the original sequence number, so the backend either
/// replays its cached reply or processes the request for the first time.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Sends per request, the first one included. Never zero.
    pub max_attempts: u32,
    /// Pause before the first resend.
    pub initial_delay: Duration,
    /// Upper bound for any single pause.
    pub max_delay: Duration,
    /// Factor applied to the pause after each resend.
    pub multiplier: u32,
    /// Randomize each pause by up to a quarter on top.
    pub jitter: bool,
}

impl RetryConfig {
    /// Policy allowing `max_attempts` sends with doubling pauses.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            multiplier: 2,
            jitter: true,
        }
    }

    /// Sets the pause before the first resend.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the pause cap.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the growth factor.
    pub fn with_multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = multiplier.max(1);
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Pause before send number `attempt` (0 is the first send).
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let mut delay = self.initial_delay.min(self.max_delay);
        for _ in 1..attempt {
            if delay >= self.max_delay {
                break;
            }
            delay = delay.saturating_mul(self.multiplier).min(self.max_delay);
        }

        if self.jitter && !delay.is_zero() {
            let spread = delay / 4;
            delay + spread.mul_f64(rand::thread_rng().gen_range(0.0..1.0))
        } else {
            delay
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frontend_config_builder() {
        let config = FrontendConfig::for_member("member-1", "datastore")
            .unwrap()
            .with_generation(3)
            .with_versions(AbiVersion::NeonSr2, AbiVersion::SodiumSr1)
            .with_request_timeout(Duration::from_secs(5));

        assert_eq!(config.client_identifier().to_string(), "member-1-frontend-datastore-fe-3");
        assert_eq!(config.min_version, AbiVersion::NeonSr2);
        assert_eq!(config.max_version, AbiVersion::SodiumSr1);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn invalid_names_are_rejected() {
        assert!(FrontendConfig::for_member("", "datastore").is_err());
        assert!(FrontendConfig::for_member("member-1", "data store").is_err());
    }

    #[test]
    fn at_least_one_send() {
        assert_eq!(RetryConfig::new(0).max_attempts, 1);
        assert_eq!(RetryConfig::new(0).with_multiplier(0).multiplier, 1);
    }

    #[test]
    fn backoff_grows_until_capped() {
        let retry = RetryConfig::new(8)
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(700))
            .with_jitter(false);

        let pauses: Vec<_> = (0..6).map(|n| retry.backoff(n).as_millis()).collect();
        assert_eq!(pauses, vec![0, 100, 200, 400, 700, 700]);
    }

    #[test]
    fn jitter_stays_within_a_quarter() {
        let retry = RetryConfig::new(3).with_initial_delay(Duration::from_millis(80));
        for _ in 0..32 {
            let pause = retry.backoff(1);
            assert!(pause >= Duration::from_millis(80));
            assert!(pause <= Duration::from_millis(100));
        }
        assert_eq!(retry.backoff(0), Duration::ZERO);
    }
}
