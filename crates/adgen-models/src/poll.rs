//! Polling ceilings for remote jobs.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fixed-interval polling with a hard attempt ceiling.
///
/// Total wait is bounded by `interval * max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    #[serde(with = "duration_millis")]
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub const fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Speech synthesis: 20 reads, 3 seconds apart.
    pub const fn speech() -> Self {
        Self::new(Duration::from_secs(3), 20)
    }

    /// Avatar video generation: 30 reads, 2 seconds apart.
    pub const fn avatar() -> Self {
        Self::new(Duration::from_secs(2), 30)
    }

    /// Override from `<PREFIX>_POLL_INTERVAL_MS` and `<PREFIX>_POLL_MAX_ATTEMPTS`.
    pub fn from_env(prefix: &str, default: Self) -> Self {
        let interval = std::env::var(format!("{prefix}_POLL_INTERVAL_MS"))
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(default.interval);
        let max_attempts = std::env::var(format!("{prefix}_POLL_MAX_ATTEMPTS"))
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(default.max_attempts);

        Self::new(interval, max_attempts)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert_eq!(PollPolicy::speech().max_attempts, 20);
        assert_eq!(PollPolicy::speech().interval, Duration::from_secs(3));
        assert_eq!(PollPolicy::avatar().max_attempts, 30);
        assert_eq!(PollPolicy::avatar().interval, Duration::from_secs(2));
    }

    #[test]
    fn test_from_env_falls_back_on_garbage() {
        std::env::set_var("ADGEN_TEST_GARBAGE_POLL_INTERVAL_MS", "soon");
        std::env::set_var("ADGEN_TEST_GARBAGE_POLL_MAX_ATTEMPTS", "0");
        let policy = PollPolicy::from_env("ADGEN_TEST_GARBAGE", PollPolicy::avatar());
        assert_eq!(policy, PollPolicy::avatar());
    }

    #[test]
    fn test_from_env_override() {
        std::env::set_var("ADGEN_TEST_OVERRIDE_POLL_INTERVAL_MS", "5");
        std::env::set_var("ADGEN_TEST_OVERRIDE_POLL_MAX_ATTEMPTS", "4");
        let policy = PollPolicy::from_env("ADGEN_TEST_OVERRIDE", PollPolicy::speech());
        assert_eq!(policy, PollPolicy::new(Duration::from_millis(5), 4));
    }
}
