use std::time::Duration;

/// Bounded, fixed-interval reconnect schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    interval_ms: u64,
    max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(interval_ms: u64, max_attempts: u32) -> Self {
        Self {
            interval_ms,
            max_attempts,
        }
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before reconnect attempt `attempt` (0-based), or `None` once exhausted.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        Some(Duration::from_millis(self.interval_ms))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(3_000, 10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uses_fixed_interval_for_every_attempt() {
        let policy = ReconnectPolicy::new(250, 3);
        assert_eq!(policy.delay_for_attempt(0), Some(Duration::from_millis(250)));
        assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(250)));
    }

    #[test]
    fn stops_after_max_attempts() {
        let policy = ReconnectPolicy::new(250, 3);
        assert_eq!(policy.delay_for_attempt(3), None);
        assert_eq!(policy.delay_for_attempt(u32::MAX), None);
    }

    #[test]
    fn zero_attempts_never_reconnects() {
        assert_eq!(ReconnectPolicy::new(1_000, 0).delay_for_attempt(0), None);
    }

    #[test]
    fn defaults_match_push_channel_settings() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.interval_ms(), 3_000);
        assert_eq!(policy.max_attempts(), 10);
    }
}
