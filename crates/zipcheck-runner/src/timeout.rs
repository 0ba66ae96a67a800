//! Deadline enforcement for analysis tool runs.
//!
//! `overall_seconds` bounds the wall-clock time of one invocation (0 disables
//! the deadline). Once it passes, the child gets SIGTERM and then
//! `grace_seconds` to exit before it is killed.

use std::time::{Duration, Instant};

/// Upper bound for `overall_seconds`
pub const MAX_OVERALL_SECONDS: u64 = 86_400;

/// Upper bound for `grace_seconds`
pub const MAX_GRACE_SECONDS: u64 = 300;

/// Timeout configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Maximum wall-clock time per run (default: 600, 0 = no deadline)
    pub overall_seconds: u64,

    /// Time between SIGTERM and SIGKILL (default: 5)
    pub grace_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            overall_seconds: 600,
            grace_seconds: 5,
        }
    }
}

impl TimeoutConfig {
    /// No deadline
    pub fn unbounded() -> Self {
        Self {
            overall_seconds: 0,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), TimeoutValidationError> {
        if self.overall_seconds > MAX_OVERALL_SECONDS {
            return Err(TimeoutValidationError::OverallOutOfBounds {
                value: self.overall_seconds,
            });
        }

        if self.grace_seconds > MAX_GRACE_SECONDS {
            return Err(TimeoutValidationError::GraceOutOfBounds {
                value: self.grace_seconds,
            });
        }

        Ok(())
    }

    pub fn has_deadline(&self) -> bool {
        self.overall_seconds > 0
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_seconds)
    }
}

/// Timeout validation errors
#[derive(Debug, thiserror::Error)]
pub enum TimeoutValidationError {
    #[error("overall_seconds must be in [0, 86400], got {value}")]
    OverallOutOfBounds { value: u64 },

    #[error("grace_seconds must be in [0, 300], got {value}")]
    GraceOutOfBounds { value: u64 },
}

/// Tracks elapsed time for a single run.
#[derive(Debug)]
pub struct TimeoutEnforcer {
    config: TimeoutConfig,
    start_time: Instant,
}

impl TimeoutEnforcer {
    pub fn new(config: TimeoutConfig) -> Self {
        Self {
            config,
            start_time: Instant::now(),
        }
    }

    /// True once the deadline has passed
    pub fn expired(&self) -> bool {
        self.config.has_deadline()
            && self.elapsed() > Duration::from_secs(self.config.overall_seconds)
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Remaining time before the deadline, `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        if !self.config.has_deadline() {
            return None;
        }
        Some(Duration::from_secs(self.config.overall_seconds).saturating_sub(self.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_default_config() {
        let config = TimeoutConfig::default();
        assert_eq!(config.overall_seconds, 600);
        assert_eq!(config.grace_seconds, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_bounds() {
        let config = TimeoutConfig {
            overall_seconds: MAX_OVERALL_SECONDS + 1,
            grace_seconds: 5,
        };
        assert!(matches!(
            config.validate(),
            Err(TimeoutValidationError::OverallOutOfBounds { .. })
        ));

        let config = TimeoutConfig {
            overall_seconds: 10,
            grace_seconds: MAX_GRACE_SECONDS + 1,
        };
        assert!(matches!(
            config.validate(),
            Err(TimeoutValidationError::GraceOutOfBounds { .. })
        ));

        assert!(TimeoutConfig::unbounded().validate().is_ok());
    }

    #[test]
    fn test_unbounded_never_expires() {
        let enforcer = TimeoutEnforcer::new(TimeoutConfig::unbounded());
        assert!(!enforcer.expired());
        assert_eq!(enforcer.remaining(), None);
    }

    #[test]
    fn test_enforcer_expires() {
        let enforcer = TimeoutEnforcer::new(TimeoutConfig {
            overall_seconds: 1,
            grace_seconds: 0,
        });
        assert!(!enforcer.expired());
        assert!(enforcer.remaining().unwrap() <= Duration::from_secs(1));

        sleep(Duration::from_millis(1100));
        assert!(enforcer.expired());
        assert_eq!(enforcer.remaining(), Some(Duration::ZERO));
    }
}
