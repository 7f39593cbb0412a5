use core::{fmt, ops::RangeInclusive, str::FromStr, time::Duration};

use crate::{Error, Result, layout::BitLayout};

/// Which clock drives the generator, and how it coordinates with the store.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum ClockMode {
    /// Monotonic clock anchored to the lease, renewed by a background task.
    /// An expired lease fails the call with [`Error::LeaseExpired`].
    #[default]
    MonotonicLease,
    /// Wall clock with rollback detection and no background task. Leases are
    /// requested synchronously on expiry or exhaustion during a rollback.
    WallClockFallback,
}

impl ClockMode {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MonotonicLease => "monotonic-lease",
            Self::WallClockFallback => "wall-clock-fallback",
        }
    }
}

impl fmt::Display for ClockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClockMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "monotonic-lease" => Ok(Self::MonotonicLease),
            "wall-clock-fallback" => Ok(Self::WallClockFallback),
            other => Err(Error::InvalidConfig {
                reason: format!(
                    "unknown clock mode `{other}` (expected `monotonic-lease` or `wall-clock-fallback`)"
                ),
            }),
        }
    }
}

/// What a generator does when the sequence of the current time unit is
/// used up.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ExhaustionStrategy {
    /// Spin for `interval`, then retry. Keeps tail latency low for fine time
    /// units at the cost of CPU.
    BusyWait { interval: Duration },
    /// Sleep exactly until the next unit boundary, then retry. Suited to
    /// coarse time units.
    SleepUntilNextUnit,
}

impl Default for ExhaustionStrategy {
    fn default() -> Self {
        Self::BusyWait {
            interval: Duration::from_micros(5),
        }
    }
}

/// Runtime configuration of a generator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// Bit layout of issued IDs. Fixed for the life of a deployment.
    pub layout: BitLayout,
    /// Validity requested on every grant and renewal.
    pub lease_ttl: Duration,
    /// Accepted range for `lease_ttl`.
    pub ttl_bounds: RangeInclusive<Duration>,
    /// Diagnostic label sent with allocation requests.
    pub owner_label: String,
    pub clock_mode: ClockMode,
    pub exhaustion: ExhaustionStrategy,
    /// Delay before retrying a failed renewal.
    pub renew_retry_delay: Duration,
    /// Upper bound on each store call.
    pub store_timeout: Duration,
    /// Attempts for the initial grant before startup fails.
    pub grant_attempts: u32,
    /// Delay between initial grant attempts.
    pub grant_backoff: Duration,
    /// Longest a wall-clock generator stays in fallback before forcing a
    /// fresh lease.
    pub max_fallback: Duration,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            layout: BitLayout::TIME_CHANNEL,
            lease_ttl: Duration::from_secs(12 * 60),
            ttl_bounds: Duration::from_secs(1)..=Duration::from_secs(30 * 60),
            owner_label: "unknown".to_string(),
            clock_mode: ClockMode::default(),
            exhaustion: ExhaustionStrategy::default(),
            renew_retry_delay: Duration::from_secs(5),
            store_timeout: Duration::from_secs(3),
            grant_attempts: 3,
            grant_backoff: Duration::from_secs(1),
            max_fallback: Duration::from_secs(1),
        }
    }
}

impl GeneratorConfig {
    /// Default configuration with the given layout.
    pub fn with_layout(layout: BitLayout) -> Self {
        Self {
            layout,
            ..Self::default()
        }
    }

    /// Checks every field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLayout`] for a bad layout and
    /// [`Error::InvalidConfig`] for any other out-of-range value.
    pub fn validate(&self) -> Result<()> {
        self.layout.validate()?;

        let (min, max) = (*self.ttl_bounds.start(), *self.ttl_bounds.end());
        if min.is_zero() || min > max {
            return Err(invalid(format!("ttl bounds {min:?}..={max:?} are empty")));
        }
        if !self.ttl_bounds.contains(&self.lease_ttl) {
            return Err(invalid(format!(
                "lease ttl {:?} outside {min:?}..={max:?}",
                self.lease_ttl
            )));
        }
        if self.lease_ttl < Duration::from_millis(2) {
            return Err(invalid("lease ttl must be at least 2ms".to_string()));
        }
        if self.grant_attempts == 0 {
            return Err(invalid("grant attempts must be at least 1".to_string()));
        }
        if self.store_timeout.is_zero() {
            return Err(invalid("store timeout must be non-zero".to_string()));
        }
        if self.renew_retry_delay.is_zero() {
            return Err(invalid("renew retry delay must be non-zero".to_string()));
        }
        if let ExhaustionStrategy::BusyWait { interval } = self.exhaustion {
            if interval.is_zero() {
                return Err(invalid("busy-wait interval must be non-zero".to_string()));
            }
        }
        Ok(())
    }
}

fn invalid(reason: String) -> Error {
    Error::InvalidConfig { reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        GeneratorConfig::default().validate().unwrap();
        GeneratorConfig::with_layout(BitLayout::TIMING_BRICK)
            .validate()
            .unwrap();
    }

    #[test]
    fn ttl_must_respect_bounds() {
        let config = GeneratorConfig {
            lease_ttl: Duration::from_millis(500),
            ..GeneratorConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig { .. })));

        let config = GeneratorConfig {
            lease_ttl: Duration::from_secs(31 * 60),
            ..GeneratorConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig { .. })));

        let config = GeneratorConfig {
            lease_ttl: Duration::from_millis(200),
            ttl_bounds: Duration::from_millis(100)..=Duration::from_secs(1),
            ..GeneratorConfig::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn rejects_zero_attempts_and_timeouts() {
        let config = GeneratorConfig {
            grant_attempts: 0,
            ..GeneratorConfig::default()
        };
        assert!(config.validate().is_err());

        let config = GeneratorConfig {
            store_timeout: Duration::ZERO,
            ..GeneratorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn clock_mode_parses_its_display_form() {
        for mode in [ClockMode::MonotonicLease, ClockMode::WallClockFallback] {
            assert_eq!(mode.to_string().parse::<ClockMode>().unwrap(), mode);
        }
        assert!("sundial".parse::<ClockMode>().is_err());
    }
}
