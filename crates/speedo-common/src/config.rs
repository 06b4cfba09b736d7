use std::str::FromStr;
use std::time::Duration;

use crate::models::TestSelector;

pub const DEFAULT_PING_SAMPLES: u32 = 5;
pub const MAX_PING_SAMPLES: u32 = 1000;
pub const DEFAULT_PING_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(2);
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_millis(200);
pub const DEFAULT_JITTER_HOST: &str = "8.8.8.8";
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_BAR_WIDTH: usize = 20;

/// Named stress durations, in seconds.
pub const STRESS_TOKENS: [(char, u64); 7] = [
    ('L', 300),
    ('M', 600),
    ('H', 900),
    ('V', 1800),
    ('E', 3600),
    ('D', 86_400),
    ('Y', 31_557_600),
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid stress value '{0}'. Use L/M/H/V/E/D/Y or a number of seconds")]
    StressValue(String),
    #[error("ping sample count must be between 1 and {}", MAX_PING_SAMPLES)]
    PingSamples,
    #[error("ping timeout must be at least 1 ms")]
    PingTimeout,
}

/// Resolved value of the stress flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StressDuration(pub Duration);

impl FromStr for StressDuration {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let mut chars = trimmed.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            let upper = c.to_ascii_uppercase();
            if let Some((_, secs)) = STRESS_TOKENS.iter().find(|(token, _)| *token == upper) {
                return Ok(StressDuration(Duration::from_secs(*secs)));
            }
        }
        trimmed
            .parse::<u64>()
            .map(|secs| StressDuration(Duration::from_secs(secs)))
            .map_err(|_| ConfigError::StressValue(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    SingleShot,
    Stress { duration: Duration },
}

impl SessionMode {
    /// A zero-second stress value behaves like no stress value at all.
    pub fn from_stress(stress: Option<StressDuration>) -> Self {
        match stress {
            Some(StressDuration(duration)) if !duration.is_zero() => SessionMode::Stress { duration },
            _ => SessionMode::SingleShot,
        }
    }

    pub fn is_stress(&self) -> bool {
        matches!(self, SessionMode::Stress { .. })
    }
}

/// Everything the session loop needs; fixed once the CLI has been resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub mode: SessionMode,
    pub selector: TestSelector,
    pub start_delay: Duration,
    pub ping_samples: u32,
    pub ping_timeout: Duration,
    pub cooldown: Duration,
    pub probe_interval: Duration,
    pub bar_width: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: SessionMode::SingleShot,
            selector: TestSelector::All,
            start_delay: Duration::ZERO,
            ping_samples: DEFAULT_PING_SAMPLES,
            ping_timeout: Duration::from_millis(DEFAULT_PING_TIMEOUT_MS),
            cooldown: DEFAULT_COOLDOWN,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            bar_width: DEFAULT_BAR_WIDTH,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_PING_SAMPLES).contains(&self.ping_samples) {
            return Err(ConfigError::PingSamples);
        }
        if self.ping_timeout.is_zero() {
            return Err(ConfigError::PingTimeout);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stress_tokens_are_case_insensitive() {
        assert_eq!("L".parse(), Ok(StressDuration(Duration::from_secs(300))));
        assert_eq!("h".parse(), Ok(StressDuration(Duration::from_secs(900))));
        assert_eq!("y".parse(), Ok(StressDuration(Duration::from_secs(31_557_600))));
    }

    #[test]
    fn stress_accepts_literal_seconds() {
        assert_eq!("45".parse(), Ok(StressDuration(Duration::from_secs(45))));
        assert_eq!(" 7 ".parse(), Ok(StressDuration(Duration::from_secs(7))));
    }

    #[test]
    fn stress_rejects_garbage() {
        for bad in ["Q", "ten", "-5", "1.5", ""] {
            assert_eq!(
                bad.parse::<StressDuration>(),
                Err(ConfigError::StressValue(bad.to_string()))
            );
        }
    }

    #[test]
    fn zero_stress_is_single_shot() {
        assert_eq!(SessionMode::from_stress(None), SessionMode::SingleShot);
        assert_eq!(
            SessionMode::from_stress(Some(StressDuration(Duration::ZERO))),
            SessionMode::SingleShot
        );
        assert!(SessionMode::from_stress(Some(StressDuration(Duration::from_secs(1)))).is_stress());
    }

    #[test]
    fn validate_rejects_zero_ping_settings() {
        let mut config = SessionConfig::default();
        assert!(config.validate().is_ok());
        config.ping_samples = 0;
        assert_eq!(config.validate(), Err(ConfigError::PingSamples));
        config.ping_samples = 3;
        config.ping_timeout = Duration::ZERO;
        assert_eq!(config.validate(), Err(ConfigError::PingTimeout));
    }

    #[test]
    fn validate_caps_ping_samples() {
        let mut config = SessionConfig {
            ping_samples: MAX_PING_SAMPLES,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        config.ping_samples = u32::MAX;
        assert_eq!(config.validate(), Err(ConfigError::PingSamples));
        assert_eq!(
            ConfigError::PingSamples.to_string(),
            "ping sample count must be between 1 and 1000"
        );
    }
}
