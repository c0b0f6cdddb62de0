//! Flow Timing Configuration

use std::time::Duration;

use crate::error::{FlowError, Result};

/// Timing constants shared by every flow
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaygateConfig {
    /// How long an unpaid charge is reused instead of creating a new one
    pub reuse_window: Duration,

    /// Progress flow: delay between status polls
    pub poll_interval: Duration,

    /// Progress flow: give up after this long
    pub max_wait: Duration,

    /// Background sweep of expired records
    pub sweep_interval: Duration,

    /// Elicitation flow: prompt rounds before answering `pending`
    pub elicitation_max_attempts: u32,

    /// Elicitation flow: pause between prompt rounds
    pub elicitation_retry_delay: Duration,

    /// TTL of pending-payment records
    pub state_ttl: Duration,
}

impl Default for PaygateConfig {
    fn default() -> Self {
        Self {
            reuse_window: Duration::from_secs(60 * 60),
            poll_interval: Duration::from_secs(3),
            max_wait: Duration::from_secs(15 * 60),
            sweep_interval: Duration::from_secs(10 * 60),
            elicitation_max_attempts: 5,
            elicitation_retry_delay: Duration::from_secs(2),
            state_ttl: Duration::from_secs(60 * 60),
        }
    }
}

fn env_secs(name: &str, default: Duration) -> Result<Duration> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| FlowError::Config(format!("{} must be a whole number of seconds, got '{}'", name, raw))),
        Err(_) => Ok(default),
    }
}

impl PaygateConfig {
    /// Defaults overridden by `PAYGATE_*` environment variables (seconds)
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let attempts = match std::env::var("PAYGATE_ELICITATION_ATTEMPTS") {
            Ok(raw) => raw.trim().parse::<u32>().map_err(|_| {
                FlowError::Config(format!("PAYGATE_ELICITATION_ATTEMPTS must be a number, got '{}'", raw))
            })?,
            Err(_) => defaults.elicitation_max_attempts,
        };

        let config = Self {
            reuse_window: env_secs("PAYGATE_REUSE_WINDOW_SECS", defaults.reuse_window)?,
            poll_interval: env_secs("PAYGATE_POLL_INTERVAL_SECS", defaults.poll_interval)?,
            max_wait: env_secs("PAYGATE_MAX_WAIT_SECS", defaults.max_wait)?,
            sweep_interval: env_secs("PAYGATE_SWEEP_INTERVAL_SECS", defaults.sweep_interval)?,
            elicitation_max_attempts: attempts,
            elicitation_retry_delay: env_secs(
                "PAYGATE_ELICITATION_RETRY_DELAY_SECS",
                defaults.elicitation_retry_delay,
            )?,
            state_ttl: env_secs("PAYGATE_STATE_TTL_SECS", defaults.state_ttl)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.elicitation_max_attempts == 0 {
            return Err(FlowError::Config("elicitation attempts must be at least 1".into()));
        }
        if self.poll_interval.is_zero() || self.sweep_interval.is_zero() {
            return Err(FlowError::Config("poll and sweep intervals must be non-zero".into()));
        }
        if self.max_wait < self.poll_interval {
            return Err(FlowError::Config("max wait must cover at least one poll interval".into()));
        }
        Ok(())
    }
}
