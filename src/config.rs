use std::path::Path;
use std::time::Duration;

use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::decimal::Rate;
use crate::errors::{LedgerError, Result};
use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::interest::PenaltyConfig;

/// ledger configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub interest_config: InterestConfig,
    pub penalty_config: PenaltyConfig,
    pub scheduler_config: SchedulerConfig,
    pub gateway_config: GatewayConfig,
    pub retry_policy: RetryPolicy,
    pub event_config: EventConfig,
}

/// interest configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterestConfig {
    /// compounded once per day over the tenure
    pub daily_rate: Rate,
}

/// reconciliation scheduling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub interval_secs: u64,
    /// late installments on one loan that default it; `None` keeps the
    /// defaulted status unused
    pub default_after_late_installments: Option<u32>,
}

/// external capability settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// upper bound on any single charge, disburse or notify call
    pub call_timeout_ms: u64,
    /// payout destination for loans that did not provide one
    pub default_payout_ref: Option<String>,
}

/// backoff for persisting a settlement after a confirmed charge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// `None` retries until the write is durable
    pub max_attempts: Option<u32>,
}

/// in-memory event log retention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// oldest events are dropped past this many
    pub max_events: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            interest_config: InterestConfig::default(),
            penalty_config: PenaltyConfig::default(),
            scheduler_config: SchedulerConfig::default(),
            gateway_config: GatewayConfig::default(),
            retry_policy: RetryPolicy::default(),
            event_config: EventConfig::default(),
        }
    }
}

impl Default for InterestConfig {
    fn default() -> Self {
        Self {
            daily_rate: Rate::from_decimal(dec!(0.0004)),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 24 * 60 * 60,
            default_after_late_installments: None,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 10_000,
            default_payout_ref: None,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 100,
            max_delay_ms: 30_000,
            max_attempts: None,
        }
    }
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            max_events: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl LedgerConfig {
    /// parse and validate a JSON document; missing fields take defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: LedgerConfig = serde_json::from_str(json).map_err(|e| {
            LedgerError::InvalidConfiguration {
                message: e.to_string(),
            }
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| LedgerError::InvalidConfiguration {
            message: format!("{}: {}", path.display(), e),
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interest_config.daily_rate.is_negative() {
            return Err(invalid(format!(
                "daily rate must not be negative, got {}",
                self.interest_config.daily_rate
            )));
        }
        if !self.penalty_config.flat_amount.is_positive() {
            return Err(invalid(format!(
                "penalty must be positive, got {}",
                self.penalty_config.flat_amount
            )));
        }
        if self.scheduler_config.interval_secs == 0 {
            return Err(invalid("scheduler interval must be positive".to_string()));
        }
        if self.scheduler_config.default_after_late_installments == Some(0) {
            return Err(invalid("default threshold must be at least 1".to_string()));
        }
        if self.gateway_config.call_timeout_ms == 0 {
            return Err(invalid("gateway timeout must be positive".to_string()));
        }
        if self.retry_policy.base_delay_ms > self.retry_policy.max_delay_ms {
            return Err(invalid("retry base delay exceeds max delay".to_string()));
        }
        if self.retry_policy.max_attempts == Some(0) {
            return Err(invalid("retry attempts must be at least 1".to_string()));
        }
        if self.event_config.max_events == 0 {
            return Err(invalid("event log must keep at least one event".to_string()));
        }
        Ok(())
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_config.interval_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway_config.call_timeout_ms)
    }
}

impl RetryPolicy {
    /// delay before retry number `attempt` (1-based), doubling up to the cap
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }
}

fn invalid(message: String) -> LedgerError {
    LedgerError::InvalidConfiguration { message }
}
