//! Protocol configuration
//!
//! Settings a registry applies to every loan it creates. Loaded from JSON;
//! missing fields take their defaults.
//!
//! ```
//! use p2p_lending_core_rs::config::ProtocolConfig;
//! use p2p_lending_core_rs::schedule::InstallmentPlan;
//!
//! let config = ProtocolConfig::from_json(
//!     r#"{"platform_fee_bps": 100, "schedule": {"installments": {"type": "fixed", "count": 4}}}"#,
//! )
//! .unwrap();
//! assert_eq!(config.platform_fee_bps, 100);
//! assert_eq!(config.schedule.installments, InstallmentPlan::Fixed { count: 4 });
//! assert!(config.enforce_oracle_price);
//! ```

use crate::models::ids::PartyId;
use crate::models::loan::LoanPolicy;
use crate::models::money::Bps;
use crate::schedule::{is_valid_fee, InstallmentPlan, ScheduleConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_PLATFORM_FEE_BPS: Bps = 50;
pub const DEFAULT_PLATFORM_ACCOUNT: &str = "PLATFORM";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid config JSON: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Account credited with installment fees
    pub platform_account: PartyId,

    /// Fee carved out of each installment, in basis points
    pub platform_fee_bps: Bps,

    pub schedule: ScheduleConfig,

    /// Cross-check the LTV invariant against the oracle when terms finalize
    pub enforce_oracle_price: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            platform_account: PartyId::from(DEFAULT_PLATFORM_ACCOUNT),
            platform_fee_bps: DEFAULT_PLATFORM_FEE_BPS,
            schedule: ScheduleConfig::default(),
            enforce_oracle_price: true,
        }
    }
}

impl ProtocolConfig {
    /// Parse and validate a JSON document
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: ProtocolConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.platform_account.as_str().is_empty() {
            return Err(ConfigError::Invalid(
                "platform_account must not be empty".to_string(),
            ));
        }
        if !is_valid_fee(self.platform_fee_bps) {
            return Err(ConfigError::Invalid(format!(
                "platform_fee_bps must be at most 10000, got {}",
                self.platform_fee_bps
            )));
        }
        if self.schedule.max_installments == 0 {
            return Err(ConfigError::Invalid(
                "max_installments must be positive".to_string(),
            ));
        }
        match self.schedule.installments {
            InstallmentPlan::Fixed { count: 0 } => Err(ConfigError::Invalid(
                "fixed installment count must be positive".to_string(),
            )),
            InstallmentPlan::Periodic { period_seconds: 0 } => Err(ConfigError::Invalid(
                "installment period must be positive".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// The per-loan view of this config
    pub fn loan_policy(&self) -> LoanPolicy {
        LoanPolicy {
            platform_account: self.platform_account.clone(),
            platform_fee_bps: self.platform_fee_bps,
            schedule: self.schedule,
            enforce_oracle_price: self.enforce_oracle_price,
        }
    }
}
