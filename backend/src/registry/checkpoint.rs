//! Checkpoint - Save/Restore Registry State
//!
//! A `RegistrySnapshot` captures every loan in insertion order together with
//! a hash of the configuration it was taken under.
//!
//! # Critical Invariants
//!
//! - **Config Matching**: a snapshot can only be restored under the config
//!   whose hash it carries
//! - **Principal Conservation**: `outstanding + paid_principal == loan_amount`
//!   for every activated loan
//! - **Collateral Conservation**: `escrowed + returned + claimed ==
//!   collateral_amount` once collateral has arrived
//! - **Directory Integrity**: no duplicate loan ids

use crate::core::time::Timestamp;
use crate::config::ConfigError;
use crate::models::loan::{CollateralStatus, LoanInstance};
use crate::models::money::Amount;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use thiserror::Error;

pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckpointError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Config mismatch: snapshot taken under {expected}, restoring under {actual}")]
    ConfigMismatch { expected: String, actual: String },

    #[error("Unsupported snapshot schema version {0}")]
    UnsupportedVersion(u32),

    #[error("Snapshot validation failed: {0}")]
    Invalid(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Loan unavailable: {0}")]
    Loan(String),
}

// ============================================================================
// Snapshot Structure
// ============================================================================

/// Complete registry state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub schema_version: u32,

    /// Clock reading when the snapshot was taken
    pub taken_at: Timestamp,

    /// SHA256 of the canonical config JSON
    pub config_hash: String,

    /// Every loan, in insertion order
    pub loans: Vec<LoanInstance>,
}

impl RegistrySnapshot {
    pub fn to_json(&self) -> Result<String, CheckpointError> {
        serde_json::to_string(self).map_err(|e| CheckpointError::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, CheckpointError> {
        serde_json::from_str(json).map_err(|e| CheckpointError::Serialization(e.to_string()))
    }
}

// ============================================================================
// Config Hashing
// ============================================================================

/// Deterministic SHA256 of a config
///
/// Object keys are sorted recursively before hashing, so the hash does not
/// depend on field or map ordering.
pub fn compute_config_hash<T: Serialize>(config: &T) -> Result<String, CheckpointError> {
    use serde_json::Value;
    use std::collections::BTreeMap;

    let value = serde_json::to_value(config).map_err(|e| {
        CheckpointError::Serialization(format!("Config serialization failed: {}", e))
    })?;

    fn canonicalize(value: Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: BTreeMap<String, Value> =
                    map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect();
                Value::Object(sorted.into_iter().collect())
            }
            Value::Array(arr) => Value::Array(arr.into_iter().map(canonicalize).collect()),
            other => other,
        }
    }

    let json = serde_json::to_string(&canonicalize(value)).map_err(|e| {
        CheckpointError::Serialization(format!("Config serialization failed: {}", e))
    })?;

    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

// ============================================================================
// Validation
// ============================================================================

/// Check snapshot integrity before it is trusted
pub fn validate_snapshot(snapshot: &RegistrySnapshot) -> Result<(), CheckpointError> {
    if snapshot.schema_version != SNAPSHOT_SCHEMA_VERSION {
        return Err(CheckpointError::UnsupportedVersion(snapshot.schema_version));
    }

    let mut seen = HashSet::new();
    for loan in &snapshot.loans {
        if !seen.insert(loan.id()) {
            return Err(CheckpointError::Invalid(format!(
                "Duplicate loan id {}",
                loan.id()
            )));
        }
        validate_loan(loan)?;
    }
    Ok(())
}

fn validate_loan(loan: &LoanInstance) -> Result<(), CheckpointError> {
    let invalid = |msg: String| CheckpointError::Invalid(format!("loan {}: {}", loan.id(), msg));

    if loan.collateral_status() == CollateralStatus::None {
        if !loan.schedule().is_empty() || loan.outstanding_amount() != 0 {
            return Err(invalid("schedule present before activation".to_string()));
        }
        return Ok(());
    }

    // Principal conservation
    if loan.outstanding_amount() + loan.paid_principal() != loan.loan_amount() {
        return Err(invalid(format!(
            "outstanding {} + paid {} != loan amount {}",
            loan.outstanding_amount(),
            loan.paid_principal(),
            loan.loan_amount()
        )));
    }

    let scheduled: Amount = loan.schedule().iter().map(|r| r.principal_portion).sum();
    if scheduled != loan.loan_amount() {
        return Err(invalid(format!(
            "scheduled principal {} != loan amount {}",
            scheduled,
            loan.loan_amount()
        )));
    }

    let paid = loan.schedule().iter().filter(|r| r.is_paid()).count();
    if paid != loan.paid_installments() as usize {
        return Err(invalid(format!(
            "{} paid records but {} paid installments",
            paid,
            loan.paid_installments()
        )));
    }

    // Collateral conservation
    let collateral = loan.terms().map(|t| t.collateral_amount).unwrap_or(0);
    let accounted =
        loan.remaining_collateral() + loan.returned_collateral() + loan.claimed_collateral();
    if accounted != collateral {
        return Err(invalid(format!(
            "collateral accounted {} != escrowed {}",
            accounted, collateral
        )));
    }

    Ok(())
}
