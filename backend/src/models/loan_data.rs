//! Read model of a loan for external consumers
//!
//! `LoanData` is a named, versioned record. Older consumers that index a
//! positional tuple use [`LoanData::legacy_tuple`], whose element order is
//! fixed by [`LoanData::LEGACY_FIELD_ORDER`].

use crate::core::time::Timestamp;
use crate::models::ids::{AssetId, LoanId, PartyId};
use crate::models::loan::{CollateralStatus, LoanInstance, LoanStatus, OriginMode};
use crate::models::money::{Amount, Bps};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current layout of [`LoanData`]
pub const LOAN_DATA_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanData {
    pub schema_version: u32,
    pub loan_id: LoanId,
    pub origin_mode: OriginMode,
    pub status: LoanStatus,
    pub borrower: Option<PartyId>,
    pub lender: Option<PartyId>,
    pub loan_amount: Amount,
    pub duration_seconds: u64,
    /// `None` until an offer is accepted
    pub interest_rate_bps: Option<Bps>,
    pub collateral_asset: Option<AssetId>,
    pub collateral_amount: Option<Amount>,
    pub collateral_status: CollateralStatus,
    pub outstanding_amount: Amount,
    pub returned_collateral_amount: Amount,
    pub claimed_collateral_amount: Amount,
    pub paid_installments: u32,
    pub total_installments: u32,
    pub platform_fee_bps: Bps,
    pub created_at: Timestamp,
    pub activated_at: Option<Timestamp>,
    pub expires_at: Option<Timestamp>,
}

impl LoanData {
    /// Field names in the order of [`LoanData::legacy_tuple`]
    pub const LEGACY_FIELD_ORDER: [&'static str; 10] = [
        "origin_mode",
        "interest_rate_bps",
        "status",
        "collateral_asset",
        "collateral_status",
        "outstanding_amount",
        "returned_collateral_amount",
        "borrower",
        "lender",
        "collateral_amount",
    ];

    /// Positional view for consumers of the historical tuple layout
    ///
    /// Each element is the JSON value of the field named at the same index of
    /// `LEGACY_FIELD_ORDER`. Amounts that do not fit a JSON integer are
    /// rendered as decimal strings.
    pub fn legacy_tuple(&self) -> Result<Vec<Value>, serde_json::Error> {
        Ok(vec![
            serde_json::to_value(self.origin_mode)?,
            serde_json::to_value(self.interest_rate_bps)?,
            serde_json::to_value(self.status)?,
            serde_json::to_value(&self.collateral_asset)?,
            serde_json::to_value(self.collateral_status)?,
            amount_value(self.outstanding_amount),
            amount_value(self.returned_collateral_amount),
            serde_json::to_value(&self.borrower)?,
            serde_json::to_value(&self.lender)?,
            self.collateral_amount.map_or(Value::Null, amount_value),
        ])
    }
}

fn amount_value(amount: Amount) -> Value {
    u64::try_from(amount)
        .map(Value::from)
        .unwrap_or_else(|_| Value::String(amount.to_string()))
}

impl From<&LoanInstance> for LoanData {
    fn from(loan: &LoanInstance) -> Self {
        let terms = loan.terms();
        LoanData {
            schema_version: LOAN_DATA_SCHEMA_VERSION,
            loan_id: loan.id().clone(),
            origin_mode: loan.origin(),
            status: loan.status(),
            borrower: loan.borrower().cloned(),
            lender: loan.lender().cloned(),
            loan_amount: loan.loan_amount(),
            duration_seconds: loan.duration_seconds(),
            interest_rate_bps: terms.map(|t| t.interest_rate_bps),
            collateral_asset: terms.map(|t| t.collateral_asset.clone()),
            collateral_amount: terms.map(|t| t.collateral_amount),
            collateral_status: loan.collateral_status(),
            outstanding_amount: loan.outstanding_amount(),
            returned_collateral_amount: loan.returned_collateral(),
            claimed_collateral_amount: loan.claimed_collateral(),
            paid_installments: loan.paid_installments(),
            total_installments: loan.total_installments(),
            platform_fee_bps: loan.platform_fee_bps(),
            created_at: loan.created_at(),
            activated_at: loan.activated_at(),
            expires_at: loan.expires_at(),
        }
    }
}
