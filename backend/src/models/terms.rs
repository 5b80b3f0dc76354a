//! Loan terms
//!
//! A request carries complete [`LoanTerms`] from the start. An offer carries
//! [`OfferTerms`] (amount, duration and what the lender will accept) and is
//! completed by the borrower's [`Enrichment`] when it is accepted.
//!
//! Terms are validated and LTV-checked once, at the moment they are
//! finalized, and never change afterwards.

use crate::error::ValidationError;
use crate::models::ids::AssetId;
use crate::models::money::{apply_bps, checked_apply_bps, Amount, Bps, BPS_DENOMINATOR};
use serde::{Deserialize, Serialize};

/// Complete, finalized loan terms
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanTerms {
    /// Principal lent to the borrower
    pub loan_amount: Amount,

    /// Loan term; collateral settles once it has elapsed since activation
    pub duration_seconds: u64,

    /// Interest rate in basis points
    pub interest_rate_bps: Bps,

    /// Asset pledged as collateral
    pub collateral_asset: AssetId,

    /// Units of collateral escrowed at activation
    pub collateral_amount: Amount,

    /// Value of one collateral unit, in the loan's value unit
    pub collateral_unit_price: Amount,

    /// Maximum ratio of principal to collateral value
    pub loan_to_value_bps: Bps,
}

impl LoanTerms {
    /// Check field ranges, that `loan_amount × (1 + rate)` fits, and the
    /// loan-to-value invariant
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.loan_amount == 0 {
            return Err(ValidationError::ZeroLoanAmount);
        }
        if self.duration_seconds == 0 {
            return Err(ValidationError::ZeroDuration);
        }
        if self.collateral_amount == 0 {
            return Err(ValidationError::ZeroCollateral);
        }
        if self.collateral_unit_price == 0 {
            return Err(ValidationError::ZeroCollateralPrice);
        }
        if self.loan_to_value_bps == 0 || Amount::from(self.loan_to_value_bps) > BPS_DENOMINATOR {
            return Err(ValidationError::LoanToValueOutOfRange {
                loan_to_value_bps: self.loan_to_value_bps,
            });
        }
        checked_apply_bps(self.loan_amount, self.interest_rate_bps)
            .and_then(|interest| self.loan_amount.checked_add(interest))
            .ok_or(ValidationError::RepaymentOverflow {
                loan_amount: self.loan_amount,
                interest_rate_bps: self.interest_rate_bps,
            })?;
        self.check_loan_to_value(self.collateral_unit_price)
    }

    /// Collateral value at `unit_price` (saturates instead of overflowing)
    pub fn collateral_value_at(&self, unit_price: Amount) -> Amount {
        self.collateral_amount.saturating_mul(unit_price)
    }

    /// Largest principal the collateral supports at `unit_price`
    pub fn max_principal_at(&self, unit_price: Amount) -> Amount {
        apply_bps(self.collateral_value_at(unit_price), self.loan_to_value_bps)
    }

    /// `collateral_amount × unit_price × ltv / 10000 ≥ loan_amount`
    ///
    /// # Example
    /// ```
    /// use p2p_lending_core_rs::{AssetId, LoanTerms};
    ///
    /// let terms = LoanTerms {
    ///     loan_amount: 6_000,
    ///     duration_seconds: 60,
    ///     interest_rate_bps: 100,
    ///     collateral_asset: AssetId::from("TTT"),
    ///     collateral_amount: 100,
    ///     collateral_unit_price: 100,
    ///     loan_to_value_bps: 6_000,
    /// };
    /// assert!(terms.check_loan_to_value(100).is_ok());  // 10_000 × 60% = 6_000
    /// assert!(terms.check_loan_to_value(99).is_err());  //  9_900 × 60% < 6_000
    /// ```
    pub fn check_loan_to_value(&self, unit_price: Amount) -> Result<(), ValidationError> {
        let max_principal = self.max_principal_at(unit_price);
        if max_principal < self.loan_amount {
            return Err(ValidationError::LoanToValueBreach {
                loan_amount: self.loan_amount,
                max_principal,
                unit_price,
            });
        }
        Ok(())
    }
}

/// What a lender is willing to accept when a borrower takes an offer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcceptanceCriteria {
    /// Accepted collateral assets; empty accepts any asset
    pub accepted_collateral: Vec<AssetId>,

    /// Lowest interest rate the lender accepts
    pub min_interest_rate_bps: Bps,

    /// Highest loan-to-value the lender accepts
    pub max_loan_to_value_bps: Option<Bps>,
}

impl AcceptanceCriteria {
    /// Check a borrower's enrichment against these criteria
    pub fn check(&self, enrichment: &Enrichment) -> Result<(), ValidationError> {
        if !self.accepted_collateral.is_empty()
            && !self.accepted_collateral.contains(&enrichment.collateral_asset)
        {
            return Err(ValidationError::CriteriaNotMet(format!(
                "collateral asset {} is not accepted",
                enrichment.collateral_asset
            )));
        }
        if enrichment.interest_rate_bps < self.min_interest_rate_bps {
            return Err(ValidationError::CriteriaNotMet(format!(
                "interest rate {} bps is below the minimum of {} bps",
                enrichment.interest_rate_bps, self.min_interest_rate_bps
            )));
        }
        if let Some(max_ltv) = self.max_loan_to_value_bps {
            if enrichment.loan_to_value_bps > max_ltv {
                return Err(ValidationError::CriteriaNotMet(format!(
                    "loan-to-value {} bps exceeds the maximum of {} bps",
                    enrichment.loan_to_value_bps, max_ltv
                )));
            }
        }
        Ok(())
    }
}

/// Partial terms published by a lender
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferTerms {
    pub loan_amount: Amount,
    pub duration_seconds: u64,
    #[serde(default)]
    pub acceptance: AcceptanceCriteria,
}

impl OfferTerms {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.loan_amount == 0 {
            return Err(ValidationError::ZeroLoanAmount);
        }
        if self.duration_seconds == 0 {
            return Err(ValidationError::ZeroDuration);
        }
        if let Some(max_ltv) = self.acceptance.max_loan_to_value_bps {
            if max_ltv == 0 || Amount::from(max_ltv) > BPS_DENOMINATOR {
                return Err(ValidationError::LoanToValueOutOfRange {
                    loan_to_value_bps: max_ltv,
                });
            }
        }
        Ok(())
    }

    /// Combine with a borrower's enrichment into complete terms
    pub fn enrich(&self, enrichment: &Enrichment) -> LoanTerms {
        LoanTerms {
            loan_amount: self.loan_amount,
            duration_seconds: self.duration_seconds,
            interest_rate_bps: enrichment.interest_rate_bps,
            collateral_asset: enrichment.collateral_asset.clone(),
            collateral_amount: enrichment.collateral_amount,
            collateral_unit_price: enrichment.collateral_unit_price,
            loan_to_value_bps: enrichment.loan_to_value_bps,
        }
    }
}

/// Terms supplied by the borrower accepting an offer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrichment {
    pub interest_rate_bps: Bps,
    pub collateral_asset: AssetId,
    pub collateral_amount: Amount,
    pub collateral_unit_price: Amount,
    pub loan_to_value_bps: Bps,
}
