//! Repayment schedule computation
//!
//! Pure functions from loan terms to an installment schedule. Nothing here
//! touches loan state or moves value.
//!
//! # Critical Invariants
//!
//! 1. `Σ principal_portion == loan_amount` exactly; the rounding remainder
//!    goes to the final installment
//! 2. `Σ amount == loan_amount + total_interest`
//! 3. `fee_portion <= amount`; the fee is carved out of what the lender
//!    receives, never added to what the borrower pays
//! 4. The last installment is due exactly at `activated_at + duration`
//! 5. `count <= loan_amount`, so every installment carries at least one unit
//!    of principal and no installment is ever zero
//!
//! All arithmetic is checked. Terms whose total repayable amount or expiry
//! would not fit are rejected with a [`ValidationError`].

use crate::core::time::Timestamp;
use crate::error::ValidationError;
use crate::models::money::{apply_bps, checked_apply_bps, pro_rata, Amount, Bps, BPS_DENOMINATOR};
use crate::models::repayment::{RepaymentQuote, RepaymentRecord, RepaymentStatus};
use crate::models::terms::LoanTerms;
use serde::{Deserialize, Serialize};

/// Default upper bound on installments per loan
pub const DEFAULT_MAX_INSTALLMENTS: u32 = 360;

/// How many installments a loan is split into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InstallmentPlan {
    /// Always `count` installments, whatever the duration
    Fixed { count: u32 },

    /// One installment per started `period_seconds` of duration
    Periodic { period_seconds: u64 },
}

impl InstallmentPlan {
    /// Number of installments the plan asks for (at least 1, before capping)
    pub fn installment_count(&self, duration_seconds: u64) -> u32 {
        let count = match *self {
            InstallmentPlan::Fixed { count } => u64::from(count),
            InstallmentPlan::Periodic { period_seconds } => {
                duration_seconds.div_ceil(period_seconds.max(1))
            }
        };
        u32::try_from(count.max(1)).unwrap_or(u32::MAX)
    }
}

impl Default for InstallmentPlan {
    fn default() -> Self {
        InstallmentPlan::Periodic { period_seconds: 30 }
    }
}

/// How interest is priced and spread over installments
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterestModel {
    /// `loan_amount × rate` in total, spread pro-rata to principal
    #[default]
    Flat,

    /// Interest on the average outstanding balance, spread evenly, plus a
    /// one-off origination charge of `loan_amount × rate` on the first
    /// installment
    AverageBalance,
}

/// Schedule settings shared by every loan of a registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub installments: InstallmentPlan,
    pub interest_model: InterestModel,

    /// Cap on the installment count, whatever the plan asks for
    pub max_installments: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            installments: InstallmentPlan::default(),
            interest_model: InterestModel::default(),
            max_installments: DEFAULT_MAX_INSTALLMENTS,
        }
    }
}

/// Derives installment schedules from loan terms
///
/// # Example
/// ```
/// use p2p_lending_core_rs::schedule::{InstallmentPlan, RepaymentScheduler, ScheduleConfig};
/// use p2p_lending_core_rs::{AssetId, LoanTerms};
///
/// let scheduler = RepaymentScheduler::new(
///     ScheduleConfig {
///         installments: InstallmentPlan::Fixed { count: 2 },
///         ..ScheduleConfig::default()
///     },
///     0,
/// );
/// let terms = LoanTerms {
///     loan_amount: 1_000,
///     duration_seconds: 60,
///     interest_rate_bps: 1_000, // 10%
///     collateral_asset: AssetId::from("TTT"),
///     collateral_amount: 1,
///     collateral_unit_price: 2_000,
///     loan_to_value_bps: 5_000,
/// };
///
/// let schedule = scheduler.build(&terms, 0).unwrap();
/// assert_eq!(schedule.len(), 2);
/// assert_eq!(schedule[0].amount, 550);
/// assert_eq!(schedule[1].due_at, 60);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepaymentScheduler {
    config: ScheduleConfig,
    platform_fee_bps: Bps,
}

impl RepaymentScheduler {
    pub fn new(config: ScheduleConfig, platform_fee_bps: Bps) -> Self {
        Self {
            config,
            platform_fee_bps,
        }
    }

    /// Installments for a loan: the plan's count, capped by
    /// `max_installments` and by `loan_amount`
    pub fn installment_count(&self, loan_amount: Amount, duration_seconds: u64) -> u32 {
        let planned = self.config.installments.installment_count(duration_seconds);
        let per_unit = u32::try_from(loan_amount).unwrap_or(u32::MAX);
        planned
            .min(self.config.max_installments)
            .min(per_unit)
            .max(1)
    }

    /// Total interest the borrower pays over the life of the loan
    pub fn total_interest(&self, terms: &LoanTerms) -> Result<Amount, ValidationError> {
        let count = self.installment_count(terms.loan_amount, terms.duration_seconds);
        let rate = terms.interest_rate_bps;
        let total = match self.config.interest_model {
            InterestModel::Flat => checked_apply_bps(terms.loan_amount, rate),
            InterestModel::AverageBalance => {
                let others = Amount::from(count - 1);
                let base = terms.loan_amount / Amount::from(count);
                let last = principal_portion(terms.loan_amount, count, count);
                checked_apply_bps(terms.loan_amount, rate)
                    .zip(average_balance_interest(base, rate, count))
                    .zip(average_balance_interest(last, rate, count))
                    .and_then(|((origination, each), last)| {
                        each.checked_mul(others)?
                            .checked_add(last)?
                            .checked_add(origination)
                    })
            }
        };
        total.ok_or_else(|| repayment_overflow(terms))
    }

    /// `loan_amount + total_interest`
    pub fn total_repayable(&self, terms: &LoanTerms) -> Result<Amount, ValidationError> {
        terms
            .loan_amount
            .checked_add(self.total_interest(terms)?)
            .ok_or_else(|| repayment_overflow(terms))
    }

    /// Check that a loan on `terms` activated at `activated_at` has a
    /// representable expiry and total repayable amount
    pub fn check_activation(
        &self,
        terms: &LoanTerms,
        activated_at: Timestamp,
    ) -> Result<Timestamp, ValidationError> {
        self.total_repayable(terms)?;
        expiry_at(activated_at, terms.duration_seconds)
    }

    /// Build the full schedule for a loan activated at `activated_at`
    pub fn build(
        &self,
        terms: &LoanTerms,
        activated_at: Timestamp,
    ) -> Result<Vec<RepaymentRecord>, ValidationError> {
        self.check_activation(terms, activated_at)?;
        let count = self.installment_count(terms.loan_amount, terms.duration_seconds);
        (1..=count)
            .map(|index| self.record(terms, activated_at, index, count))
            .collect()
    }

    /// Amounts of installment `index` (1-based), computed on its own
    pub fn quote(&self, terms: &LoanTerms, index: u32) -> Result<RepaymentQuote, ValidationError> {
        let total = self.installment_count(terms.loan_amount, terms.duration_seconds);
        if index == 0 || index > total {
            return Err(ValidationError::IndexOutOfRange { index, total });
        }
        self.total_repayable(terms)?;
        Ok(self.record(terms, 0, index, total)?.quote())
    }

    fn record(
        &self,
        terms: &LoanTerms,
        activated_at: Timestamp,
        index: u32,
        count: u32,
    ) -> Result<RepaymentRecord, ValidationError> {
        let principal = principal_portion(terms.loan_amount, index, count);
        let interest = self
            .interest_portion(terms, index, count)
            .ok_or_else(|| repayment_overflow(terms))?;
        let amount = principal
            .checked_add(interest)
            .ok_or_else(|| repayment_overflow(terms))?;
        let due_at = expiry_at(activated_at, due_offset(terms.duration_seconds, index, count))?;
        Ok(RepaymentRecord {
            installment_index: index,
            due_at,
            principal_portion: principal,
            interest_portion: interest,
            fee_portion: apply_bps(amount, self.platform_fee_bps),
            amount,
            status: RepaymentStatus::Pending,
        })
    }

    fn interest_portion(&self, terms: &LoanTerms, index: u32, count: u32) -> Option<Amount> {
        let rate = terms.interest_rate_bps;
        let principal = principal_portion(terms.loan_amount, index, count);
        match self.config.interest_model {
            InterestModel::Flat => {
                let total = checked_apply_bps(terms.loan_amount, rate)?;
                if index < count {
                    return Some(pro_rata(total, principal, terms.loan_amount));
                }
                // remainder on the last one
                let base = terms.loan_amount / Amount::from(count);
                let assigned = pro_rata(total, base, terms.loan_amount) * Amount::from(count - 1);
                Some(total - assigned)
            }
            InterestModel::AverageBalance => {
                let interest = average_balance_interest(principal, rate, count)?;
                if index == 1 {
                    interest.checked_add(checked_apply_bps(terms.loan_amount, rate)?)
                } else {
                    Some(interest)
                }
            }
        }
    }
}

/// `activated_at + duration_seconds`, rejected when it does not fit
pub fn expiry_at(
    activated_at: Timestamp,
    duration_seconds: u64,
) -> Result<Timestamp, ValidationError> {
    activated_at
        .checked_add(duration_seconds)
        .ok_or(ValidationError::DurationOverflow {
            start: activated_at,
            duration_seconds,
        })
}

/// Principal split: equal shares, remainder on the last one
fn principal_portion(loan_amount: Amount, index: u32, count: u32) -> Amount {
    let n = Amount::from(count);
    let base = loan_amount / n;
    if index == count {
        loan_amount - base * (n - 1)
    } else {
        base
    }
}

/// `floor(principal × rate × (n + 1) / 2)`; the average balance over n equal
/// steps is (n + 1) / 2n of principal
fn average_balance_interest(principal: Amount, rate: Bps, count: u32) -> Option<Amount> {
    let interest = checked_apply_bps(principal, rate)?;
    let steps = Amount::from(count) + 1;
    (interest / 2)
        .checked_mul(steps)?
        .checked_add(interest % 2 * steps / 2)
}

/// Seconds from activation until installment `index` of `count` is due
fn due_offset(duration_seconds: u64, index: u32, count: u32) -> u64 {
    let offset = u128::from(duration_seconds) * u128::from(index) / u128::from(count);
    // index <= count, so offset <= duration_seconds
    offset as u64
}

fn repayment_overflow(terms: &LoanTerms) -> ValidationError {
    ValidationError::RepaymentOverflow {
        loan_amount: terms.loan_amount,
        interest_rate_bps: terms.interest_rate_bps,
    }
}

/// Fee rate sanity bound
pub(crate) fn is_valid_fee(platform_fee_bps: Bps) -> bool {
    Amount::from(platform_fee_bps) <= BPS_DENOMINATOR
}
