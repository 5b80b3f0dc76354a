//! Error taxonomy for loan operations
//!
//! Every failure is terminal for the call that raised it: no state is
//! mutated and no value changes hands. Retrying is the caller's business.

use crate::core::time::Timestamp;
use crate::gateway::TransferError;
use crate::models::ids::{LoanId, PartyId};
use crate::models::loan::{LoanStatus, Operation, OriginMode};
use crate::models::money::{Amount, Bps};
use thiserror::Error;

/// Any error a loan operation can return
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoanError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Authorization error: {0}")]
    Authorization(#[from] AuthorizationError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Timing error: {0}")]
    Timing(#[from] TimingError),

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),
}

/// Malformed terms, LTV breaches and value mismatches
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Loan amount must be positive")]
    ZeroLoanAmount,

    #[error("Loan duration must be positive")]
    ZeroDuration,

    #[error("Loan starting at {start} with duration {duration_seconds}s would expire past the end of time")]
    DurationOverflow { start: Timestamp, duration_seconds: u64 },

    #[error("Total repayable on loan {loan_amount} at {interest_rate_bps} bps overflows")]
    RepaymentOverflow { loan_amount: Amount, interest_rate_bps: Bps },

    #[error("Collateral amount must be positive")]
    ZeroCollateral,

    #[error("Collateral unit price must be positive")]
    ZeroCollateralPrice,

    #[error("Loan-to-value {loan_to_value_bps} bps is outside 1..=10000")]
    LoanToValueOutOfRange { loan_to_value_bps: Bps },

    #[error(
        "Loan-to-value breach: loan {loan_amount} exceeds supported principal {max_principal} at unit price {unit_price}"
    )]
    LoanToValueBreach {
        loan_amount: Amount,
        max_principal: Amount,
        unit_price: Amount,
    },

    #[error("Offer criteria not met: {0}")]
    CriteriaNotMet(String),

    #[error("Amount mismatch: expected {expected}, got {actual}")]
    AmountMismatch { expected: Amount, actual: Amount },

    #[error("Installment index {index} out of range 1..={total}")]
    IndexOutOfRange { index: u32, total: u32 },
}

/// Caller is not allowed to perform the transition
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthorizationError {
    #[error("{caller} is not the borrower")]
    NotBorrower { caller: PartyId },

    #[error("{caller} is not the lender")]
    NotLender { caller: PartyId },

    #[error("{caller} is neither borrower nor lender")]
    NotParty { caller: PartyId },

    #[error("{caller} cannot be both borrower and lender")]
    SelfDealing { caller: PartyId },
}

/// Operation not valid in the loan's current state
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("{operation} is not allowed while loan is {status}")]
    InvalidStatus {
        operation: Operation,
        status: LoanStatus,
    },

    #[error("{operation} is not available for {origin} loans")]
    WrongOriginMode {
        operation: Operation,
        origin: OriginMode,
    },

    #[error("Installment {requested} is out of order; next payable installment is {expected:?}")]
    InstallmentOutOfOrder { expected: Option<u32>, requested: u32 },

    #[error("Collateral has already been returned")]
    CollateralAlreadyReturned,

    #[error("No collateral left to claim")]
    NothingToClaim,

    #[error("Loan terms are not finalized yet")]
    TermsNotFinalized,

    #[error("Unknown loan {0}")]
    UnknownLoan(LoanId),

    #[error("Loan {0} already has an operation in flight")]
    Reentrant(LoanId),
}

/// Deadline violations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TimingError {
    #[error("Loan expired at {expired_at}; now {now}")]
    LoanExpired { expired_at: Timestamp, now: Timestamp },

    #[error("Loan has not expired yet: expires at {expires_at}, now {now}")]
    NotYetExpired { expires_at: Timestamp, now: Timestamp },
}
