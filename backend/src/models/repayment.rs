//! Repayment records
//!
//! One record per installment, built once when the loan activates and owned
//! by that loan. Records only ever move forward:
//! `Pending → Paid` through repayment, `Pending → Missed` at settlement.

use crate::core::time::Timestamp;
use crate::models::money::Amount;
use serde::{Deserialize, Serialize};

/// Installment lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepaymentStatus {
    /// Not paid yet
    Pending,

    /// Paid in full
    Paid {
        /// Time the repayment was accepted
        paid_at: Timestamp,
    },

    /// Still unpaid when the loan was settled
    Missed,
}

/// One scheduled installment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepaymentRecord {
    /// 1-based position in the schedule
    pub installment_index: u32,

    /// Due time; the last installment is due at loan expiry
    pub due_at: Timestamp,

    pub principal_portion: Amount,
    pub interest_portion: Amount,

    /// Platform share, carved out of `amount` before it reaches the lender
    pub fee_portion: Amount,

    /// What the payer must send: principal + interest
    pub amount: Amount,

    pub status: RepaymentStatus,
}

impl RepaymentRecord {
    pub fn is_pending(&self) -> bool {
        matches!(self.status, RepaymentStatus::Pending)
    }

    pub fn is_paid(&self) -> bool {
        matches!(self.status, RepaymentStatus::Paid { .. })
    }

    /// What the lender receives for this installment
    pub fn lender_share(&self) -> Amount {
        self.amount - self.fee_portion
    }

    pub fn quote(&self) -> RepaymentQuote {
        RepaymentQuote {
            installment_index: self.installment_index,
            amount: self.amount,
            principal_portion: self.principal_portion,
            interest_portion: self.interest_portion,
            fee_portion: self.fee_portion,
        }
    }
}

/// Answer to "how much is installment N?"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepaymentQuote {
    pub installment_index: u32,
    pub amount: Amount,
    pub principal_portion: Amount,
    pub interest_portion: Amount,
    pub fee_portion: Amount,
}
