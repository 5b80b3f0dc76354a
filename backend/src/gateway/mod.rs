//! Asset transfer gateway
//!
//! The lending core never moves value itself. It describes the movements an
//! operation needs as a [`TransferPlan`] and hands them to an
//! [`AssetTransferGateway`] only after the loan's own state has been
//! committed.
//!
//! # Critical Invariants
//!
//! - **Atomicity**: each `pull`/`push` either fully happens or not at all
//! - **All-or-nothing plans**: if any step of a plan fails, the steps that
//!   already ran are reversed in the opposite order
//! - **Escrow scoping**: every transfer names the loan whose escrow it
//!   debits or credits; one loan can never spend another's escrow

pub mod ledger;

pub use ledger::InMemoryLedger;

use crate::models::ids::{AssetId, LoanId, PartyId};
use crate::models::money::Amount;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// What is being moved
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Asset {
    /// The native value unit loans are denominated in
    Native,

    /// A collateral token
    Collateral(AssetId),
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Asset::Native => f.write_str("native"),
            Asset::Collateral(asset) => write!(f, "collateral:{}", asset),
        }
    }
}

/// Errors raised by the transfer layer
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferError {
    #[error("Insufficient balance of {asset} for {account}: required {required}, available {available}")]
    InsufficientBalance {
        account: String,
        asset: Asset,
        required: Amount,
        available: Amount,
    },

    #[error("Insufficient allowance of {asset} from {owner}: required {required}, approved {approved}")]
    InsufficientAllowance {
        owner: PartyId,
        asset: Asset,
        required: Amount,
        approved: Amount,
    },

    #[error("Transfer rejected: {0}")]
    Rejected(String),

    #[error("Reversal of a completed transfer failed: {0}")]
    CompensationFailed(String),
}

/// Moves value between parties and per-loan escrow accounts
///
/// Implementations must make each call atomic: on `Err`, no balance changed.
pub trait AssetTransferGateway: Send + Sync {
    /// Move `amount` of `asset` from `from` into the escrow of `escrow`
    fn pull(
        &self,
        escrow: &LoanId,
        asset: &Asset,
        from: &PartyId,
        amount: Amount,
    ) -> Result<(), TransferError>;

    /// Move `amount` of `asset` out of the escrow of `escrow` to `to`
    fn push(
        &self,
        escrow: &LoanId,
        asset: &Asset,
        to: &PartyId,
        amount: Amount,
    ) -> Result<(), TransferError>;
}

/// Direction of a planned transfer, seen from the escrow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Party → escrow
    Pull,
    /// Escrow → party
    Push,
}

/// One step of a [`TransferPlan`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub direction: Direction,
    pub asset: Asset,
    pub party: PartyId,
    pub amount: Amount,
}

impl Transfer {
    fn run(&self, gateway: &dyn AssetTransferGateway, escrow: &LoanId) -> Result<(), TransferError> {
        match self.direction {
            Direction::Pull => gateway.pull(escrow, &self.asset, &self.party, self.amount),
            Direction::Push => gateway.push(escrow, &self.asset, &self.party, self.amount),
        }
    }

    fn reverse(&self, gateway: &dyn AssetTransferGateway, escrow: &LoanId) -> Result<(), TransferError> {
        match self.direction {
            Direction::Pull => gateway.push(escrow, &self.asset, &self.party, self.amount),
            Direction::Push => gateway.pull(escrow, &self.asset, &self.party, self.amount),
        }
    }
}

/// Ordered list of transfers an operation needs, executed as a unit
///
/// Zero-amount steps are dropped when planned.
#[derive(Debug, Clone)]
pub struct TransferPlan {
    escrow: LoanId,
    steps: Vec<Transfer>,
}

impl TransferPlan {
    pub fn new(escrow: LoanId) -> Self {
        Self {
            escrow,
            steps: Vec::new(),
        }
    }

    /// Plan a party → escrow transfer
    pub fn pull(&mut self, asset: Asset, from: &PartyId, amount: Amount) {
        self.plan(Direction::Pull, asset, from, amount);
    }

    /// Plan an escrow → party transfer
    pub fn push(&mut self, asset: Asset, to: &PartyId, amount: Amount) {
        self.plan(Direction::Push, asset, to, amount);
    }

    fn plan(&mut self, direction: Direction, asset: Asset, party: &PartyId, amount: Amount) {
        if amount == 0 {
            return;
        }
        self.steps.push(Transfer {
            direction,
            asset,
            party: party.clone(),
            amount,
        });
    }

    pub fn steps(&self) -> &[Transfer] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step in order
    ///
    /// On the first failure, the completed steps are reversed newest-first
    /// and the triggering error is returned. A failed reversal is reported as
    /// [`TransferError::CompensationFailed`].
    pub fn execute(&self, gateway: &dyn AssetTransferGateway) -> Result<(), TransferError> {
        for (done, step) in self.steps.iter().enumerate() {
            if let Err(error) = step.run(gateway, &self.escrow) {
                for completed in self.steps[..done].iter().rev() {
                    completed.reverse(gateway, &self.escrow).map_err(|reversal| {
                        TransferError::CompensationFailed(format!(
                            "{} while undoing {:?} after: {}",
                            reversal, completed, error
                        ))
                    })?;
                }
                return Err(error);
            }
        }
        Ok(())
    }
}
