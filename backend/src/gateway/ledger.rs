//! In-memory reference gateway
//!
//! Keeps balances for parties and per-loan escrow accounts in one map guarded
//! by a single mutex, so every `pull`/`push` is atomic. Collateral pulls
//! consume an allowance the owner granted to the loan beforehand, like an
//! ERC-20 `approve` + `transferFrom`. Native value pulls model the value a
//! caller attaches to its call and need no allowance.

use super::{Asset, AssetTransferGateway, TransferError};
use crate::models::ids::{LoanId, PartyId};
use crate::models::money::Amount;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Account {
    Party(PartyId),
    Escrow(LoanId),
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Account::Party(party) => write!(f, "party {}", party),
            Account::Escrow(loan) => write!(f, "escrow of loan {}", loan),
        }
    }
}

#[derive(Debug, Default)]
struct Books {
    balances: HashMap<(Account, Asset), Amount>,
    allowances: HashMap<(PartyId, LoanId, Asset), Amount>,
}

impl Books {
    fn balance(&self, account: &Account, asset: &Asset) -> Amount {
        self.balances
            .get(&(account.clone(), asset.clone()))
            .copied()
            .unwrap_or(0)
    }

    fn debit(&mut self, account: &Account, asset: &Asset, amount: Amount) -> Result<(), TransferError> {
        let available = self.balance(account, asset);
        if available < amount {
            return Err(TransferError::InsufficientBalance {
                account: account.to_string(),
                asset: asset.clone(),
                required: amount,
                available,
            });
        }
        self.balances
            .insert((account.clone(), asset.clone()), available - amount);
        Ok(())
    }

    fn credit(&mut self, account: &Account, asset: &Asset, amount: Amount) {
        *self
            .balances
            .entry((account.clone(), asset.clone()))
            .or_insert(0) += amount;
    }
}

/// Thread-safe in-memory implementation of [`AssetTransferGateway`]
///
/// # Example
/// ```
/// use p2p_lending_core_rs::gateway::{Asset, AssetTransferGateway, InMemoryLedger};
/// use p2p_lending_core_rs::{AssetId, LoanId, PartyId};
///
/// let ledger = InMemoryLedger::new();
/// let borrower = PartyId::from("BORROWER");
/// let loan = LoanId::from("loan-1");
/// let token = Asset::Collateral(AssetId::from("TTT"));
///
/// ledger.deposit(&borrower, &token, 5_000);
/// assert!(ledger.pull(&loan, &token, &borrower, 5_000).is_err()); // not approved
///
/// ledger.approve(&borrower, &loan, &token, 5_000);
/// ledger.pull(&loan, &token, &borrower, 5_000).unwrap();
/// assert_eq!(ledger.escrow_balance(&loan, &token), 5_000);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    books: Mutex<Books>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn books(&self) -> MutexGuard<'_, Books> {
        self.books.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mint `amount` into a party's account (test and scenario setup)
    pub fn deposit(&self, party: &PartyId, asset: &Asset, amount: Amount) {
        self.books()
            .credit(&Account::Party(party.clone()), asset, amount);
    }

    /// Allow `loan` to pull up to `amount` of `asset` from `owner`
    ///
    /// Replaces any previous allowance.
    pub fn approve(&self, owner: &PartyId, loan: &LoanId, asset: &Asset, amount: Amount) {
        self.books()
            .allowances
            .insert((owner.clone(), loan.clone(), asset.clone()), amount);
    }

    pub fn allowance(&self, owner: &PartyId, loan: &LoanId, asset: &Asset) -> Amount {
        self.books()
            .allowances
            .get(&(owner.clone(), loan.clone(), asset.clone()))
            .copied()
            .unwrap_or(0)
    }

    pub fn balance(&self, party: &PartyId, asset: &Asset) -> Amount {
        self.books().balance(&Account::Party(party.clone()), asset)
    }

    pub fn escrow_balance(&self, loan: &LoanId, asset: &Asset) -> Amount {
        self.books().balance(&Account::Escrow(loan.clone()), asset)
    }

    /// Sum of all balances of `asset`, parties and escrows alike
    pub fn total_supply(&self, asset: &Asset) -> Amount {
        self.books()
            .balances
            .iter()
            .filter(|((_, a), _)| a == asset)
            .map(|(_, amount)| *amount)
            .sum()
    }
}

impl AssetTransferGateway for InMemoryLedger {
    fn pull(
        &self,
        escrow: &LoanId,
        asset: &Asset,
        from: &PartyId,
        amount: Amount,
    ) -> Result<(), TransferError> {
        let mut books = self.books();
        let source = Account::Party(from.clone());

        let allowance_key = (from.clone(), escrow.clone(), asset.clone());
        let approved = match asset {
            Asset::Native => None,
            Asset::Collateral(_) => Some(books.allowances.get(&allowance_key).copied().unwrap_or(0)),
        };
        if let Some(approved) = approved {
            if approved < amount {
                return Err(TransferError::InsufficientAllowance {
                    owner: from.clone(),
                    asset: asset.clone(),
                    required: amount,
                    approved,
                });
            }
        }

        books.debit(&source, asset, amount)?;
        books.credit(&Account::Escrow(escrow.clone()), asset, amount);
        if let Some(approved) = approved {
            books.allowances.insert(allowance_key, approved - amount);
        }
        Ok(())
    }

    fn push(
        &self,
        escrow: &LoanId,
        asset: &Asset,
        to: &PartyId,
        amount: Amount,
    ) -> Result<(), TransferError> {
        let mut books = self.books();
        books.debit(&Account::Escrow(escrow.clone()), asset, amount)?;
        books.credit(&Account::Party(to.clone()), asset, amount);
        Ok(())
    }
}
