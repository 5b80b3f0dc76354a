//! Loan registry: the append-only directory of loan instances
//!
//! The registry assigns loan ids, keeps them in creation order and routes
//! every operation to the addressed loan. Each loan sits behind its own
//! mutex: calls on one loan are serialized, calls on different loans run in
//! parallel. The directory lock is held only to insert or look up an entry.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use p2p_lending_core_rs::config::ProtocolConfig;
//! use p2p_lending_core_rs::gateway::{Asset, InMemoryLedger};
//! use p2p_lending_core_rs::oracle::NoPriceOracle;
//! use p2p_lending_core_rs::registry::LoanRegistry;
//! use p2p_lending_core_rs::{AssetId, LoanStatus, LoanTerms, ManualClock, PartyId};
//!
//! let ledger = Arc::new(InMemoryLedger::new());
//! let clock = Arc::new(ManualClock::new(1_000));
//! let registry = LoanRegistry::new(
//!     ProtocolConfig::default(),
//!     ledger.clone(),
//!     Arc::new(NoPriceOracle),
//!     clock.clone(),
//! )
//! .unwrap();
//!
//! let borrower = PartyId::from("alice");
//! let lender = PartyId::from("bob");
//! ledger.deposit(&lender, &Asset::Native, 1_000);
//!
//! let id = registry
//!     .create_request(
//!         &borrower,
//!         LoanTerms {
//!             loan_amount: 1_000,
//!             duration_seconds: 60,
//!             interest_rate_bps: 500,
//!             collateral_asset: AssetId::from("TTT"),
//!             collateral_amount: 10,
//!             collateral_unit_price: 200,
//!             loan_to_value_bps: 5_000,
//!         },
//!     )
//!     .unwrap();
//!
//! registry.fund(&id, &lender, 1_000).unwrap();
//! assert_eq!(registry.get_loan_data(&id).unwrap().status, LoanStatus::CollateralAwaited);
//! assert_eq!(registry.get_all(), vec![id]);
//! ```

pub mod checkpoint;

pub use checkpoint::{compute_config_hash, validate_snapshot, CheckpointError, RegistrySnapshot};

use crate::config::{ConfigError, ProtocolConfig};
use crate::core::time::Clock;
use crate::error::{LoanError, StateError};
use crate::gateway::AssetTransferGateway;
use crate::models::event::LoanEvent;
use crate::models::ids::{LoanId, PartyId};
use crate::models::loan::{CallContext, LoanInstance};
use crate::models::loan_data::LoanData;
use crate::models::money::Amount;
use crate::models::repayment::{RepaymentQuote, RepaymentRecord};
use crate::models::terms::{Enrichment, LoanTerms, OfferTerms};
use crate::oracle::PriceOracle;
use checkpoint::SNAPSHOT_SCHEMA_VERSION;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

type LoanSlot = Arc<Mutex<LoanInstance>>;

#[derive(Default)]
struct Directory {
    order: Vec<LoanId>,
    loans: HashMap<LoanId, LoanSlot>,
}

thread_local! {
    /// Loans with an operation running on this thread
    static IN_FLIGHT: RefCell<HashSet<LoanId>> = RefCell::new(HashSet::new());
}

/// Marks a loan busy on the current thread until dropped
struct InFlight {
    id: LoanId,
}

impl InFlight {
    fn enter(id: &LoanId) -> Result<Self, StateError> {
        let fresh = IN_FLIGHT.with(|busy| busy.borrow_mut().insert(id.clone()));
        if !fresh {
            return Err(StateError::Reentrant(id.clone()));
        }
        Ok(Self { id: id.clone() })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        IN_FLIGHT.with(|busy| {
            busy.borrow_mut().remove(&self.id);
        });
    }
}

pub struct LoanRegistry {
    config: ProtocolConfig,
    gateway: Arc<dyn AssetTransferGateway>,
    oracle: Arc<dyn PriceOracle>,
    clock: Arc<dyn Clock>,
    directory: RwLock<Directory>,
    subscribers: Mutex<Vec<Sender<LoanEvent>>>,
}

impl LoanRegistry {
    pub fn new(
        config: ProtocolConfig,
        gateway: Arc<dyn AssetTransferGateway>,
        oracle: Arc<dyn PriceOracle>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            gateway,
            oracle,
            clock,
            directory: RwLock::new(Directory::default()),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    // ========================================================================
    // Creation and directory
    // ========================================================================

    /// Register a borrower's request; returns the new loan's id
    pub fn create_request(&self, borrower: &PartyId, terms: LoanTerms) -> Result<LoanId, LoanError> {
        let ctx = self.context();
        let loan = LoanInstance::new_request(
            LoanId::generate(),
            borrower.clone(),
            terms,
            self.config.loan_policy(),
            &ctx,
        )?;
        Ok(self.insert(loan))
    }

    /// Register a lender's offer; returns the new loan's id
    pub fn create_offer(&self, lender: &PartyId, offer: OfferTerms) -> Result<LoanId, LoanError> {
        let ctx = self.context();
        let loan = LoanInstance::new_offer(
            LoanId::generate(),
            lender.clone(),
            offer,
            self.config.loan_policy(),
            &ctx,
        )?;
        Ok(self.insert(loan))
    }

    /// Every loan id, oldest first
    pub fn get_all(&self) -> Vec<LoanId> {
        self.read_directory().order.clone()
    }

    pub fn len(&self) -> usize {
        self.read_directory().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ========================================================================
    // Operations
    // ========================================================================

    pub fn fund(&self, id: &LoanId, lender: &PartyId, value: Amount) -> Result<(), LoanError> {
        self.with_loan(id, |loan, ctx| loan.fund(lender, value, ctx))
    }

    pub fn fund_offer(&self, id: &LoanId, lender: &PartyId, value: Amount) -> Result<(), LoanError> {
        self.with_loan(id, |loan, ctx| loan.fund_offer(lender, value, ctx))
    }

    pub fn accept_and_enrich(
        &self,
        id: &LoanId,
        borrower: &PartyId,
        enrichment: &Enrichment,
    ) -> Result<(), LoanError> {
        self.with_loan(id, |loan, ctx| loan.accept_and_enrich(borrower, enrichment, ctx))
    }

    pub fn escrow_collateral(&self, id: &LoanId, borrower: &PartyId) -> Result<(), LoanError> {
        self.with_loan(id, |loan, ctx| loan.escrow_collateral(borrower, ctx))
    }

    pub fn repay(
        &self,
        id: &LoanId,
        payer: &PartyId,
        value: Amount,
        installment_index: u32,
    ) -> Result<(), LoanError> {
        self.with_loan(id, |loan, ctx| loan.repay(payer, value, installment_index, ctx))
    }

    pub fn return_collateral_to_borrower(&self, id: &LoanId, caller: &PartyId) -> Result<(), LoanError> {
        self.with_loan(id, |loan, ctx| loan.return_collateral_to_borrower(caller, ctx))
    }

    pub fn claim_collateral_by_lender(&self, id: &LoanId, lender: &PartyId) -> Result<(), LoanError> {
        self.with_loan(id, |loan, ctx| loan.claim_collateral_by_lender(lender, ctx))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn get_loan_data(&self, id: &LoanId) -> Result<LoanData, LoanError> {
        self.inspect(id, |loan| Ok(loan.loan_data()))
    }

    pub fn get_repayment_amount(&self, id: &LoanId, index: u32) -> Result<RepaymentQuote, LoanError> {
        self.inspect(id, |loan| loan.repayment_quote(index))
    }

    pub fn schedule(&self, id: &LoanId) -> Result<Vec<RepaymentRecord>, LoanError> {
        self.inspect(id, |loan| Ok(loan.schedule().to_vec()))
    }

    pub fn events(&self, id: &LoanId) -> Result<Vec<LoanEvent>, LoanError> {
        self.inspect(id, |loan| Ok(loan.events().events().to_vec()))
    }

    /// Copy of a loan's full state
    pub fn loan(&self, id: &LoanId) -> Result<LoanInstance, LoanError> {
        self.inspect(id, |loan| Ok(loan.clone()))
    }

    /// Receive every event committed from now on, across all loans
    ///
    /// Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> Receiver<LoanEvent> {
        let (tx, rx) = channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    // ========================================================================
    // Checkpointing
    // ========================================================================

    /// Snapshot every loan, oldest first
    pub fn checkpoint(&self) -> Result<RegistrySnapshot, CheckpointError> {
        let slots: Vec<(LoanId, LoanSlot)> = {
            let directory = self.read_directory();
            directory
                .order
                .iter()
                .filter_map(|id| directory.loans.get(id).map(|slot| (id.clone(), slot.clone())))
                .collect()
        };

        let mut loans = Vec::with_capacity(slots.len());
        for (id, slot) in slots {
            let _guard = InFlight::enter(&id).map_err(|e| CheckpointError::Loan(e.to_string()))?;
            loans.push(slot.lock().unwrap_or_else(PoisonError::into_inner).clone());
        }

        Ok(RegistrySnapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            taken_at: self.clock.now(),
            config_hash: compute_config_hash(&self.config)?,
            loans,
        })
    }

    /// Rebuild a registry from a snapshot taken under the same config
    pub fn restore(
        config: ProtocolConfig,
        gateway: Arc<dyn AssetTransferGateway>,
        oracle: Arc<dyn PriceOracle>,
        clock: Arc<dyn Clock>,
        snapshot: RegistrySnapshot,
    ) -> Result<Self, CheckpointError> {
        validate_snapshot(&snapshot)?;
        let actual = compute_config_hash(&config)?;
        if actual != snapshot.config_hash {
            return Err(CheckpointError::ConfigMismatch {
                expected: snapshot.config_hash,
                actual,
            });
        }

        let registry = Self::new(config, gateway, oracle, clock)?;
        {
            let mut directory = registry.write_directory();
            for loan in snapshot.loans {
                directory.order.push(loan.id().clone());
                directory
                    .loans
                    .insert(loan.id().clone(), Arc::new(Mutex::new(loan)));
            }
        }
        Ok(registry)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn context(&self) -> CallContext<'_> {
        CallContext {
            now: self.clock.now(),
            gateway: self.gateway.as_ref(),
            oracle: self.oracle.as_ref(),
        }
    }

    /// Add a new loan and publish its creation before any other thread can
    /// operate on it
    fn insert(&self, loan: LoanInstance) -> LoanId {
        let id = loan.id().clone();
        let slot = Arc::new(Mutex::new(loan));
        let loan = slot.lock().unwrap_or_else(PoisonError::into_inner);
        {
            let mut directory = self.write_directory();
            directory.order.push(id.clone());
            directory.loans.insert(id.clone(), slot.clone());
        }
        self.publish(loan.events().events());
        id
    }

    fn slot(&self, id: &LoanId) -> Result<LoanSlot, StateError> {
        self.read_directory()
            .loans
            .get(id)
            .cloned()
            .ok_or_else(|| StateError::UnknownLoan(id.clone()))
    }

    /// Run a state-changing operation on one loan and publish its events
    ///
    /// Events go out while the loan is still locked, so subscribers see each
    /// loan's events in log order.
    fn with_loan<T, F>(&self, id: &LoanId, operation: F) -> Result<T, LoanError>
    where
        F: FnOnce(&mut LoanInstance, &CallContext<'_>) -> Result<T, LoanError>,
    {
        let slot = self.slot(id)?;
        let _guard = InFlight::enter(id)?;
        let mut loan = slot.lock().unwrap_or_else(PoisonError::into_inner);
        let seen = loan.events().len();
        let ctx = self.context();
        let value = operation(&mut loan, &ctx)?;
        self.publish(loan.events().since(seen));
        Ok(value)
    }

    fn inspect<T, F>(&self, id: &LoanId, read: F) -> Result<T, LoanError>
    where
        F: FnOnce(&LoanInstance) -> Result<T, LoanError>,
    {
        let slot = self.slot(id)?;
        let _guard = InFlight::enter(id)?;
        let loan = slot.lock().unwrap_or_else(PoisonError::into_inner);
        read(&loan)
    }

    fn publish(&self, events: &[LoanEvent]) {
        if events.is_empty() {
            return;
        }
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| events.iter().all(|event| tx.send(event.clone()).is_ok()));
    }

    fn read_directory(&self) -> std::sync::RwLockReadGuard<'_, Directory> {
        self.directory.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_directory(&self) -> std::sync::RwLockWriteGuard<'_, Directory> {
        self.directory.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::ManualClock;
    use crate::gateway::InMemoryLedger;
    use crate::models::ids::AssetId;
    use crate::oracle::NoPriceOracle;

    fn registry() -> LoanRegistry {
        LoanRegistry::new(
            ProtocolConfig::default(),
            Arc::new(InMemoryLedger::new()),
            Arc::new(NoPriceOracle),
            Arc::new(ManualClock::new(0)),
        )
        .unwrap()
    }

    fn terms() -> LoanTerms {
        LoanTerms {
            loan_amount: 100,
            duration_seconds: 60,
            interest_rate_bps: 100,
            collateral_asset: AssetId::from("TTT"),
            collateral_amount: 1,
            collateral_unit_price: 1_000,
            loan_to_value_bps: 5_000,
        }
    }

    #[test]
    fn test_unknown_loan() {
        let registry = registry();
        let missing = LoanId::from("nope");
        assert_eq!(
            registry.get_loan_data(&missing),
            Err(LoanError::State(StateError::UnknownLoan(missing.clone())))
        );
        assert!(registry.repay(&missing, &PartyId::from("x"), 1, 1).is_err());
    }

    #[test]
    fn test_rejected_creation_not_registered() {
        let registry = registry();
        let mut bad = terms();
        bad.loan_amount = 0;
        assert!(registry.create_request(&PartyId::from("b"), bad).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_in_flight_guard_released_on_drop() {
        let id = LoanId::from("x");
        {
            let _guard = InFlight::enter(&id).unwrap();
            assert_eq!(
                InFlight::enter(&id).err(),
                Some(StateError::Reentrant(id.clone()))
            );
        }
        assert!(InFlight::enter(&id).is_ok());
    }

    #[test]
    fn test_rejected_config() {
        let mut config = ProtocolConfig::default();
        config.platform_fee_bps = 20_000;
        let result = LoanRegistry::new(
            config,
            Arc::new(InMemoryLedger::new()),
            Arc::new(NoPriceOracle),
            Arc::new(ManualClock::new(0)),
        );
        assert!(result.is_err());
    }
}
