//! PyO3 wrapper for LoanRegistry
//!
//! Backs the registry with an in-memory ledger, a price cache and a manual
//! clock, so Python tests and tools can drive complete loan lifecycles.

use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use serde::Serialize;
use std::sync::Arc;

use crate::config::ProtocolConfig;
use crate::core::time::{Clock, ManualClock};
use crate::error::LoanError;
use crate::gateway::{Asset, InMemoryLedger};
use crate::models::ids::{AssetId, LoanId, PartyId};
use crate::models::terms::{Enrichment, LoanTerms, OfferTerms};
use crate::oracle::{PriceCache, PriceUpdate};
use crate::registry::LoanRegistry;

fn loan_err(e: LoanError) -> PyErr {
    PyErr::new::<PyRuntimeError, _>(e.to_string())
}

fn parse_json<T: serde::de::DeserializeOwned>(what: &str, json: &str) -> PyResult<T> {
    serde_json::from_str(json)
        .map_err(|e| PyErr::new::<PyValueError, _>(format!("Invalid {}: {}", what, e)))
}

fn to_json<T: Serialize>(value: &T) -> PyResult<String> {
    serde_json::to_string(value).map_err(|e| PyErr::new::<PyRuntimeError, _>(e.to_string()))
}

/// `"native"` or a collateral asset id
fn parse_asset(asset: &str) -> Asset {
    if asset.eq_ignore_ascii_case("native") {
        Asset::Native
    } else {
        Asset::Collateral(AssetId::from(asset))
    }
}

/// Python wrapper for Rust LoanRegistry
///
/// # Example (from Python)
///
/// ```python
/// from p2p_lending_core_rs import LoanRegistry
///
/// reg = LoanRegistry.new('{"platform_fee_bps": 100}', 0)
/// reg.deposit("bob", "native", 1000)
/// loan = reg.create_request("alice", json.dumps(terms))
/// reg.fund(loan, "bob", 1000)
/// print(json.loads(reg.get_loan_data(loan))["status"])
/// ```
#[pyclass(name = "LoanRegistry")]
pub struct PyLoanRegistry {
    inner: LoanRegistry,
    ledger: Arc<InMemoryLedger>,
    prices: Arc<PriceCache>,
    clock: Arc<ManualClock>,
}

#[pymethods]
impl PyLoanRegistry {
    /// Create a registry from a JSON config (`None` = defaults), starting
    /// the clock at `start`
    #[staticmethod]
    #[pyo3(signature = (config=None, start=0))]
    fn new(config: Option<&str>, start: u64) -> PyResult<Self> {
        let config = match config {
            Some(json) => ProtocolConfig::from_json(json)
                .map_err(|e| PyErr::new::<PyValueError, _>(e.to_string()))?,
            None => ProtocolConfig::default(),
        };
        let ledger = Arc::new(InMemoryLedger::new());
        let prices = Arc::new(PriceCache::new());
        let clock = Arc::new(ManualClock::new(start));
        let inner = LoanRegistry::new(config, ledger.clone(), prices.clone(), clock.clone())
            .map_err(|e| PyErr::new::<PyValueError, _>(e.to_string()))?;

        Ok(PyLoanRegistry {
            inner,
            ledger,
            prices,
            clock,
        })
    }

    // ========================================================================
    // Loans
    // ========================================================================

    fn create_request(&self, borrower: &str, terms: &str) -> PyResult<String> {
        let terms: LoanTerms = parse_json("loan terms", terms)?;
        self.inner
            .create_request(&PartyId::from(borrower), terms)
            .map(|id| id.to_string())
            .map_err(loan_err)
    }

    fn create_offer(&self, lender: &str, offer: &str) -> PyResult<String> {
        let offer: OfferTerms = parse_json("offer terms", offer)?;
        self.inner
            .create_offer(&PartyId::from(lender), offer)
            .map(|id| id.to_string())
            .map_err(loan_err)
    }

    fn get_all(&self) -> Vec<String> {
        self.inner.get_all().iter().map(|id| id.to_string()).collect()
    }

    fn fund(&self, loan_id: &str, lender: &str, value: u128) -> PyResult<()> {
        self.inner
            .fund(&LoanId::from(loan_id), &PartyId::from(lender), value)
            .map_err(loan_err)
    }

    fn fund_offer(&self, loan_id: &str, lender: &str, value: u128) -> PyResult<()> {
        self.inner
            .fund_offer(&LoanId::from(loan_id), &PartyId::from(lender), value)
            .map_err(loan_err)
    }

    fn accept_and_enrich(&self, loan_id: &str, borrower: &str, enrichment: &str) -> PyResult<()> {
        let enrichment: Enrichment = parse_json("enrichment", enrichment)?;
        self.inner
            .accept_and_enrich(&LoanId::from(loan_id), &PartyId::from(borrower), &enrichment)
            .map_err(loan_err)
    }

    fn escrow_collateral(&self, loan_id: &str, borrower: &str) -> PyResult<()> {
        self.inner
            .escrow_collateral(&LoanId::from(loan_id), &PartyId::from(borrower))
            .map_err(loan_err)
    }

    fn repay(&self, loan_id: &str, payer: &str, value: u128, installment_index: u32) -> PyResult<()> {
        self.inner
            .repay(
                &LoanId::from(loan_id),
                &PartyId::from(payer),
                value,
                installment_index,
            )
            .map_err(loan_err)
    }

    fn return_collateral_to_borrower(&self, loan_id: &str, caller: &str) -> PyResult<()> {
        self.inner
            .return_collateral_to_borrower(&LoanId::from(loan_id), &PartyId::from(caller))
            .map_err(loan_err)
    }

    fn claim_collateral_by_lender(&self, loan_id: &str, lender: &str) -> PyResult<()> {
        self.inner
            .claim_collateral_by_lender(&LoanId::from(loan_id), &PartyId::from(lender))
            .map_err(loan_err)
    }

    /// Loan record as JSON
    fn get_loan_data(&self, loan_id: &str) -> PyResult<String> {
        let data = self
            .inner
            .get_loan_data(&LoanId::from(loan_id))
            .map_err(loan_err)?;
        to_json(&data)
    }

    /// Legacy positional tuple as a JSON array
    fn get_loan_tuple(&self, loan_id: &str) -> PyResult<String> {
        let data = self
            .inner
            .get_loan_data(&LoanId::from(loan_id))
            .map_err(loan_err)?;
        let tuple = data
            .legacy_tuple()
            .map_err(|e| PyErr::new::<PyRuntimeError, _>(e.to_string()))?;
        to_json(&tuple)
    }

    fn get_repayment_amount(&self, loan_id: &str, index: u32) -> PyResult<String> {
        let quote = self
            .inner
            .get_repayment_amount(&LoanId::from(loan_id), index)
            .map_err(loan_err)?;
        to_json(&quote)
    }

    fn events(&self, loan_id: &str) -> PyResult<String> {
        let events = self.inner.events(&LoanId::from(loan_id)).map_err(loan_err)?;
        to_json(&events)
    }

    fn checkpoint(&self) -> PyResult<String> {
        self.inner
            .checkpoint()
            .and_then(|snapshot| snapshot.to_json())
            .map_err(|e| PyErr::new::<PyRuntimeError, _>(e.to_string()))
    }

    // ========================================================================
    // Ledger, prices and time
    // ========================================================================

    fn deposit(&self, party: &str, asset: &str, amount: u128) {
        self.ledger
            .deposit(&PartyId::from(party), &parse_asset(asset), amount);
    }

    fn approve(&self, owner: &str, loan_id: &str, asset: &str, amount: u128) {
        self.ledger.approve(
            &PartyId::from(owner),
            &LoanId::from(loan_id),
            &parse_asset(asset),
            amount,
        );
    }

    fn balance(&self, party: &str, asset: &str) -> u128 {
        self.ledger.balance(&PartyId::from(party), &parse_asset(asset))
    }

    /// Returns false when a newer quote is already cached
    fn publish_price(&self, asset: &str, price: u128, published_at: u64) -> bool {
        self.prices.on_price_update(PriceUpdate {
            asset: AssetId::from(asset),
            price,
            published_at,
        })
    }

    fn advance_clock(&self, seconds: u64) {
        self.clock.advance(seconds);
    }

    fn now(&self) -> u64 {
        self.clock.now()
    }
}
