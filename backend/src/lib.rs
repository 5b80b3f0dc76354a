//! P2P Lending Core - Rust Engine
//!
//! Collateralized peer-to-peer loan escrow: loan requests and offers,
//! collateral custody, installment repayment and collateral settlement.
//!
//! # Architecture
//!
//! - **core**: Time source (`Clock`)
//! - **models**: Domain types (LoanTerms, LoanInstance, events)
//! - **schedule**: Installment and interest computation
//! - **registry**: Append-only loan directory, checkpointing
//! - **gateway**: Asset transfers (native value and collateral tokens)
//! - **oracle**: Last-value collateral price cache
//!
//! # Critical Invariants
//!
//! 1. All money values are u128 in the smallest unit
//! 2. Every operation either fully applies or fully fails
//! 3. State is committed before any value moves
//! 4. FFI boundary is minimal and safe

// Module declarations
pub mod config;
pub mod core;
pub mod error;
pub mod gateway;
pub mod models;
pub mod oracle;
pub mod registry;
pub mod schedule;

// Re-exports for convenience
pub use config::{ConfigError, ProtocolConfig};
pub use core::time::{Clock, ManualClock, SystemClock, Timestamp};
pub use error::{AuthorizationError, LoanError, StateError, TimingError, ValidationError};
pub use gateway::{Asset, AssetTransferGateway, InMemoryLedger, TransferError};
pub use models::{
    event::{EventLog, LoanEvent, LoanEventType},
    ids::{AssetId, LoanId, PartyId},
    loan::{CollateralStatus, LoanInstance, LoanStatus, OriginMode},
    loan_data::LoanData,
    money::{Amount, Bps},
    repayment::{RepaymentQuote, RepaymentRecord, RepaymentStatus},
    terms::{AcceptanceCriteria, Enrichment, LoanTerms, OfferTerms},
};
pub use oracle::{PriceCache, PriceOracle, PriceQuote, PriceUpdate};
pub use registry::{CheckpointError, LoanRegistry, RegistrySnapshot};
pub use schedule::{InstallmentPlan, InterestModel, RepaymentScheduler, ScheduleConfig};

// FFI module (when feature enabled)
#[cfg(feature = "pyo3")]
pub mod ffi;

// PyO3 exports (when feature enabled)
#[cfg(feature = "pyo3")]
use pyo3::prelude::*;

#[cfg(feature = "pyo3")]
#[pymodule]
fn p2p_lending_core_rs(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<ffi::registry::PyLoanRegistry>()?;
    Ok(())
}
