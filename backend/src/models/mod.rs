//! Domain models for the lending core

pub mod event;
pub mod ids;
pub mod loan;
pub mod loan_data;
pub mod money;
pub mod repayment;
pub mod terms;

// Re-exports
pub use event::{EventLog, LoanEvent, LoanEventType};
pub use ids::{AssetId, LoanId, PartyId};
pub use loan::{CallContext, CollateralStatus, LoanInstance, LoanPolicy, LoanStatus, Operation, OriginMode};
pub use loan_data::LoanData;
pub use money::{Amount, Bps};
pub use repayment::{RepaymentQuote, RepaymentRecord, RepaymentStatus};
pub use terms::{AcceptanceCriteria, Enrichment, LoanTerms, OfferTerms};
