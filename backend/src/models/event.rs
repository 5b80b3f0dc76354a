//! Loan event logging for auditing and external indexing.
//!
//! Every committed lifecycle transition appends one [`LoanEvent`] to the
//! loan's own [`EventLog`]. Logs are never truncated: a loan in a terminal
//! state keeps its full history.
//!
//! # Event Types
//!
//! - **Created**: request or offer registered
//! - **Funded**: lender's capital escrowed
//! - **Accepted**: borrower took an offer and finalized its terms
//! - **Activated**: collateral escrowed, principal disbursed
//! - **Repaid**: one installment paid
//! - **Completed**: last installment paid
//! - **CollateralReturned**: collateral (or a share of it) sent back to the borrower
//! - **Defaulted**: remaining collateral claimed by the lender
//!
//! # Example
//!
//! ```rust
//! use p2p_lending_core_rs::models::event::{EventLog, LoanEvent, LoanEventType};
//! use p2p_lending_core_rs::{LoanId, PartyId};
//!
//! let mut log = EventLog::new();
//! log.log(LoanEvent {
//!     loan_id: LoanId::from("loan-1"),
//!     event_type: LoanEventType::Funded,
//!     actor: PartyId::from("LENDER"),
//!     amount: 6_000,
//!     timestamp: 10,
//! });
//!
//! assert_eq!(log.events_of_type(LoanEventType::Funded).len(), 1);
//! ```

use crate::core::time::Timestamp;
use crate::models::ids::{LoanId, PartyId};
use crate::models::money::Amount;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of lifecycle transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoanEventType {
    Created,
    Funded,
    Accepted,
    Activated,
    Repaid,
    Completed,
    CollateralReturned,
    Defaulted,
}

impl fmt::Display for LoanEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// `(loan, type, actor, amount, timestamp)` record of one transition
///
/// `amount` is the value the transition moved or committed: principal for
/// creation, funding and activation, the installment for repayments, the
/// collateral units for returns and claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanEvent {
    pub loan_id: LoanId,
    pub event_type: LoanEventType,
    pub actor: PartyId,
    pub amount: Amount,
    pub timestamp: Timestamp,
}

/// Append-only event log.
///
/// This is a simple wrapper around Vec<LoanEvent> with query helpers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventLog {
    events: Vec<LoanEvent>,
}

impl EventLog {
    /// Create a new empty event log
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Add an event to the log
    pub fn log(&mut self, event: LoanEvent) {
        self.events.push(event);
    }

    /// Get the number of events logged
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Check if the log is empty
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Get all events
    pub fn events(&self) -> &[LoanEvent] {
        &self.events
    }

    /// Events logged after the first `offset` ones
    pub fn since(&self, offset: usize) -> &[LoanEvent] {
        self.events.get(offset..).unwrap_or(&[])
    }

    /// Get events of a specific type
    pub fn events_of_type(&self, event_type: LoanEventType) -> Vec<&LoanEvent> {
        self.events
            .iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }

    /// Get events performed by a specific party
    pub fn events_by_actor(&self, actor: &PartyId) -> Vec<&LoanEvent> {
        self.events.iter().filter(|e| &e.actor == actor).collect()
    }
}
