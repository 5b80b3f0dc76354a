//! Loan instance: the per-loan escrow state machine
//!
//! A `LoanInstance` holds one loan's escrowed principal and collateral and is
//! the only thing allowed to decide when either moves.
//!
//! # Lifecycle
//!
//! ```text
//! RequestPending ──fund──────────────────────────┐
//!                                                ▼
//! OfferPending ──fund_offer──► FundedUnmatched ──accept_and_enrich──► CollateralAwaited
//!                                                                       │
//!                                                          escrow_collateral
//!                                                                       ▼
//!                              Completed ◄──repay (last)────────────  Active
//!                                  ▲                                    │
//!                                  └── return_collateral (all paid) ────┤
//!                                                                       │ return_collateral (partial)
//!                                                                       ▼
//!                              Defaulted ◄──claim_collateral──── ExpiredPartial
//! ```
//!
//! # Critical Invariants
//!
//! 1. **Commit, then transfer**: every operation validates, commits its state
//!    change, then runs the planned transfers. A failed transfer restores the
//!    pre-call state, so a call either fully applies or leaves no trace.
//! 2. **Outstanding never negative**: `outstanding_amount` starts at
//!    `loan_amount` and each schedule record reduces it by its own principal
//!    exactly once; principals sum to `loan_amount`.
//! 3. **Collateral conservation**: once arrived,
//!    `escrowed + returned + claimed == collateral_amount`.
//! 4. **No late payments**: nothing is accepted after the final due date.
//! 5. **Pull-based default**: no timer ever changes a loan; expiry is
//!    evaluated only when a call is made.

use crate::core::time::Timestamp;
use crate::error::{AuthorizationError, LoanError, StateError, TimingError, ValidationError};
use crate::gateway::{Asset, AssetTransferGateway, TransferPlan};
use crate::models::event::{EventLog, LoanEvent, LoanEventType};
use crate::models::ids::{LoanId, PartyId};
use crate::models::loan_data::LoanData;
use crate::models::money::{pro_rata, Amount, Bps};
use crate::models::repayment::{RepaymentQuote, RepaymentRecord, RepaymentStatus};
use crate::models::terms::{AcceptanceCriteria, Enrichment, LoanTerms, OfferTerms};
use crate::oracle::PriceOracle;
use crate::schedule::{expiry_at, RepaymentScheduler, ScheduleConfig};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who originated the loan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OriginMode {
    /// Borrower fixed all terms; a lender funds it
    Request,

    /// Lender committed capital; a borrower completes the terms
    Offer,
}

impl fmt::Display for OriginMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OriginMode::Request => f.write_str("request"),
            OriginMode::Offer => f.write_str("offer"),
        }
    }
}

/// Loan lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanStatus {
    RequestPending,
    OfferPending,
    /// Offer capital escrowed, no borrower yet
    FundedUnmatched,
    /// Terms final and principal escrowed; waiting for the borrower's collateral
    CollateralAwaited,
    Active,
    Completed,
    /// Expired with some installments unpaid; the lender may claim the rest
    ExpiredPartial,
    Defaulted,
}

impl LoanStatus {
    /// `Completed` and `Defaulted` never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoanStatus::Completed | LoanStatus::Defaulted)
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Where the collateral is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollateralStatus {
    /// Not escrowed yet
    None,
    /// Held in the loan's escrow
    Arrived,
    /// Borrower's share sent back at settlement
    Returned,
    /// Remainder taken by the lender
    Claimed,
}

/// Loan operations, for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Fund,
    FundOffer,
    AcceptAndEnrich,
    EscrowCollateral,
    Repay,
    ReturnCollateral,
    ClaimCollateral,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Registry-wide settings frozen into each loan at creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanPolicy {
    /// Receives the fee portion of every installment
    pub platform_account: PartyId,
    pub platform_fee_bps: Bps,
    pub schedule: ScheduleConfig,
    /// Also require the LTV invariant at the oracle's last published price
    pub enforce_oracle_price: bool,
}

impl LoanPolicy {
    pub fn scheduler(&self) -> RepaymentScheduler {
        RepaymentScheduler::new(self.schedule, self.platform_fee_bps)
    }
}

/// Collaborators and time for one operation call
#[derive(Clone, Copy)]
pub struct CallContext<'a> {
    pub now: Timestamp,
    pub gateway: &'a dyn AssetTransferGateway,
    pub oracle: &'a dyn PriceOracle,
}

/// One loan and its escrow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanInstance {
    id: LoanId,
    origin: OriginMode,
    status: LoanStatus,
    borrower: Option<PartyId>,
    lender: Option<PartyId>,
    loan_amount: Amount,
    duration_seconds: u64,
    /// Offer-mode partial terms, kept for auditing after acceptance
    offer: Option<OfferTerms>,
    terms: Option<LoanTerms>,
    policy: LoanPolicy,
    created_at: Timestamp,
    activated_at: Option<Timestamp>,
    collateral_status: CollateralStatus,

    escrowed_funds: Amount,
    escrowed_collateral: Amount,
    returned_collateral: Amount,
    claimed_collateral: Amount,

    outstanding_amount: Amount,
    paid_principal: Amount,
    paid_installments: u32,
    total_installments: u32,
    schedule: Vec<RepaymentRecord>,

    events: EventLog,
}

impl LoanInstance {
    fn blank(
        id: LoanId,
        origin: OriginMode,
        status: LoanStatus,
        loan_amount: Amount,
        duration_seconds: u64,
        policy: LoanPolicy,
        now: Timestamp,
    ) -> Self {
        let total_installments = policy
            .scheduler()
            .installment_count(loan_amount, duration_seconds);
        Self {
            id,
            origin,
            status,
            borrower: None,
            lender: None,
            loan_amount,
            duration_seconds,
            offer: None,
            terms: None,
            policy,
            created_at: now,
            activated_at: None,
            collateral_status: CollateralStatus::None,
            escrowed_funds: 0,
            escrowed_collateral: 0,
            returned_collateral: 0,
            claimed_collateral: 0,
            outstanding_amount: 0,
            paid_principal: 0,
            paid_installments: 0,
            total_installments,
            schedule: Vec::new(),
            events: EventLog::new(),
        }
    }

    /// Register a borrower's request with complete terms
    ///
    /// Terms are validated and finalized here; they never change afterwards.
    pub fn new_request(
        id: LoanId,
        borrower: PartyId,
        terms: LoanTerms,
        policy: LoanPolicy,
        ctx: &CallContext<'_>,
    ) -> Result<Self, LoanError> {
        check_terms(&terms, &policy, ctx)?;

        let mut loan = Self::blank(
            id,
            OriginMode::Request,
            LoanStatus::RequestPending,
            terms.loan_amount,
            terms.duration_seconds,
            policy,
            ctx.now,
        );
        loan.emit(LoanEventType::Created, &borrower, terms.loan_amount, ctx.now);
        loan.borrower = Some(borrower);
        loan.terms = Some(terms);
        Ok(loan)
    }

    /// Register a lender's offer with partial terms
    pub fn new_offer(
        id: LoanId,
        lender: PartyId,
        offer: OfferTerms,
        policy: LoanPolicy,
        ctx: &CallContext<'_>,
    ) -> Result<Self, LoanError> {
        offer.validate()?;
        expiry_at(ctx.now, offer.duration_seconds)?;

        let mut loan = Self::blank(
            id,
            OriginMode::Offer,
            LoanStatus::OfferPending,
            offer.loan_amount,
            offer.duration_seconds,
            policy,
            ctx.now,
        );
        loan.emit(LoanEventType::Created, &lender, offer.loan_amount, ctx.now);
        loan.lender = Some(lender);
        loan.offer = Some(offer);
        Ok(loan)
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Lender funds a request
    pub fn fund(
        &mut self,
        lender: &PartyId,
        value: Amount,
        ctx: &CallContext<'_>,
    ) -> Result<(), LoanError> {
        self.require_origin(Operation::Fund, OriginMode::Request)?;
        self.require_status(Operation::Fund, &[LoanStatus::RequestPending])?;
        if self.borrower.as_ref() == Some(lender) {
            return Err(AuthorizationError::SelfDealing {
                caller: lender.clone(),
            }
            .into());
        }
        self.require_exact_value(value, self.loan_amount)?;

        self.commit(ctx, |loan, plan| {
            loan.lender = Some(lender.clone());
            loan.escrowed_funds = value;
            loan.status = LoanStatus::CollateralAwaited;
            loan.emit(LoanEventType::Funded, lender, value, ctx.now);
            plan.pull(Asset::Native, lender, value);
        })
    }

    /// Offering lender escrows its capital before any borrower is chosen
    pub fn fund_offer(
        &mut self,
        lender: &PartyId,
        value: Amount,
        ctx: &CallContext<'_>,
    ) -> Result<(), LoanError> {
        self.require_origin(Operation::FundOffer, OriginMode::Offer)?;
        self.require_status(Operation::FundOffer, &[LoanStatus::OfferPending])?;
        self.require_lender(lender)?;
        self.require_exact_value(value, self.loan_amount)?;

        self.commit(ctx, |loan, plan| {
            loan.escrowed_funds = value;
            loan.status = LoanStatus::FundedUnmatched;
            loan.emit(LoanEventType::Funded, lender, value, ctx.now);
            plan.pull(Asset::Native, lender, value);
        })
    }

    /// Borrower takes a funded offer and supplies the remaining terms
    pub fn accept_and_enrich(
        &mut self,
        borrower: &PartyId,
        enrichment: &Enrichment,
        ctx: &CallContext<'_>,
    ) -> Result<(), LoanError> {
        self.require_origin(Operation::AcceptAndEnrich, OriginMode::Offer)?;
        self.require_status(Operation::AcceptAndEnrich, &[LoanStatus::FundedUnmatched])?;
        if self.lender.as_ref() == Some(borrower) {
            return Err(AuthorizationError::SelfDealing {
                caller: borrower.clone(),
            }
            .into());
        }
        let offer = self.offer.as_ref().ok_or(StateError::TermsNotFinalized)?;
        offer.acceptance.check(enrichment)?;
        let terms = offer.enrich(enrichment);
        check_terms(&terms, &self.policy, ctx)?;

        self.commit(ctx, |loan, _| {
            loan.emit(
                LoanEventType::Accepted,
                borrower,
                terms.collateral_amount,
                ctx.now,
            );
            loan.borrower = Some(borrower.clone());
            loan.terms = Some(terms);
            loan.status = LoanStatus::CollateralAwaited;
        })
    }

    /// Borrower escrows collateral; the loan activates and principal is disbursed
    pub fn escrow_collateral(
        &mut self,
        caller: &PartyId,
        ctx: &CallContext<'_>,
    ) -> Result<(), LoanError> {
        self.require_status(Operation::EscrowCollateral, &[LoanStatus::CollateralAwaited])?;
        self.require_borrower(caller)?;
        let terms = self.terms.clone().ok_or(StateError::TermsNotFinalized)?;
        let schedule = self.policy.scheduler().build(&terms, ctx.now)?;

        self.commit(ctx, |loan, plan| {
            let disbursed = loan.escrowed_funds;
            loan.collateral_status = CollateralStatus::Arrived;
            loan.escrowed_collateral = terms.collateral_amount;
            loan.total_installments = schedule.len() as u32;
            loan.schedule = schedule;
            loan.outstanding_amount = terms.loan_amount;
            loan.activated_at = Some(ctx.now);
            loan.escrowed_funds = 0;
            loan.status = LoanStatus::Active;
            loan.emit(LoanEventType::Activated, caller, disbursed, ctx.now);

            plan.pull(
                Asset::Collateral(terms.collateral_asset.clone()),
                caller,
                terms.collateral_amount,
            );
            plan.push(Asset::Native, caller, disbursed);
        })
    }

    /// Pay the next installment
    ///
    /// Installments are strictly sequential and must be paid in full. Anyone
    /// may pay; the lender receives `amount - fee`, the platform the fee.
    pub fn repay(
        &mut self,
        payer: &PartyId,
        value: Amount,
        installment_index: u32,
        ctx: &CallContext<'_>,
    ) -> Result<(), LoanError> {
        self.require_status(Operation::Repay, &[LoanStatus::Active])?;
        let expired_at = self.expires_at().ok_or(StateError::TermsNotFinalized)?;
        if ctx.now > expired_at {
            return Err(TimingError::LoanExpired {
                expired_at,
                now: ctx.now,
            }
            .into());
        }

        let position = self.schedule.iter().position(RepaymentRecord::is_pending);
        let expected = position.map(|p| self.schedule[p].installment_index);
        let position = match position {
            Some(p) if expected == Some(installment_index) => p,
            _ => {
                return Err(StateError::InstallmentOutOfOrder {
                    expected,
                    requested: installment_index,
                }
                .into())
            }
        };
        let record = self.schedule[position].clone();
        self.require_exact_value(value, record.amount)?;
        let lender = self.lender.clone().ok_or(StateError::TermsNotFinalized)?;
        let platform = self.policy.platform_account.clone();

        self.commit(ctx, |loan, plan| {
            loan.schedule[position].status = RepaymentStatus::Paid { paid_at: ctx.now };
            loan.outstanding_amount -= record.principal_portion;
            loan.paid_principal += record.principal_portion;
            loan.paid_installments += 1;
            loan.emit(LoanEventType::Repaid, payer, value, ctx.now);
            if loan.paid_installments == loan.total_installments {
                loan.status = LoanStatus::Completed;
                loan.emit(LoanEventType::Completed, payer, loan.paid_principal, ctx.now);
            }

            plan.pull(Asset::Native, payer, value);
            plan.push(Asset::Native, &lender, record.lender_share());
            plan.push(Asset::Native, &platform, record.fee_portion);
        })
    }

    /// Settle collateral after expiry
    ///
    /// Sends the borrower `collateral × paid_principal / loan_amount` (rounded
    /// down). A fully repaid loan stays `Completed`; otherwise the loan moves
    /// to `ExpiredPartial` and the rest waits for the lender's claim. Either
    /// party may trigger settlement.
    pub fn return_collateral_to_borrower(
        &mut self,
        caller: &PartyId,
        ctx: &CallContext<'_>,
    ) -> Result<(), LoanError> {
        if self.collateral_status == CollateralStatus::Returned {
            return Err(StateError::CollateralAlreadyReturned.into());
        }
        self.require_status(
            Operation::ReturnCollateral,
            &[LoanStatus::Active, LoanStatus::Completed],
        )?;
        if !self.is_party(caller) {
            return Err(AuthorizationError::NotParty {
                caller: caller.clone(),
            }
            .into());
        }
        let expires_at = self.expires_at().ok_or(StateError::TermsNotFinalized)?;
        if ctx.now < expires_at {
            return Err(TimingError::NotYetExpired {
                expires_at,
                now: ctx.now,
            }
            .into());
        }
        let terms = self.terms.clone().ok_or(StateError::TermsNotFinalized)?;
        let borrower = self.borrower.clone().ok_or(StateError::TermsNotFinalized)?;
        let released = pro_rata(
            terms.collateral_amount,
            self.paid_principal,
            terms.loan_amount,
        );

        self.commit(ctx, |loan, plan| {
            loan.escrowed_collateral -= released;
            loan.returned_collateral += released;
            loan.collateral_status = CollateralStatus::Returned;
            for record in loan.schedule.iter_mut().filter(|r| r.is_pending()) {
                record.status = RepaymentStatus::Missed;
            }
            loan.status = if loan.paid_principal == loan.loan_amount {
                LoanStatus::Completed
            } else {
                LoanStatus::ExpiredPartial
            };
            loan.emit(LoanEventType::CollateralReturned, caller, released, ctx.now);

            plan.push(Asset::Collateral(terms.collateral_asset.clone()), &borrower, released);
        })
    }

    /// Lender takes the collateral left after a partial return
    pub fn claim_collateral_by_lender(
        &mut self,
        caller: &PartyId,
        ctx: &CallContext<'_>,
    ) -> Result<(), LoanError> {
        self.require_status(Operation::ClaimCollateral, &[LoanStatus::ExpiredPartial])?;
        self.require_lender(caller)?;
        let remainder = self.escrowed_collateral;
        if remainder == 0 {
            return Err(StateError::NothingToClaim.into());
        }
        let asset = self
            .terms
            .as_ref()
            .map(|terms| terms.collateral_asset.clone())
            .ok_or(StateError::TermsNotFinalized)?;

        self.commit(ctx, |loan, plan| {
            loan.escrowed_collateral = 0;
            loan.claimed_collateral = remainder;
            loan.collateral_status = CollateralStatus::Claimed;
            loan.status = LoanStatus::Defaulted;
            loan.emit(LoanEventType::Defaulted, caller, remainder, ctx.now);

            plan.push(Asset::Collateral(asset), caller, remainder);
        })
    }

    /// Amounts of installment `index` (1-based)
    ///
    /// Before activation the quote is previewed from the finalized terms.
    pub fn repayment_quote(&self, index: u32) -> Result<RepaymentQuote, LoanError> {
        if !self.schedule.is_empty() {
            return self
                .schedule
                .iter()
                .find(|r| r.installment_index == index)
                .map(RepaymentRecord::quote)
                .ok_or_else(|| {
                    ValidationError::IndexOutOfRange {
                        index,
                        total: self.total_installments,
                    }
                    .into()
                });
        }
        let terms = self.terms.as_ref().ok_or(StateError::TermsNotFinalized)?;
        Ok(self.policy.scheduler().quote(terms, index)?)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Apply a validated state change, then run the transfers it planned
    ///
    /// `apply` must not fail: every check happens before `commit`. If the
    /// plan fails, the loan is restored to its state before the call.
    fn commit<F>(&mut self, ctx: &CallContext<'_>, apply: F) -> Result<(), LoanError>
    where
        F: FnOnce(&mut Self, &mut TransferPlan),
    {
        let before = self.clone();
        let mut plan = TransferPlan::new(self.id.clone());
        apply(self, &mut plan);
        if let Err(error) = plan.execute(ctx.gateway) {
            *self = before;
            return Err(error.into());
        }
        Ok(())
    }

    fn emit(&mut self, event_type: LoanEventType, actor: &PartyId, amount: Amount, now: Timestamp) {
        self.events.log(LoanEvent {
            loan_id: self.id.clone(),
            event_type,
            actor: actor.clone(),
            amount,
            timestamp: now,
        });
    }

    fn require_origin(&self, operation: Operation, origin: OriginMode) -> Result<(), StateError> {
        if self.origin != origin {
            return Err(StateError::WrongOriginMode {
                operation,
                origin: self.origin,
            });
        }
        Ok(())
    }

    fn require_status(&self, operation: Operation, allowed: &[LoanStatus]) -> Result<(), StateError> {
        if !allowed.contains(&self.status) {
            return Err(StateError::InvalidStatus {
                operation,
                status: self.status,
            });
        }
        Ok(())
    }

    fn require_borrower(&self, caller: &PartyId) -> Result<(), AuthorizationError> {
        if self.borrower.as_ref() != Some(caller) {
            return Err(AuthorizationError::NotBorrower {
                caller: caller.clone(),
            });
        }
        Ok(())
    }

    fn require_lender(&self, caller: &PartyId) -> Result<(), AuthorizationError> {
        if self.lender.as_ref() != Some(caller) {
            return Err(AuthorizationError::NotLender {
                caller: caller.clone(),
            });
        }
        Ok(())
    }

    fn require_exact_value(&self, value: Amount, expected: Amount) -> Result<(), ValidationError> {
        if value != expected {
            return Err(ValidationError::AmountMismatch {
                expected,
                actual: value,
            });
        }
        Ok(())
    }

    fn is_party(&self, caller: &PartyId) -> bool {
        self.borrower.as_ref() == Some(caller) || self.lender.as_ref() == Some(caller)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn id(&self) -> &LoanId {
        &self.id
    }

    pub fn origin(&self) -> OriginMode {
        self.origin
    }

    pub fn status(&self) -> LoanStatus {
        self.status
    }

    pub fn borrower(&self) -> Option<&PartyId> {
        self.borrower.as_ref()
    }

    pub fn lender(&self) -> Option<&PartyId> {
        self.lender.as_ref()
    }

    pub fn loan_amount(&self) -> Amount {
        self.loan_amount
    }

    pub fn duration_seconds(&self) -> u64 {
        self.duration_seconds
    }

    /// Finalized terms (requests: from creation; offers: after acceptance)
    pub fn terms(&self) -> Option<&LoanTerms> {
        self.terms.as_ref()
    }

    pub fn acceptance(&self) -> Option<&AcceptanceCriteria> {
        self.offer.as_ref().map(|offer| &offer.acceptance)
    }

    pub fn policy(&self) -> &LoanPolicy {
        &self.policy
    }

    pub fn platform_fee_bps(&self) -> Bps {
        self.policy.platform_fee_bps
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn activated_at(&self) -> Option<Timestamp> {
        self.activated_at
    }

    /// `activated_at + duration`; also the final installment's due date
    pub fn expires_at(&self) -> Option<Timestamp> {
        self.activated_at
            .and_then(|activated_at| activated_at.checked_add(self.duration_seconds))
    }

    pub fn collateral_status(&self) -> CollateralStatus {
        self.collateral_status
    }

    /// Principal still owed
    pub fn outstanding_amount(&self) -> Amount {
        self.outstanding_amount
    }

    pub fn paid_principal(&self) -> Amount {
        self.paid_principal
    }

    pub fn paid_installments(&self) -> u32 {
        self.paid_installments
    }

    pub fn total_installments(&self) -> u32 {
        self.total_installments
    }

    /// Native value held in escrow (between funding and activation)
    pub fn escrowed_funds(&self) -> Amount {
        self.escrowed_funds
    }

    /// Collateral still held in escrow
    pub fn remaining_collateral(&self) -> Amount {
        self.escrowed_collateral
    }

    pub fn returned_collateral(&self) -> Amount {
        self.returned_collateral
    }

    pub fn claimed_collateral(&self) -> Amount {
        self.claimed_collateral
    }

    pub fn schedule(&self) -> &[RepaymentRecord] {
        &self.schedule
    }

    /// Lowest-index installment still pending
    pub fn next_installment(&self) -> Option<&RepaymentRecord> {
        self.schedule.iter().find(|r| r.is_pending())
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Named read model for external consumers
    pub fn loan_data(&self) -> LoanData {
        LoanData::from(self)
    }
}

/// Validate terms and the LTV invariant, at the supplied price and, when
/// enforced, at the oracle's last published price
///
/// Also rejects terms whose schedule could not be built if the loan
/// activated now.
fn check_terms(
    terms: &LoanTerms,
    policy: &LoanPolicy,
    ctx: &CallContext<'_>,
) -> Result<(), ValidationError> {
    terms.validate()?;
    policy.scheduler().check_activation(terms, ctx.now)?;
    if policy.enforce_oracle_price {
        if let Some(quote) = ctx.oracle.current_price(&terms.collateral_asset) {
            terms.check_loan_to_value(quote.price)?;
        }
    }
    Ok(())
}
