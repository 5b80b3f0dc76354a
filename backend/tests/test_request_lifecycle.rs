//! Request-mode lifecycle tests
//!
//! A borrower publishes complete terms, a lender funds them, the borrower
//! escrows collateral and repays in installments.
//!
//! Critical invariants tested:
//! - Exact value: funding and installments must match to the unit
//! - Timing: no repayment after expiry, no settlement before it
//! - Collateral conservation across return and claim
//! - Failed calls leave the loan unchanged

use p2p_lending_core_rs::config::ProtocolConfig;
use p2p_lending_core_rs::gateway::{Asset, InMemoryLedger};
use p2p_lending_core_rs::oracle::NoPriceOracle;
use p2p_lending_core_rs::registry::LoanRegistry;
use p2p_lending_core_rs::schedule::{InstallmentPlan, InterestModel, ScheduleConfig};
use p2p_lending_core_rs::{
    Amount, AssetId, AuthorizationError, CollateralStatus, LoanError, LoanEventType, LoanId,
    LoanStatus, LoanTerms, ManualClock, PartyId, RepaymentStatus, StateError, TimingError,
    ValidationError,
};
use std::sync::Arc;

// ============================================================================
// Test Helpers
// ============================================================================

const LOAN: Amount = 6_000_000_000_000_000; // 0.006 ether
const COLLATERAL: Amount = 5_000;
const START: u64 = 1_700_000_000;

struct Harness {
    ledger: Arc<InMemoryLedger>,
    clock: Arc<ManualClock>,
    registry: LoanRegistry,
}

fn borrower() -> PartyId {
    PartyId::from("BORROWER")
}

fn lender() -> PartyId {
    PartyId::from("LENDER")
}

fn platform() -> PartyId {
    PartyId::from("PLATFORM")
}

fn token() -> Asset {
    Asset::Collateral(AssetId::from("TTT"))
}

fn config() -> ProtocolConfig {
    ProtocolConfig {
        platform_account: platform(),
        platform_fee_bps: 100,
        schedule: ScheduleConfig {
            installments: InstallmentPlan::Periodic { period_seconds: 30 },
            interest_model: InterestModel::AverageBalance,
            ..ScheduleConfig::default()
        },
        enforce_oracle_price: true,
    }
}

fn terms() -> LoanTerms {
    LoanTerms {
        loan_amount: LOAN,
        duration_seconds: 60,
        interest_rate_bps: 100,
        collateral_asset: AssetId::from("TTT"),
        collateral_amount: COLLATERAL,
        collateral_unit_price: 10_000_000_000_000,
        loan_to_value_bps: 5_000,
    }
}

fn harness() -> Harness {
    let ledger = Arc::new(InMemoryLedger::new());
    let clock = Arc::new(ManualClock::new(START));
    let registry = LoanRegistry::new(
        config(),
        ledger.clone(),
        Arc::new(NoPriceOracle),
        clock.clone(),
    )
    .unwrap();

    ledger.deposit(&lender(), &Asset::Native, LOAN);
    ledger.deposit(&borrower(), &Asset::Native, LOAN);
    ledger.deposit(&borrower(), &token(), COLLATERAL);

    Harness {
        ledger,
        clock,
        registry,
    }
}

/// Request created, funded and collateralized; activated at START + 10
fn active_loan(h: &Harness) -> LoanId {
    let id = h.registry.create_request(&borrower(), terms()).unwrap();
    h.clock.advance(5);
    h.registry.fund(&id, &lender(), LOAN).unwrap();
    h.ledger.approve(&borrower(), &id, &token(), COLLATERAL);
    h.clock.advance(5);
    h.registry.escrow_collateral(&id, &borrower()).unwrap();
    id
}

fn pay(h: &Harness, id: &LoanId, index: u32) -> Result<(), LoanError> {
    let amount = h.registry.get_repayment_amount(id, index)?.amount;
    h.registry.repay(id, &borrower(), amount, index)
}

// ============================================================================
// Scenario A: full repayment
// ============================================================================

#[test]
fn test_scenario_full_repayment() {
    let h = harness();
    let id = active_loan(&h);

    let first = h.registry.get_repayment_amount(&id, 1).unwrap();
    let second = h.registry.get_repayment_amount(&id, 2).unwrap();
    assert_eq!(first.amount, 3_105_000_000_000_000);
    assert_eq!(second.amount, 3_045_000_000_000_000);

    h.clock.advance(20);
    h.registry.repay(&id, &borrower(), first.amount, 1).unwrap();
    h.clock.advance(20);
    h.registry.repay(&id, &borrower(), second.amount, 2).unwrap();

    let data = h.registry.get_loan_data(&id).unwrap();
    assert_eq!(data.outstanding_amount, 0);
    assert_eq!(data.status, LoanStatus::Completed);
    assert_eq!(data.paid_installments, 2);

    // lender: amount minus 1% fee on each installment
    let fees = first.fee_portion + second.fee_portion;
    assert_eq!(
        h.ledger.balance(&lender(), &Asset::Native),
        first.amount + second.amount - fees
    );
    assert_eq!(h.ledger.balance(&platform(), &Asset::Native), fees);

    // collateral stays escrowed until the term ends
    assert_eq!(h.ledger.escrow_balance(&id, &token()), COLLATERAL);
    h.clock.set(START + 70);
    h.registry.return_collateral_to_borrower(&id, &borrower()).unwrap();

    let data = h.registry.get_loan_data(&id).unwrap();
    assert_eq!(data.status, LoanStatus::Completed);
    assert_eq!(data.collateral_status, CollateralStatus::Returned);
    assert_eq!(data.returned_collateral_amount, COLLATERAL);
    assert_eq!(h.ledger.balance(&borrower(), &token()), COLLATERAL);

    // settle once
    assert_eq!(
        h.registry.return_collateral_to_borrower(&id, &borrower()),
        Err(LoanError::State(StateError::CollateralAlreadyReturned))
    );
    // a completed loan has nothing for the lender
    assert!(matches!(
        h.registry.claim_collateral_by_lender(&id, &lender()),
        Err(LoanError::State(StateError::InvalidStatus { .. }))
    ));
}

// ============================================================================
// Scenario B: partial repayment and default
// ============================================================================

#[test]
fn test_scenario_partial_repayment_then_claim() {
    let h = harness();
    let id = active_loan(&h);

    h.clock.advance(20);
    pay(&h, &id, 1).unwrap();

    h.clock.set(START + 71);
    h.registry.return_collateral_to_borrower(&id, &lender()).unwrap();

    let data = h.registry.get_loan_data(&id).unwrap();
    assert_eq!(data.status, LoanStatus::ExpiredPartial);
    assert_eq!(data.collateral_status, CollateralStatus::Returned);
    // half the principal repaid: half the collateral back
    assert_eq!(data.returned_collateral_amount, COLLATERAL / 2);
    assert_eq!(data.outstanding_amount, LOAN / 2);

    let schedule = h.registry.schedule(&id).unwrap();
    assert!(matches!(schedule[0].status, RepaymentStatus::Paid { .. }));
    assert_eq!(schedule[1].status, RepaymentStatus::Missed);

    // only the lender may claim
    assert!(matches!(
        h.registry.claim_collateral_by_lender(&id, &borrower()),
        Err(LoanError::Authorization(AuthorizationError::NotLender { .. }))
    ));
    h.registry.claim_collateral_by_lender(&id, &lender()).unwrap();

    let loan = h.registry.loan(&id).unwrap();
    assert_eq!(loan.status(), LoanStatus::Defaulted);
    assert_eq!(loan.collateral_status(), CollateralStatus::Claimed);
    assert_eq!(loan.remaining_collateral(), 0);
    assert_eq!(loan.claimed_collateral(), COLLATERAL - COLLATERAL / 2);
    assert_eq!(h.ledger.balance(&lender(), &token()), COLLATERAL - COLLATERAL / 2);
    assert_eq!(h.ledger.escrow_balance(&id, &token()), 0);

    assert!(matches!(
        h.registry.claim_collateral_by_lender(&id, &lender()),
        Err(LoanError::State(StateError::InvalidStatus { .. }))
    ));
}

#[test]
fn test_nothing_repaid_lender_takes_everything() {
    let h = harness();
    let id = active_loan(&h);

    h.clock.set(START + 100);
    h.registry.return_collateral_to_borrower(&id, &borrower()).unwrap();
    assert_eq!(h.ledger.balance(&borrower(), &token()), 0);

    h.registry.claim_collateral_by_lender(&id, &lender()).unwrap();
    assert_eq!(h.ledger.balance(&lender(), &token()), COLLATERAL);
}

// ============================================================================
// Creation and funding
// ============================================================================

#[test]
fn test_create_request_rejects_ltv_breach() {
    let h = harness();
    let mut terms = terms();
    terms.collateral_amount = 1_000; // 1e16 × 50% = 5e15 < 6e15

    assert!(matches!(
        h.registry.create_request(&borrower(), terms),
        Err(LoanError::Validation(ValidationError::LoanToValueBreach { .. }))
    ));
    assert!(h.registry.get_all().is_empty());
}

#[test]
fn test_fund_requires_exact_value() {
    let h = harness();
    let id = h.registry.create_request(&borrower(), terms()).unwrap();

    assert_eq!(
        h.registry.fund(&id, &lender(), LOAN - 1),
        Err(LoanError::Validation(ValidationError::AmountMismatch {
            expected: LOAN,
            actual: LOAN - 1
        }))
    );
    assert_eq!(
        h.registry.get_loan_data(&id).unwrap().status,
        LoanStatus::RequestPending
    );
    assert_eq!(h.ledger.balance(&lender(), &Asset::Native), LOAN);
}

#[test]
fn test_borrower_cannot_fund_own_request() {
    let h = harness();
    let id = h.registry.create_request(&borrower(), terms()).unwrap();
    assert!(matches!(
        h.registry.fund(&id, &borrower(), LOAN),
        Err(LoanError::Authorization(AuthorizationError::SelfDealing { .. }))
    ));
}

#[test]
fn test_fund_twice_rejected() {
    let h = harness();
    let id = h.registry.create_request(&borrower(), terms()).unwrap();
    h.registry.fund(&id, &lender(), LOAN).unwrap();

    let other = PartyId::from("OTHER");
    h.ledger.deposit(&other, &Asset::Native, LOAN);
    assert!(matches!(
        h.registry.fund(&id, &other, LOAN),
        Err(LoanError::State(StateError::InvalidStatus {
            status: LoanStatus::CollateralAwaited,
            ..
        }))
    ));
}

#[test]
fn test_funding_escrows_until_activation() {
    let h = harness();
    let id = h.registry.create_request(&borrower(), terms()).unwrap();
    h.registry.fund(&id, &lender(), LOAN).unwrap();

    assert_eq!(h.ledger.escrow_balance(&id, &Asset::Native), LOAN);
    assert_eq!(h.ledger.balance(&borrower(), &Asset::Native), LOAN);

    h.ledger.approve(&borrower(), &id, &token(), COLLATERAL);
    h.registry.escrow_collateral(&id, &borrower()).unwrap();
    assert_eq!(h.ledger.escrow_balance(&id, &Asset::Native), 0);
    assert_eq!(h.ledger.balance(&borrower(), &Asset::Native), 2 * LOAN);
}

#[test]
fn test_only_borrower_escrows_collateral() {
    let h = harness();
    let id = h.registry.create_request(&borrower(), terms()).unwrap();
    h.registry.fund(&id, &lender(), LOAN).unwrap();

    assert!(matches!(
        h.registry.escrow_collateral(&id, &lender()),
        Err(LoanError::Authorization(AuthorizationError::NotBorrower { .. }))
    ));
}

#[test]
fn test_escrow_without_allowance_fails_cleanly() {
    let h = harness();
    let id = h.registry.create_request(&borrower(), terms()).unwrap();
    h.registry.fund(&id, &lender(), LOAN).unwrap();

    assert!(matches!(
        h.registry.escrow_collateral(&id, &borrower()),
        Err(LoanError::Transfer(_))
    ));
    let data = h.registry.get_loan_data(&id).unwrap();
    assert_eq!(data.status, LoanStatus::CollateralAwaited);
    assert_eq!(data.collateral_status, CollateralStatus::None);
    assert_eq!(h.ledger.escrow_balance(&id, &Asset::Native), LOAN);
}

// ============================================================================
// Term Bounds
// ============================================================================

#[test]
fn test_request_expiring_past_end_of_time_rejected() {
    let h = harness();
    let mut endless = terms();
    endless.duration_seconds = u64::MAX;

    assert_eq!(
        h.registry.create_request(&borrower(), endless),
        Err(LoanError::Validation(ValidationError::DurationOverflow {
            start: START,
            duration_seconds: u64::MAX,
        }))
    );
    assert!(h.registry.get_all().is_empty());
}

#[test]
fn test_activation_expiring_past_end_of_time_rejected() {
    // created at 0, where the expiry still fits; activation later does not
    let ledger = Arc::new(InMemoryLedger::new());
    let clock = Arc::new(ManualClock::new(0));
    let registry =
        LoanRegistry::new(config(), ledger.clone(), Arc::new(NoPriceOracle), clock.clone())
            .unwrap();
    ledger.deposit(&lender(), &Asset::Native, LOAN);
    ledger.deposit(&borrower(), &token(), COLLATERAL);

    let mut endless = terms();
    endless.duration_seconds = u64::MAX - 5;
    let id = registry.create_request(&borrower(), endless).unwrap();
    clock.advance(5);
    registry.fund(&id, &lender(), LOAN).unwrap();
    ledger.approve(&borrower(), &id, &token(), COLLATERAL);
    clock.advance(5);

    assert_eq!(
        registry.escrow_collateral(&id, &borrower()),
        Err(LoanError::Validation(ValidationError::DurationOverflow {
            start: 10,
            duration_seconds: u64::MAX - 5,
        }))
    );
    let data = registry.get_loan_data(&id).unwrap();
    assert_eq!(data.status, LoanStatus::CollateralAwaited);
    assert_eq!(data.expires_at, None);
    assert_eq!(ledger.balance(&borrower(), &token()), COLLATERAL);
    assert_eq!(ledger.balance(&borrower(), &Asset::Native), 0);
    assert_eq!(ledger.escrow_balance(&id, &Asset::Native), LOAN);

    // settlement stays closed
    assert!(matches!(
        registry.return_collateral_to_borrower(&id, &lender()),
        Err(LoanError::State(StateError::InvalidStatus { .. }))
    ));
    assert!(matches!(
        registry.claim_collateral_by_lender(&id, &lender()),
        Err(LoanError::State(StateError::InvalidStatus { .. }))
    ));
}

#[test]
fn test_overflowing_repayable_rejected_at_creation() {
    let h = harness();
    let huge = |interest_rate_bps| LoanTerms {
        loan_amount: 1 << 126,
        interest_rate_bps,
        collateral_amount: 1,
        collateral_unit_price: 1 << 127,
        loan_to_value_bps: 10_000,
        ..terms()
    };

    // loan × (1 + 400%) does not fit
    assert_eq!(
        h.registry.create_request(&borrower(), huge(40_000)),
        Err(LoanError::Validation(ValidationError::RepaymentOverflow {
            loan_amount: 1 << 126,
            interest_rate_bps: 40_000,
        }))
    );

    // flat interest would fit, the origination charge on top does not
    assert_eq!(
        h.registry.create_request(&borrower(), huge(20_000)),
        Err(LoanError::Validation(ValidationError::RepaymentOverflow {
            loan_amount: 1 << 126,
            interest_rate_bps: 20_000,
        }))
    );
    assert!(h.registry.get_all().is_empty());
}

#[test]
fn test_default_config_spreads_small_loan_over_whole_units() {
    let ledger = Arc::new(InMemoryLedger::new());
    let clock = Arc::new(ManualClock::new(START));
    let registry = LoanRegistry::new(
        ProtocolConfig::default(),
        ledger.clone(),
        Arc::new(NoPriceOracle),
        clock.clone(),
    )
    .unwrap();
    ledger.deposit(&lender(), &Asset::Native, 100);
    ledger.deposit(&borrower(), &Asset::Native, 100);
    ledger.deposit(&borrower(), &token(), 10);

    let small = LoanTerms {
        loan_amount: 100,
        duration_seconds: 3_600,
        interest_rate_bps: 500,
        collateral_amount: 10,
        collateral_unit_price: 100,
        ..terms()
    };
    let id = registry.create_request(&borrower(), small).unwrap();
    registry.fund(&id, &lender(), 100).unwrap();
    ledger.approve(&borrower(), &id, &token(), 10);
    registry.escrow_collateral(&id, &borrower()).unwrap();

    // 120 periods of 30 s, but only 100 units to spread
    let schedule = registry.schedule(&id).unwrap();
    assert_eq!(schedule.len(), 100);
    assert!(schedule.iter().all(|r| r.principal_portion == 1));
    assert_eq!(
        registry.repay(&id, &borrower(), 0, 1),
        Err(LoanError::Validation(ValidationError::AmountMismatch {
            expected: 1,
            actual: 0,
        }))
    );

    for index in 1..=50 {
        let amount = registry.get_repayment_amount(&id, index).unwrap().amount;
        registry.repay(&id, &borrower(), amount, index).unwrap();
    }
    clock.advance(3_600);
    registry.return_collateral_to_borrower(&id, &borrower()).unwrap();

    let data = registry.get_loan_data(&id).unwrap();
    assert_eq!(data.status, LoanStatus::ExpiredPartial);
    assert_eq!(data.outstanding_amount, 50);
    assert_eq!(ledger.balance(&borrower(), &token()), 5);
}

// ============================================================================
// Repayment
// ============================================================================

#[test]
fn test_repay_wrong_value_leaves_state_unchanged() {
    let h = harness();
    let id = active_loan(&h);
    let before = h.registry.loan(&id).unwrap();
    let amount = h.registry.get_repayment_amount(&id, 1).unwrap().amount;

    for value in [amount - 1, amount + 1, 0] {
        assert!(matches!(
            h.registry.repay(&id, &borrower(), value, 1),
            Err(LoanError::Validation(ValidationError::AmountMismatch { .. }))
        ));
    }
    assert_eq!(h.registry.loan(&id).unwrap(), before);
}

#[test]
fn test_repay_after_expiry_fails() {
    let h = harness();
    let id = active_loan(&h);
    let amount = h.registry.get_repayment_amount(&id, 1).unwrap().amount;

    h.clock.set(START + 71);
    assert_eq!(
        h.registry.repay(&id, &borrower(), amount, 1),
        Err(LoanError::Timing(TimingError::LoanExpired {
            expired_at: START + 70,
            now: START + 71
        }))
    );
    assert_eq!(h.registry.get_loan_data(&id).unwrap().outstanding_amount, LOAN);
}

#[test]
fn test_repay_accepted_at_expiry_instant() {
    let h = harness();
    let id = active_loan(&h);

    h.clock.set(START + 70);
    pay(&h, &id, 1).unwrap();
    pay(&h, &id, 2).unwrap();
    assert_eq!(
        h.registry.get_loan_data(&id).unwrap().status,
        LoanStatus::Completed
    );
}

#[test]
fn test_late_intermediate_installment_accepted_before_expiry() {
    let h = harness();
    let id = active_loan(&h);
    let schedule = h.registry.schedule(&id).unwrap();

    h.clock.set(schedule[0].due_at + 10);
    pay(&h, &id, 1).unwrap();
}

#[test]
fn test_repay_out_of_order_and_repeat() {
    let h = harness();
    let id = active_loan(&h);

    assert!(matches!(
        pay(&h, &id, 2),
        Err(LoanError::State(StateError::InstallmentOutOfOrder {
            expected: Some(1),
            requested: 2
        }))
    ));
    pay(&h, &id, 1).unwrap();
    assert!(matches!(
        pay(&h, &id, 1),
        Err(LoanError::State(StateError::InstallmentOutOfOrder {
            expected: Some(2),
            requested: 1
        }))
    ));
}

#[test]
fn test_third_party_may_repay() {
    let h = harness();
    let id = active_loan(&h);
    let friend = PartyId::from("FRIEND");
    let quote = h.registry.get_repayment_amount(&id, 1).unwrap();
    h.ledger.deposit(&friend, &Asset::Native, quote.amount);

    h.registry.repay(&id, &friend, quote.amount, 1).unwrap();
    assert_eq!(h.ledger.balance(&friend, &Asset::Native), 0);
    assert_eq!(
        h.ledger.balance(&lender(), &Asset::Native),
        quote.amount - quote.fee_portion
    );
}

#[test]
fn test_repay_before_activation_rejected() {
    let h = harness();
    let id = h.registry.create_request(&borrower(), terms()).unwrap();
    let amount = h.registry.get_repayment_amount(&id, 1).unwrap().amount;

    assert!(matches!(
        h.registry.repay(&id, &borrower(), amount, 1),
        Err(LoanError::State(StateError::InvalidStatus {
            status: LoanStatus::RequestPending,
            ..
        }))
    ));
}

#[test]
fn test_repayment_amount_index_bounds() {
    let h = harness();
    let id = active_loan(&h);
    assert!(matches!(
        h.registry.get_repayment_amount(&id, 0),
        Err(LoanError::Validation(ValidationError::IndexOutOfRange { .. }))
    ));
    assert!(matches!(
        h.registry.get_repayment_amount(&id, 3),
        Err(LoanError::Validation(ValidationError::IndexOutOfRange { index: 3, total: 2 }))
    ));
}

// ============================================================================
// Settlement timing
// ============================================================================

#[test]
fn test_return_before_expiry_always_fails() {
    let h = harness();
    let id = active_loan(&h);

    for now in [START + 10, START + 40, START + 69] {
        h.clock.set(now);
        assert_eq!(
            h.registry.return_collateral_to_borrower(&id, &borrower()),
            Err(LoanError::Timing(TimingError::NotYetExpired {
                expires_at: START + 70,
                now
            }))
        );
    }

    // even when fully repaid
    pay(&h, &id, 1).unwrap();
    pay(&h, &id, 2).unwrap();
    assert!(matches!(
        h.registry.return_collateral_to_borrower(&id, &borrower()),
        Err(LoanError::Timing(TimingError::NotYetExpired { .. }))
    ));
}

#[test]
fn test_outsider_cannot_settle() {
    let h = harness();
    let id = active_loan(&h);
    h.clock.set(START + 80);

    assert!(matches!(
        h.registry.return_collateral_to_borrower(&id, &PartyId::from("MALLORY")),
        Err(LoanError::Authorization(AuthorizationError::NotParty { .. }))
    ));
}

// ============================================================================
// Audit trail
// ============================================================================

#[test]
fn test_event_trail() {
    let h = harness();
    let id = active_loan(&h);
    pay(&h, &id, 1).unwrap();
    pay(&h, &id, 2).unwrap();
    h.clock.set(START + 70);
    h.registry.return_collateral_to_borrower(&id, &lender()).unwrap();

    let kinds: Vec<LoanEventType> = h
        .registry
        .events(&id)
        .unwrap()
        .iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(
        kinds,
        vec![
            LoanEventType::Created,
            LoanEventType::Funded,
            LoanEventType::Activated,
            LoanEventType::Repaid,
            LoanEventType::Repaid,
            LoanEventType::Completed,
            LoanEventType::CollateralReturned,
        ]
    );

    let events = h.registry.events(&id).unwrap();
    assert_eq!(events[1].actor, lender());
    assert_eq!(events[1].amount, LOAN);
    assert_eq!(events[1].timestamp, START + 5);
    assert!(events.iter().all(|e| e.loan_id == id));
}
