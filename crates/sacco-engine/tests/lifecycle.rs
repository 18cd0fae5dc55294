//! End-to-end scenarios over an in-memory database: application, approval,
//! disbursement, repayment, default cascade and payment matching.

use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, TimeZone, Utc};
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use sacco_db::{Database, queries};
use sacco_engine::application::LoanApplication;
use sacco_engine::payments::PaymentOutcome;
use sacco_engine::{EngineError, LoanEngine, NotificationSink};
use sacco_types::EngineConfig;
use sacco_types::models::*;

/// Sink that records everything delivered, for asserting on side effects.
#[derive(Default)]
struct CaptureSink(Mutex<Vec<Notification>>);

impl NotificationSink for CaptureSink {
    fn deliver(&self, notification: &Notification) -> anyhow::Result<()> {
        self.0
            .lock()
            .map_err(|e| anyhow::anyhow!("sink lock poisoned: {e}"))?
            .push(notification.clone());
        Ok(())
    }
}

fn engine() -> (LoanEngine, Arc<CaptureSink>) {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let sink = Arc::new(CaptureSink::default());
    (
        LoanEngine::with_sink(db, EngineConfig::default(), sink.clone()),
        sink,
    )
}

fn member_with_shares(engine: &LoanEngine, name: &str, units: i64) -> Member {
    let member = engine.register_member(name, MemberRole::Member).unwrap();
    if units > 0 {
        engine.purchase_shares(member.id, units).unwrap();
    }
    member
}

fn standard_loan_type(engine: &LoanEngine) -> LoanType {
    engine
        .create_loan_type(LoanType {
            id: Uuid::new_v4(),
            name: "Development loan".into(),
            interest_rate: dec!(10),
            min_amount: dec!(1000),
            max_amount: dec!(500000),
            max_term_months: 36,
            is_for_non_member: false,
            institution_share: dec!(10),
            guarantor_share: dec!(0),
            member_share: dec!(0),
        })
        .unwrap()
}

fn guest_loan_type(engine: &LoanEngine) -> LoanType {
    engine
        .create_loan_type(LoanType {
            id: Uuid::new_v4(),
            name: "Guest bridge".into(),
            interest_rate: dec!(15),
            min_amount: dec!(1000),
            max_amount: dec!(100000),
            max_term_months: 12,
            is_for_non_member: true,
            institution_share: dec!(7),
            guarantor_share: dec!(5),
            member_share: dec!(3),
        })
        .unwrap()
}

fn approve_and_disburse(engine: &LoanEngine, loan: &Loan, manager: &Member, director: &Member) -> Loan {
    engine
        .manager_decision(&loan.loan_id, manager.id, true, "ok")
        .unwrap();
    engine
        .director_decision(&loan.loan_id, director.id, true, None, "ok")
        .unwrap();
    engine
        .disburse(&loan.loan_id, Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap())
        .unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[test]
fn member_loan_full_lifecycle() {
    let (engine, _) = engine();
    let manager = engine.register_member("Mary", MemberRole::Manager).unwrap();
    let director = engine.register_member("Dan", MemberRole::Director).unwrap();
    // 1000 units at 100.00 = 100,000 share value; x3 multiplier = 300,000
    let borrower = member_with_shares(&engine, "Bob", 1000);
    let loan_type = standard_loan_type(&engine);

    assert_eq!(engine.available_credit(borrower.id).unwrap(), dec!(300000.00));

    let loan = engine
        .submit_application(LoanApplication {
            borrower: Borrower::Member(borrower.id),
            loan_type_id: loan_type.id,
            amount: dec!(250000),
            term_months: 12,
            guarantors: vec![],
        })
        .unwrap();
    assert_eq!(loan.status, LoanStatus::Pending);
    assert_eq!(loan.approval_stage, ApprovalStage::PendingManager);

    let loan = approve_and_disburse(&engine, &loan, &manager, &director);
    assert_eq!(loan.status, LoanStatus::Active);
    assert_eq!(loan.outstanding_principal, Some(dec!(250000)));
    // active principal reduces the credit limit
    assert_eq!(engine.available_credit(borrower.id).unwrap(), dec!(50000.00));

    let schedule = engine.db().repayments_for_loan(loan.id).unwrap();
    assert_eq!(schedule.len(), 12);
    let principal_total: Decimal = schedule.iter().map(|r| r.principal).sum();
    assert_eq!(principal_total, dec!(250000));

    let mut paid_at = Utc.with_ymd_and_hms(2025, 2, 10, 12, 0, 0).unwrap();
    for (i, installment) in schedule.iter().enumerate() {
        let updated = engine
            .record_repayment(&loan.loan_id, &format!("TX-{i}"), installment.amount, paid_at)
            .unwrap();
        if i < schedule.len() - 1 {
            assert_eq!(updated.status, LoanStatus::Active);
        } else {
            assert_eq!(updated.status, LoanStatus::Completed);
            assert_eq!(updated.outstanding_principal, Some(dec!(0.00)));
        }
        paid_at = paid_at + chrono::Duration::days(30);
    }

    // full limit restored once the loan completes
    assert_eq!(engine.available_credit(borrower.id).unwrap(), dec!(300000.00));
}

#[test]
fn application_over_credit_limit_is_rejected() {
    let (engine, _) = engine();
    let borrower = member_with_shares(&engine, "Bob", 100); // 10,000 x3 = 30,000
    let loan_type = standard_loan_type(&engine);

    let err = engine
        .submit_application(LoanApplication {
            borrower: Borrower::Member(borrower.id),
            loan_type_id: loan_type.id,
            amount: dec!(50000),
            term_months: 12,
            guarantors: vec![],
        })
        .unwrap_err();
    match err {
        EngineError::CreditLimitExceeded { requested, available } => {
            assert_eq!(requested, dec!(50000));
            assert_eq!(available, dec!(30000.00));
        }
        other => panic!("expected credit limit error, got {other}"),
    }
}

#[test]
fn guest_loan_needs_covering_guarantors() {
    let (engine, _) = engine();
    // 400 units at 100.00 = 40,000 capacity
    let guarantor = member_with_shares(&engine, "Grace", 400);
    let loan_type = guest_loan_type(&engine);

    let err = engine
        .submit_application(LoanApplication {
            borrower: Borrower::Guest {
                name: "Walk-in".into(),
                sponsor: Some(guarantor.id),
            },
            loan_type_id: loan_type.id,
            amount: dec!(50000),
            term_months: 6,
            guarantors: vec![guarantor.id],
        })
        .unwrap_err();
    match err {
        EngineError::InsufficientGuarantorCapacity { requested, available } => {
            assert_eq!(requested, dec!(50000));
            assert_eq!(available, dec!(40000.00));
        }
        other => panic!("expected guarantor capacity error, got {other}"),
    }
}

#[test]
fn accepting_a_guarantee_locks_shares() {
    let (engine, _) = engine();
    let borrower = member_with_shares(&engine, "Bob", 1000);
    let guarantor = member_with_shares(&engine, "Grace", 100);
    let loan_type = standard_loan_type(&engine);

    let loan = engine
        .submit_application(LoanApplication {
            borrower: Borrower::Member(borrower.id),
            loan_type_id: loan_type.id,
            amount: dec!(5000),
            term_months: 6,
            guarantors: vec![guarantor.id],
        })
        .unwrap();

    let guarantees = engine
        .db()
        .with_conn(|conn| queries::guarantees_for_loan(conn, loan.id))
        .unwrap();
    assert_eq!(guarantees.len(), 1);
    assert_eq!(guarantees[0].amount_guaranteed, dec!(5000));

    let accepted = engine.respond_to_guarantee(guarantees[0].id, true).unwrap();
    assert_eq!(accepted.status, GuaranteeStatus::Active);

    // 5000 / 100.00 unit price = 50 units locked
    let locked: i64 = engine
        .db()
        .with_conn(|conn| queries::locked_units_total(conn, guarantor.id))
        .unwrap();
    assert_eq!(locked, 50);

    // answering twice is rejected
    let err = engine.respond_to_guarantee(guarantees[0].id, true).unwrap_err();
    assert!(matches!(err, EngineError::GuaranteeNotPending { .. }));
}

#[test]
fn suspended_guarantor_cannot_accept_a_guarantee() {
    let (engine, _) = engine();
    let borrower = member_with_shares(&engine, "Bob", 1000);
    let guarantor = member_with_shares(&engine, "Grace", 100);
    let loan_type = standard_loan_type(&engine);

    let loan = engine
        .submit_application(LoanApplication {
            borrower: Borrower::Member(borrower.id),
            loan_type_id: loan_type.id,
            amount: dec!(5000),
            term_months: 6,
            guarantors: vec![guarantor.id],
        })
        .unwrap();
    let guarantees = engine
        .db()
        .with_conn(|conn| queries::guarantees_for_loan(conn, loan.id))
        .unwrap();

    // suspended between nomination and acceptance
    engine.suspend_member(guarantor.id).unwrap();

    let err = engine.respond_to_guarantee(guarantees[0].id, true).unwrap_err();
    assert!(matches!(err, EngineError::BorrowerSuspended(id) if id == guarantor.id));

    // nothing committed: no lock, guarantee still answerable
    let locked: i64 = engine
        .db()
        .with_conn(|conn| queries::locked_units_total(conn, guarantor.id))
        .unwrap();
    assert_eq!(locked, 0);

    // declining remains possible while suspended
    let declined = engine.respond_to_guarantee(guarantees[0].id, false).unwrap();
    assert_eq!(declined.status, GuaranteeStatus::Rejected);
}

#[test]
fn guarantee_acceptance_fails_without_unlocked_shares() {
    let (engine, _) = engine();
    let borrower = member_with_shares(&engine, "Bob", 2000);
    let guarantor = member_with_shares(&engine, "Grace", 30); // 3,000 value
    let loan_type = standard_loan_type(&engine);

    // capacity check at application time passes only if guarantors cover
    // the amount, so guarantee a slice within capacity but then lock the
    // shares with a first loan before accepting the second.
    let first = engine
        .submit_application(LoanApplication {
            borrower: Borrower::Member(borrower.id),
            loan_type_id: loan_type.id,
            amount: dec!(2500),
            term_months: 6,
            guarantors: vec![guarantor.id],
        })
        .unwrap();
    let second = engine
        .submit_application(LoanApplication {
            borrower: Borrower::Member(borrower.id),
            loan_type_id: loan_type.id,
            amount: dec!(2500),
            term_months: 6,
            guarantors: vec![guarantor.id],
        })
        .unwrap();

    let g1 = engine
        .db()
        .with_conn(|conn| queries::guarantees_for_loan(conn, first.id))
        .unwrap();
    let g2 = engine
        .db()
        .with_conn(|conn| queries::guarantees_for_loan(conn, second.id))
        .unwrap();

    engine.respond_to_guarantee(g1[0].id, true).unwrap(); // locks 25 of 30
    let err = engine.respond_to_guarantee(g2[0].id, true).unwrap_err();
    match err {
        EngineError::InsufficientUnlockedShares { needed, available } => {
            assert_eq!(needed, 25);
            assert_eq!(available, 5);
        }
        other => panic!("expected share lock error, got {other}"),
    }
}

#[test]
fn default_cascade_calls_guarantees_and_liquidates_shares() {
    let (engine, sink) = engine();
    let manager = engine.register_member("Mary", MemberRole::Manager).unwrap();
    let director = engine.register_member("Dan", MemberRole::Director).unwrap();
    let borrower = member_with_shares(&engine, "Bob", 1000);
    let guarantor = member_with_shares(&engine, "Grace", 100);
    let loan_type = standard_loan_type(&engine);

    let loan = engine
        .submit_application(LoanApplication {
            borrower: Borrower::Member(borrower.id),
            loan_type_id: loan_type.id,
            amount: dec!(5000),
            term_months: 6,
            guarantors: vec![guarantor.id],
        })
        .unwrap();
    let guarantees = engine
        .db()
        .with_conn(|conn| queries::guarantees_for_loan(conn, loan.id))
        .unwrap();
    engine.respond_to_guarantee(guarantees[0].id, true).unwrap();

    let loan = approve_and_disburse(&engine, &loan, &manager, &director);
    assert_eq!(loan.next_repayment_date, Some(date(2025, 2, 15)));

    // first installment a month overdue
    let report = engine.run_default_check(date(2025, 3, 20)).unwrap();
    assert_eq!(report.newly_defaulted, 1);
    assert_eq!(report.guarantees_called, 1);
    assert_eq!(report.errors, 0);

    let loan = engine.db().loan_by_loan_id(&loan.loan_id).unwrap().unwrap();
    assert_eq!(loan.status, LoanStatus::Defaulted);
    assert!(loan.is_defaulted);

    // 50 locked units liquidated: 100 - 50 remain
    let account = engine
        .db()
        .with_conn(|conn| queries::share_account(conn, guarantor.id))
        .unwrap()
        .unwrap();
    assert_eq!(account.units, 50);
    let locked: i64 = engine
        .db()
        .with_conn(|conn| queries::locked_units_total(conn, guarantor.id))
        .unwrap();
    assert_eq!(locked, 0);

    // guarantor and governance were told
    let delivered = sink.0.lock().unwrap();
    assert!(delivered.iter().any(|n| {
        n.user_id == guarantor.id && n.category == NotificationCategory::GuaranteeCalled
    }));
    assert!(delivered.iter().any(|n| {
        n.user_id == director.id && n.category == NotificationCategory::LoanDefaulted
    }));
    drop(delivered);

    // replaying the batch is a no-op
    let replay = engine.run_default_check(date(2025, 3, 20)).unwrap();
    assert_eq!(replay.newly_defaulted, 0);
    assert_eq!(replay.guarantees_called, 0);
    assert_eq!(replay.cured, 0);
}

#[test]
fn defaulted_loan_cures_once_arrears_clear() {
    let (engine, _) = engine();
    let manager = engine.register_member("Mary", MemberRole::Manager).unwrap();
    let director = engine.register_member("Dan", MemberRole::Director).unwrap();
    let borrower = member_with_shares(&engine, "Bob", 1000);
    let loan_type = standard_loan_type(&engine);

    let loan = engine
        .submit_application(LoanApplication {
            borrower: Borrower::Member(borrower.id),
            loan_type_id: loan_type.id,
            amount: dec!(12000),
            term_months: 12,
            guarantors: vec![],
        })
        .unwrap();
    let loan = approve_and_disburse(&engine, &loan, &manager, &director);

    engine.run_default_check(date(2025, 3, 1)).unwrap();
    let defaulted = engine.db().loan_by_loan_id(&loan.loan_id).unwrap().unwrap();
    assert_eq!(defaulted.status, LoanStatus::Defaulted);

    // settle the overdue installment, then re-run the batch
    let schedule = engine.db().repayments_for_loan(loan.id).unwrap();
    engine
        .record_repayment(
            &loan.loan_id,
            "TX-CURE",
            schedule[0].amount,
            Utc.with_ymd_and_hms(2025, 3, 2, 8, 0, 0).unwrap(),
        )
        .unwrap();

    let report = engine.run_default_check(date(2025, 3, 3)).unwrap();
    assert_eq!(report.cured, 1);
    let cured = engine.db().loan_by_loan_id(&loan.loan_id).unwrap().unwrap();
    assert_eq!(cured.status, LoanStatus::Active);
    assert!(!cured.is_defaulted);
}

#[test]
fn disbursement_replay_is_a_noop() {
    let (engine, _) = engine();
    let manager = engine.register_member("Mary", MemberRole::Manager).unwrap();
    let director = engine.register_member("Dan", MemberRole::Director).unwrap();
    let borrower = member_with_shares(&engine, "Bob", 1000);
    let loan_type = standard_loan_type(&engine);

    let loan = engine
        .submit_application(LoanApplication {
            borrower: Borrower::Member(borrower.id),
            loan_type_id: loan_type.id,
            amount: dec!(60000),
            term_months: 6,
            guarantors: vec![],
        })
        .unwrap();
    let loan = approve_and_disburse(&engine, &loan, &manager, &director);

    // second call must not regenerate the schedule or re-credit the wallet
    engine
        .disburse(&loan.loan_id, Utc.with_ymd_and_hms(2025, 2, 1, 9, 0, 0).unwrap())
        .unwrap();

    let schedule = engine.db().repayments_for_loan(loan.id).unwrap();
    assert_eq!(schedule.len(), 6);
    assert_eq!(schedule[0].due_date, date(2025, 2, 15));

    let (wallet, txs) = engine
        .db()
        .with_conn(|conn| {
            let wallet = queries::wallet_for_member(conn, borrower.id)?;
            let txs = queries::wallet_transactions(conn, wallet.id)?;
            Ok::<_, anyhow::Error>((wallet, txs))
        })
        .unwrap();
    assert_eq!(wallet.balance, dec!(60000));
    let disbursements = txs
        .iter()
        .filter(|t| t.kind == WalletTxKind::LoanDisbursement)
        .count();
    assert_eq!(disbursements, 1);
}

#[test]
fn repayment_amount_must_match_the_installment() {
    let (engine, _) = engine();
    let manager = engine.register_member("Mary", MemberRole::Manager).unwrap();
    let director = engine.register_member("Dan", MemberRole::Director).unwrap();
    let borrower = member_with_shares(&engine, "Bob", 1000);
    let loan_type = standard_loan_type(&engine);

    let loan = engine
        .submit_application(LoanApplication {
            borrower: Borrower::Member(borrower.id),
            loan_type_id: loan_type.id,
            amount: dec!(12000),
            term_months: 12,
            guarantors: vec![],
        })
        .unwrap();
    let loan = approve_and_disburse(&engine, &loan, &manager, &director);

    let err = engine
        .record_repayment(
            &loan.loan_id,
            "TX-1",
            dec!(1.00),
            Utc.with_ymd_and_hms(2025, 2, 16, 0, 0, 0).unwrap(),
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::InstallmentAmountMismatch { .. }));
}

#[test]
fn payment_confirmation_dedupes_and_matches() {
    let (engine, _) = engine();
    let manager = engine.register_member("Mary", MemberRole::Manager).unwrap();
    let director = engine.register_member("Dan", MemberRole::Director).unwrap();
    let borrower = member_with_shares(&engine, "Bob", 1000);
    let loan_type = standard_loan_type(&engine);

    let loan = engine
        .submit_application(LoanApplication {
            borrower: Borrower::Member(borrower.id),
            loan_type_id: loan_type.id,
            amount: dec!(12000),
            term_months: 12,
            guarantors: vec![],
        })
        .unwrap();
    let loan = approve_and_disburse(&engine, &loan, &manager, &director);
    let schedule = engine.db().repayments_for_loan(loan.id).unwrap();
    let now = Utc.with_ymd_and_hms(2025, 2, 14, 10, 0, 0).unwrap();

    // loan reference settles the first installment
    let outcome = engine
        .confirm_payment("GW-1", schedule[0].amount, &loan.loan_id, now)
        .unwrap();
    match outcome {
        PaymentOutcome::Repayment(updated) => {
            assert_eq!(updated.next_repayment_date, Some(schedule[1].due_date));
        }
        other => panic!("expected a repayment outcome, got {other:?}"),
    }

    // same transaction id again: rejected, nothing double-settled
    let err = engine
        .confirm_payment("GW-1", schedule[0].amount, &loan.loan_id, now)
        .unwrap_err();
    assert!(matches!(err, EngineError::DuplicateTransaction(_)));
    let paid = engine
        .db()
        .repayments_for_loan(loan.id)
        .unwrap()
        .into_iter()
        .filter(|r| r.status == RepaymentStatus::Paid)
        .count();
    assert_eq!(paid, 1);

    // unmatched reference rolls everything back, so the same id can retry
    let err = engine
        .confirm_payment("GW-2", dec!(500), "no-such-ref", now)
        .unwrap_err();
    assert!(matches!(err, EngineError::UnmatchedPayment(_)));
    let outcome = engine
        .confirm_payment("GW-2", dec!(500), &borrower.id.to_string(), now)
        .unwrap();
    match outcome {
        PaymentOutcome::Contribution { member_id, amount } => {
            assert_eq!(member_id, borrower.id);
            assert_eq!(amount, dec!(500));
        }
        other => panic!("expected a contribution outcome, got {other:?}"),
    }
}

#[test]
fn guest_loan_interest_is_split_three_ways() {
    let (engine, _) = engine();
    let manager = engine.register_member("Mary", MemberRole::Manager).unwrap();
    let director = engine.register_member("Dan", MemberRole::Director).unwrap();
    let sponsor = member_with_shares(&engine, "Sam", 1000);
    let loan_type = guest_loan_type(&engine);

    let loan = engine
        .submit_application(LoanApplication {
            borrower: Borrower::Guest {
                name: "Walk-in".into(),
                sponsor: Some(sponsor.id),
            },
            loan_type_id: loan_type.id,
            amount: dec!(30000),
            term_months: 6,
            guarantors: vec![sponsor.id],
        })
        .unwrap();
    let loan = approve_and_disburse(&engine, &loan, &manager, &director);

    let schedule = engine.db().repayments_for_loan(loan.id).unwrap();
    let first = &schedule[0];
    engine
        .record_repayment(
            &loan.loan_id,
            "TX-G1",
            first.amount,
            Utc.with_ymd_and_hms(2025, 2, 15, 0, 0, 0).unwrap(),
        )
        .unwrap();

    let distributions = engine
        .db()
        .with_conn(|conn| queries::distributions_for_repayment(conn, first.id))
        .unwrap();
    assert!(!distributions.is_empty());
    let total: Decimal = distributions.iter().map(|d| d.amount).sum();
    assert_eq!(total, first.interest);
    // sponsor earned the guarantor share
    assert!(distributions
        .iter()
        .any(|d| d.member_id == Some(sponsor.id) && d.amount > Decimal::ZERO));
    // institution got a share too
    assert!(distributions.iter().any(|d| d.is_institution_share));
}

#[test]
fn share_locks_never_exceed_holdings_under_churn() {
    use rand::Rng;

    let (engine, _) = engine();
    let borrower = member_with_shares(&engine, "Bob", 5000);
    let guarantor = member_with_shares(&engine, "Grace", 120);
    let loan_type = standard_loan_type(&engine);

    let mut rng = rand::rng();
    let mut open_guarantees: Vec<Uuid> = Vec::new();

    for round in 0..40 {
        let accept: bool = rng.random_bool(0.7);
        let loan = engine
            .submit_application(LoanApplication {
                borrower: Borrower::Member(borrower.id),
                loan_type_id: loan_type.id,
                amount: dec!(1000),
                term_months: 6,
                guarantors: vec![guarantor.id],
            })
            .unwrap();
        let guarantees = engine
            .db()
            .with_conn(|conn| queries::guarantees_for_loan(conn, loan.id))
            .unwrap();

        match engine.respond_to_guarantee(guarantees[0].id, accept) {
            Ok(g) if g.status == GuaranteeStatus::Active => open_guarantees.push(g.id),
            Ok(_) => {}
            Err(EngineError::InsufficientUnlockedShares { .. }) => {}
            Err(other) => panic!("round {round}: unexpected error {other}"),
        }

        let (units, locked) = engine
            .db()
            .with_conn(|conn| {
                let account = queries::share_account(conn, guarantor.id)?
                    .ok_or_else(|| anyhow::anyhow!("missing share account"))?;
                let locked = queries::locked_units_total(conn, guarantor.id)?;
                Ok::<_, anyhow::Error>((account.units, locked))
            })
            .unwrap();
        assert!(locked <= units, "round {round}: {locked} locked > {units} held");
        assert!(locked >= 0, "round {round}: negative lock total");
    }

    assert_eq!(open_guarantees.len() as i64, {
        let locked = engine
            .db()
            .with_conn(|conn| queries::locked_units_total(conn, guarantor.id))
            .unwrap();
        locked / 10 // each accepted 1000-guarantee locks 10 units at 100.00
    });
}
