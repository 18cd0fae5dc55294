//! Scheduled default detection and the guarantee-calling cascade.
//!
//! The batch walks every active or defaulted loan: installments past due
//! flip to overdue, a loan with any overdue installment defaults exactly
//! once (calling its guarantees and liquidating the locked shares), and a
//! defaulted loan whose arrears have been cleared is cured back to
//! active. Each loan runs in its own transaction so one bad record never
//! stalls the batch.

use chrono::NaiveDate;
use rusqlite::Transaction;
use tracing::{error, info};
use uuid::Uuid;

use sacco_db::queries;
use sacco_types::models::*;

use crate::{EngineError, EngineResult, LoanEngine, approval, notify};

/// Outcome of one batch run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DefaultCheckReport {
    pub loans_checked: usize,
    pub newly_defaulted: usize,
    pub cured: usize,
    pub guarantees_called: usize,
    pub errors: usize,
}

impl LoanEngine {
    /// Run one default-detection pass as of `today`. Re-running with the
    /// same date is a no-op for loans already processed.
    pub fn run_default_check(&self, today: NaiveDate) -> EngineResult<DefaultCheckReport> {
        let loans = self
            .db()
            .with_conn(|conn| queries::loans_with_statuses(conn, &[LoanStatus::Active, LoanStatus::Defaulted]))
            .map_err(EngineError::Storage)?;

        let mut report = DefaultCheckReport {
            loans_checked: loans.len(),
            ..DefaultCheckReport::default()
        };

        for loan in &loans {
            match self.check_one(loan.id, today) {
                Ok(outcome) => {
                    report.newly_defaulted += usize::from(outcome.defaulted);
                    report.cured += usize::from(outcome.cured);
                    report.guarantees_called += outcome.guarantees_called;
                }
                Err(e) => {
                    error!(loan = %loan.loan_id, "default check failed: {e}");
                    report.errors += 1;
                }
            }
        }

        info!(
            checked = report.loans_checked,
            defaulted = report.newly_defaulted,
            cured = report.cured,
            called = report.guarantees_called,
            errors = report.errors,
            "default check complete"
        );
        Ok(report)
    }

    fn check_one(&self, loan_id: Uuid, today: NaiveDate) -> EngineResult<LoanOutcome> {
        let (outcome, notifications) = self.in_tx(|tx| {
            let mut outcome = LoanOutcome::default();
            let mut notifications = Vec::new();

            // The batch snapshot can be stale by the time this loan's turn
            // comes; only the row read inside the transaction decides.
            let Some(loan) = queries::loan_by_id(tx, loan_id)? else {
                return Ok((outcome, notifications));
            };
            if loan.status != LoanStatus::Active && loan.status != LoanStatus::Defaulted {
                return Ok((outcome, notifications));
            }

            queries::mark_repayments_overdue(tx, loan.id, today)?;
            let overdue = queries::overdue_repayment_count(tx, loan.id)?;

            if overdue > 0 && !loan.is_defaulted {
                queries::set_loan_default_flag(tx, loan.id, true, LoanStatus::Defaulted)?;
                approval::log_decision(
                    tx,
                    &loan,
                    None,
                    ApprovalAction::Commented,
                    &format!("Defaulted with {} overdue installment(s) as of {}", overdue, today),
                )?;
                outcome.defaulted = true;
                outcome.guarantees_called = call_guarantees(tx, &loan, &mut notifications)?;

                for governor in queries::governance_members(tx)? {
                    notifications.push(notify::create(
                        tx,
                        governor.id,
                        "Loan defaulted",
                        &format!(
                            "Loan {} defaulted with {} overdue installment(s); {} guarantee(s) called.",
                            loan.loan_id, overdue, outcome.guarantees_called
                        ),
                        NotificationCategory::LoanDefaulted,
                        Some(&loan.loan_id),
                    )?);
                }
            } else if overdue == 0 && loan.is_defaulted {
                queries::set_loan_default_flag(tx, loan.id, false, LoanStatus::Active)?;
                approval::log_decision(
                    tx,
                    &loan,
                    None,
                    ApprovalAction::Commented,
                    &format!("Cured: arrears cleared as of {}", today),
                )?;
                outcome.cured = true;
            }

            Ok((outcome, notifications))
        })?;

        self.deliver_all(&notifications);
        Ok(outcome)
    }
}

#[derive(Debug, Default)]
struct LoanOutcome {
    defaulted: bool,
    cured: bool,
    guarantees_called: usize,
}

/// Call every active guarantee on a defaulting loan and liquidate the
/// shares locked behind it.
fn call_guarantees(
    tx: &Transaction,
    loan: &Loan,
    notifications: &mut Vec<Notification>,
) -> EngineResult<usize> {
    let active = queries::guarantees_for_loan_with_status(tx, loan.id, GuaranteeStatus::Active)?;
    for guarantee in &active {
        queries::update_guarantee_status(tx, guarantee.id, GuaranteeStatus::Called)?;

        match queries::share_lock_for_guarantee(tx, guarantee.id)? {
            Some(lock) => {
                queries::add_share_units(tx, lock.member_id, -lock.locked_units)?;
                queries::delete_share_lock(tx, lock.id)?;
                approval::log_decision(
                    tx,
                    loan,
                    None,
                    ApprovalAction::Commented,
                    &format!(
                        "Guarantee called: {} unit(s) liquidated from guarantor {}",
                        lock.locked_units, lock.member_id
                    ),
                )?;
            }
            None => {
                // An active guarantee should always carry a lock; keep the
                // cascade going and flag the record.
                error!(
                    guarantee = %guarantee.id,
                    loan = %loan.loan_id,
                    "active guarantee has no share lock, nothing to liquidate"
                );
            }
        }

        notifications.push(notify::create(
            tx,
            guarantee.guarantor_id,
            "Guarantee called",
            &format!(
                "Loan {} defaulted; your guarantee of {} was called and the locked shares liquidated.",
                loan.loan_id, guarantee.amount_guaranteed
            ),
            NotificationCategory::GuaranteeCalled,
            Some(&loan.loan_id),
        )?);
    }
    Ok(active.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use sacco_db::Database;
    use sacco_types::EngineConfig;

    #[test]
    fn completed_loan_is_never_pulled_back_to_active() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let engine = LoanEngine::new(db, EngineConfig::default());
        let borrower = engine.register_member("Bob", MemberRole::Member).unwrap();

        let loan_type = LoanType {
            id: Uuid::new_v4(),
            name: "Test".into(),
            interest_rate: dec!(10),
            min_amount: dec!(100),
            max_amount: dec!(10000),
            max_term_months: 12,
            is_for_non_member: false,
            institution_share: dec!(10),
            guarantor_share: dec!(0),
            member_share: dec!(0),
        };

        // a row that looks like a batch snapshot gone stale: the loan
        // finished repaying while still carrying the default flag
        let now = Utc::now();
        let loan = Loan {
            id: Uuid::new_v4(),
            loan_id: "LN-STALE".into(),
            borrower: Borrower::Member(borrower.id),
            loan_type_id: loan_type.id,
            amount_applied: dec!(5000),
            amount_approved: Some(dec!(5000)),
            term_months: 6,
            status: LoanStatus::Completed,
            approval_stage: ApprovalStage::Approved,
            outstanding_principal: Some(dec!(0)),
            monthly_payment: None,
            application_date: now,
            approval_deadline: now,
            disbursement_date: Some(now),
            next_repayment_date: None,
            last_repayment_date: None,
            is_defaulted: true,
        };
        engine
            .in_tx(|tx| {
                queries::insert_loan_type(tx, &loan_type)?;
                queries::insert_loan(tx, &loan)?;
                Ok(())
            })
            .unwrap();

        let outcome = engine
            .check_one(loan.id, NaiveDate::from_ymd_opt(2025, 6, 1).unwrap())
            .unwrap();
        assert!(!outcome.cured);
        assert!(!outcome.defaulted);

        let after = engine
            .db()
            .with_conn(|conn| queries::loan_by_id(conn, loan.id))
            .unwrap()
            .unwrap();
        assert_eq!(after.status, LoanStatus::Completed);
    }
}
