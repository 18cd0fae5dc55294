//! Repayment settlement: a confirmed payment retires the oldest unpaid
//! installment, reduces the outstanding principal and, on the last
//! installment, completes the loan and releases its guarantees.

use chrono::{DateTime, Utc};
use rusqlite::Transaction;
use rust_decimal::Decimal;
use tracing::info;

use sacco_db::queries;
use sacco_types::models::*;
use sacco_types::money::round2;

use crate::{EngineError, EngineResult, LoanEngine, guarantee, interest, notify};

impl LoanEngine {
    /// Settle one installment of a loan with an already-confirmed payment.
    pub fn record_repayment(
        &self,
        loan_id: &str,
        transaction_id: &str,
        amount: Decimal,
        paid_at: DateTime<Utc>,
    ) -> EngineResult<Loan> {
        let (loan, notifications) = self.in_tx(|tx| {
            let loan = queries::loan_by_loan_id(tx, loan_id)?
                .ok_or_else(|| EngineError::LoanNotFound(loan_id.to_string()))?;
            apply(tx, &loan, transaction_id, amount, paid_at)
        })?;
        self.deliver_all(&notifications);
        Ok(loan)
    }
}

/// Core settlement step, shared with the payment-confirmation matcher.
/// Runs inside the caller's transaction.
pub(crate) fn apply(
    tx: &Transaction,
    loan: &Loan,
    transaction_id: &str,
    amount: Decimal,
    paid_at: DateTime<Utc>,
) -> EngineResult<(Loan, Vec<Notification>)> {
    if loan.status != LoanStatus::Active && loan.status != LoanStatus::Defaulted {
        return Err(EngineError::WrongStatus {
            loan_id: loan.loan_id.clone(),
            status: loan.status,
            expected: LoanStatus::Active,
        });
    }

    let installment = queries::next_unpaid_repayment(tx, loan.id)?.ok_or_else(|| {
        EngineError::Integrity(format!(
            "loan {} is {} but has no unpaid installment",
            loan.loan_id, loan.status
        ))
    })?;
    // Partial and over-payments are not accepted; the gateway retries the
    // exact installment amount.
    if amount != installment.amount {
        return Err(EngineError::InstallmentAmountMismatch {
            expected: installment.amount,
            received: amount,
        });
    }

    queries::mark_repayment_paid(tx, installment.id, transaction_id, paid_at)?;

    let outstanding_before = loan.outstanding_principal.unwrap_or(Decimal::ZERO);
    let outstanding = round2((outstanding_before - installment.principal).max(Decimal::ZERO));
    let next = queries::next_unpaid_repayment(tx, loan.id)?;
    let completed = next.is_none();
    let status = if completed { LoanStatus::Completed } else { loan.status };

    queries::update_loan_after_repayment(
        tx,
        loan.id,
        outstanding,
        status,
        next.as_ref().map(|r| r.due_date),
        paid_at.date_naive(),
    )?;
    if completed && loan.is_defaulted {
        queries::set_loan_default_flag(tx, loan.id, false, LoanStatus::Completed)?;
    }

    // Ledger: principal always returns to the institution; interest is
    // either kept whole (member loans) or split per the loan type (guest
    // loans).
    let loan_type = queries::loan_type_by_id(tx, loan.loan_type_id)?
        .ok_or(EngineError::LoanTypeNotFound(loan.loan_type_id))?;
    queries::credit_wallet(
        tx,
        queries::institution_wallet_id(),
        WalletTxKind::LoanRepayment,
        installment.principal,
        &format!("Principal repayment on loan {}", loan.loan_id),
        paid_at,
    )?;
    if installment.interest > Decimal::ZERO {
        if loan_type.is_for_non_member {
            interest::distribute(tx, loan, &loan_type, &installment, paid_at)?;
        } else {
            queries::credit_wallet(
                tx,
                queries::institution_wallet_id(),
                WalletTxKind::InterestCredit,
                installment.interest,
                &format!("Interest on loan {}", loan.loan_id),
                paid_at,
            )?;
        }
    }

    let mut notifications = Vec::new();
    if completed {
        guarantee::release_for_loan(tx, loan)?;
        info!(loan = %loan.loan_id, "loan fully repaid");
        if let Some(borrower_id) = loan.borrower.member_id() {
            notifications.push(notify::create(
                tx,
                borrower_id,
                "Loan fully repaid",
                &format!("Loan {} is fully repaid. Thank you.", loan.loan_id),
                NotificationCategory::Info,
                Some(&loan.loan_id),
            )?);
        }
    }

    let updated = queries::loan_by_id(tx, loan.id)?
        .ok_or_else(|| EngineError::LoanNotFound(loan.loan_id.clone()))?;
    Ok((updated, notifications))
}
