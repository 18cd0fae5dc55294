//! Disbursement: an approved loan becomes active, its repayment schedule
//! materialises, and the funds land in the borrower's wallet.

use chrono::{DateTime, Utc};
use tracing::info;

use sacco_db::queries;
use sacco_types::models::*;

use crate::{EngineError, EngineResult, LoanEngine, schedule};

impl LoanEngine {
    /// Disburse an approved loan. Replaying the call for an already
    /// disbursed loan is a no-op, so an at-least-once caller cannot double
    /// a schedule or a wallet credit.
    pub fn disburse(&self, loan_id: &str, disbursed_at: DateTime<Utc>) -> EngineResult<Loan> {
        let (loan, notifications) = self.in_tx(|tx| {
            let loan = queries::loan_by_loan_id(tx, loan_id)?
                .ok_or_else(|| EngineError::LoanNotFound(loan_id.to_string()))?;

            if loan.outstanding_principal.is_some() || queries::repayment_count(tx, loan.id)? > 0 {
                info!(loan = %loan.loan_id, "already disbursed, ignoring replay");
                return Ok((loan, Vec::new()));
            }
            if loan.status != LoanStatus::Approved {
                return Err(EngineError::WrongStatus {
                    loan_id: loan.loan_id,
                    status: loan.status,
                    expected: LoanStatus::Approved,
                });
            }

            let loan_type = queries::loan_type_by_id(tx, loan.loan_type_id)?
                .ok_or(EngineError::LoanTypeNotFound(loan.loan_type_id))?;
            let principal = loan.amount_approved.ok_or_else(|| {
                EngineError::Integrity(format!("loan {} approved without an amount", loan.loan_id))
            })?;

            queries::mark_loan_disbursed(tx, loan.id, disbursed_at, principal)?;
            schedule::persist(tx, &loan, &loan_type, disbursed_at.date_naive())?;

            let mut notifications = Vec::new();
            if let Some(borrower_id) = loan.borrower.member_id() {
                let wallet = queries::wallet_for_member(tx, borrower_id)?;
                queries::credit_wallet(
                    tx,
                    wallet.id,
                    WalletTxKind::LoanDisbursement,
                    principal,
                    &format!("Disbursement of loan {}", loan.loan_id),
                    disbursed_at,
                )?;
                notifications.push(crate::notify::create(
                    tx,
                    borrower_id,
                    "Loan disbursed",
                    &format!("Loan {} disbursed: {} credited to your wallet.", loan.loan_id, principal),
                    NotificationCategory::Info,
                    Some(&loan.loan_id),
                )?);
            }

            info!(loan = %loan.loan_id, %principal, "loan disbursed");
            let updated = queries::loan_by_id(tx, loan.id)?
                .ok_or_else(|| EngineError::LoanNotFound(loan.loan_id.clone()))?;
            Ok((updated, notifications))
        })?;

        self.deliver_all(&notifications);
        Ok(loan)
    }
}
