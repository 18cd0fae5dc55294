//! Loan application intake: validation gates and atomic creation of the
//! loan plus its pending guarantee nominations.

use chrono::{Duration, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use uuid::Uuid;

use sacco_db::queries;
use sacco_types::models::*;
use sacco_types::money::round2;

use crate::{EngineError, EngineResult, LoanEngine, credit, notify};

#[derive(Debug, Clone)]
pub struct LoanApplication {
    pub borrower: Borrower,
    pub loan_type_id: Uuid,
    pub amount: Decimal,
    pub term_months: u32,
    /// Nominated guarantors. Nomination only — shares are committed later,
    /// when each guarantor accepts.
    pub guarantors: Vec<Uuid>,
}

impl LoanEngine {
    /// Validate and persist a new application. On any validation failure
    /// nothing is persisted; on success the loan sits at
    /// `pending_manager` / `pending` with one pending guarantee row per
    /// nominated guarantor.
    pub fn submit_application(&self, application: LoanApplication) -> EngineResult<Loan> {
        let (loan, notifications) = self.in_tx(|tx| {
            let loan_type = queries::loan_type_by_id(tx, application.loan_type_id)?
                .ok_or(EngineError::LoanTypeNotFound(application.loan_type_id))?;

            if application.amount < loan_type.min_amount
                || application.amount > loan_type.max_amount
            {
                return Err(EngineError::AmountOutOfRange {
                    amount: application.amount,
                    min: loan_type.min_amount,
                    max: loan_type.max_amount,
                    loan_type: loan_type.name,
                });
            }
            if application.term_months == 0
                || application.term_months > loan_type.max_term_months
            {
                return Err(EngineError::TermOutOfRange {
                    term_months: application.term_months,
                    max_term_months: loan_type.max_term_months,
                    loan_type: loan_type.name,
                });
            }

            match &application.borrower {
                Borrower::Member(member_id) => {
                    let member = queries::member_by_id(tx, *member_id)?
                        .ok_or(EngineError::MemberNotFound(*member_id))?;
                    if member.is_suspended {
                        return Err(EngineError::BorrowerSuspended(*member_id));
                    }
                    let available = credit::available_credit(tx, *member_id, self.config())?;
                    if application.amount > available {
                        return Err(EngineError::CreditLimitExceeded {
                            requested: application.amount,
                            available,
                        });
                    }
                }
                Borrower::Guest { name, sponsor } => {
                    if name.trim().is_empty() {
                        return Err(EngineError::MissingBorrower);
                    }
                    if let Some(sponsor_id) = sponsor {
                        queries::member_by_id(tx, *sponsor_id)?
                            .ok_or(EngineError::MemberNotFound(*sponsor_id))?;
                    }
                }
            }

            // Guests have no shares backing them, so their guarantor pool
            // must always cover the request. Member loans are gated only
            // when guarantors were nominated.
            let needs_cover = matches!(application.borrower, Borrower::Guest { .. })
                || !application.guarantors.is_empty();
            if needs_cover {
                let capacity = credit::total_guarantor_capacity(tx, &application.guarantors)?;
                if capacity < application.amount {
                    return Err(EngineError::InsufficientGuarantorCapacity {
                        requested: application.amount,
                        available: capacity,
                    });
                }
            }

            let now = Utc::now();
            let loan = Loan {
                id: Uuid::new_v4(),
                loan_id: new_loan_identifier(),
                borrower: application.borrower.clone(),
                loan_type_id: application.loan_type_id,
                amount_applied: application.amount,
                amount_approved: None,
                term_months: application.term_months,
                status: LoanStatus::Pending,
                approval_stage: ApprovalStage::PendingManager,
                outstanding_principal: None,
                monthly_payment: None,
                application_date: now,
                approval_deadline: now + Duration::days(self.config().approval_window_days),
                disbursement_date: None,
                next_repayment_date: None,
                last_repayment_date: None,
                is_defaulted: false,
            };
            queries::insert_loan(tx, &loan)?;

            let mut notifications = Vec::new();
            for (i, guarantor_id) in application.guarantors.iter().enumerate() {
                let guarantee = Guarantee {
                    id: Uuid::new_v4(),
                    loan_id: loan.id,
                    guarantor_id: *guarantor_id,
                    amount_guaranteed: guarantee_slice(
                        application.amount,
                        application.guarantors.len(),
                        i,
                    ),
                    status: GuaranteeStatus::Pending,
                    created_at: now,
                };
                queries::insert_guarantee(tx, &guarantee)?;
                notifications.push(notify::create(
                    tx,
                    *guarantor_id,
                    "Guarantee request",
                    &format!(
                        "You have been asked to guarantee {} of loan {}.",
                        guarantee.amount_guaranteed, loan.loan_id
                    ),
                    NotificationCategory::GuaranteeRequest,
                    Some(&loan.loan_id),
                )?);
            }

            Ok((loan, notifications))
        })?;

        self.deliver_all(&notifications);
        Ok(loan)
    }
}

/// Human-facing loan identifier: timestamp plus a random 4-digit suffix.
fn new_loan_identifier() -> String {
    let suffix: u32 = rand::rng().random_range(0..10_000);
    format!("LN-{}{:04}", Utc::now().timestamp(), suffix)
}

/// Equal split of the requested amount across guarantors, with the last
/// slice absorbing the rounding remainder.
fn guarantee_slice(amount: Decimal, count: usize, index: usize) -> Decimal {
    let share = round2(amount / Decimal::from(count as u64));
    if index == count - 1 {
        amount - share * Decimal::from(count as u64 - 1)
    } else {
        share
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn guarantee_slices_sum_to_requested_amount() {
        let amount = dec!(100000.01);
        let total: Decimal = (0..3).map(|i| guarantee_slice(amount, 3, i)).sum();
        assert_eq!(total, amount);
    }

    #[test]
    fn loan_identifiers_have_the_expected_shape() {
        let id = new_loan_identifier();
        assert!(id.starts_with("LN-"));
        assert!(id.len() > 10);
    }
}
