//! Two-stage approval state machine: manager review, then director
//! decision. Every decision is appended to the loan's approval log.

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use rusqlite::Transaction;

use sacco_db::queries;
use sacco_types::models::*;

use crate::{EngineError, EngineResult, LoanEngine, notify, schedule};

impl LoanEngine {
    /// First-stage review. Approval forwards the loan to the director
    /// queue; rejection is terminal.
    pub fn manager_decision(
        &self,
        loan_id: &str,
        approver_id: Uuid,
        approve: bool,
        comments: &str,
    ) -> EngineResult<Loan> {
        let (loan, notifications) = self.in_tx(|tx| {
            let loan = loan_at_stage(tx, loan_id, ApprovalStage::PendingManager)?;
            let approver = reviewing_member(tx, approver_id, MemberRole::Manager)?;

            let (stage, status, action) = if approve {
                (
                    ApprovalStage::PendingDirector,
                    LoanStatus::ApprovedManager,
                    ApprovalAction::Forwarded,
                )
            } else {
                (
                    ApprovalStage::Rejected,
                    LoanStatus::Rejected,
                    ApprovalAction::Rejected,
                )
            };

            queries::update_loan_decision(tx, loan.id, stage, status, None, None)?;
            log_decision(tx, &loan, Some(approver.id), action, comments)?;

            let mut notifications = Vec::new();
            if !approve {
                if let Some(borrower_id) = loan.borrower.member_id() {
                    notifications.push(notify::create(
                        tx,
                        borrower_id,
                        "Loan application rejected",
                        &format!("Your loan application {} was rejected.", loan.loan_id),
                        NotificationCategory::LoanRejected,
                        Some(&loan.loan_id),
                    )?);
                }
            }

            let updated = queries::loan_by_id(tx, loan.id)?
                .ok_or_else(|| EngineError::LoanNotFound(loan.loan_id.clone()))?;
            Ok((updated, notifications))
        })?;

        self.deliver_all(&notifications);
        Ok(loan)
    }

    /// Final decision. Approval fixes the approved amount (defaulting to
    /// the amount applied for) and the fixed monthly payment; the loan is
    /// then ready for disbursement.
    pub fn director_decision(
        &self,
        loan_id: &str,
        approver_id: Uuid,
        approve: bool,
        amount_override: Option<Decimal>,
        comments: &str,
    ) -> EngineResult<Loan> {
        let (loan, notifications) = self.in_tx(|tx| {
            let loan = loan_at_stage(tx, loan_id, ApprovalStage::PendingDirector)?;
            let approver = reviewing_member(tx, approver_id, MemberRole::Director)?;

            let mut notifications = Vec::new();
            if approve {
                let loan_type = queries::loan_type_by_id(tx, loan.loan_type_id)?
                    .ok_or(EngineError::LoanTypeNotFound(loan.loan_type_id))?;

                let approved = amount_override.unwrap_or(loan.amount_applied);
                if approved < loan_type.min_amount
                    || approved > loan_type.max_amount
                    || approved > loan.amount_applied
                {
                    return Err(EngineError::AmountOutOfRange {
                        amount: approved,
                        min: loan_type.min_amount,
                        max: loan_type.max_amount.min(loan.amount_applied),
                        loan_type: loan_type.name,
                    });
                }

                let simple = loan.term_months == 1 && !loan_type.is_for_non_member;
                let payment = schedule::monthly_payment(
                    approved,
                    loan_type.interest_rate,
                    loan.term_months,
                    simple,
                )?;

                queries::update_loan_decision(
                    tx,
                    loan.id,
                    ApprovalStage::Approved,
                    LoanStatus::Approved,
                    Some(approved),
                    Some(payment),
                )?;
                log_decision(tx, &loan, Some(approver.id), ApprovalAction::Approved, comments)?;

                if let Some(borrower_id) = loan.borrower.member_id() {
                    notifications.push(notify::create(
                        tx,
                        borrower_id,
                        "Loan approved",
                        &format!(
                            "Loan {} approved for {}; monthly payment {}.",
                            loan.loan_id, approved, payment
                        ),
                        NotificationCategory::LoanApproved,
                        Some(&loan.loan_id),
                    )?);
                }
            } else {
                queries::update_loan_decision(
                    tx,
                    loan.id,
                    ApprovalStage::Rejected,
                    LoanStatus::Rejected,
                    None,
                    None,
                )?;
                log_decision(tx, &loan, Some(approver.id), ApprovalAction::Rejected, comments)?;

                if let Some(borrower_id) = loan.borrower.member_id() {
                    notifications.push(notify::create(
                        tx,
                        borrower_id,
                        "Loan application rejected",
                        &format!("Your loan application {} was rejected.", loan.loan_id),
                        NotificationCategory::LoanRejected,
                        Some(&loan.loan_id),
                    )?);
                }
            }

            let updated = queries::loan_by_id(tx, loan.id)?
                .ok_or_else(|| EngineError::LoanNotFound(loan.loan_id.clone()))?;
            Ok((updated, notifications))
        })?;

        self.deliver_all(&notifications);
        Ok(loan)
    }
}

fn loan_at_stage(
    tx: &Transaction,
    loan_id: &str,
    expected: ApprovalStage,
) -> EngineResult<Loan> {
    let loan = queries::loan_by_loan_id(tx, loan_id)?
        .ok_or_else(|| EngineError::LoanNotFound(loan_id.to_string()))?;
    if loan.approval_stage != expected {
        return Err(EngineError::WrongStage {
            loan_id: loan.loan_id,
            stage: loan.approval_stage,
            expected,
        });
    }
    Ok(loan)
}

/// The stage's designated role may act; governance roles may act at either
/// stage.
fn reviewing_member(
    tx: &Transaction,
    approver_id: Uuid,
    stage_role: MemberRole,
) -> EngineResult<Member> {
    let member = queries::member_by_id(tx, approver_id)?
        .ok_or(EngineError::MemberNotFound(approver_id))?;
    if member.role != stage_role && !member.role.is_governance() {
        return Err(EngineError::UnauthorizedApprover {
            member_id: member.id,
            role: member.role,
        });
    }
    Ok(member)
}

pub(crate) fn log_decision(
    tx: &Transaction,
    loan: &Loan,
    approver_id: Option<Uuid>,
    action: ApprovalAction,
    comments: &str,
) -> EngineResult<()> {
    queries::insert_approval_log(
        tx,
        &LoanApprovalLog {
            id: Uuid::new_v4(),
            loan_id: loan.id,
            approver_id,
            action,
            comments: comments.to_string(),
            timestamp: Utc::now(),
        },
    )?;
    Ok(())
}
