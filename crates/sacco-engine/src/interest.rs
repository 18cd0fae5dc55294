//! Interest distribution on guest-loan repayments.
//!
//! The loan type's three-way split (institution / guarantor / member) is
//! expressed in rate points and must sum to the full interest rate, so
//! each share of a repayment's interest is
//! `interest × share_points / interest_rate`. The member pool is divided
//! equally across active members; rounding residue goes to the
//! institution so the distributed total always equals the interest
//! collected.

use chrono::{DateTime, Utc};
use rusqlite::Transaction;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::warn;
use uuid::Uuid;

use sacco_db::queries;
use sacco_types::models::*;
use sacco_types::money::round2;

use crate::EngineResult;

pub(crate) fn distribute(
    tx: &Transaction,
    loan: &Loan,
    loan_type: &LoanType,
    repayment: &LoanRepayment,
    now: DateTime<Utc>,
) -> EngineResult<()> {
    if repayment.interest <= Decimal::ZERO || loan_type.interest_rate.is_zero() {
        return Ok(());
    }

    // Each share is capped at what is left of the interest, so the
    // institution residual below is non-negative by construction and the
    // distributed total can never exceed the interest collected.
    let guarantor_amount = round2(
        repayment.interest * loan_type.guarantor_share / loan_type.interest_rate,
    )
    .min(repayment.interest);
    let member_pool = round2(
        repayment.interest * loan_type.member_share / loan_type.interest_rate,
    )
    .min(repayment.interest - guarantor_amount);
    let mut institution_amount = repayment.interest - guarantor_amount - member_pool;

    // Guarantor share goes to the sponsoring member. A guest loan without
    // a sponsor folds it into the institution's cut.
    let sponsor = match &loan.borrower {
        Borrower::Guest { sponsor, .. } => *sponsor,
        Borrower::Member(_) => None,
    };
    match sponsor {
        Some(sponsor_id) if guarantor_amount > Decimal::ZERO => {
            let wallet = queries::wallet_for_member(tx, sponsor_id)?;
            queries::credit_wallet(
                tx,
                wallet.id,
                WalletTxKind::GuarantorInterest,
                guarantor_amount,
                &format!("Guarantor interest on loan {}", loan.loan_id),
                now,
            )?;
            record(tx, repayment.id, Some(sponsor_id), false, guarantor_amount, now)?;
        }
        _ => {
            if guarantor_amount > Decimal::ZERO {
                warn!(
                    loan = %loan.loan_id,
                    "guest loan has no sponsor, guarantor interest share goes to the institution"
                );
            }
            institution_amount += guarantor_amount;
        }
    }

    // Member pool: equal split across active members, remainder to the
    // institution.
    let members = queries::active_members(tx)?;
    if member_pool > Decimal::ZERO && !members.is_empty() {
        // Round each member's cut down; half-away rounding here would let
        // n × per_member exceed the pool and mint money.
        let per_member = (member_pool / Decimal::from(members.len() as u64))
            .round_dp_with_strategy(2, RoundingStrategy::ToZero);
        let mut distributed = Decimal::ZERO;
        for member in &members {
            if per_member <= Decimal::ZERO {
                break;
            }
            let wallet = queries::wallet_for_member(tx, member.id)?;
            queries::credit_wallet(
                tx,
                wallet.id,
                WalletTxKind::InterestCredit,
                per_member,
                &format!("Member interest share from loan {}", loan.loan_id),
                now,
            )?;
            record(tx, repayment.id, Some(member.id), false, per_member, now)?;
            distributed += per_member;
        }
        institution_amount += member_pool - distributed;
    } else {
        institution_amount += member_pool;
    }

    if institution_amount > Decimal::ZERO {
        queries::credit_wallet(
            tx,
            queries::institution_wallet_id(),
            WalletTxKind::InterestCredit,
            institution_amount,
            &format!("Institution interest on loan {}", loan.loan_id),
            now,
        )?;
        record(tx, repayment.id, None, true, institution_amount, now)?;
    }

    Ok(())
}

fn record(
    tx: &Transaction,
    repayment_id: Uuid,
    member_id: Option<Uuid>,
    is_institution_share: bool,
    amount: Decimal,
    now: DateTime<Utc>,
) -> EngineResult<()> {
    queries::insert_interest_distribution(
        tx,
        &InterestDistribution {
            id: Uuid::new_v4(),
            repayment_id,
            member_id,
            is_institution_share,
            amount,
            created_at: now,
        },
    )?;
    Ok(())
}
