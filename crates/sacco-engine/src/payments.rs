//! Inbound payment confirmation: gateway callbacks are deduplicated by
//! transaction id, then matched to a loan installment or a member
//! contribution by the payer reference.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use sacco_db::queries;
use sacco_types::models::*;

use crate::{EngineError, EngineResult, LoanEngine, repayment};

/// What a confirmed payment settled.
#[derive(Debug, Clone)]
pub enum PaymentOutcome {
    /// The payment retired a loan installment.
    Repayment(Loan),
    /// The payment was recorded as a member contribution.
    Contribution { member_id: Uuid, amount: Decimal },
}

impl LoanEngine {
    /// Process a payment-gateway confirmation exactly once.
    ///
    /// References starting with `LN-` settle a loan installment; a member
    /// uuid records a contribution. Replaying a transaction id returns
    /// [`EngineError::DuplicateTransaction`] without touching any balance,
    /// and an unmatched reference rolls the whole confirmation back so a
    /// corrected retry can succeed.
    pub fn confirm_payment(
        &self,
        transaction_id: &str,
        amount: Decimal,
        payer_reference: &str,
        received_at: DateTime<Utc>,
    ) -> EngineResult<PaymentOutcome> {
        let (outcome, notifications) = self.in_tx(|tx| {
            if queries::payment_confirmation_exists(tx, transaction_id)? {
                return Err(EngineError::DuplicateTransaction(transaction_id.to_string()));
            }
            queries::insert_payment_confirmation(
                tx,
                transaction_id,
                amount,
                payer_reference,
                received_at,
            )?;

            if payer_reference.starts_with("LN-") {
                let loan = queries::loan_by_loan_id(tx, payer_reference)?
                    .ok_or_else(|| EngineError::UnmatchedPayment(payer_reference.to_string()))?;
                let (loan, notifications) =
                    repayment::apply(tx, &loan, transaction_id, amount, received_at)?;
                return Ok((PaymentOutcome::Repayment(loan), notifications));
            }

            let member_id: Uuid = payer_reference
                .parse()
                .map_err(|_| EngineError::UnmatchedPayment(payer_reference.to_string()))?;
            let member = queries::member_by_id(tx, member_id)?
                .ok_or_else(|| EngineError::UnmatchedPayment(payer_reference.to_string()))?;

            queries::insert_contribution(
                tx,
                &Contribution {
                    id: Uuid::new_v4(),
                    member_id: member.id,
                    amount,
                    date: received_at.date_naive(),
                },
            )?;
            let wallet = queries::wallet_for_member(tx, member.id)?;
            queries::credit_wallet(
                tx,
                wallet.id,
                WalletTxKind::ContributionDeposit,
                amount,
                &format!("Contribution via transaction {}", transaction_id),
                received_at,
            )?;

            Ok((
                PaymentOutcome::Contribution {
                    member_id: member.id,
                    amount,
                },
                Vec::new(),
            ))
        })?;

        self.deliver_all(&notifications);
        Ok(outcome)
    }
}
