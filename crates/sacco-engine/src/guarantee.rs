//! Guarantee acceptance, rejection and release. Accepting a guarantee is
//! the point where shares actually get locked.

use chrono::Utc;
use rusqlite::Transaction;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tracing::info;
use uuid::Uuid;

use sacco_db::queries;
use sacco_types::models::*;

use crate::{EngineError, EngineResult, LoanEngine};

impl LoanEngine {
    /// Answer a pending guarantee request. Acceptance locks enough share
    /// units to cover the guaranteed amount; rejection leaves the
    /// guarantor's shares untouched.
    pub fn respond_to_guarantee(&self, guarantee_id: Uuid, accept: bool) -> EngineResult<Guarantee> {
        self.in_tx(|tx| {
            let guarantee = queries::guarantee_by_id(tx, guarantee_id)?
                .ok_or(EngineError::GuaranteeNotFound(guarantee_id))?;
            if guarantee.status != GuaranteeStatus::Pending {
                return Err(EngineError::GuaranteeNotPending {
                    guarantee_id,
                    status: guarantee.status,
                });
            }

            if accept {
                // Suspension after nomination still blocks the commitment;
                // declining stays open to the member.
                let guarantor = queries::member_by_id(tx, guarantee.guarantor_id)?
                    .ok_or(EngineError::MemberNotFound(guarantee.guarantor_id))?;
                if guarantor.is_suspended {
                    return Err(EngineError::BorrowerSuspended(guarantor.id));
                }
                lock_shares(tx, &guarantee)?;
                queries::update_guarantee_status(tx, guarantee.id, GuaranteeStatus::Active)?;
            } else {
                queries::update_guarantee_status(tx, guarantee.id, GuaranteeStatus::Rejected)?;
            }

            let updated = queries::guarantee_by_id(tx, guarantee.id)?
                .ok_or(EngineError::GuaranteeNotFound(guarantee.id))?;
            Ok(updated)
        })
    }
}

fn lock_shares(tx: &Transaction, guarantee: &Guarantee) -> EngineResult<()> {
    let account = queries::share_account(tx, guarantee.guarantor_id)?.ok_or_else(|| {
        EngineError::Integrity(format!(
            "guarantor {} has no share account",
            guarantee.guarantor_id
        ))
    })?;

    let needed = units_to_cover(guarantee.amount_guaranteed, account.unit_price)?;
    let locked = queries::locked_units_total(tx, guarantee.guarantor_id)?;
    let available = account.units - locked;
    if needed > available {
        return Err(EngineError::InsufficientUnlockedShares { needed, available });
    }

    queries::insert_share_lock(
        tx,
        &ShareLock {
            id: Uuid::new_v4(),
            member_id: guarantee.guarantor_id,
            guarantee_id: guarantee.id,
            locked_units: needed,
            created_at: Utc::now(),
        },
    )?;
    Ok(())
}

/// Smallest whole number of units whose value covers `amount`.
fn units_to_cover(amount: Decimal, unit_price: Decimal) -> EngineResult<i64> {
    if unit_price <= Decimal::ZERO {
        return Err(EngineError::Integrity(format!(
            "share unit price must be positive, got {unit_price}"
        )));
    }
    (amount / unit_price)
        .ceil()
        .to_i64()
        .ok_or_else(|| EngineError::Integrity(format!("unit count overflow for amount {amount}")))
}

/// Release every active guarantee on a fully repaid loan and free the
/// locked shares behind them.
pub(crate) fn release_for_loan(tx: &Transaction, loan: &Loan) -> EngineResult<Vec<Guarantee>> {
    let active = queries::guarantees_for_loan_with_status(tx, loan.id, GuaranteeStatus::Active)?;
    for guarantee in &active {
        if let Some(lock) = queries::share_lock_for_guarantee(tx, guarantee.id)? {
            queries::delete_share_lock(tx, lock.id)?;
        }
        queries::update_guarantee_status(tx, guarantee.id, GuaranteeStatus::Released)?;
        info!(
            loan = %loan.loan_id,
            guarantor = %guarantee.guarantor_id,
            "guarantee released"
        );
    }
    Ok(active)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn unit_cover_rounds_up() {
        assert_eq!(units_to_cover(dec!(5000), dec!(100)).unwrap(), 50);
        assert_eq!(units_to_cover(dec!(5000.01), dec!(100)).unwrap(), 51);
        assert_eq!(units_to_cover(dec!(99.99), dec!(100)).unwrap(), 1);
    }

    #[test]
    fn unit_cover_rejects_nonpositive_price() {
        assert!(units_to_cover(dec!(5000), dec!(0)).is_err());
        assert!(units_to_cover(dec!(5000), dec!(-1)).is_err());
    }
}
