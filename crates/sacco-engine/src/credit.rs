//! Credit limit and guarantor capacity evaluation.
//!
//! Both checks are read-only: share locking happens later, at guarantee
//! acceptance, so rejected or abandoned applications never tie up shares.

use rusqlite::Connection;
use rust_decimal::Decimal;
use uuid::Uuid;

use sacco_db::queries;
use sacco_types::EngineConfig;

use crate::{EngineError, EngineResult, LoanEngine};

/// A member's remaining borrowing capacity:
/// `share_value × multiplier − outstanding principal`, floored at zero.
pub fn available_credit(
    conn: &Connection,
    member_id: Uuid,
    config: &EngineConfig,
) -> EngineResult<Decimal> {
    let share_value = match queries::share_account(conn, member_id)? {
        Some(account) => account.total_value(),
        None => Decimal::ZERO,
    };
    let outstanding = queries::outstanding_principal_for_member(conn, member_id)?;
    Ok((share_value * config.loan_to_share_multiplier - outstanding).max(Decimal::ZERO))
}

/// Capacity a single guarantor can stand behind: own share value minus own
/// outstanding principal, clamped at zero. Suspended members count for
/// nothing.
pub fn guarantor_capacity(conn: &Connection, guarantor_id: Uuid) -> EngineResult<Decimal> {
    let member = queries::member_by_id(conn, guarantor_id)?
        .ok_or(EngineError::MemberNotFound(guarantor_id))?;
    if member.is_suspended {
        return Ok(Decimal::ZERO);
    }
    let share_value = match queries::share_account(conn, guarantor_id)? {
        Some(account) => account.total_value(),
        None => Decimal::ZERO,
    };
    let outstanding = queries::outstanding_principal_for_member(conn, guarantor_id)?;
    Ok((share_value - outstanding).max(Decimal::ZERO))
}

/// Aggregate capacity across a proposed guarantor set.
pub fn total_guarantor_capacity(conn: &Connection, guarantor_ids: &[Uuid]) -> EngineResult<Decimal> {
    let mut total = Decimal::ZERO;
    for id in guarantor_ids {
        total += guarantor_capacity(conn, *id)?;
    }
    Ok(total)
}

impl LoanEngine {
    pub fn available_credit(&self, member_id: Uuid) -> EngineResult<Decimal> {
        self.db()
            .with_conn(|conn| available_credit(conn, member_id, self.config()))
    }

    pub fn guarantor_capacity(&self, guarantor_id: Uuid) -> EngineResult<Decimal> {
        self.db()
            .with_conn(|conn| guarantor_capacity(conn, guarantor_id))
    }
}
