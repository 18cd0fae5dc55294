//! Member registration, pool placement, share purchases and suspension.

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use sacco_db::queries;
use sacco_types::models::*;

use crate::{EngineError, EngineResult, LoanEngine};

impl LoanEngine {
    /// Register a member and open their (empty) share account at the
    /// configured unit price.
    pub fn register_member(&self, name: &str, role: MemberRole) -> EngineResult<Member> {
        let member = Member {
            id: Uuid::new_v4(),
            name: name.to_string(),
            role,
            pool_id: None,
            is_suspended: false,
            joined_at: Utc::now(),
        };
        let unit_price = self.config().default_unit_price;
        self.in_tx(|tx| {
            queries::insert_member(tx, &member)?;
            queries::create_share_account(tx, member.id, unit_price)?;
            Ok(())
        })?;
        info!(member = %member.id, %role, "member registered");
        Ok(member)
    }

    pub fn create_pool(
        &self,
        name: &str,
        contribution_amount: Decimal,
        frequency: ContributionFrequency,
        member_limit: u32,
    ) -> EngineResult<Pool> {
        let pool = Pool {
            id: Uuid::new_v4(),
            name: name.to_string(),
            contribution_amount,
            frequency,
            member_limit,
            is_locked: false,
        };
        self.in_tx(|tx| {
            queries::insert_pool(tx, &pool)?;
            Ok(())
        })?;
        Ok(pool)
    }

    /// Place a member in a contribution pool. A pool locks automatically
    /// the moment it reaches its member limit.
    pub fn join_pool(&self, member_id: Uuid, pool_id: Uuid) -> EngineResult<()> {
        self.in_tx(|tx| {
            let pool = queries::pool_by_id(tx, pool_id)?
                .ok_or(EngineError::PoolNotFound(pool_id))?;
            queries::member_by_id(tx, member_id)?
                .ok_or(EngineError::MemberNotFound(member_id))?;

            let count = queries::pool_member_count(tx, pool_id)?;
            if pool.is_locked || count >= pool.member_limit {
                return Err(EngineError::PoolFull { pool: pool.name });
            }

            queries::set_member_pool(tx, member_id, pool_id)?;
            if count + 1 >= pool.member_limit {
                queries::set_pool_locked(tx, pool_id, true)?;
            }
            Ok(())
        })
    }

    /// Add purchased units to a member's share account.
    pub fn purchase_shares(&self, member_id: Uuid, units: i64) -> EngineResult<ShareAccount> {
        if units <= 0 {
            return Err(EngineError::Integrity(format!(
                "share purchase must be a positive unit count, got {units}"
            )));
        }
        self.in_tx(|tx| {
            let member = queries::member_by_id(tx, member_id)?
                .ok_or(EngineError::MemberNotFound(member_id))?;
            if member.is_suspended {
                return Err(EngineError::BorrowerSuspended(member_id));
            }
            queries::add_share_units(tx, member_id, units)?;
            queries::share_account(tx, member_id)?.ok_or_else(|| {
                EngineError::Integrity(format!("member {} has no share account", member_id))
            })
        })
    }

    /// A suspended member cannot borrow, guarantee or buy shares; their
    /// existing obligations stand.
    pub fn suspend_member(&self, member_id: Uuid) -> EngineResult<()> {
        self.in_tx(|tx| {
            queries::set_member_suspended(tx, member_id, true)?;
            Ok(())
        })
    }

    pub fn reactivate_member(&self, member_id: Uuid) -> EngineResult<()> {
        self.in_tx(|tx| {
            queries::set_member_suspended(tx, member_id, false)?;
            Ok(())
        })
    }

    /// Define a loan product. Guest products must split their full rate
    /// across the institution, guarantor and member shares.
    pub fn create_loan_type(&self, loan_type: LoanType) -> EngineResult<LoanType> {
        if !loan_type.split_is_consistent() {
            return Err(EngineError::Integrity(format!(
                "loan type '{}' interest split does not sum to its rate",
                loan_type.name
            )));
        }
        if loan_type.min_amount > loan_type.max_amount || loan_type.max_term_months == 0 {
            return Err(EngineError::Integrity(format!(
                "loan type '{}' has an empty amount or term range",
                loan_type.name
            )));
        }
        self.in_tx(|tx| {
            queries::insert_loan_type(tx, &loan_type)?;
            Ok(())
        })?;
        Ok(loan_type)
    }
}
