//! Query layer: free functions over `&Connection` so they compose inside a
//! caller-owned transaction, plus a few read convenience methods on
//! [`Database`].

use anyhow::{Result, anyhow};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use rust_decimal::Decimal;
use uuid::Uuid;

use sacco_types::models::*;

use crate::Database;
use crate::migrations::INSTITUTION_WALLET_ID;

// -- Column mapping helpers --

fn conv_err(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn dec_col(row: &Row, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| conv_err(idx, format!("bad decimal '{}': {}", raw, e)))
}

fn opt_dec_col(row: &Row, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(None),
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|e| conv_err(idx, format!("bad decimal '{}': {}", s, e))),
    }
}

fn uuid_col(row: &Row, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| conv_err(idx, format!("bad uuid '{}': {}", raw, e)))
}

fn opt_uuid_col(row: &Row, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(None),
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|e| conv_err(idx, format!("bad uuid '{}': {}", s, e))),
    }
}

fn enum_col<T>(row: &Row, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| conv_err(idx, format!("unknown enum value '{}'", raw)))
}

// -- Pools --

pub fn insert_pool(conn: &Connection, pool: &Pool) -> Result<()> {
    conn.execute(
        "INSERT INTO pools (id, name, contribution_amount, frequency, member_limit, is_locked)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            pool.id.to_string(),
            pool.name,
            pool.contribution_amount.to_string(),
            pool.frequency.as_str(),
            pool.member_limit,
            pool.is_locked,
        ],
    )?;
    Ok(())
}

pub fn pool_by_id(conn: &Connection, id: Uuid) -> Result<Option<Pool>> {
    let pool = conn
        .query_row(
            "SELECT id, name, contribution_amount, frequency, member_limit, is_locked
             FROM pools WHERE id = ?1",
            [id.to_string()],
            map_pool,
        )
        .optional()?;
    Ok(pool)
}

pub fn pool_by_name(conn: &Connection, name: &str) -> Result<Option<Pool>> {
    let pool = conn
        .query_row(
            "SELECT id, name, contribution_amount, frequency, member_limit, is_locked
             FROM pools WHERE name = ?1",
            [name],
            map_pool,
        )
        .optional()?;
    Ok(pool)
}

pub fn pool_member_count(conn: &Connection, pool_id: Uuid) -> Result<u32> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM members WHERE pool_id = ?1",
        [pool_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn set_pool_locked(conn: &Connection, pool_id: Uuid, locked: bool) -> Result<()> {
    conn.execute(
        "UPDATE pools SET is_locked = ?2 WHERE id = ?1",
        params![pool_id.to_string(), locked],
    )?;
    Ok(())
}

fn map_pool(row: &Row) -> rusqlite::Result<Pool> {
    Ok(Pool {
        id: uuid_col(row, 0)?,
        name: row.get(1)?,
        contribution_amount: dec_col(row, 2)?,
        frequency: enum_col(row, 3, ContributionFrequency::parse)?,
        member_limit: row.get(4)?,
        is_locked: row.get(5)?,
    })
}

// -- Members --

const MEMBER_COLS: &str = "id, name, role, pool_id, is_suspended, joined_at";

pub fn insert_member(conn: &Connection, member: &Member) -> Result<()> {
    conn.execute(
        "INSERT INTO members (id, name, role, pool_id, is_suspended, joined_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            member.id.to_string(),
            member.name,
            member.role.as_str(),
            member.pool_id.map(|p| p.to_string()),
            member.is_suspended,
            member.joined_at,
        ],
    )?;
    Ok(())
}

pub fn member_by_id(conn: &Connection, id: Uuid) -> Result<Option<Member>> {
    let member = conn
        .query_row(
            &format!("SELECT {MEMBER_COLS} FROM members WHERE id = ?1"),
            [id.to_string()],
            map_member,
        )
        .optional()?;
    Ok(member)
}

pub fn governance_members(conn: &Connection) -> Result<Vec<Member>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MEMBER_COLS} FROM members
         WHERE role IN ('director', 'admin', 'founder')
         ORDER BY name"
    ))?;
    let rows = stmt
        .query_map([], map_member)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Non-suspended members, the population for member-pool interest splits.
pub fn active_members(conn: &Connection) -> Result<Vec<Member>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MEMBER_COLS} FROM members WHERE is_suspended = 0 ORDER BY joined_at"
    ))?;
    let rows = stmt
        .query_map([], map_member)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn set_member_suspended(conn: &Connection, id: Uuid, suspended: bool) -> Result<()> {
    let changed = conn.execute(
        "UPDATE members SET is_suspended = ?2 WHERE id = ?1",
        params![id.to_string(), suspended],
    )?;
    if changed == 0 {
        return Err(anyhow!("member {} not found", id));
    }
    Ok(())
}

pub fn set_member_pool(conn: &Connection, id: Uuid, pool_id: Uuid) -> Result<()> {
    conn.execute(
        "UPDATE members SET pool_id = ?2 WHERE id = ?1",
        params![id.to_string(), pool_id.to_string()],
    )?;
    Ok(())
}

fn map_member(row: &Row) -> rusqlite::Result<Member> {
    Ok(Member {
        id: uuid_col(row, 0)?,
        name: row.get(1)?,
        role: enum_col(row, 2, MemberRole::parse)?,
        pool_id: opt_uuid_col(row, 3)?,
        is_suspended: row.get(4)?,
        joined_at: row.get(5)?,
    })
}

// -- Share accounts & locks --

pub fn create_share_account(conn: &Connection, member_id: Uuid, unit_price: Decimal) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO share_accounts (member_id, units, unit_price)
         VALUES (?1, 0, ?2)",
        params![member_id.to_string(), unit_price.to_string()],
    )?;
    Ok(())
}

pub fn share_account(conn: &Connection, member_id: Uuid) -> Result<Option<ShareAccount>> {
    let account = conn
        .query_row(
            "SELECT member_id, units, unit_price FROM share_accounts WHERE member_id = ?1",
            [member_id.to_string()],
            |row| {
                Ok(ShareAccount {
                    member_id: uuid_col(row, 0)?,
                    units: row.get(1)?,
                    unit_price: dec_col(row, 2)?,
                })
            },
        )
        .optional()?;
    Ok(account)
}

pub fn add_share_units(conn: &Connection, member_id: Uuid, delta: i64) -> Result<()> {
    let changed = conn.execute(
        "UPDATE share_accounts SET units = units + ?2 WHERE member_id = ?1",
        params![member_id.to_string(), delta],
    )?;
    if changed == 0 {
        return Err(anyhow!("share account for member {} not found", member_id));
    }
    Ok(())
}

pub fn locked_units_total(conn: &Connection, member_id: Uuid) -> Result<i64> {
    let total = conn.query_row(
        "SELECT COALESCE(SUM(locked_units), 0) FROM share_locks WHERE member_id = ?1",
        [member_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(total)
}

pub fn insert_share_lock(conn: &Connection, lock: &ShareLock) -> Result<()> {
    conn.execute(
        "INSERT INTO share_locks (id, member_id, guarantee_id, locked_units, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            lock.id.to_string(),
            lock.member_id.to_string(),
            lock.guarantee_id.to_string(),
            lock.locked_units,
            lock.created_at,
        ],
    )?;
    Ok(())
}

pub fn share_lock_for_guarantee(conn: &Connection, guarantee_id: Uuid) -> Result<Option<ShareLock>> {
    let lock = conn
        .query_row(
            "SELECT id, member_id, guarantee_id, locked_units, created_at
             FROM share_locks WHERE guarantee_id = ?1",
            [guarantee_id.to_string()],
            |row| {
                Ok(ShareLock {
                    id: uuid_col(row, 0)?,
                    member_id: uuid_col(row, 1)?,
                    guarantee_id: uuid_col(row, 2)?,
                    locked_units: row.get(3)?,
                    created_at: row.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(lock)
}

pub fn delete_share_lock(conn: &Connection, id: Uuid) -> Result<()> {
    conn.execute("DELETE FROM share_locks WHERE id = ?1", [id.to_string()])?;
    Ok(())
}

// -- Loan types --

const LOAN_TYPE_COLS: &str = "id, name, interest_rate, min_amount, max_amount, max_term_months, \
                              is_for_non_member, institution_share, guarantor_share, member_share";

pub fn insert_loan_type(conn: &Connection, lt: &LoanType) -> Result<()> {
    conn.execute(
        "INSERT INTO loan_types (id, name, interest_rate, min_amount, max_amount, max_term_months,
                                 is_for_non_member, institution_share, guarantor_share, member_share)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            lt.id.to_string(),
            lt.name,
            lt.interest_rate.to_string(),
            lt.min_amount.to_string(),
            lt.max_amount.to_string(),
            lt.max_term_months,
            lt.is_for_non_member,
            lt.institution_share.to_string(),
            lt.guarantor_share.to_string(),
            lt.member_share.to_string(),
        ],
    )?;
    Ok(())
}

pub fn loan_type_by_id(conn: &Connection, id: Uuid) -> Result<Option<LoanType>> {
    let lt = conn
        .query_row(
            &format!("SELECT {LOAN_TYPE_COLS} FROM loan_types WHERE id = ?1"),
            [id.to_string()],
            map_loan_type,
        )
        .optional()?;
    Ok(lt)
}

pub fn loan_type_by_name(conn: &Connection, name: &str) -> Result<Option<LoanType>> {
    let lt = conn
        .query_row(
            &format!("SELECT {LOAN_TYPE_COLS} FROM loan_types WHERE name = ?1"),
            [name],
            map_loan_type,
        )
        .optional()?;
    Ok(lt)
}

fn map_loan_type(row: &Row) -> rusqlite::Result<LoanType> {
    Ok(LoanType {
        id: uuid_col(row, 0)?,
        name: row.get(1)?,
        interest_rate: dec_col(row, 2)?,
        min_amount: dec_col(row, 3)?,
        max_amount: dec_col(row, 4)?,
        max_term_months: row.get(5)?,
        is_for_non_member: row.get(6)?,
        institution_share: dec_col(row, 7)?,
        guarantor_share: dec_col(row, 8)?,
        member_share: dec_col(row, 9)?,
    })
}

// -- Loans --

const LOAN_COLS: &str = "id, loan_id, member_id, guest_name, sponsor_id, loan_type_id, \
                         amount_applied, amount_approved, term_months, status, approval_stage, \
                         outstanding_principal, monthly_payment, application_date, \
                         approval_deadline, disbursement_date, next_repayment_date, \
                         last_repayment_date, is_defaulted";

pub fn insert_loan(conn: &Connection, loan: &Loan) -> Result<()> {
    let (member_id, guest_name, sponsor_id) = match &loan.borrower {
        Borrower::Member(id) => (Some(id.to_string()), None, None),
        Borrower::Guest { name, sponsor } => {
            (None, Some(name.clone()), sponsor.map(|s| s.to_string()))
        }
    };
    conn.execute(
        "INSERT INTO loans (id, loan_id, member_id, guest_name, sponsor_id, loan_type_id,
                            amount_applied, amount_approved, term_months, status, approval_stage,
                            outstanding_principal, monthly_payment, application_date,
                            approval_deadline, disbursement_date, next_repayment_date,
                            last_repayment_date, is_defaulted)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
        params![
            loan.id.to_string(),
            loan.loan_id,
            member_id,
            guest_name,
            sponsor_id,
            loan.loan_type_id.to_string(),
            loan.amount_applied.to_string(),
            loan.amount_approved.map(|a| a.to_string()),
            loan.term_months,
            loan.status.as_str(),
            loan.approval_stage.as_str(),
            loan.outstanding_principal.map(|a| a.to_string()),
            loan.monthly_payment.map(|a| a.to_string()),
            loan.application_date,
            loan.approval_deadline,
            loan.disbursement_date,
            loan.next_repayment_date,
            loan.last_repayment_date,
            loan.is_defaulted,
        ],
    )?;
    Ok(())
}

pub fn loan_by_id(conn: &Connection, id: Uuid) -> Result<Option<Loan>> {
    let loan = conn
        .query_row(
            &format!("SELECT {LOAN_COLS} FROM loans WHERE id = ?1"),
            [id.to_string()],
            map_loan,
        )
        .optional()?;
    Ok(loan)
}

pub fn loan_by_loan_id(conn: &Connection, loan_id: &str) -> Result<Option<Loan>> {
    let loan = conn
        .query_row(
            &format!("SELECT {LOAN_COLS} FROM loans WHERE loan_id = ?1"),
            [loan_id],
            map_loan,
        )
        .optional()?;
    Ok(loan)
}

pub fn loans_with_statuses(conn: &Connection, statuses: &[LoanStatus]) -> Result<Vec<Loan>> {
    if statuses.is_empty() {
        return Ok(vec![]);
    }
    let placeholders: Vec<String> = (1..=statuses.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT {LOAN_COLS} FROM loans WHERE status IN ({}) ORDER BY application_date",
        placeholders.join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let values: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
    let rows = stmt
        .query_map(rusqlite::params_from_iter(values), map_loan)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Sum of outstanding principal over a member's credit-relevant loans
/// (disbursed, active or defaulted).
pub fn outstanding_principal_for_member(conn: &Connection, member_id: Uuid) -> Result<Decimal> {
    let mut stmt = conn.prepare(
        "SELECT outstanding_principal FROM loans
         WHERE member_id = ?1
           AND status IN ('disbursed', 'active', 'defaulted')
           AND outstanding_principal IS NOT NULL",
    )?;
    let mut total = Decimal::ZERO;
    let rows = stmt.query_map([member_id.to_string()], |row| dec_col(row, 0))?;
    for amount in rows {
        total += amount?;
    }
    Ok(total)
}

pub fn update_loan_decision(
    conn: &Connection,
    id: Uuid,
    stage: ApprovalStage,
    status: LoanStatus,
    amount_approved: Option<Decimal>,
    monthly_payment: Option<Decimal>,
) -> Result<()> {
    let changed = conn.execute(
        "UPDATE loans SET approval_stage = ?2, status = ?3,
                          amount_approved = COALESCE(?4, amount_approved),
                          monthly_payment = COALESCE(?5, monthly_payment)
         WHERE id = ?1",
        params![
            id.to_string(),
            stage.as_str(),
            status.as_str(),
            amount_approved.map(|a| a.to_string()),
            monthly_payment.map(|a| a.to_string()),
        ],
    )?;
    if changed == 0 {
        return Err(anyhow!("loan {} not found", id));
    }
    Ok(())
}

pub fn mark_loan_disbursed(
    conn: &Connection,
    id: Uuid,
    disbursed_at: DateTime<Utc>,
    outstanding: Decimal,
) -> Result<()> {
    conn.execute(
        "UPDATE loans SET status = 'active', disbursement_date = ?2, outstanding_principal = ?3
         WHERE id = ?1",
        params![id.to_string(), disbursed_at, outstanding.to_string()],
    )?;
    Ok(())
}

pub fn set_loan_schedule_summary(
    conn: &Connection,
    id: Uuid,
    next_repayment_date: NaiveDate,
    monthly_payment: Decimal,
) -> Result<()> {
    conn.execute(
        "UPDATE loans SET next_repayment_date = ?2, monthly_payment = ?3 WHERE id = ?1",
        params![id.to_string(), next_repayment_date, monthly_payment.to_string()],
    )?;
    Ok(())
}

pub fn update_loan_after_repayment(
    conn: &Connection,
    id: Uuid,
    outstanding: Decimal,
    status: LoanStatus,
    next_repayment_date: Option<NaiveDate>,
    last_repayment_date: NaiveDate,
) -> Result<()> {
    conn.execute(
        "UPDATE loans SET outstanding_principal = ?2, status = ?3,
                          next_repayment_date = ?4, last_repayment_date = ?5
         WHERE id = ?1",
        params![
            id.to_string(),
            outstanding.to_string(),
            status.as_str(),
            next_repayment_date,
            last_repayment_date,
        ],
    )?;
    Ok(())
}

pub fn set_loan_default_flag(
    conn: &Connection,
    id: Uuid,
    is_defaulted: bool,
    status: LoanStatus,
) -> Result<()> {
    conn.execute(
        "UPDATE loans SET is_defaulted = ?2, status = ?3 WHERE id = ?1",
        params![id.to_string(), is_defaulted, status.as_str()],
    )?;
    Ok(())
}

fn map_loan(row: &Row) -> rusqlite::Result<Loan> {
    let member_id = opt_uuid_col(row, 2)?;
    let guest_name: Option<String> = row.get(3)?;
    let sponsor_id = opt_uuid_col(row, 4)?;
    let borrower = match (member_id, guest_name) {
        (Some(id), None) => Borrower::Member(id),
        (None, Some(name)) => Borrower::Guest {
            name,
            sponsor: sponsor_id,
        },
        // unreachable under the table CHECK constraint
        _ => return Err(conv_err(2, "loan has no unambiguous borrower".into())),
    };
    Ok(Loan {
        id: uuid_col(row, 0)?,
        loan_id: row.get(1)?,
        borrower,
        loan_type_id: uuid_col(row, 5)?,
        amount_applied: dec_col(row, 6)?,
        amount_approved: opt_dec_col(row, 7)?,
        term_months: row.get(8)?,
        status: enum_col(row, 9, LoanStatus::parse)?,
        approval_stage: enum_col(row, 10, ApprovalStage::parse)?,
        outstanding_principal: opt_dec_col(row, 11)?,
        monthly_payment: opt_dec_col(row, 12)?,
        application_date: row.get(13)?,
        approval_deadline: row.get(14)?,
        disbursement_date: row.get(15)?,
        next_repayment_date: row.get(16)?,
        last_repayment_date: row.get(17)?,
        is_defaulted: row.get(18)?,
    })
}

// -- Repayments --

const REPAYMENT_COLS: &str =
    "id, loan_id, seq, principal, interest, amount, due_date, status, transaction_id, paid_at";

pub fn insert_repayment(conn: &Connection, repayment: &LoanRepayment) -> Result<()> {
    conn.execute(
        "INSERT INTO loan_repayments (id, loan_id, seq, principal, interest, amount, due_date,
                                      status, transaction_id, paid_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            repayment.id.to_string(),
            repayment.loan_id.to_string(),
            repayment.seq,
            repayment.principal.to_string(),
            repayment.interest.to_string(),
            repayment.amount.to_string(),
            repayment.due_date,
            repayment.status.as_str(),
            repayment.transaction_id,
            repayment.paid_at,
        ],
    )?;
    Ok(())
}

pub fn delete_repayments_for_loan(conn: &Connection, loan_id: Uuid) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM loan_repayments WHERE loan_id = ?1",
        [loan_id.to_string()],
    )?;
    Ok(deleted)
}

pub fn repayments_for_loan(conn: &Connection, loan_id: Uuid) -> Result<Vec<LoanRepayment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {REPAYMENT_COLS} FROM loan_repayments WHERE loan_id = ?1 ORDER BY seq"
    ))?;
    let rows = stmt
        .query_map([loan_id.to_string()], map_repayment)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn repayment_count(conn: &Connection, loan_id: Uuid) -> Result<u32> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM loan_repayments WHERE loan_id = ?1",
        [loan_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Oldest unpaid installment (due or overdue), the one a confirmed payment
/// settles next.
pub fn next_unpaid_repayment(conn: &Connection, loan_id: Uuid) -> Result<Option<LoanRepayment>> {
    let repayment = conn
        .query_row(
            &format!(
                "SELECT {REPAYMENT_COLS} FROM loan_repayments
                 WHERE loan_id = ?1 AND status IN ('due', 'overdue')
                 ORDER BY due_date, seq LIMIT 1"
            ),
            [loan_id.to_string()],
            map_repayment,
        )
        .optional()?;
    Ok(repayment)
}

pub fn mark_repayments_overdue(conn: &Connection, loan_id: Uuid, today: NaiveDate) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE loan_repayments SET status = 'overdue'
         WHERE loan_id = ?1 AND status = 'due' AND due_date < ?2",
        params![loan_id.to_string(), today],
    )?;
    Ok(changed)
}

pub fn overdue_repayment_count(conn: &Connection, loan_id: Uuid) -> Result<u32> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM loan_repayments WHERE loan_id = ?1 AND status = 'overdue'",
        [loan_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn mark_repayment_paid(
    conn: &Connection,
    id: Uuid,
    transaction_id: &str,
    paid_at: DateTime<Utc>,
) -> Result<()> {
    let changed = conn.execute(
        "UPDATE loan_repayments SET status = 'paid', transaction_id = ?2, paid_at = ?3
         WHERE id = ?1 AND status != 'paid'",
        params![id.to_string(), transaction_id, paid_at],
    )?;
    if changed == 0 {
        return Err(anyhow!("repayment {} not found or already paid", id));
    }
    Ok(())
}

fn map_repayment(row: &Row) -> rusqlite::Result<LoanRepayment> {
    Ok(LoanRepayment {
        id: uuid_col(row, 0)?,
        loan_id: uuid_col(row, 1)?,
        seq: row.get(2)?,
        principal: dec_col(row, 3)?,
        interest: dec_col(row, 4)?,
        amount: dec_col(row, 5)?,
        due_date: row.get(6)?,
        status: enum_col(row, 7, RepaymentStatus::parse)?,
        transaction_id: row.get(8)?,
        paid_at: row.get(9)?,
    })
}

// -- Guarantees --

const GUARANTEE_COLS: &str = "id, loan_id, guarantor_id, amount_guaranteed, status, created_at";

pub fn insert_guarantee(conn: &Connection, guarantee: &Guarantee) -> Result<()> {
    conn.execute(
        "INSERT INTO guarantees (id, loan_id, guarantor_id, amount_guaranteed, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            guarantee.id.to_string(),
            guarantee.loan_id.to_string(),
            guarantee.guarantor_id.to_string(),
            guarantee.amount_guaranteed.to_string(),
            guarantee.status.as_str(),
            guarantee.created_at,
        ],
    )?;
    Ok(())
}

pub fn guarantee_by_id(conn: &Connection, id: Uuid) -> Result<Option<Guarantee>> {
    let guarantee = conn
        .query_row(
            &format!("SELECT {GUARANTEE_COLS} FROM guarantees WHERE id = ?1"),
            [id.to_string()],
            map_guarantee,
        )
        .optional()?;
    Ok(guarantee)
}

pub fn guarantees_for_loan(conn: &Connection, loan_id: Uuid) -> Result<Vec<Guarantee>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {GUARANTEE_COLS} FROM guarantees WHERE loan_id = ?1 ORDER BY created_at"
    ))?;
    let rows = stmt
        .query_map([loan_id.to_string()], map_guarantee)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn guarantees_for_loan_with_status(
    conn: &Connection,
    loan_id: Uuid,
    status: GuaranteeStatus,
) -> Result<Vec<Guarantee>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {GUARANTEE_COLS} FROM guarantees
         WHERE loan_id = ?1 AND status = ?2 ORDER BY created_at"
    ))?;
    let rows = stmt
        .query_map(params![loan_id.to_string(), status.as_str()], map_guarantee)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn update_guarantee_status(conn: &Connection, id: Uuid, status: GuaranteeStatus) -> Result<()> {
    let changed = conn.execute(
        "UPDATE guarantees SET status = ?2 WHERE id = ?1",
        params![id.to_string(), status.as_str()],
    )?;
    if changed == 0 {
        return Err(anyhow!("guarantee {} not found", id));
    }
    Ok(())
}

fn map_guarantee(row: &Row) -> rusqlite::Result<Guarantee> {
    Ok(Guarantee {
        id: uuid_col(row, 0)?,
        loan_id: uuid_col(row, 1)?,
        guarantor_id: uuid_col(row, 2)?,
        amount_guaranteed: dec_col(row, 3)?,
        status: enum_col(row, 4, GuaranteeStatus::parse)?,
        created_at: row.get(5)?,
    })
}

// -- Approval logs --

pub fn insert_approval_log(conn: &Connection, log: &LoanApprovalLog) -> Result<()> {
    conn.execute(
        "INSERT INTO loan_approval_logs (id, loan_id, approver_id, action, comments, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            log.id.to_string(),
            log.loan_id.to_string(),
            log.approver_id.map(|a| a.to_string()),
            log.action.as_str(),
            log.comments,
            log.timestamp,
        ],
    )?;
    Ok(())
}

pub fn approval_logs_for_loan(conn: &Connection, loan_id: Uuid) -> Result<Vec<LoanApprovalLog>> {
    let mut stmt = conn.prepare(
        "SELECT id, loan_id, approver_id, action, comments, timestamp
         FROM loan_approval_logs WHERE loan_id = ?1 ORDER BY timestamp",
    )?;
    let rows = stmt
        .query_map([loan_id.to_string()], |row| {
            Ok(LoanApprovalLog {
                id: uuid_col(row, 0)?,
                loan_id: uuid_col(row, 1)?,
                approver_id: opt_uuid_col(row, 2)?,
                action: enum_col(row, 3, ApprovalAction::parse)?,
                comments: row.get(4)?,
                timestamp: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// -- Notifications --

pub fn insert_notification(conn: &Connection, notification: &Notification) -> Result<()> {
    conn.execute(
        "INSERT INTO notifications (id, user_id, title, message, category, related_entity, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            notification.id.to_string(),
            notification.user_id.to_string(),
            notification.title,
            notification.message,
            notification.category.as_str(),
            notification.related_entity,
            notification.created_at,
        ],
    )?;
    Ok(())
}

pub fn notifications_for_user(conn: &Connection, user_id: Uuid) -> Result<Vec<Notification>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, title, message, category, related_entity, created_at
         FROM notifications WHERE user_id = ?1 ORDER BY created_at DESC",
    )?;
    let rows = stmt
        .query_map([user_id.to_string()], |row| {
            Ok(Notification {
                id: uuid_col(row, 0)?,
                user_id: uuid_col(row, 1)?,
                title: row.get(2)?,
                message: row.get(3)?,
                category: enum_col(row, 4, NotificationCategory::parse)?,
                related_entity: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// -- Wallets --

pub fn institution_wallet_id() -> Uuid {
    // Seeded by migrations; the constant is a valid uuid by construction.
    INSTITUTION_WALLET_ID.parse().unwrap_or_default()
}

/// Fetch a member's wallet, creating an empty one on first use.
pub fn wallet_for_member(conn: &Connection, member_id: Uuid) -> Result<Wallet> {
    if let Some(wallet) = wallet_by_member(conn, member_id)? {
        return Ok(wallet);
    }
    let wallet = Wallet {
        id: Uuid::new_v4(),
        member_id: Some(member_id),
        balance: Decimal::ZERO,
    };
    conn.execute(
        "INSERT INTO wallets (id, member_id, balance) VALUES (?1, ?2, '0')",
        params![wallet.id.to_string(), member_id.to_string()],
    )?;
    Ok(wallet)
}

fn wallet_by_member(conn: &Connection, member_id: Uuid) -> Result<Option<Wallet>> {
    let wallet = conn
        .query_row(
            "SELECT id, member_id, balance FROM wallets WHERE member_id = ?1",
            [member_id.to_string()],
            map_wallet,
        )
        .optional()?;
    Ok(wallet)
}

pub fn wallet_by_id(conn: &Connection, id: Uuid) -> Result<Option<Wallet>> {
    let wallet = conn
        .query_row(
            "SELECT id, member_id, balance FROM wallets WHERE id = ?1",
            [id.to_string()],
            map_wallet,
        )
        .optional()?;
    Ok(wallet)
}

/// Credit a wallet: balance update and ledger entry in one call so a balance
/// never moves without a corresponding immutable transaction row.
pub fn credit_wallet(
    conn: &Connection,
    wallet_id: Uuid,
    kind: WalletTxKind,
    amount: Decimal,
    description: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let wallet =
        wallet_by_id(conn, wallet_id)?.ok_or_else(|| anyhow!("wallet {} not found", wallet_id))?;
    let new_balance = wallet.balance + amount;
    conn.execute(
        "UPDATE wallets SET balance = ?2 WHERE id = ?1",
        params![wallet_id.to_string(), new_balance.to_string()],
    )?;
    conn.execute(
        "INSERT INTO wallet_transactions (id, wallet_id, kind, amount, description, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            Uuid::new_v4().to_string(),
            wallet_id.to_string(),
            kind.as_str(),
            amount.to_string(),
            description,
            now,
        ],
    )?;
    Ok(())
}

pub fn wallet_transactions(conn: &Connection, wallet_id: Uuid) -> Result<Vec<WalletTransaction>> {
    let mut stmt = conn.prepare(
        "SELECT id, wallet_id, kind, amount, description, created_at
         FROM wallet_transactions WHERE wallet_id = ?1 ORDER BY created_at",
    )?;
    let rows = stmt
        .query_map([wallet_id.to_string()], |row| {
            Ok(WalletTransaction {
                id: uuid_col(row, 0)?,
                wallet_id: uuid_col(row, 1)?,
                kind: enum_col(row, 2, WalletTxKind::parse)?,
                amount: dec_col(row, 3)?,
                description: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn map_wallet(row: &Row) -> rusqlite::Result<Wallet> {
    Ok(Wallet {
        id: uuid_col(row, 0)?,
        member_id: opt_uuid_col(row, 1)?,
        balance: dec_col(row, 2)?,
    })
}

// -- Interest distributions --

pub fn insert_interest_distribution(
    conn: &Connection,
    distribution: &InterestDistribution,
) -> Result<()> {
    conn.execute(
        "INSERT INTO interest_distributions (id, repayment_id, member_id, is_institution_share,
                                             amount, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            distribution.id.to_string(),
            distribution.repayment_id.to_string(),
            distribution.member_id.map(|m| m.to_string()),
            distribution.is_institution_share,
            distribution.amount.to_string(),
            distribution.created_at,
        ],
    )?;
    Ok(())
}

pub fn distributions_for_repayment(
    conn: &Connection,
    repayment_id: Uuid,
) -> Result<Vec<InterestDistribution>> {
    let mut stmt = conn.prepare(
        "SELECT id, repayment_id, member_id, is_institution_share, amount, created_at
         FROM interest_distributions WHERE repayment_id = ?1 ORDER BY created_at",
    )?;
    let rows = stmt
        .query_map([repayment_id.to_string()], |row| {
            Ok(InterestDistribution {
                id: uuid_col(row, 0)?,
                repayment_id: uuid_col(row, 1)?,
                member_id: opt_uuid_col(row, 2)?,
                is_institution_share: row.get(3)?,
                amount: dec_col(row, 4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// -- Contributions --

pub fn insert_contribution(conn: &Connection, contribution: &Contribution) -> Result<()> {
    conn.execute(
        "INSERT INTO contributions (id, member_id, amount, date) VALUES (?1, ?2, ?3, ?4)",
        params![
            contribution.id.to_string(),
            contribution.member_id.to_string(),
            contribution.amount.to_string(),
            contribution.date,
        ],
    )?;
    Ok(())
}

pub fn contributions_for_member(conn: &Connection, member_id: Uuid) -> Result<Vec<Contribution>> {
    let mut stmt = conn.prepare(
        "SELECT id, member_id, amount, date FROM contributions
         WHERE member_id = ?1 ORDER BY date",
    )?;
    let rows = stmt
        .query_map([member_id.to_string()], |row| {
            Ok(Contribution {
                id: uuid_col(row, 0)?,
                member_id: uuid_col(row, 1)?,
                amount: dec_col(row, 2)?,
                date: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// -- Payment confirmations --

pub fn payment_confirmation_exists(conn: &Connection, transaction_id: &str) -> Result<bool> {
    let count: u32 = conn.query_row(
        "SELECT COUNT(*) FROM payment_confirmations WHERE transaction_id = ?1",
        [transaction_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn insert_payment_confirmation(
    conn: &Connection,
    transaction_id: &str,
    amount: Decimal,
    payer_reference: &str,
    received_at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO payment_confirmations (id, transaction_id, amount, payer_reference, received_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            Uuid::new_v4().to_string(),
            transaction_id,
            amount.to_string(),
            payer_reference,
            received_at,
        ],
    )?;
    Ok(())
}

// -- Read conveniences on Database --

impl Database {
    pub fn loan_by_loan_id(&self, loan_id: &str) -> Result<Option<Loan>> {
        self.with_conn(|conn| loan_by_loan_id(conn, loan_id))
    }

    pub fn repayments_for_loan(&self, loan_id: Uuid) -> Result<Vec<LoanRepayment>> {
        self.with_conn(|conn| repayments_for_loan(conn, loan_id))
    }

    pub fn notifications_for_user(&self, user_id: Uuid) -> Result<Vec<Notification>> {
        self.with_conn(|conn| notifications_for_user(conn, user_id))
    }

    pub fn approval_logs_for_loan(&self, loan_id: Uuid) -> Result<Vec<LoanApprovalLog>> {
        self.with_conn(|conn| approval_logs_for_loan(conn, loan_id))
    }
}
