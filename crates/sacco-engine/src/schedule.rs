//! Repayment schedule generation.
//!
//! Rate convention: `interest_rate` on a loan type is an annual percentage
//! (`10` means 10% p.a.); the monthly rate is `rate / 100 / 12`. Every
//! monetary intermediate is quantised to 2 dp before the next step, and the
//! final installment force-closes the outstanding principal so the loan
//! amortises to exactly zero.

use chrono::{Months, NaiveDate};
use rusqlite::Transaction;
use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;
use uuid::Uuid;

use sacco_db::queries;
use sacco_types::models::{Installment, Loan, LoanRepayment, LoanType, RepaymentStatus};
use sacco_types::money::round2;

use crate::{EngineError, EngineResult};

const MONTHS_PER_YEAR: Decimal = dec!(12);
const PERCENT: Decimal = dec!(100);

/// Fixed payment for one installment.
///
/// Simple-interest loans (single-month member loans) pay principal plus one
/// full year's rate; everything else uses the standard annuity formula,
/// reduced to a straight division at 0%.
pub fn monthly_payment(
    principal: Decimal,
    annual_rate_percent: Decimal,
    term_months: u32,
    simple_interest: bool,
) -> EngineResult<Decimal> {
    validate(principal, annual_rate_percent, term_months)?;

    if simple_interest {
        let interest = round2(principal * annual_rate_percent / PERCENT);
        return Ok(round2(principal + interest));
    }

    let monthly_rate = annual_rate_percent / PERCENT / MONTHS_PER_YEAR;
    if monthly_rate.is_zero() {
        return Ok(round2(principal / Decimal::from(term_months)));
    }

    let factor = (Decimal::ONE + monthly_rate).powi(term_months as i64);
    Ok(round2(
        principal * monthly_rate * factor / (factor - Decimal::ONE),
    ))
}

/// Build the full schedule for a disbursed loan. Due dates advance one
/// calendar month per installment from the disbursement date.
pub fn build_schedule(
    principal: Decimal,
    annual_rate_percent: Decimal,
    term_months: u32,
    disbursed_on: NaiveDate,
    simple_interest: bool,
) -> EngineResult<Vec<Installment>> {
    validate(principal, annual_rate_percent, term_months)?;

    if simple_interest {
        let interest = round2(principal * annual_rate_percent / PERCENT);
        let due_date = add_months(disbursed_on, 1)?;
        return Ok(vec![Installment {
            seq: 1,
            due_date,
            principal,
            interest,
            amount: round2(principal + interest),
        }]);
    }

    let monthly_rate = annual_rate_percent / PERCENT / MONTHS_PER_YEAR;
    let fixed_payment = monthly_payment(principal, annual_rate_percent, term_months, false)?;

    let mut installments = Vec::with_capacity(term_months as usize);
    let mut outstanding = principal;

    for i in 0..term_months {
        let interest = round2(outstanding * monthly_rate);
        let mut principal_part = round2(fixed_payment - interest);
        let mut amount = fixed_payment;

        // Last installment absorbs all rounding drift; never overpay the
        // remaining principal.
        if i == term_months - 1 || principal_part > outstanding {
            principal_part = outstanding;
            amount = round2(outstanding + interest);
        }

        outstanding = round2(outstanding - principal_part);

        installments.push(Installment {
            seq: i + 1,
            due_date: add_months(disbursed_on, i + 1)?,
            principal: principal_part,
            interest,
            amount,
        });
    }

    Ok(installments)
}

/// Persist the schedule for a loan, clearing any pre-existing rows first so
/// regeneration is idempotent, and set the loan's schedule summary fields
/// from the first installment.
pub(crate) fn persist(
    tx: &Transaction,
    loan: &Loan,
    loan_type: &LoanType,
    disbursed_on: NaiveDate,
) -> EngineResult<Vec<Installment>> {
    let principal = loan
        .amount_approved
        .ok_or_else(|| EngineError::Integrity(format!("loan {} has no approved amount", loan.loan_id)))?;
    let simple = loan.term_months == 1 && !loan_type.is_for_non_member;
    let installments = build_schedule(
        principal,
        loan_type.interest_rate,
        loan.term_months,
        disbursed_on,
        simple,
    )?;

    queries::delete_repayments_for_loan(tx, loan.id)?;
    for installment in &installments {
        queries::insert_repayment(
            tx,
            &LoanRepayment {
                id: Uuid::new_v4(),
                loan_id: loan.id,
                seq: installment.seq,
                principal: installment.principal,
                interest: installment.interest,
                amount: installment.amount,
                due_date: installment.due_date,
                status: RepaymentStatus::Due,
                transaction_id: None,
                paid_at: None,
            },
        )?;
    }

    let first = &installments[0];
    queries::set_loan_schedule_summary(tx, loan.id, first.due_date, first.amount)?;

    Ok(installments)
}

fn validate(principal: Decimal, annual_rate_percent: Decimal, term_months: u32) -> EngineResult<()> {
    if principal <= Decimal::ZERO {
        return Err(EngineError::Integrity(format!(
            "schedule requires a positive principal, got {principal}"
        )));
    }
    if annual_rate_percent < Decimal::ZERO {
        return Err(EngineError::Integrity(format!(
            "schedule requires a non-negative rate, got {annual_rate_percent}"
        )));
    }
    if term_months == 0 {
        return Err(EngineError::Integrity(
            "schedule requires at least one installment".into(),
        ));
    }
    Ok(())
}

fn add_months(date: NaiveDate, months: u32) -> EngineResult<NaiveDate> {
    date.checked_add_months(Months::new(months))
        .ok_or_else(|| EngineError::Integrity(format!("due date overflow from {date} +{months}mo")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn assert_amortises_to_zero(principal: Decimal, rate: Decimal, term: u32) {
        let schedule =
            build_schedule(principal, rate, term, date(2025, 1, 15), false).unwrap();
        assert_eq!(schedule.len(), term as usize);

        let principal_sum: Decimal = schedule.iter().map(|i| i.principal).sum();
        assert_eq!(principal_sum, principal, "residual at {rate}% over {term}mo");

        for installment in &schedule {
            assert_eq!(
                installment.amount,
                round2(installment.principal + installment.interest)
            );
        }
    }

    #[test]
    fn amortises_to_exactly_zero_across_terms_and_rates() {
        for term in [1u32, 6, 12, 24] {
            for rate in [dec!(0), dec!(5), dec!(10), dec!(14.5), dec!(24)] {
                assert_amortises_to_zero(dec!(250000.00), rate, term);
                assert_amortises_to_zero(dec!(999.99), rate, term);
            }
        }
    }

    #[test]
    fn zero_rate_is_a_straight_division() {
        let schedule = build_schedule(dec!(1200), dec!(0), 6, date(2025, 3, 1), false).unwrap();
        for installment in &schedule[..5] {
            assert_eq!(installment.amount, dec!(200));
            assert_eq!(installment.interest, dec!(0));
        }
        assert_eq!(schedule[5].principal, dec!(200));
    }

    #[test]
    fn zero_rate_rounding_lands_on_last_installment() {
        let schedule = build_schedule(dec!(1000), dec!(0), 6, date(2025, 3, 1), false).unwrap();
        // 1000 / 6 = 166.67 rounded; the last row closes the residual
        assert_eq!(schedule[0].amount, dec!(166.67));
        assert_eq!(schedule[5].principal, dec!(1000) - dec!(166.67) * dec!(5));
        let total: Decimal = schedule.iter().map(|i| i.principal).sum();
        assert_eq!(total, dec!(1000));
    }

    #[test]
    fn simple_interest_single_installment() {
        let schedule =
            build_schedule(dec!(10000), dec!(10), 1, date(2025, 1, 31), true).unwrap();
        assert_eq!(schedule.len(), 1);
        assert_eq!(schedule[0].interest, dec!(1000.00));
        assert_eq!(schedule[0].principal, dec!(10000));
        assert_eq!(schedule[0].amount, dec!(11000.00));
        // Jan 31 + 1 month clamps to Feb 28
        assert_eq!(schedule[0].due_date, date(2025, 2, 28));
    }

    #[test]
    fn twelve_month_ten_percent_schedule() {
        let schedule =
            build_schedule(dec!(250000), dec!(10), 12, date(2025, 6, 1), false).unwrap();
        let pmt = monthly_payment(dec!(250000), dec!(10), 12, false).unwrap();

        assert_eq!(schedule.len(), 12);
        // every row but the last pays the fixed annuity amount
        for installment in &schedule[..11] {
            assert_eq!(installment.amount, pmt);
        }
        // first month's interest: 250000 * 10% / 12 = 2083.33
        assert_eq!(schedule[0].interest, dec!(2083.33));
        // principal portions grow as interest declines
        for pair in schedule.windows(2) {
            assert!(pair[1].principal >= pair[0].principal);
        }
        let total: Decimal = schedule.iter().map(|i| i.principal).sum();
        assert_eq!(total, dec!(250000));
    }

    #[test]
    fn due_dates_advance_one_calendar_month() {
        let schedule = build_schedule(dec!(6000), dec!(12), 3, date(2025, 1, 15), false).unwrap();
        assert_eq!(schedule[0].due_date, date(2025, 2, 15));
        assert_eq!(schedule[1].due_date, date(2025, 3, 15));
        assert_eq!(schedule[2].due_date, date(2025, 4, 15));
    }

    #[test]
    fn rejects_degenerate_inputs() {
        assert!(build_schedule(dec!(0), dec!(10), 12, date(2025, 1, 1), false).is_err());
        assert!(build_schedule(dec!(-5), dec!(10), 12, date(2025, 1, 1), false).is_err());
        assert!(build_schedule(dec!(100), dec!(-1), 12, date(2025, 1, 1), false).is_err());
        assert!(build_schedule(dec!(100), dec!(10), 0, date(2025, 1, 1), false).is_err());
    }
}
