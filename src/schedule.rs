//! Flat-interest amortization and payment schedule generation.
//!
//! Every term of a plan carries the same amount:
//! `monthly = (price - down_payment) * (1 + rate / 100) / term_months`,
//! rounded half-up to two decimal places. Term `i` falls due `i` calendar
//! months after the start month, on the configured billing day.

use bigdecimal::{BigDecimal, RoundingMode};
use chrono::{Datelike, Months, NaiveDate};
use serde::Serialize;

use crate::errors::AppError;

/// Money values are stored with two decimal places.
pub const MONEY_SCALE: i64 = 2;

/// Financed principal and per-term payment of a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Amortization {
    pub total_amount: BigDecimal,
    pub monthly_payment: BigDecimal,
}

/// One row of a generated payment schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledTerm {
    pub term_number: i32,
    pub due_date: NaiveDate,
    pub amount: BigDecimal,
    pub is_paid: bool,
}

fn ensure_positive_term(term_months: i32) -> Result<(), AppError> {
    if term_months <= 0 {
        return Err(AppError::BadRequest(format!(
            "term_months must be greater than zero (got {})",
            term_months
        )));
    }
    Ok(())
}

fn ensure_due_day(due_day: i32) -> Result<u32, AppError> {
    if !(1..=31).contains(&due_day) {
        return Err(AppError::BadRequest(format!(
            "due day must be between 1 and 31 (got {})",
            due_day
        )));
    }
    Ok(due_day as u32)
}

/// Rounds a money amount half-up to two decimal places.
pub fn round_money(value: &BigDecimal) -> BigDecimal {
    value.with_scale_round(MONEY_SCALE, RoundingMode::HalfUp)
}

/// Computes financed principal and flat monthly payment.
///
/// A down payment larger than the price yields a negative principal; that is
/// left for the caller to reject.
pub fn amortize(
    product_price: &BigDecimal,
    down_payment: &BigDecimal,
    interest_rate: &BigDecimal,
    term_months: i32,
) -> Result<Amortization, AppError> {
    ensure_positive_term(term_months)?;

    let total_amount = product_price - down_payment;
    let interest_factor = BigDecimal::from(1) + interest_rate / BigDecimal::from(100);
    let monthly_payment =
        round_money(&(&total_amount * interest_factor / BigDecimal::from(term_months)));

    Ok(Amortization {
        total_amount: round_money(&total_amount),
        monthly_payment,
    })
}

fn last_day_of_month(year: i32, month: u32) -> Option<u32> {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    first_of_next.pred_opt().map(|d| d.day())
}

/// Due date of term `term_number` (1-indexed).
///
/// Days past the end of the target month clamp to its last day, so a plan
/// billed on the 31st is due on Feb 28 (or 29) in February.
pub fn due_date_for_term(
    start_date: NaiveDate,
    term_number: u32,
    due_day: i32,
) -> Result<NaiveDate, AppError> {
    let due_day = ensure_due_day(due_day)?;

    let month_start = start_date
        .with_day(1)
        .and_then(|d| d.checked_add_months(Months::new(term_number)))
        .ok_or_else(|| AppError::BadRequest("Schedule extends past supported dates".to_string()))?;

    let last_day = last_day_of_month(month_start.year(), month_start.month())
        .ok_or_else(|| AppError::BadRequest("Schedule extends past supported dates".to_string()))?;

    month_start
        .with_day(due_day.min(last_day))
        .ok_or_else(|| AppError::InternalError(format!("Invalid due day {}", due_day)))
}

/// Builds the full schedule: `term_months` rows of `monthly_payment`, unpaid.
pub fn generate_schedule(
    start_date: NaiveDate,
    due_day: i32,
    term_months: i32,
    monthly_payment: &BigDecimal,
) -> Result<Vec<ScheduledTerm>, AppError> {
    ensure_positive_term(term_months)?;
    ensure_due_day(due_day)?;

    (1..=term_months)
        .map(|term| {
            Ok(ScheduledTerm {
                term_number: term,
                due_date: due_date_for_term(start_date, term as u32, due_day)?,
                amount: monthly_payment.clone(),
                is_paid: false,
            })
        })
        .collect()
}
