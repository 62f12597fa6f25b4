// src/payroll_breakdown.rs
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

pub const DEFAULT_WEEKS: u32 = 4;
pub const MIN_WEEKS: u32 = 1;
pub const MAX_WEEKS: u32 = 6;
pub const FALLBACK_DAYS_IN_MONTH: u32 = 30;

// YYYY-MM, optionally followed by a day part which is ignored.
static PERIOD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d{4})-(\d{1,2})(?:-\d{1,2})?\s*$").expect("valid period regex"));

/// Weekly payment schedule derived from a monthly net amount.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyBreakdown {
    pub weeks: Vec<Decimal>,
    pub weeks_count: u32,
    pub weekly_base: Decimal,
    pub days_in_month: u32,
    pub applied_advance: Decimal,
    pub total_after_advance: Decimal,
}

/// Rounds to cents, half away from zero. The result always carries two
/// decimal places.
pub fn round2(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded
}

/// Absent request means the default of four weeks; anything else is clamped to 1..=6.
pub fn clamp_weeks(requested: Option<i64>) -> u32 {
    match requested {
        None => DEFAULT_WEEKS,
        Some(n) => n.clamp(MIN_WEEKS as i64, MAX_WEEKS as i64) as u32,
    }
}

/// Calendar length of the month named by a `YYYY-MM` period key, or 30 when
/// the key does not name a real month.
pub fn days_in_month(period: &str) -> u32 {
    parse_period(period)
        .and_then(|(year, month)| {
            let first = NaiveDate::from_ymd_opt(year, month, 1)?;
            let next = if month == 12 {
                NaiveDate::from_ymd_opt(year + 1, 1, 1)?
            } else {
                NaiveDate::from_ymd_opt(year, month + 1, 1)?
            };
            Some((next - first).num_days() as u32)
        })
        .unwrap_or(FALLBACK_DAYS_IN_MONTH)
}

fn parse_period(period: &str) -> Option<(i32, u32)> {
    let caps = PERIOD_RE.captures(period)?;
    let year = caps.get(1)?.as_str().parse::<i32>().ok()?;
    let month = caps.get(2)?.as_str().parse::<u32>().ok()?;
    Some((year, month))
}

/// Splits `monthly_net` into pro-rated weekly installments
/// (`monthly_net / days_in_month * 7`, rounded to cents). A requested advance
/// is taken from week 1 only and never exceeds week 1's installment.
pub fn compute_weekly_breakdown(
    period: &str,
    monthly_net: Decimal,
    advance_amount: Decimal,
    advance_requested: bool,
    weeks_requested: Option<i64>,
) -> WeeklyBreakdown {
    let weeks_count = clamp_weeks(weeks_requested);
    let days = days_in_month(period);

    let weekly_base = round2(monthly_net / Decimal::from(days) * Decimal::from(7));
    let mut weeks = vec![weekly_base; weeks_count as usize];

    let advance_total = if advance_requested {
        advance_amount.max(Decimal::ZERO)
    } else {
        Decimal::ZERO
    };
    // A negative week 1 has nothing to take the advance from.
    let applied_advance = weeks[0].min(advance_total).max(Decimal::ZERO);
    weeks[0] = round2(weeks[0] - applied_advance);

    // Saturates instead of overflowing for nets near the representable limit.
    let total_after_advance = round2(
        weeks
            .iter()
            .fold(Decimal::ZERO, |total, week| total.saturating_add(*week)),
    );

    WeeklyBreakdown {
        weeks,
        weeks_count,
        weekly_base,
        days_in_month: days,
        applied_advance,
        total_after_advance,
    }
}
