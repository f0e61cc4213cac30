// Schedule Calculator - next contribution / payout occurrence
//
// Anchors:
// - weekly/biweekly: day_of_week (0 = Sunday .. 6 = Saturday)
// - monthly/quarterly/yearly: day_of_month (1..=31), clamped to the month length
// - no anchor: fixed offset from `now`
//
// The time of day of `now` is carried over to the computed occurrence.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Utc};
use serde::Deserialize;

use crate::ledger::models::Frequency;

/// What to do when `now` already falls on the anchor day.
///
/// Chosen once in configuration and applied to every anchored computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SameDayPolicy {
    /// Return `now` itself
    SameDay,
    /// Skip to the following period
    #[default]
    NextPeriod,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScheduleCalculator {
    same_day: SameDayPolicy,
}

impl ScheduleCalculator {
    pub fn new(same_day: SameDayPolicy) -> Self {
        Self { same_day }
    }

    pub fn same_day_policy(&self) -> SameDayPolicy {
        self.same_day
    }

    /// Next occurrence for `frequency` relative to `now`.
    ///
    /// Out-of-range anchors are ignored and the unanchored offset is used.
    pub fn next_occurrence(
        &self,
        frequency: Frequency,
        day_of_week: Option<u32>,
        day_of_month: Option<u32>,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        match frequency {
            Frequency::Daily => now + Duration::days(1),
            Frequency::Weekly | Frequency::Biweekly => {
                let period = if frequency == Frequency::Weekly { 7 } else { 14 };
                match day_of_week.filter(|d| *d <= 6) {
                    Some(dow) => self.next_weekday(dow, period, now),
                    None => now + Duration::days(period),
                }
            }
            Frequency::Monthly | Frequency::Quarterly | Frequency::Yearly => {
                let step = match frequency {
                    Frequency::Monthly => 1,
                    Frequency::Quarterly => 3,
                    _ => 12,
                };
                match day_of_month.filter(|d| (1..=31).contains(d)) {
                    Some(dom) => self.next_day_of_month(dom, step, now),
                    None => add_months(now, step),
                }
            }
        }
    }

    fn next_weekday(&self, day_of_week: u32, period: i64, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = i64::from(now.weekday().num_days_from_sunday());
        let offset = (i64::from(day_of_week) - today + period) % period;

        if offset == 0 {
            return match self.same_day {
                SameDayPolicy::SameDay => now,
                SameDayPolicy::NextPeriod => now + Duration::days(period),
            };
        }
        now + Duration::days(offset)
    }

    fn next_day_of_month(&self, day_of_month: u32, step: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive();
        let candidate = clamped_date(today.year(), today.month(), day_of_month);

        if candidate > today {
            return at_time_of(candidate, now);
        }
        if candidate == today && self.same_day == SameDayPolicy::SameDay {
            return now;
        }

        let first = NaiveDate::from_ymd_opt(today.year(), today.month(), 1).unwrap_or(today);
        let rolled = first.checked_add_months(Months::new(step)).unwrap_or(first);
        at_time_of(clamped_date(rolled.year(), rolled.month(), day_of_month), now)
    }
}

/// Number of days in the given month
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

fn clamped_date(year: i32, month: u32, day: u32) -> NaiveDate {
    let day = day.min(days_in_month(year, month)).max(1);
    NaiveDate::from_ymd_opt(year, month, day)
        .or_else(|| NaiveDate::from_ymd_opt(year, month, 1))
        .unwrap_or_default()
}

fn at_time_of(date: NaiveDate, now: DateTime<Utc>) -> DateTime<Utc> {
    date.and_time(now.time()).and_utc()
}

fn add_months(now: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    now.checked_add_months(Months::new(months)).unwrap_or(now)
}
