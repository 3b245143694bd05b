//! Calendar arithmetic for temporal breakouts.
//!
//! Temporal cells are ISO-8601 strings: `2024-03-15`, `2024-03-15T10:30:00`
//! or `10:30:00`. Weeks start on Sunday, and `day-of-week` numbers Sunday
//! as 1.

use rust_decimal::Decimal;

use super::CellValue;
use crate::model::types::TemporalUnit;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Civil {
    date: Option<(i64, u32, u32)>,
    time: Option<(u32, u32, u32)>,
}

impl Civil {
    fn parse(s: &str) -> Option<Civil> {
        let s = s.trim();
        match s.split_once(['T', ' ']) {
            Some((date, time)) => Some(Civil {
                date: Some(parse_date(date)?),
                time: Some(parse_time(time)?),
            }),
            None if s.contains(':') => Some(Civil {
                date: None,
                time: Some(parse_time(s)?),
            }),
            None => Some(Civil {
                date: Some(parse_date(s)?),
                time: None,
            }),
        }
    }

    fn format(&self) -> String {
        match (self.date, self.time) {
            (Some((y, m, d)), Some((h, mi, s))) => {
                format!("{y:04}-{m:02}-{d:02}T{h:02}:{mi:02}:{s:02}")
            }
            (Some((y, m, d)), None) => format!("{y:04}-{m:02}-{d:02}"),
            (None, Some((h, mi, s))) => format!("{h:02}:{mi:02}:{s:02}"),
            (None, None) => String::new(),
        }
    }
}

fn parse_date(s: &str) -> Option<(i64, u32, u32)> {
    let mut parts = s.splitn(3, '-');
    let y = parts.next()?.parse().ok()?;
    let m = parts.next()?.parse().ok()?;
    let d = parts.next()?.parse().ok()?;
    ((1..=12).contains(&m) && (1..=31).contains(&d)).then_some((y, m, d))
}

fn parse_time(s: &str) -> Option<(u32, u32, u32)> {
    // Offsets and fractional seconds are ignored.
    let s = s.split(['Z', '+']).next()?;
    let mut parts = s.splitn(3, ':');
    let h = parts.next()?.parse().ok()?;
    let mi = parts.next()?.parse().ok()?;
    let sec = match parts.next() {
        Some(rest) => rest.split('.').next()?.parse().ok()?,
        None => 0,
    };
    (h < 24 && mi < 60 && sec < 61).then_some((h, mi, sec))
}

/// Days since 1970-01-01 in the proleptic Gregorian calendar.
fn days_from_civil(y: i64, m: u32, d: u32) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let m = i64::from(m);
    let doy = (153 * (if m > 2 { m - 3 } else { m + 9 }) + 2) / 5 + i64::from(d) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let y = yoe + era * 400 + i64::from(m <= 2);
    (y, m, d)
}

/// 0 for Sunday through 6 for Saturday.
fn weekday(days: i64) -> i64 {
    // 1970-01-01 was a Thursday
    (days + 4).rem_euclid(7)
}

/// Bucket a temporal cell by `unit`.
///
/// Truncating units yield a temporal cell; extraction units yield a
/// number. Cells that cannot be read as temporal values, or that lack the
/// date or time part a unit needs, become null.
pub fn bucket(value: &CellValue, unit: TemporalUnit) -> CellValue {
    let raw = match value {
        CellValue::Temporal(s) | CellValue::String(s) => s,
        _ => return CellValue::Null,
    };
    Civil::parse(raw)
        .and_then(|civil| apply(civil, unit))
        .unwrap_or(CellValue::Null)
}

fn apply(civil: Civil, unit: TemporalUnit) -> Option<CellValue> {
    use TemporalUnit as U;

    let number = |n: i64| Some(CellValue::Number(Decimal::from(n)));
    let date_only = |(y, m, d): (i64, u32, u32)| {
        Some(CellValue::Temporal(
            Civil {
                date: Some((y, m, d)),
                time: None,
            }
            .format(),
        ))
    };

    match unit {
        U::Minute | U::Hour => {
            let (h, mi, _) = civil.time?;
            let time = if unit == U::Minute { (h, mi, 0) } else { (h, 0, 0) };
            Some(CellValue::Temporal(
                Civil {
                    date: civil.date,
                    time: Some(time),
                }
                .format(),
            ))
        }
        U::Day => date_only(civil.date?),
        U::Week => {
            let (y, m, d) = civil.date?;
            let days = days_from_civil(y, m, d);
            date_only(civil_from_days(days - weekday(days)))
        }
        U::Month => {
            let (y, m, _) = civil.date?;
            date_only((y, m, 1))
        }
        U::Quarter => {
            let (y, m, _) = civil.date?;
            date_only((y, (m - 1) / 3 * 3 + 1, 1))
        }
        U::Year => {
            let (y, _, _) = civil.date?;
            date_only((y, 1, 1))
        }
        U::MinuteOfHour => number(i64::from(civil.time?.1)),
        U::HourOfDay => number(i64::from(civil.time?.0)),
        U::DayOfWeek => {
            let (y, m, d) = civil.date?;
            number(weekday(days_from_civil(y, m, d)) + 1)
        }
        U::DayOfMonth => number(i64::from(civil.date?.2)),
        U::DayOfYear => {
            let (y, m, d) = civil.date?;
            number(days_from_civil(y, m, d) - days_from_civil(y, 1, 1) + 1)
        }
        U::WeekOfYear => {
            let (y, m, d) = civil.date?;
            let jan1 = days_from_civil(y, 1, 1);
            let day_of_year = days_from_civil(y, m, d) - jan1;
            number((day_of_year + weekday(jan1)) / 7 + 1)
        }
        U::MonthOfYear => number(i64::from(civil.date?.1)),
        U::QuarterOfYear => number(i64::from((civil.date?.1 - 1) / 3 + 1)),
    }
}
