//! Next-run computation for job intervals.
//!
//! Custom intervals are five-field cron expressions: `MIN HOUR DOM MON DOW`.
//! Day-of-week accepts 0-7 (0 and 7 are Sunday) or names. With both day
//! fields restricted, either one matching is enough. Everything is evaluated
//! in UTC.

use std::str::FromStr;

use chrono::{DateTime, Duration, Months, Utc};
use cron::Schedule;
use reportd_core::Interval;

const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// When a job with `interval` should next run, seen from `now`.
pub fn compute_next_run(interval: &Interval, now: DateTime<Utc>) -> DateTime<Utc> {
    match interval {
        Interval::Daily => now + Duration::hours(24),
        Interval::Weekly => now + Duration::days(7),
        Interval::Monthly => now
            .checked_add_months(Months::new(1))
            .unwrap_or_else(|| now + Duration::days(30)),
        Interval::Custom(expr) => next_run_from_cron(expr, now).unwrap_or_else(|| {
            tracing::warn!("Invalid cron expression '{expr}', retrying in 1h");
            now + Duration::hours(1)
        }),
        Interval::Unknown => now + Duration::hours(1),
    }
}

/// Earliest instant strictly after `after` matching `expression`.
///
/// When both day-of-month and day-of-week are restricted, a day matching
/// either one fires, as in classic cron.
pub fn next_run_from_cron(expression: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let parts: Vec<&str> = expression.split_whitespace().collect();
    if parts.len() != 5 {
        return None;
    }
    let (minute, hour, dom, month) = (parts[0], parts[1], parts[2], parts[3]);
    let dow = normalize_weekdays(parts[4])?;
    let dom_any = is_wildcard(dom);

    if dom_any || dow == "*" {
        let dom = if dom_any { "*" } else { dom };
        return parse(minute, hour, dom, month, &dow)?.after(&after).next();
    }
    let by_dom = parse(minute, hour, dom, month, "*")?;
    let by_dow = parse(minute, hour, "*", month, &dow)?;
    [by_dom, by_dow]
        .iter()
        .filter_map(|schedule| schedule.after(&after).next())
        .min()
}

fn is_wildcard(field: &str) -> bool {
    field == "*" || field == "?"
}

fn parse(minute: &str, hour: &str, dom: &str, month: &str, dow: &str) -> Option<Schedule> {
    // The cron crate wants a leading seconds field.
    Schedule::from_str(&format!("0 {minute} {hour} {dom} {month} {dow}")).ok()
}

/// Rewrite numeric day-of-week values as names. Fields that already use
/// names are passed through.
fn normalize_weekdays(field: &str) -> Option<String> {
    if is_wildcard(field) {
        return Some("*".into());
    }
    if field.chars().any(|c| c.is_ascii_alphabetic()) {
        return Some(field.to_string());
    }

    let mut days = [false; 7];
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((r, s)) => (r, s.parse::<usize>().ok().filter(|s| *s > 0)?),
            None => (item, 1),
        };
        let (start, end) = if range == "*" {
            (0, 6)
        } else if let Some((a, b)) = range.split_once('-') {
            (weekday(a)?, weekday(b)?)
        } else {
            let day = weekday(range)?;
            // `N/step` runs from N to the end of the week.
            if step > 1 { (day, 7) } else { (day, day) }
        };
        if start > end {
            return None;
        }
        for day in (start..=end).step_by(step) {
            days[day % 7] = true;
        }
    }

    let names: Vec<&str> = DAY_NAMES
        .iter()
        .zip(days)
        .filter(|(_, on)| *on)
        .map(|(name, _)| *name)
        .collect();
    if names.is_empty() {
        None
    } else {
        Some(names.join(","))
    }
}

fn weekday(raw: &str) -> Option<usize> {
    raw.trim().parse::<usize>().ok().filter(|d| *d <= 7)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Weekday};

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_fixed_intervals() {
        let now = at(2026, 10, 16, 9, 17);
        assert_eq!(compute_next_run(&Interval::Daily, now), now + Duration::hours(24));
        assert_eq!(compute_next_run(&Interval::Weekly, now), now + Duration::hours(168));
        assert_eq!(compute_next_run(&Interval::Unknown, now), now + Duration::hours(1));
    }

    #[test]
    fn test_monthly_clamps_day() {
        assert_eq!(
            compute_next_run(&Interval::Monthly, at(2026, 1, 31, 8, 0)),
            at(2026, 2, 28, 8, 0)
        );
        assert_eq!(
            compute_next_run(&Interval::Monthly, at(2026, 3, 15, 8, 0)),
            at(2026, 4, 15, 8, 0)
        );
    }

    #[test]
    fn test_every_hour() {
        let next = next_run_from_cron("0 * * * *", at(2026, 2, 22, 10, 30)).unwrap();
        assert_eq!(next, at(2026, 2, 22, 11, 0));
    }

    #[test]
    fn test_strictly_after_now() {
        let now = at(2026, 2, 22, 8, 0);
        let next = next_run_from_cron("0 8 * * *", now).unwrap();
        assert_eq!(next, at(2026, 2, 23, 8, 0));
    }

    #[test]
    fn test_every_15_minutes() {
        let next = next_run_from_cron("*/15 * * * *", at(2026, 2, 22, 10, 2)).unwrap();
        assert_eq!(next.minute(), 15);
    }

    #[test]
    fn test_weekday_numbers() {
        // 2026-10-16 is a Friday.
        let now = at(2026, 10, 16, 12, 0);
        let monday = next_run_from_cron("0 8 * * 1", now).unwrap();
        assert_eq!(monday, at(2026, 10, 19, 8, 0));
        assert_eq!(monday.weekday(), Weekday::Mon);

        let sunday = next_run_from_cron("30 6 * * 0", now).unwrap();
        assert_eq!(sunday, at(2026, 10, 18, 6, 30));
        assert_eq!(next_run_from_cron("30 6 * * 7", now), Some(sunday));
        assert_eq!(next_run_from_cron("30 6 * * SUN", now), Some(sunday));

        let workday = next_run_from_cron("0 9 * * 1-5", at(2026, 10, 17, 12, 0)).unwrap();
        assert_eq!(workday.weekday(), Weekday::Mon);
    }

    #[test]
    fn test_day_of_month_or_day_of_week() {
        // Friday: the next Monday comes before the 1st.
        let next = next_run_from_cron("0 9 1 * 1", at(2026, 10, 16, 12, 0)).unwrap();
        assert_eq!(next, at(2026, 10, 19, 9, 0));

        // Tuesday 27th: Sunday the 1st comes before Monday the 2nd.
        let next = next_run_from_cron("0 9 1 * 1", at(2026, 10, 27, 12, 0)).unwrap();
        assert_eq!(next, at(2026, 11, 1, 9, 0));

        // A wildcard on either side keeps plain matching.
        let next = next_run_from_cron("0 9 * * 1", at(2026, 10, 27, 12, 0)).unwrap();
        assert_eq!(next, at(2026, 11, 2, 9, 0));
        let next = next_run_from_cron("0 9 15 * ?", at(2026, 10, 16, 12, 0)).unwrap();
        assert_eq!(next, at(2026, 11, 15, 9, 0));

        assert!(next_run_from_cron("0 9 32 * 1", at(2026, 10, 16, 12, 0)).is_none());
    }

    #[test]
    fn test_normalize_weekdays() {
        assert_eq!(normalize_weekdays("*").as_deref(), Some("*"));
        assert_eq!(normalize_weekdays("0,7").as_deref(), Some("SUN"));
        assert_eq!(normalize_weekdays("5-7").as_deref(), Some("SUN,FRI,SAT"));
        assert_eq!(normalize_weekdays("*/2").as_deref(), Some("SUN,TUE,THU,SAT"));
        assert_eq!(normalize_weekdays("1/3").as_deref(), Some("SUN,MON,THU"));
        assert_eq!(normalize_weekdays("MON-FRI").as_deref(), Some("MON-FRI"));
        assert!(normalize_weekdays("8").is_none());
        assert!(normalize_weekdays("5-1").is_none());
    }

    #[test]
    fn test_invalid_expression_falls_back_to_an_hour() {
        let now = at(2026, 10, 16, 9, 0);
        for expr in ["", "bad", "61 * * * *", "* * *"] {
            let interval = Interval::Custom(expr.into());
            assert_eq!(compute_next_run(&interval, now), now + Duration::hours(1));
        }
        assert!(next_run_from_cron("bad", now).is_none());
    }

    #[test]
    fn test_custom_matches_next_occurrence() {
        let now = at(2026, 10, 16, 9, 0);
        let next = compute_next_run(&Interval::Custom("15 14 1 * *".into()), now);
        assert_eq!(next, at(2026, 11, 1, 14, 15));
        assert!(next > now);
        assert_eq!(next.hour(), 14);
    }
}
