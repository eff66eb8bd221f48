//! Natural-language time-expression extraction.
//!
//! `extract_time_phrase` pulls a recognized time phrase out of a free-text
//! query and returns the remaining text plus the `[start, end]` window (both
//! floating seconds since epoch) it denotes. The caller always supplies
//! `now` explicitly — this module never reads a global clock, which is what
//! makes it deterministically testable.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, TimeZone, Utc, Weekday};
use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    /// Byte range in the original string.
    start: usize,
    end: usize,
    class_rank: u8,
    window: (f64, f64),
}

/// Remove the recognized time phrase (if any) from `query`, returning the
/// cleaned text and the window it denoted.
pub fn extract_time_phrase(query: &str, now: f64) -> (String, Option<(f64, f64)>) {
    let now_dt = seconds_to_datetime(now);
    let mut candidates = Vec::new();

    collect_iso(query, &mut candidates);
    collect_regional(query, &mut candidates);
    collect_named_periods(query, now_dt, &mut candidates);
    collect_offsets(query, now_dt, &mut candidates);
    collect_seasons(query, now_dt, &mut candidates);
    collect_weekdays(query, now_dt, &mut candidates);
    collect_holidays(query, now_dt, &mut candidates);

    let best = candidates.into_iter().max_by(|a, b| {
        let len_a = a.end - a.start;
        let len_b = b.end - b.start;
        len_a
            .cmp(&len_b)
            .then_with(|| b.class_rank.cmp(&a.class_rank)) // lower rank (earlier class) wins ties
    });

    match best {
        Some(c) => {
            let mut remaining = String::with_capacity(query.len());
            remaining.push_str(query[..c.start].trim_end());
            remaining.push(' ');
            remaining.push_str(query[c.end..].trim_start());
            (remaining.trim().to_string(), Some(c.window))
        }
        None => (query.to_string(), None),
    }
}

fn seconds_to_datetime(seconds: f64) -> DateTime<Utc> {
    Utc.timestamp_opt((seconds) as i64, 0).single().unwrap_or_else(Utc::now)
}

fn datetime_to_seconds(dt: DateTime<Utc>) -> f64 {
    dt.timestamp() as f64
}

fn datetime_to_seconds_millis(dt: DateTime<Utc>) -> f64 {
    dt.timestamp_millis() as f64 / 1000.0
}

/// Inclusive day window. The end bound is `23:59:59.999`, not `23:59:59` —
/// a memory created in the day's final sub-second must still fall inside a
/// same-day window.
fn day_bounds(date: NaiveDate) -> (f64, f64) {
    let start = Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap());
    let end = Utc.from_utc_datetime(&date.and_hms_milli_opt(23, 59, 59, 999).unwrap());
    (datetime_to_seconds(start), datetime_to_seconds_millis(end))
}

static ISO_DATETIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}(T\d{2}:\d{2}:\d{2})?").unwrap());

fn collect_iso(query: &str, out: &mut Vec<Candidate>) {
    for m in ISO_DATETIME_RE.find_iter(query) {
        let text = m.as_str();
        let window = if let Some(dt) = NaiveDate::parse_from_str(&text[..10], "%Y-%m-%d")
            .ok()
            .map(day_bounds)
        {
            if text.len() > 10 {
                // has a time component
                let full = chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S").ok();
                full.map(|ndt| {
                    let secs = Utc.from_utc_datetime(&ndt).timestamp() as f64;
                    (secs, secs)
                })
                .unwrap_or(dt)
            } else {
                dt
            }
        } else {
            continue;
        };
        out.push(Candidate { start: m.start(), end: m.end(), class_rank: 1, window });
    }
}

static REGIONAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})[/.](\d{1,2})[/.](\d{4})\b").unwrap());

fn collect_regional(query: &str, out: &mut Vec<Candidate>) {
    for m in REGIONAL_RE.find_iter(query) {
        let caps = REGIONAL_RE.captures(m.as_str()).unwrap();
        let a: u32 = caps[1].parse().unwrap();
        let b: u32 = caps[2].parse().unwrap();
        let year: i32 = caps[3].parse().unwrap();
        let separator_is_dot = m.as_str().contains('.');
        // MM/DD/YYYY for slash, DD.MM.YYYY for dot, per spec.md 4.B class 2.
        let (month, day) = if separator_is_dot { (b, a) } else { (a, b) };
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            out.push(Candidate { start: m.start(), end: m.end(), class_rank: 2, window: day_bounds(date) });
        }
    }
}

fn monday_of_week(date: NaiveDate) -> NaiveDate {
    let offset = date.weekday().num_days_from_monday();
    date - ChronoDuration::days(offset as i64)
}

fn collect_named_periods(query: &str, now: DateTime<Utc>, out: &mut Vec<Candidate>) {
    let lower = query.to_lowercase();
    let today = now.date_naive();

    let mut push = |phrase: &str, window: (f64, f64)| {
        if let Some(pos) = lower.find(phrase) {
            out.push(Candidate { start: pos, end: pos + phrase.len(), class_rank: 3, window });
        }
    };

    push("today", day_bounds(today));
    push("yesterday", day_bounds(today - ChronoDuration::days(1)));

    let this_monday = monday_of_week(today);
    push("this week", (datetime_to_seconds(Utc.from_utc_datetime(&this_monday.and_hms_opt(0, 0, 0).unwrap())), datetime_to_seconds(now)));

    let last_monday = this_monday - ChronoDuration::days(7);
    let last_sunday = this_monday - ChronoDuration::days(1);
    push("last week", (day_bounds(last_monday).0, day_bounds(last_sunday).1));

    let month_start = NaiveDate::from_ymd_opt(today.year(), today.month(), 1).unwrap();
    push("this month", (day_bounds(month_start).0, datetime_to_seconds(now)));

    let (last_month_year, last_month) = if today.month() == 1 { (today.year() - 1, 12) } else { (today.year(), today.month() - 1) };
    let last_month_start = NaiveDate::from_ymd_opt(last_month_year, last_month, 1).unwrap();
    let last_month_end = month_start - ChronoDuration::days(1);
    push("last month", (day_bounds(last_month_start).0, day_bounds(last_month_end).1));

    let year_start = NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap();
    push("this year", (day_bounds(year_start).0, datetime_to_seconds(now)));

    let last_year_start = NaiveDate::from_ymd_opt(today.year() - 1, 1, 1).unwrap();
    let last_year_end = year_start - ChronoDuration::days(1);
    push("last year", (day_bounds(last_year_start).0, day_bounds(last_year_end).1));
}

static OFFSET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:(last|past)\s+(\d+)\s+(second|minute|hour|day|week|month|year)s?|(?:in the last\s+)?(\d+)\s+(second|minute|hour|day|week|month|year)s?\s+ago)\b").unwrap()
});

fn collect_offsets(query: &str, now: DateTime<Utc>, out: &mut Vec<Candidate>) {
    for m in OFFSET_RE.find_iter(query) {
        let caps = OFFSET_RE.captures(m.as_str()).unwrap();
        let (n, unit): (i64, &str) = if let Some(n) = caps.get(2) {
            (n.as_str().parse().unwrap(), caps.get(3).unwrap().as_str())
        } else {
            (caps.get(4).unwrap().as_str().parse().unwrap(), caps.get(5).unwrap().as_str())
        };
        let duration = unit_to_duration(n, unit);
        let start = now - duration;
        out.push(Candidate {
            start: m.start(),
            end: m.end(),
            class_rank: 4,
            window: (datetime_to_seconds(start), datetime_to_seconds(now)),
        });
    }
}

fn unit_to_duration(n: i64, unit: &str) -> ChronoDuration {
    match unit.to_lowercase().as_str() {
        "second" => ChronoDuration::seconds(n),
        "minute" => ChronoDuration::minutes(n),
        "hour" => ChronoDuration::hours(n),
        "day" => ChronoDuration::days(n),
        "week" => ChronoDuration::weeks(n),
        "month" => ChronoDuration::days(n * 30),
        "year" => ChronoDuration::days(n * 365),
        _ => ChronoDuration::zero(),
    }
}

fn collect_seasons(query: &str, now: DateTime<Utc>, out: &mut Vec<Candidate>) {
    let lower = query.to_lowercase();
    let year = now.year();
    let seasons: [(&str, u32, u32, u32, u32); 4] = [
        ("spring", 3, 1, 5, 31),
        ("summer", 6, 1, 8, 31),
        ("autumn", 9, 1, 11, 30),
        ("winter", 12, 1, 2, 28),
    ];
    for (name, sm, sd, em, ed) in seasons {
        if let Some(pos) = lower.find(name) {
            let (start_year, end_year) = if name == "winter" { (year, year + 1) } else { (year, year) };
            let start = NaiveDate::from_ymd_opt(start_year, sm, sd).unwrap();
            let end = NaiveDate::from_ymd_opt(end_year, em, ed).unwrap();
            out.push(Candidate { start: pos, end: pos + name.len(), class_rank: 5, window: (day_bounds(start).0, day_bounds(end).1) });
        }
        if name == "autumn" {
            if let Some(pos) = lower.find("fall") {
                let start = NaiveDate::from_ymd_opt(year, 9, 1).unwrap();
                let end = NaiveDate::from_ymd_opt(year, 11, 30).unwrap();
                out.push(Candidate { start: pos, end: pos + "fall".len(), class_rank: 5, window: (day_bounds(start).0, day_bounds(end).1) });
            }
        }
    }
}

static WEEKDAY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(last|this)\s+(monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b").unwrap()
});

fn collect_weekdays(query: &str, now: DateTime<Utc>, out: &mut Vec<Candidate>) {
    for m in WEEKDAY_RE.find_iter(query) {
        let caps = WEEKDAY_RE.captures(m.as_str()).unwrap();
        let which = caps[1].to_lowercase();
        let weekday = parse_weekday(&caps[2].to_lowercase());
        let today = now.date_naive();
        let today_idx = today.weekday().num_days_from_monday() as i64;
        let target_idx = weekday.num_days_from_monday() as i64;
        let mut delta = target_idx - today_idx;
        if which == "this" {
            if delta < 0 {
                delta += 7;
            }
        } else {
            // "last" always means strictly in the past
            if delta >= 0 {
                delta -= 7;
            }
        }
        let date = today + ChronoDuration::days(delta);
        out.push(Candidate { start: m.start(), end: m.end(), class_rank: 6, window: day_bounds(date) });
    }
}

fn parse_weekday(name: &str) -> Weekday {
    match name {
        "monday" => Weekday::Mon,
        "tuesday" => Weekday::Tue,
        "wednesday" => Weekday::Wed,
        "thursday" => Weekday::Thu,
        "friday" => Weekday::Fri,
        "saturday" => Weekday::Sat,
        _ => Weekday::Sun,
    }
}

static HOLIDAYS: Lazy<Vec<(&str, u32, u32)>> = Lazy::new(|| {
    vec![
        ("new year's eve", 12, 31),
        ("new year's day", 1, 1),
        ("new year", 1, 1),
        ("valentine's day", 2, 14),
        ("independence day", 7, 4),
        ("halloween", 10, 31),
        ("christmas", 12, 25),
    ]
});

fn collect_holidays(query: &str, now: DateTime<Utc>, out: &mut Vec<Candidate>) {
    let lower = query.to_lowercase();
    let year = now.year();
    for (name, month, day) in HOLIDAYS.iter() {
        if let Some(pos) = lower.find(name) {
            if let Some(date) = NaiveDate::from_ymd_opt(year, *month, *day) {
                out.push(Candidate { start: pos, end: pos + name.len(), class_rank: 7, window: day_bounds(date) });
            }
        }
    }
    if let Some(pos) = lower.find("thanksgiving") {
        let date = fourth_thursday_of_november(year);
        out.push(Candidate { start: pos, end: pos + "thanksgiving".len(), class_rank: 7, window: day_bounds(date) });
    }
}

fn fourth_thursday_of_november(year: i32) -> NaiveDate {
    let mut date = NaiveDate::from_ymd_opt(year, 11, 1).unwrap();
    let mut thursdays = 0;
    loop {
        if date.weekday() == Weekday::Thu {
            thursdays += 1;
            if thursdays == 4 {
                return date;
            }
        }
        date += ChronoDuration::days(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd_seconds(y: i32, m: u32, d: u32) -> f64 {
        datetime_to_seconds(Utc.from_utc_datetime(&NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(12, 0, 0).unwrap()))
    }

    #[test]
    fn extracts_iso_date() {
        let now = ymd_seconds(2026, 7, 27);
        let (rest, window) = extract_time_phrase("notes from 2026-07-01 meeting", now);
        assert_eq!(rest, "notes from meeting");
        let (start, end) = window.unwrap();
        assert!(start < end || start == end);
    }

    #[test]
    fn iso_wins_over_regional_for_same_string() {
        // 2024-06-15 should never be parsed as regional (DD.MM or MM/DD) garbage.
        let now = ymd_seconds(2026, 7, 27);
        let (_, window) = extract_time_phrase("2024-06-15", now);
        assert!(window.is_some());
    }

    #[test]
    fn this_week_runs_to_now_not_end_of_week() {
        let now = ymd_seconds(2026, 7, 27); // a Monday
        let (_, window) = extract_time_phrase("this week", now);
        let (_, end) = window.unwrap();
        assert_eq!(end, now);
    }

    #[test]
    fn no_phrase_returns_none() {
        let now = ymd_seconds(2026, 7, 27);
        let (rest, window) = extract_time_phrase("just a plain query", now);
        assert_eq!(rest, "just a plain query");
        assert!(window.is_none());
    }

    #[test]
    fn offsets_parse_relative_to_now() {
        let now = ymd_seconds(2026, 7, 27);
        let (_, window) = extract_time_phrase("3 days ago", now);
        let (start, end) = window.unwrap();
        assert_eq!(end, now);
        assert!((now - start - 3.0 * 86400.0).abs() < 1.0);
    }

    #[test]
    fn thanksgiving_is_fourth_thursday() {
        let date = fourth_thursday_of_november(2026);
        assert_eq!(date.weekday(), Weekday::Thu);
        assert_eq!(date.month(), 11);
    }
}
