//! Free-form capture text parsing.
//!
//! Each field type is matched against the original text: the first date token,
//! the first priority marker and every tag. The description is the original
//! text with all matched spans cut out. A span claimed by two categories counts
//! for both.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::ops::Range;

static DATE_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:next\s+\w+|today|tomorrow|monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b|\b\d{1,2}/\d{1,2}\b",
    )
    .expect("valid date token regex")
});

static PRIORITY_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)!(high|medium|low)\b").expect("valid priority token regex"));

static TAG_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#(\w[\w-]*)").expect("valid tag token regex"));

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CapturePriority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuickCapture {
    pub description: String,
    /// The date token as written, e.g. `"tomorrow"` or `"12/3"`.
    pub date: Option<String>,
    pub priority: Option<CapturePriority>,
    pub tags: Vec<String>,
}

pub fn parse(text: &str) -> QuickCapture {
    let mut consumed: Vec<Range<usize>> = Vec::new();

    let date = DATE_TOKEN.find(text).map(|found| {
        consumed.push(found.range());
        found.as_str().to_string()
    });

    let priority = PRIORITY_TOKEN.captures(text).and_then(|captures| {
        consumed.push(captures.get(0)?.range());
        parse_priority(captures.get(1)?.as_str())
    });

    let mut tags = Vec::new();
    for captures in TAG_TOKEN.captures_iter(text) {
        let (Some(token), Some(label)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        consumed.push(token.range());
        tags.push(label.as_str().to_lowercase());
    }

    QuickCapture {
        description: strip_ranges(text, consumed)
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" "),
        date,
        priority,
        tags,
    }
}

/// Copies `text` without the given byte ranges. Overlapping or touching
/// ranges are merged first.
fn strip_ranges(text: &str, mut ranges: Vec<Range<usize>>) -> String {
    ranges.sort_by_key(|range| range.start);
    let mut kept = String::with_capacity(text.len());
    let mut cursor = 0;
    for range in ranges {
        if range.start > cursor {
            kept.push_str(&text[cursor..range.start]);
        }
        cursor = cursor.max(range.end);
    }
    kept.push_str(&text[cursor..]);
    kept
}

/// Turns a date token produced by [`parse`] into a calendar date relative to
/// `today`.
///
/// A bare weekday is its next occurrence after today, `next <weekday>` is one
/// week after that. `D/M` lands in the current year unless it already passed.
pub fn resolve_date_token(token: &str, today: NaiveDate) -> Option<NaiveDate> {
    let normalized = token
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    match normalized.as_str() {
        "today" => return Some(today),
        "tomorrow" => return today.succ_opt(),
        "next week" => return today.checked_add_signed(Duration::days(7)),
        "next month" => {
            let (year, month) = if today.month() == 12 {
                (today.year() + 1, 1)
            } else {
                (today.year(), today.month() + 1)
            };
            return NaiveDate::from_ymd_opt(year, month, 1);
        }
        _ => {}
    }

    if let Some(rest) = normalized.strip_prefix("next ") {
        let weekday = parse_weekday(rest)?;
        return next_weekday(today, weekday).checked_add_signed(Duration::days(7));
    }
    if let Some(weekday) = parse_weekday(&normalized) {
        return Some(next_weekday(today, weekday));
    }

    let (day, month) = normalized.split_once('/')?;
    let day = day.parse::<u32>().ok()?;
    let month = month.parse::<u32>().ok()?;
    let this_year = NaiveDate::from_ymd_opt(today.year(), month, day);
    match this_year {
        Some(date) if date >= today => Some(date),
        _ => NaiveDate::from_ymd_opt(today.year() + 1, month, day),
    }
}

pub fn parse_priority(value: &str) -> Option<CapturePriority> {
    match value.trim().to_ascii_lowercase().as_str() {
        "high" => Some(CapturePriority::High),
        "medium" => Some(CapturePriority::Medium),
        "low" => Some(CapturePriority::Low),
        _ => None,
    }
}

fn next_weekday(today: NaiveDate, weekday: Weekday) -> NaiveDate {
    let current = today.weekday().num_days_from_monday() as i64;
    let target = weekday.num_days_from_monday() as i64;
    let mut delta = (target - current).rem_euclid(7);
    if delta == 0 {
        delta = 7;
    }
    today + Duration::days(delta)
}

fn parse_weekday(value: &str) -> Option<Weekday> {
    match value {
        "monday" => Some(Weekday::Mon),
        "tuesday" => Some(Weekday::Tue),
        "wednesday" => Some(Weekday::Wed),
        "thursday" => Some(Weekday::Thu),
        "friday" => Some(Weekday::Fri),
        "saturday" => Some(Weekday::Sat),
        "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}
