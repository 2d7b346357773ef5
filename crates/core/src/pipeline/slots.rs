//! Deterministic slot selection
//!
//! Candidate starts are aligned to the granularity. The earliest mutually
//! free start wins; equal starts prefer the window the proposer ranked first.
//! Picked slots never overlap each other.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use mailpilot_domain::TimeWindow;

/// Slot search knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPolicy {
    pub granularity: Duration,
    pub max_alternatives: usize,
    pub alternative_search_days: u32,
    pub business_start_hour: u32,
    pub business_end_hour: u32,
}

/// Up to `limit` free, non-overlapping slots of `duration` inside `windows`
/// (given in preference order), none starting before `not_before`.
pub fn select_slots(
    windows: &[TimeWindow],
    busy: &[TimeWindow],
    duration: Duration,
    granularity: Duration,
    not_before: DateTime<Utc>,
    limit: usize,
) -> Vec<TimeWindow> {
    if limit == 0 || duration <= Duration::zero() || granularity <= Duration::zero() {
        return Vec::new();
    }
    let busy = merge_intervals(busy);

    let mut candidates: Vec<(DateTime<Utc>, usize)> = Vec::new();
    for (rank, window) in windows.iter().enumerate() {
        let mut start = align_up(window.start.max(not_before), granularity);
        let mut found = 0;
        while start + duration <= window.end && found < limit {
            let slot = TimeWindow::new(start, start + duration);
            match busy.iter().find(|interval| interval.overlaps(&slot)) {
                Some(interval) => start = align_up(interval.end, granularity),
                None => {
                    candidates.push((start, rank));
                    found += 1;
                    start = align_up(start + duration, granularity);
                }
            }
        }
    }

    candidates.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut picked: Vec<TimeWindow> = Vec::new();
    for (start, _) in candidates {
        let slot = TimeWindow::new(start, start + duration);
        if picked.iter().any(|existing| existing.overlaps(&slot)) {
            continue;
        }
        picked.push(slot);
        if picked.len() == limit {
            break;
        }
    }
    picked
}

/// Weekday business-hour windows in `tz` covering `days` calendar days from
/// `from`.
pub fn business_windows(from: DateTime<Utc>, tz: Tz, policy: &SlotPolicy) -> Vec<TimeWindow> {
    let today = from.with_timezone(&tz).date_naive();
    (0..policy.alternative_search_days)
        .filter_map(|offset| today.checked_add_days(chrono::Days::new(u64::from(offset))))
        .filter(|date| !matches!(date.weekday(), Weekday::Sat | Weekday::Sun))
        .filter_map(|date| {
            let start = local_hour(tz, date, policy.business_start_hour)?;
            let end = local_hour(tz, date, policy.business_end_hour)?;
            let window = TimeWindow::new(start.max(from), end);
            (!window.is_empty()).then_some(window)
        })
        .collect()
}

fn local_hour(tz: Tz, date: NaiveDate, hour: u32) -> Option<DateTime<Utc>> {
    let naive = if hour >= 24 {
        date.succ_opt()?.and_hms_opt(0, 0, 0)?
    } else {
        date.and_hms_opt(hour, 0, 0)?
    };
    tz.from_local_datetime(&naive).earliest().map(|local| local.with_timezone(&Utc))
}

fn align_up(at: DateTime<Utc>, granularity: Duration) -> DateTime<Utc> {
    let step = granularity.num_seconds().max(1);
    let secs = at.timestamp();
    let rem = secs.rem_euclid(step);
    if rem == 0 && at.timestamp_subsec_nanos() == 0 {
        return at;
    }
    DateTime::from_timestamp(secs - rem + step, 0).unwrap_or(at)
}

fn merge_intervals(intervals: &[TimeWindow]) -> Vec<TimeWindow> {
    let mut sorted: Vec<TimeWindow> = intervals.iter().copied().filter(|i| !i.is_empty()).collect();
    sorted.sort();
    let mut merged: Vec<TimeWindow> = Vec::with_capacity(sorted.len());
    for interval in sorted {
        match merged.last_mut() {
            Some(last) if interval.start <= last.end => last.end = last.end.max(interval.end),
            _ => merged.push(interval),
        }
    }
    merged
}
