//! Lane assignment for a single day's timed events.
//!
//! Events are packed first-fit into columns in start order. Every event of the
//! batch shares the batch-wide column count, so two events that never overlap
//! still get the narrower width if some other cluster needed more lanes.

use crate::domain::models::{Event, LaidOutEvent};
use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;

const PERCENT: f64 = 100.0;

pub fn layout(events: &[Event], hour_height_px: f64, tz: Tz) -> Vec<LaidOutEvent> {
    if events.is_empty() {
        return Vec::new();
    }

    let mut sorted = events.to_vec();
    sorted.sort_by_key(|event| event.start_time);

    let mut column_ends: Vec<DateTime<Utc>> = Vec::new();
    let mut placed = Vec::with_capacity(sorted.len());
    for event in sorted {
        let column_index = match column_ends
            .iter()
            .position(|last_end| *last_end <= event.start_time)
        {
            Some(index) => {
                column_ends[index] = event.end_time;
                index
            }
            None => {
                column_ends.push(event.end_time);
                column_ends.len() - 1
            }
        };
        placed.push((event, column_index));
    }

    let column_count = column_ends.len();
    let width = PERCENT / column_count as f64;
    placed
        .into_iter()
        .map(|(event, column_index)| {
            let top = minutes_since_midnight(event.start_time, tz) / 60.0 * hour_height_px;
            let height = event.duration_minutes() / 60.0 * hour_height_px;
            LaidOutEvent {
                event,
                column_index,
                column_count,
                top,
                height,
                left: column_index as f64 * width,
                width,
            }
        })
        .collect()
}

fn minutes_since_midnight(timestamp: DateTime<Utc>, tz: Tz) -> f64 {
    let local = timestamp.with_timezone(&tz);
    f64::from(local.num_seconds_from_midnight()) / 60.0
}
