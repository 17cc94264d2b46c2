//! Slot Availability Engine.
//!
//! Walks a working window in `slot_duration` steps from its start, drops every
//! step that overlaps the break (half-open test, so touching the boundary is
//! fine) and marks a step booked when its start time equals the start time of
//! a booked interval. The output is a pure function of the two inputs.

use std::collections::HashSet;

use tracing::warn;

use crate::models::{AvailabilityWindow, BookedInterval, Slot, SlotView};
use crate::services::time::{minutes_to_time, time_to_minutes};

/// Full slot grid for `window`, booked slots included.
pub fn compute_slots(window: &AvailabilityWindow, booked: &[BookedInterval]) -> Vec<Slot> {
    let bounds = match WindowBounds::from_window(window) {
        Some(bounds) => bounds,
        None => return Vec::new(),
    };

    let booked_starts: HashSet<&str> = booked.iter().map(|b| b.start_time.as_str()).collect();
    let duration = window.slot_duration;

    let mut slots = Vec::new();
    let mut step = bounds.start;

    while step + duration <= bounds.end {
        let step_end = step + duration;

        let overlaps_break = bounds
            .break_range
            .map_or(false, |(break_start, break_end)| step < break_end && step_end > break_start);

        if !overlaps_break {
            // Both offsets are bounded by `bounds.end`, which is a valid clock time.
            if let (Ok(start_time), Ok(end_time)) = (minutes_to_time(step), minutes_to_time(step_end)) {
                let is_available = !booked_starts.contains(start_time.as_str());
                slots.push(Slot {
                    start_time,
                    end_time,
                    duration,
                    is_available,
                });
            }
        }

        step += duration;
    }

    slots
}

/// Patient-facing view: open slots only.
pub fn available_slots(window: &AvailabilityWindow, booked: &[BookedInterval]) -> Vec<Slot> {
    compute_slots(window, booked)
        .into_iter()
        .filter(|slot| slot.is_available)
        .collect()
}

pub fn slots_for_view(window: &AvailabilityWindow, booked: &[BookedInterval], view: SlotView) -> Vec<Slot> {
    match view {
        SlotView::Available => available_slots(window, booked),
        SlotView::All => compute_slots(window, booked),
    }
}

/// True when `start_time` is an open slot of `window`.
pub fn is_slot_open(window: &AvailabilityWindow, booked: &[BookedInterval], start_time: &str) -> bool {
    available_slots(window, booked)
        .iter()
        .any(|slot| slot.start_time == start_time)
}

struct WindowBounds {
    start: u32,
    end: u32,
    break_range: Option<(u32, u32)>,
}

impl WindowBounds {
    fn from_window(window: &AvailabilityWindow) -> Option<Self> {
        if window.slot_duration == 0 {
            warn!("Availability window {} has a zero slot duration", window.id);
            return None;
        }

        let (start, end) = match (time_to_minutes(&window.start_time), time_to_minutes(&window.end_time)) {
            (Ok(start), Ok(end)) if start < end => (start, end),
            _ => {
                warn!("Availability window {} has unusable bounds {}-{}", window.id, window.start_time, window.end_time);
                return None;
            }
        };

        let break_range = match (&window.break_start, &window.break_end) {
            (Some(break_start), Some(break_end)) => {
                match (time_to_minutes(break_start), time_to_minutes(break_end)) {
                    (Ok(s), Ok(e)) if s < e => Some((s, e)),
                    _ => {
                        warn!("Ignoring malformed break on availability window {}", window.id);
                        None
                    }
                }
            }
            _ => None,
        };

        Some(Self { start, end, break_range })
    }
}
