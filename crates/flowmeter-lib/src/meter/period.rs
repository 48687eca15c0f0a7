//! Activation periods

use crate::models::{ActivationPeriod, MeterPolicy};
use chrono::{Datelike, NaiveDateTime, NaiveTime, Weekday};

pub fn is_weekday(day: Weekday) -> bool {
    !matches!(day, Weekday::Sat | Weekday::Sun)
}

/// Whether a policy applies at `time` on a weekday or weekend day.
/// Windows are half-open: `start <= time < end`.
pub fn is_active(policy: &MeterPolicy, time: NaiveTime, weekday: bool) -> bool {
    let in_window = || match policy.window() {
        Some((start, end)) => start <= time && time < end,
        None => true,
    };

    match policy.activation_period {
        ActivationPeriod::AllWeek => true,
        ActivationPeriod::Weekday => weekday && in_window(),
        ActivationPeriod::Weekend => !weekday && in_window(),
    }
}

/// [`is_active`] at a wall-clock instant
pub fn is_active_at(policy: &MeterPolicy, at: NaiveDateTime) -> bool {
    is_active(policy, at.time(), is_weekday(at.weekday()))
}
