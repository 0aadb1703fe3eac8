//! Default titles for new recordings.

use chrono::{DateTime, TimeZone};
use std::fmt::Display;

/// Title for a recording started at `now`, e.g. `"Monday at 3:05 PM"`.
pub fn default_title<Tz>(now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    now.format("%A at %-I:%M %p").to_string()
}
