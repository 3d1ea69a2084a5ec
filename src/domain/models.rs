use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const MINUTE_MS: i64 = 60_000;

/// A named, user-configured tracker bound to a destination calendar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Timer {
    pub name: String,
    pub calendar_id: String,
}

impl Timer {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.name, "timer.name")?;
        validate_non_empty(&self.calendar_id, "timer.calendar_id")?;
        Ok(())
    }
}

/// Ephemeral record of the timers currently running: name to start instant.
/// Serialized as a `name -> RFC3339 timestamp` object in the store.
pub type ActiveTimerMap = BTreeMap<String, DateTime<Utc>>;

/// Immutable record of one completed start/stop cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerSession {
    pub name: String,
    pub calendar_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_minutes: i64,
}

impl TimerSession {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.name, "session.name")?;
        validate_non_empty(&self.calendar_id, "session.calendar_id")?;
        if self.end_time <= self.start_time {
            return Err("session.end_time must be after session.start_time".to_string());
        }
        if self.duration_minutes < 1 {
            return Err("session.duration_minutes must be >= 1".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuthToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub token_type: String,
    pub scope: Option<String>,
}

impl OAuthToken {
    pub fn is_valid_at(&self, now: DateTime<Utc>, leeway_seconds: i64) -> bool {
        self.expires_at > now + chrono::Duration::seconds(leeway_seconds)
            && !self.access_token.trim().is_empty()
    }
}

/// Round an elapsed interval to whole minutes, nearest-minute, floor zero.
pub fn rounded_minutes(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    let elapsed_ms = (end - start).num_milliseconds().max(0);
    (elapsed_ms + MINUTE_MS / 2) / MINUTE_MS
}

/// Align an instant down to the start of its minute.
pub fn align_down_to_minute(value: DateTime<Utc>) -> DateTime<Utc> {
    let ms = value.timestamp_millis();
    from_millis(ms - ms.rem_euclid(MINUTE_MS))
}

/// Align an instant up to the next minute boundary unless already on one.
pub fn align_up_to_minute(value: DateTime<Utc>) -> DateTime<Utc> {
    let ms = value.timestamp_millis();
    let remainder = ms.rem_euclid(MINUTE_MS);
    if remainder == 0 {
        value
    } else {
        from_millis(ms - remainder + MINUTE_MS)
    }
}

/// Compute the calendar-facing window for a raw run: start aligned down,
/// end aligned up, spanning at least one full minute.
pub fn aligned_event_window(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let aligned_start = align_down_to_minute(start);
    let mut aligned_end = align_up_to_minute(end);
    if aligned_end - aligned_start < chrono::Duration::minutes(1) {
        aligned_end = aligned_start + chrono::Duration::minutes(1);
    }
    (aligned_start, aligned_end)
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).expect("aligned timestamp stays in range")
}

pub fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}
