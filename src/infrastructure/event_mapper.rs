use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::str::FromStr;

const KEY_TIMER_NAME: &str = "tb_timer_name";
const KEY_SOURCE: &str = "tb_source";
const EVENT_SOURCE: &str = "tallybar";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct CalendarEventDateTime {
    #[serde(rename = "dateTime")]
    pub date_time: String,
    #[serde(rename = "timeZone", skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, Default)]
pub struct CalendarEventExtendedProperties {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub private: HashMap<String, String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct GoogleCalendarEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub start: CalendarEventDateTime,
    pub end: CalendarEventDateTime,
    #[serde(rename = "extendedProperties", skip_serializing_if = "Option::is_none")]
    pub extended_properties: Option<CalendarEventExtendedProperties>,
}

/// Encode a completed run as a calendar event. Start and end are expected
/// to be minute-aligned already; the mapper does not re-align.
pub fn encode_session_event(
    timer_name: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    time_zone: Option<&str>,
) -> GoogleCalendarEvent {
    let time_zone = time_zone.and_then(resolve_time_zone);
    let mut private = HashMap::new();
    private.insert(KEY_TIMER_NAME.to_string(), timer_name.to_string());
    private.insert(KEY_SOURCE.to_string(), EVENT_SOURCE.to_string());

    GoogleCalendarEvent {
        id: None,
        summary: Some(timer_name.to_string()),
        status: Some("confirmed".to_string()),
        start: CalendarEventDateTime {
            date_time: start.to_rfc3339(),
            time_zone: time_zone.clone(),
        },
        end: CalendarEventDateTime {
            date_time: end.to_rfc3339(),
            time_zone,
        },
        extended_properties: Some(CalendarEventExtendedProperties { private }),
    }
}

/// Validate an IANA zone name; anything unknown falls back to plain UTC
/// timestamps rather than sending a name the calendar API would reject.
pub fn resolve_time_zone(value: &str) -> Option<String> {
    chrono_tz::Tz::from_str(value.trim())
        .ok()
        .map(|zone| zone.name().to_string())
}
