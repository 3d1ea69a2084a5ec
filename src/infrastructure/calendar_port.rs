use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_mapper::GoogleCalendarEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::sync::Arc;
use url::Url;

const CALENDAR_LIST_ENDPOINT: &str = "https://www.googleapis.com/calendar/v3/users/me/calendarList";
const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3/";
const TOKEN_LEEWAY_SECONDS: i64 = 60;

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarSummary {
    pub id: String,
    pub summary: String,
}

/// The external calendar collaborator as the timer service sees it: a
/// fallible remote sink plus the minimum auth surface a shell needs.
#[async_trait]
pub trait CalendarPort: Send + Sync {
    async fn create_event(
        &self,
        calendar_id: &str,
        event: &GoogleCalendarEvent,
    ) -> Result<String, InfraError>;

    async fn list_calendars(&self) -> Result<Vec<CalendarSummary>, InfraError>;

    fn is_authenticated(&self) -> bool;

    fn current_user_id(&self) -> Option<String>;
}

/// Google Calendar v3 adapter. Reads its bearer token from the credential
/// store on every call; it never refreshes tokens itself.
pub struct GoogleCalendarPort<S: CredentialStore> {
    client: Client,
    credentials: Arc<S>,
    now_provider: NowProvider,
}

impl<S: CredentialStore> GoogleCalendarPort<S> {
    pub fn new(credentials: Arc<S>) -> Self {
        Self {
            client: Client::new(),
            credentials,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    fn access_token(&self) -> Result<String, InfraError> {
        let Some(account) = self.credentials.load_account()? else {
            return Err(InfraError::Credential(
                "google authentication required".to_string(),
            ));
        };
        if !account
            .token
            .is_valid_at((self.now_provider)(), TOKEN_LEEWAY_SECONDS)
        {
            return Err(InfraError::Credential(
                "google access token expired".to_string(),
            ));
        }
        Ok(account.token.access_token)
    }

    fn ensure_non_empty(value: &str, field: &str) -> Result<(), InfraError> {
        if value.trim().is_empty() {
            return Err(InfraError::Calendar(format!("{field} must not be empty")));
        }
        Ok(())
    }

    fn calendar_http_error(status: reqwest::StatusCode, body: &str) -> InfraError {
        let message = if body.trim().is_empty() {
            format!("google calendar api error: http {}", status.as_u16())
        } else {
            format!(
                "google calendar api error: http {}; body={body}",
                status.as_u16()
            )
        };
        InfraError::Calendar(message)
    }

    fn events_endpoint(calendar_id: &str) -> Result<Url, InfraError> {
        let mut url = Url::parse(CALENDAR_API_BASE).map_err(|error| {
            InfraError::Calendar(format!("invalid calendar api base url: {error}"))
        })?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                InfraError::Calendar("calendar api base URL cannot be a base".to_string())
            })?;
            segments.push("calendars");
            segments.push(calendar_id);
            segments.push("events");
        }
        Ok(url)
    }
}

#[derive(Debug, serde::Deserialize)]
struct CalendarListResponse {
    items: Option<Vec<CalendarListItem>>,
}

#[derive(Debug, serde::Deserialize)]
struct CalendarListItem {
    id: String,
    summary: Option<String>,
}

#[async_trait]
impl<S: CredentialStore> CalendarPort for GoogleCalendarPort<S> {
    async fn create_event(
        &self,
        calendar_id: &str,
        event: &GoogleCalendarEvent,
    ) -> Result<String, InfraError> {
        Self::ensure_non_empty(calendar_id, "calendar id")?;
        let access_token = self.access_token()?;

        let endpoint = Self::events_endpoint(calendar_id)?;
        let response = self
            .client
            .post(endpoint)
            .bearer_auth(access_token)
            .json(event)
            .send()
            .await
            .map_err(|error| {
                InfraError::Calendar(format!("network error while creating event: {error}"))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|error| {
            InfraError::Calendar(format!("failed reading event create response: {error}"))
        })?;

        if !status.is_success() {
            return Err(Self::calendar_http_error(status, &body));
        }

        let parsed: GoogleCalendarEvent = serde_json::from_str(&body).map_err(|error| {
            InfraError::Calendar(format!("invalid event create payload: {error}; body={body}"))
        })?;
        parsed
            .id
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                InfraError::Calendar("event create response did not include id".to_string())
            })
    }

    async fn list_calendars(&self) -> Result<Vec<CalendarSummary>, InfraError> {
        let access_token = self.access_token()?;

        let response = self
            .client
            .get(CALENDAR_LIST_ENDPOINT)
            .query(&[("maxResults", 250)])
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|error| {
                InfraError::Calendar(format!("network error while listing calendars: {error}"))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|error| {
            InfraError::Calendar(format!("failed reading calendar list response: {error}"))
        })?;

        if !status.is_success() {
            return Err(Self::calendar_http_error(status, &body));
        }

        let parsed: CalendarListResponse = serde_json::from_str(&body).map_err(|error| {
            InfraError::Calendar(format!("invalid calendar list payload: {error}; body={body}"))
        })?;

        Ok(parsed
            .items
            .unwrap_or_default()
            .into_iter()
            .filter_map(|item| {
                let id = item.id.trim();
                if id.is_empty() {
                    return None;
                }
                let summary = item
                    .summary
                    .unwrap_or_else(|| id.to_string())
                    .trim()
                    .to_string();
                Some(CalendarSummary {
                    id: id.to_string(),
                    summary,
                })
            })
            .collect())
    }

    fn is_authenticated(&self) -> bool {
        match self.credentials.load_account() {
            Ok(Some(account)) => account
                .token
                .is_valid_at((self.now_provider)(), TOKEN_LEEWAY_SECONDS),
            _ => false,
        }
    }

    fn current_user_id(&self) -> Option<String> {
        match self.credentials.load_account() {
            Ok(Some(account)) => Some(account.user_id),
            _ => None,
        }
    }
}
