//! Google Calendar v3 events.

use super::{read_json, ApiError, ApiOperation, GoogleApi};
use crate::credentials::TokenRecord;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Start or end of an event: `date` for all-day events, else `dateTime`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTime {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

impl EventTime {
    fn is_valid(&self) -> bool {
        self.date.is_some() != self.date_time.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attendee {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderOverride {
    /// `email` or `popup`
    pub method: String,
    pub minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reminders {
    pub use_default: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<ReminderOverride>,
}

/// Event as returned by the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub start: Option<EventTime>,
    #[serde(default)]
    pub end: Option<EventTime>,
    #[serde(default)]
    pub attendees: Vec<Attendee>,
    #[serde(default)]
    pub reminders: Option<Reminders>,
    #[serde(default)]
    pub visibility: Option<String>,
    #[serde(default)]
    pub html_link: Option<String>,
}

/// New event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDraft {
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attendees: Vec<Attendee>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminders: Option<Reminders>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
}

impl EventDraft {
    /// Reject drafts the provider would refuse
    pub fn validate(&self) -> Result<(), String> {
        if self.summary.trim().is_empty() {
            return Err("summary is required".to_string());
        }
        if !self.start.is_valid() {
            return Err("start needs exactly one of date or dateTime".to_string());
        }
        if !self.end.is_valid() {
            return Err("end needs exactly one of date or dateTime".to_string());
        }
        Ok(())
    }
}

/// Partial update; only fields that are set are sent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<EventTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<EventTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attendees: Option<Vec<Attendee>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminders: Option<Reminders>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
}

impl EventPatch {
    pub fn is_empty(&self) -> bool {
        self == &EventPatch::default()
    }
}

#[derive(Deserialize)]
struct EventList {
    #[serde(default)]
    items: Vec<CalendarEvent>,
}

/// Calendar calls made with one token
pub struct CalendarClient<'a> {
    api: &'a GoogleApi,
    token: &'a TokenRecord,
}

impl<'a> CalendarClient<'a> {
    pub(super) fn new(api: &'a GoogleApi, token: &'a TokenRecord) -> Self {
        Self { api, token }
    }

    fn events_url(&self, calendar_id: &str) -> String {
        format!(
            "{}/calendars/{}/events",
            self.api.endpoints().calendar,
            urlencoding::encode(calendar_id)
        )
    }

    fn event_url(&self, calendar_id: &str, event_id: &str) -> String {
        format!("{}/{}", self.events_url(calendar_id), urlencoding::encode(event_id))
    }

    /// Upcoming single events from `time_min`, ordered by start time
    pub async fn list_upcoming(
        &self,
        calendar_id: &str,
        time_min: DateTime<Utc>,
        max_results: u32,
    ) -> Result<Vec<CalendarEvent>, ApiError> {
        let url = self.events_url(calendar_id);
        let time_min = time_min.to_rfc3339_opts(SecondsFormat::Secs, true);
        let max_results = max_results.to_string();

        let response = self
            .api
            .execute(ApiOperation::ListEvents, self.token, |http| {
                http.get(&url).query(&[
                    ("timeMin", time_min.as_str()),
                    ("maxResults", max_results.as_str()),
                    ("singleEvents", "true"),
                    ("orderBy", "startTime"),
                ])
            })
            .await?;

        let list: EventList = read_json(ApiOperation::ListEvents, response).await?;
        Ok(list.items)
    }

    pub async fn get_event(&self, calendar_id: &str, event_id: &str) -> Result<CalendarEvent, ApiError> {
        let url = self.event_url(calendar_id, event_id);
        let response = self
            .api
            .execute(ApiOperation::GetEvent, self.token, |http| http.get(&url))
            .await?;
        read_json(ApiOperation::GetEvent, response).await
    }

    pub async fn insert_event(&self, calendar_id: &str, draft: &EventDraft) -> Result<CalendarEvent, ApiError> {
        let url = self.events_url(calendar_id);
        let response = self
            .api
            .execute(ApiOperation::InsertEvent, self.token, |http| http.post(&url).json(draft))
            .await?;
        read_json(ApiOperation::InsertEvent, response).await
    }

    pub async fn patch_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        patch: &EventPatch,
    ) -> Result<CalendarEvent, ApiError> {
        let url = self.event_url(calendar_id, event_id);
        let response = self
            .api
            .execute(ApiOperation::PatchEvent, self.token, |http| http.patch(&url).json(patch))
            .await?;
        read_json(ApiOperation::PatchEvent, response).await
    }

    pub async fn delete_event(&self, calendar_id: &str, event_id: &str) -> Result<(), ApiError> {
        let url = self.event_url(calendar_id, event_id);
        self.api
            .execute(ApiOperation::DeleteEvent, self.token, |http| http.delete(&url))
            .await?;
        Ok(())
    }
}
