// SPDX-License-Identifier: MIT

//! Submitted content payloads.
//!
//! Each submission carries one of three payload shapes. They are opaque to
//! the confirmation state machine (the store round-trips them as JSON), but
//! they are validated at submit time so shape errors surface to the submitter
//! rather than to the publish action.

use serde::{Deserialize, Serialize};

use crate::{
    error::Error,
    validate::{require_date, require_field, require_url},
};

/// The most events accepted in a single submission.
pub const MAX_EVENTS_PER_SUBMISSION: usize = 5;

/// The three content kinds a site accepts.
///
/// This enumeration matches the values in the database's `submission_kinds`
/// table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::exhaustive_enums)]
pub enum SubmissionKind {
    /// One or more single events.
    EventBatch,
    /// One or more Meetup groups whose events are syndicated via RSS.
    MeetupBatch,
    /// A group publishing an iCal feed.
    IcalFeed,
}

impl SubmissionKind {
    pub fn as_str(&self) -> &str {
        match self {
            SubmissionKind::EventBatch => "event-batch",
            SubmissionKind::MeetupBatch => "meetup-batch",
            SubmissionKind::IcalFeed => "ical-feed",
        }
    }
}

impl TryFrom<&str> for SubmissionKind {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "event-batch" => Ok(Self::EventBatch),
            "meetup-batch" => Ok(Self::MeetupBatch),
            "ical-feed" => Ok(Self::IcalFeed),
            _ => Err(anyhow::anyhow!("Unknown submission kind '{value}'!")),
        }
    }
}

impl std::fmt::Display for SubmissionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub title: String,
    /// The event date, `YYYY-MM-DD`.
    pub date: String,
    pub time: String,
    pub url: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub cost: Option<String>,
    /// Set for multi-day events.
    #[serde(default)]
    pub end_date: Option<String>,
}

/// A Meetup group; its events are pulled from the group's RSS feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetupGroupRecord {
    pub name: String,
    pub url: String,
}

/// A group publishing an iCal feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IcalFeedRecord {
    pub name: String,
    pub url: String,
    pub ical: String,
    /// Shown when an event in the feed has no URL of its own.
    #[serde(default)]
    pub fallback_url: Option<String>,
}

/// The structured content of a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SubmissionPayload {
    EventBatch { events: Vec<EventRecord> },
    MeetupBatch { groups: Vec<MeetupGroupRecord> },
    IcalFeed { feed: IcalFeedRecord },
}

impl SubmissionPayload {
    pub fn kind(&self) -> SubmissionKind {
        match self {
            SubmissionPayload::EventBatch { .. } => SubmissionKind::EventBatch,
            SubmissionPayload::MeetupBatch { .. } => SubmissionKind::MeetupBatch,
            SubmissionPayload::IcalFeed { .. } => SubmissionKind::IcalFeed,
        }
    }

    /// Check the payload against its kind's schema.
    pub fn validate(&self) -> Result<(), Error> {
        match self {
            SubmissionPayload::EventBatch { events } => {
                if events.is_empty() {
                    return Err(Error::Validation {
                        field: "events",
                        reason: "at least one event is required".to_string(),
                    });
                }
                if events.len() > MAX_EVENTS_PER_SUBMISSION {
                    return Err(Error::Validation {
                        field: "events",
                        reason: format!(
                            "at most {MAX_EVENTS_PER_SUBMISSION} events are allowed per submission"
                        ),
                    });
                }
                for event in events {
                    require_field("title", &event.title)?;
                    require_date("date", &event.date)?;
                    require_field("time", &event.time)?;
                    require_url("url", &event.url)?;
                    if let Some(end_date) = &event.end_date {
                        require_date("end_date", end_date)?;
                    }
                }
                Ok(())
            }
            SubmissionPayload::MeetupBatch { groups } => {
                if groups.is_empty() {
                    return Err(Error::Validation {
                        field: "groups",
                        reason: "at least one group is required".to_string(),
                    });
                }
                for group in groups {
                    require_field("name", &group.name)?;
                    require_url("url", &group.url)?;
                }
                Ok(())
            }
            SubmissionPayload::IcalFeed { feed } => {
                require_field("name", &feed.name)?;
                require_url("url", &feed.url)?;
                require_url("ical", &feed.ical)?;
                if let Some(fallback) = &feed.fallback_url {
                    require_url("fallback_url", fallback)?;
                }
                Ok(())
            }
        }
    }
}
