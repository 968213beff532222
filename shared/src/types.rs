//! Core domain vocabulary shared across services

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type DoctorId = Uuid;
pub type SlotId = Uuid;
pub type TokenId = Uuid;

/// Boundary format for clinic dates.
pub const DATE_FORMAT: &str = "%d-%m-%Y";
/// Boundary format for slot times, 24-hour.
pub const TIME_FORMAT: &str = "%H:%M";

/// Clinical/commercial urgency class. The declaration order is the total
/// order used for allocation: a lower rank is served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Emergency,
    Paid,
    #[serde(rename = "FOLLOWUP")]
    FollowUp,
    Online,
    Walkin,
}

impl Priority {
    /// Numeric rank, 1 is the most urgent.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::Emergency => 1,
            Priority::Paid => 2,
            Priority::FollowUp => 3,
            Priority::Online => 4,
            Priority::Walkin => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Emergency => "EMERGENCY",
            Priority::Paid => "PAID",
            Priority::FollowUp => "FOLLOWUP",
            Priority::Online => "ONLINE",
            Priority::Walkin => "WALKIN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "EMERGENCY" => Some(Priority::Emergency),
            "PAID" => Some(Priority::Paid),
            "FOLLOWUP" => Some(Priority::FollowUp),
            "ONLINE" => Some(Priority::Online),
            "WALKIN" => Some(Priority::Walkin),
            _ => None,
        }
    }
}

/// Origin channel of a token. Independent of priority; only the walk-in
/// preference rule during backfill looks at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Source {
    Walkin,
    Online,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Walkin => "WALKIN",
            Source::Online => "ONLINE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "WALKIN" => Some(Source::Walkin),
            "ONLINE" => Some(Source::Online),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenStatus {
    Waiting,
    Allocated,
    Completed,
    Cancelled,
    NoShow,
    Expired,
}

impl TokenStatus {
    /// Terminal statuses admit no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TokenStatus::Completed
                | TokenStatus::Cancelled
                | TokenStatus::NoShow
                | TokenStatus::Expired
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Waiting => "WAITING",
            TokenStatus::Allocated => "ALLOCATED",
            TokenStatus::Completed => "COMPLETED",
            TokenStatus::Cancelled => "CANCELLED",
            TokenStatus::NoShow => "NO_SHOW",
            TokenStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "WAITING" => Some(TokenStatus::Waiting),
            "ALLOCATED" => Some(TokenStatus::Allocated),
            "COMPLETED" => Some(TokenStatus::Completed),
            "CANCELLED" => Some(TokenStatus::Cancelled),
            "NO_SHOW" => Some(TokenStatus::NoShow),
            "EXPIRED" => Some(TokenStatus::Expired),
            _ => None,
        }
    }
}

/// A per-priority seat cap on a slot. Absent means no limit; a sentinel
/// integer is deliberately not used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<u32>", into = "Option<u32>")]
pub enum SubCap {
    Unlimited,
    Cap(u32),
}

impl SubCap {
    /// Whether one more seat of this class may be taken given the current
    /// class count.
    pub fn admits(&self, current: u32) -> bool {
        match self {
            SubCap::Unlimited => true,
            SubCap::Cap(limit) => current < *limit,
        }
    }

    pub fn limit(&self) -> Option<u32> {
        match self {
            SubCap::Unlimited => None,
            SubCap::Cap(limit) => Some(*limit),
        }
    }
}

impl From<Option<u32>> for SubCap {
    fn from(value: Option<u32>) -> Self {
        match value {
            None => SubCap::Unlimited,
            Some(limit) => SubCap::Cap(limit),
        }
    }
}

impl From<SubCap> for Option<u32> {
    fn from(value: SubCap) -> Self {
        value.limit()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("invalid date `{0}`, expected DD-MM-YYYY")]
    Date(String),
    #[error("invalid time `{0}`, expected HH:MM")]
    Time(String),
}

/// Parses a boundary date (`DD-MM-YYYY`).
pub fn parse_clinic_date(s: &str) -> Result<NaiveDate, FormatError> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|_| FormatError::Date(s.to_string()))
}

/// Parses a boundary time of day (`HH:MM`, 24-hour).
pub fn parse_clinic_time(s: &str) -> Result<NaiveTime, FormatError> {
    NaiveTime::parse_from_str(s, TIME_FORMAT).map_err(|_| FormatError::Time(s.to_string()))
}

pub fn format_clinic_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn format_clinic_time(time: NaiveTime) -> String {
    time.format(TIME_FORMAT).to_string()
}
