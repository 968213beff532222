//! Schedule entities: doctors, slots, and tokens

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use shared::types::{DoctorId, Priority, SlotId, Source, SubCap, TokenId, TokenStatus};

/// Minutes before a slot's start during which waiting walk-ins are
/// preferred for backfill. A slot already in progress also counts.
const WALKIN_PREFERENCE_MINUTES: i64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Doctor {
    pub id: DoctorId,
    pub name: String,
    pub is_active: bool,
}

/// A fixed time window `[start_time, end_time)` on a date for one doctor,
/// with a hard seat capacity and optional per-priority sub-caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slot {
    pub id: SlotId,
    pub doctor_id: DoctorId,
    pub display_name: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub capacity: u32,
    pub paid_cap: SubCap,
    pub follow_up_cap: SubCap,
    pub is_active: bool,
}

impl Slot {
    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }

    pub fn ends_at(&self) -> NaiveDateTime {
        self.date.and_time(self.end_time)
    }

    pub fn has_ended(&self, now: NaiveDateTime) -> bool {
        now >= self.ends_at()
    }

    /// In progress, or starting within the walk-in preference window.
    pub fn is_imminent(&self, now: NaiveDateTime) -> bool {
        !self.has_ended(now)
            && self.starts_at() - now <= Duration::minutes(WALKIN_PREFERENCE_MINUTES)
    }
}

/// A patient's claim on a doctor for a date. `slot_id` is set exactly while
/// the token is ALLOCATED; the state machine in `state` is the only
/// mutation path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: TokenId,
    pub display_name: String,
    pub idempotency_key: String,
    pub doctor_id: DoctorId,
    pub date: NaiveDate,
    pub patient_name: String,
    pub patient_phone: Option<String>,
    pub patient_age: Option<u32>,
    pub notes: Option<String>,
    pub source: Source,
    pub priority: Priority,
    pub status: TokenStatus,
    pub slot_id: Option<SlotId>,
    pub created_at: NaiveDateTime,
    pub allocated_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub cancelled_at: Option<NaiveDateTime>,
}

impl Token {
    pub fn is_waiting(&self) -> bool {
        self.status == TokenStatus::Waiting
    }

    pub fn is_allocated(&self) -> bool {
        self.status == TokenStatus::Allocated
    }
}
