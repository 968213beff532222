//! Boundary validation
//!
//! Parses and checks request payloads before they reach the engine. All
//! failures are `InvalidInput`; the engine itself never sees a malformed
//! date, time, or enum.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use shared::types::{
    parse_clinic_date, parse_clinic_time, DoctorId, Priority, Source, SubCap,
};

use crate::engine::{CreateSlotInput, CreateTokenInput};
use crate::error::{EngineError, EngineResult};

const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;
const MAX_PATIENT_AGE: u32 = 130;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTokenRequest {
    pub idempotency_key: String,
    pub doctor_id: DoctorId,
    pub date: String,
    pub patient_name: String,
    pub patient_phone: Option<String>,
    pub patient_age: Option<u32>,
    pub notes: Option<String>,
    pub source: String,
    pub priority: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSlotRequest {
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub capacity: u32,
    pub paid_cap: Option<u32>,
    pub follow_up_cap: Option<u32>,
}

pub fn validate_create_token(
    request: CreateTokenRequest,
    now: NaiveDateTime,
) -> EngineResult<CreateTokenInput> {
    let idempotency_key = request.idempotency_key.trim().to_string();
    if idempotency_key.is_empty() {
        return Err(EngineError::InvalidInput(
            "idempotency_key is required".to_string(),
        ));
    }
    if idempotency_key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(EngineError::InvalidInput(format!(
            "idempotency_key must not exceed {MAX_IDEMPOTENCY_KEY_LEN} characters"
        )));
    }

    let patient_name = request.patient_name.trim().to_string();
    if patient_name.is_empty() {
        return Err(EngineError::InvalidInput(
            "patient_name is required".to_string(),
        ));
    }

    let date = validate_future_date(&request.date, now)?;

    let patient_phone = request
        .patient_phone
        .as_deref()
        .map(validate_phone)
        .transpose()?;

    if let Some(age) = request.patient_age {
        if age > MAX_PATIENT_AGE {
            return Err(EngineError::InvalidInput(format!(
                "patient_age must not exceed {MAX_PATIENT_AGE}"
            )));
        }
    }

    let source = Source::parse(&request.source).ok_or_else(|| {
        EngineError::InvalidInput(format!("unknown source `{}`", request.source))
    })?;
    let priority = Priority::parse(&request.priority).ok_or_else(|| {
        EngineError::InvalidInput(format!("unknown priority `{}`", request.priority))
    })?;

    Ok(CreateTokenInput {
        idempotency_key,
        doctor_id: request.doctor_id,
        date,
        patient_name,
        patient_phone,
        patient_age: request.patient_age,
        notes: request.notes,
        source,
        priority,
    })
}

pub fn validate_create_slot(
    doctor_id: DoctorId,
    request: CreateSlotRequest,
    now: NaiveDateTime,
) -> EngineResult<CreateSlotInput> {
    let date = validate_future_date(&request.date, now)?;
    let start_time = parse_clinic_time(&request.start_time)
        .map_err(|e| EngineError::InvalidInput(e.to_string()))?;
    let end_time = parse_clinic_time(&request.end_time)
        .map_err(|e| EngineError::InvalidInput(e.to_string()))?;
    if start_time >= end_time {
        return Err(EngineError::InvalidInput(
            "start_time must be before end_time".to_string(),
        ));
    }
    if request.capacity < 1 {
        return Err(EngineError::InvalidInput(
            "capacity must be at least 1".to_string(),
        ));
    }
    for (name, cap) in [
        ("paid_cap", request.paid_cap),
        ("follow_up_cap", request.follow_up_cap),
    ] {
        if let Some(limit) = cap {
            if limit > request.capacity {
                return Err(EngineError::InvalidInput(format!(
                    "{name} must not exceed capacity"
                )));
            }
        }
    }

    Ok(CreateSlotInput {
        doctor_id,
        date,
        start_time,
        end_time,
        capacity: request.capacity,
        paid_cap: SubCap::from(request.paid_cap),
        follow_up_cap: SubCap::from(request.follow_up_cap),
    })
}

/// Parses a boundary date without a past-date check, for projections and
/// end-of-day expiry.
pub fn validate_date(raw: &str) -> EngineResult<NaiveDate> {
    parse_clinic_date(raw).map_err(|e| EngineError::InvalidInput(e.to_string()))
}

/// Parses a boundary date and rejects dates before today.
pub fn validate_future_date(raw: &str, now: NaiveDateTime) -> EngineResult<NaiveDate> {
    let date = validate_date(raw)?;
    if date < now.date() {
        return Err(EngineError::InvalidInput(format!(
            "date {raw} is in the past"
        )));
    }
    Ok(date)
}

/// Optional leading `+`, then 7 to 15 digits.
fn validate_phone(raw: &str) -> EngineResult<String> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);
    if digits.len() < 7 || digits.len() > 15 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(EngineError::InvalidInput(format!(
            "invalid phone number `{raw}`"
        )));
    }
    Ok(trimmed.to_string())
}
