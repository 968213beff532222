#![allow(dead_code)]

//! Shared fixtures: an engine over the in-memory store with a fixed clock.

use std::sync::Arc;

use allocation_service::domain::{Doctor, Slot};
use allocation_service::engine::{
    AllocationEngine, CreateSlotInput, CreateTokenInput, EngineConfig,
};
use allocation_service::memory::MemoryStore;
use allocation_service::naming::SequentialNamer;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use shared::clock::FixedClock;
use shared::types::{DoctorId, Priority, Source, SubCap};

pub struct Harness {
    pub engine: AllocationEngine,
    pub clock: Arc<FixedClock>,
    pub store: MemoryStore,
}

pub fn clinic_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 7, 31).unwrap()
}

pub fn at(hour: u32, minute: u32) -> NaiveDateTime {
    clinic_date().and_hms_opt(hour, minute, 0).unwrap()
}

pub fn time(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
}

pub fn harness(now: NaiveDateTime) -> Harness {
    let store = MemoryStore::new();
    let clock = Arc::new(FixedClock::new(now));
    let engine = AllocationEngine::new(
        Arc::new(store.clone()),
        clock.clone(),
        Arc::new(SequentialNamer),
        EngineConfig::default(),
    );
    Harness {
        engine,
        clock,
        store,
    }
}

pub async fn register_doctor(harness: &Harness) -> Doctor {
    harness
        .engine
        .register_doctor("Dr. Meera Iyer".to_string())
        .await
        .expect("doctor registration failed")
}

pub async fn create_slot(
    harness: &Harness,
    doctor_id: DoctorId,
    start: (u32, u32),
    end: (u32, u32),
    capacity: u32,
    paid_cap: Option<u32>,
    follow_up_cap: Option<u32>,
) -> Slot {
    harness
        .engine
        .create_slot(CreateSlotInput {
            doctor_id,
            date: clinic_date(),
            start_time: time(start.0, start.1),
            end_time: time(end.0, end.1),
            capacity,
            paid_cap: SubCap::from(paid_cap),
            follow_up_cap: SubCap::from(follow_up_cap),
        })
        .await
        .expect("slot creation failed")
}

pub fn token_input(
    doctor_id: DoctorId,
    key: &str,
    priority: Priority,
    source: Source,
) -> CreateTokenInput {
    CreateTokenInput {
        idempotency_key: key.to_string(),
        doctor_id,
        date: clinic_date(),
        patient_name: format!("Patient {key}"),
        patient_phone: None,
        patient_age: None,
        notes: None,
        source,
        priority,
    }
}
