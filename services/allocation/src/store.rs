//! Transactional storage contract
//!
//! Every externally-visible engine operation runs inside one `StoreTx`.
//! `Store::begin` serializes transactions per `(doctor, date)` with an
//! advisory lock, so two operations against the same clinic day never
//! interleave; this is the engine's whole concurrency discipline. Dropping
//! a transaction without `commit` rolls back every staged write, including
//! audit events.

use async_trait::async_trait;
use chrono::NaiveDate;
use shared::types::{DoctorId, SlotId, TokenId};

use crate::audit::AuditEvent;
use crate::domain::{Doctor, Slot, Token};
use crate::error::EngineResult;

/// Namespace of a per-day naming sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequenceKind {
    Token,
    Slot,
}

impl SequenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SequenceKind::Token => "TOKEN",
            SequenceKind::Slot => "SLOT",
        }
    }
}

#[async_trait]
pub trait StoreTx: Send {
    async fn doctor(&mut self, id: DoctorId) -> EngineResult<Option<Doctor>>;
    async fn insert_doctor(&mut self, doctor: &Doctor) -> EngineResult<()>;

    async fn slot(&mut self, id: SlotId) -> EngineResult<Option<Slot>>;
    async fn insert_slot(&mut self, slot: &Slot) -> EngineResult<()>;
    async fn update_slot(&mut self, slot: &Slot) -> EngineResult<()>;
    /// Active slots of the doctor-date, ordered by start time.
    async fn active_slots(&mut self, doctor_id: DoctorId, date: NaiveDate)
        -> EngineResult<Vec<Slot>>;

    async fn token(&mut self, id: TokenId) -> EngineResult<Option<Token>>;
    async fn token_by_key(&mut self, idempotency_key: &str) -> EngineResult<Option<Token>>;
    /// Fails with `StorageConflict` when the idempotency key is already
    /// taken; the orchestrator's retry then lands on the replay path.
    async fn insert_token(&mut self, token: &Token) -> EngineResult<()>;
    async fn update_token(&mut self, token: &Token) -> EngineResult<()>;
    /// Currently ALLOCATED tokens of a slot.
    async fn allocated_tokens(&mut self, slot_id: SlotId) -> EngineResult<Vec<Token>>;
    /// WAITING tokens of the doctor-date in service order
    /// (priority rank, then created_at).
    async fn waiting_tokens(
        &mut self,
        doctor_id: DoctorId,
        date: NaiveDate,
    ) -> EngineResult<Vec<Token>>;

    /// Advances and returns the per-day naming sequence.
    async fn next_sequence(
        &mut self,
        kind: SequenceKind,
        doctor_id: DoctorId,
        date: NaiveDate,
    ) -> EngineResult<u32>;

    async fn append_audit(&mut self, event: AuditEvent) -> EngineResult<()>;

    async fn commit(self: Box<Self>) -> EngineResult<()>;
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Opens a transaction holding the `(doctor, date)` advisory lock.
    async fn begin(&self, doctor_id: DoctorId, date: NaiveDate)
        -> EngineResult<Box<dyn StoreTx>>;

    /// Unlocked point read, used to learn a token's doctor-date before
    /// taking the day lock. Tokens never move between doctor-dates, so the
    /// read cannot go stale in the way that matters.
    async fn peek_token(&self, id: TokenId) -> EngineResult<Option<Token>>;

    /// Unlocked point read of a slot, same purpose.
    async fn peek_slot(&self, id: SlotId) -> EngineResult<Option<Slot>>;
}
