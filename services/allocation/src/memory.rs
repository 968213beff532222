//! In-memory transactional store
//!
//! Backs the test suites and local development. Writes are staged in the
//! transaction and applied to the shared tables only at commit; dropping a
//! transaction discards the staging. One `tokio::sync::Mutex` per
//! `(doctor, date)` plays the advisory-lock role, so same-day transactions
//! are fully serialized while different days proceed in parallel.
//! Idempotency keys are reserved atomically in the shared index at insert
//! time and released again on rollback, so key uniqueness holds across
//! day locks, not just within one.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex as SyncMutex;
use shared::types::{DoctorId, SlotId, TokenId, TokenStatus};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::audit::AuditEvent;
use crate::domain::{Doctor, Slot, Token};
use crate::error::{EngineError, EngineResult};
use crate::priority;
use crate::store::{SequenceKind, Store, StoreTx};

#[derive(Default)]
struct MemoryInner {
    doctors: DashMap<DoctorId, Doctor>,
    slots: DashMap<SlotId, Slot>,
    tokens: DashMap<TokenId, Token>,
    tokens_by_key: DashMap<String, TokenId>,
    sequences: DashMap<(SequenceKind, DoctorId, NaiveDate), u32>,
    audit_log: SyncMutex<Vec<AuditEvent>>,
    day_locks: DashMap<(DoctorId, NaiveDate), Arc<Mutex<()>>>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the committed audit log, oldest first.
    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.inner.audit_log.lock().clone()
    }

    /// Number of committed token rows.
    pub fn token_count(&self) -> usize {
        self.inner.tokens.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(
        &self,
        doctor_id: DoctorId,
        date: NaiveDate,
    ) -> EngineResult<Box<dyn StoreTx>> {
        let lock = {
            let entry = self
                .inner
                .day_locks
                .entry((doctor_id, date))
                .or_default();
            entry.value().clone()
        };
        let guard = lock.lock_owned().await;
        Ok(Box::new(MemoryTx {
            inner: self.inner.clone(),
            _guard: guard,
            staged_doctors: HashMap::new(),
            staged_slots: HashMap::new(),
            staged_tokens: HashMap::new(),
            reserved_keys: Vec::new(),
            staged_sequences: HashMap::new(),
            staged_audit: Vec::new(),
        }))
    }

    async fn peek_token(&self, id: TokenId) -> EngineResult<Option<Token>> {
        Ok(self.inner.tokens.get(&id).map(|t| t.value().clone()))
    }

    async fn peek_slot(&self, id: SlotId) -> EngineResult<Option<Slot>> {
        Ok(self.inner.slots.get(&id).map(|s| s.value().clone()))
    }
}

struct MemoryTx {
    inner: Arc<MemoryInner>,
    _guard: OwnedMutexGuard<()>,
    staged_doctors: HashMap<DoctorId, Doctor>,
    staged_slots: HashMap<SlotId, Slot>,
    staged_tokens: HashMap<TokenId, Token>,
    /// Idempotency keys this transaction has claimed in the shared index.
    /// Cleared on commit; released by `Drop` on rollback.
    reserved_keys: Vec<(String, TokenId)>,
    staged_sequences: HashMap<(SequenceKind, DoctorId, NaiveDate), u32>,
    staged_audit: Vec<AuditEvent>,
}

impl MemoryTx {
    fn read_token(&self, id: TokenId) -> Option<Token> {
        self.staged_tokens
            .get(&id)
            .cloned()
            .or_else(|| self.inner.tokens.get(&id).map(|t| t.value().clone()))
    }

    fn read_slot(&self, id: SlotId) -> Option<Slot> {
        self.staged_slots
            .get(&id)
            .cloned()
            .or_else(|| self.inner.slots.get(&id).map(|s| s.value().clone()))
    }

    /// Committed tokens overlaid with this transaction's staging.
    fn all_tokens(&self) -> Vec<Token> {
        let mut tokens: Vec<Token> = self
            .inner
            .tokens
            .iter()
            .filter(|entry| !self.staged_tokens.contains_key(entry.key()))
            .map(|entry| entry.value().clone())
            .collect();
        tokens.extend(self.staged_tokens.values().cloned());
        tokens
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        // A rolled-back transaction releases the keys it reserved; commit
        // clears the list first, making the reservations permanent.
        for (key, id) in self.reserved_keys.drain(..) {
            self.inner
                .tokens_by_key
                .remove_if(&key, |_, reserved| *reserved == id);
        }
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn doctor(&mut self, id: DoctorId) -> EngineResult<Option<Doctor>> {
        Ok(self
            .staged_doctors
            .get(&id)
            .cloned()
            .or_else(|| self.inner.doctors.get(&id).map(|d| d.value().clone())))
    }

    async fn insert_doctor(&mut self, doctor: &Doctor) -> EngineResult<()> {
        self.staged_doctors.insert(doctor.id, doctor.clone());
        Ok(())
    }

    async fn slot(&mut self, id: SlotId) -> EngineResult<Option<Slot>> {
        Ok(self.read_slot(id))
    }

    async fn insert_slot(&mut self, slot: &Slot) -> EngineResult<()> {
        self.staged_slots.insert(slot.id, slot.clone());
        Ok(())
    }

    async fn update_slot(&mut self, slot: &Slot) -> EngineResult<()> {
        self.staged_slots.insert(slot.id, slot.clone());
        Ok(())
    }

    async fn active_slots(
        &mut self,
        doctor_id: DoctorId,
        date: NaiveDate,
    ) -> EngineResult<Vec<Slot>> {
        let mut slots: Vec<Slot> = self
            .inner
            .slots
            .iter()
            .filter(|entry| !self.staged_slots.contains_key(entry.key()))
            .map(|entry| entry.value().clone())
            .collect();
        slots.extend(self.staged_slots.values().cloned());
        slots.retain(|s| s.doctor_id == doctor_id && s.date == date && s.is_active);
        slots.sort_by_key(|s| s.start_time);
        Ok(slots)
    }

    async fn token(&mut self, id: TokenId) -> EngineResult<Option<Token>> {
        Ok(self.read_token(id))
    }

    async fn token_by_key(&mut self, idempotency_key: &str) -> EngineResult<Option<Token>> {
        let id = self
            .inner
            .tokens_by_key
            .get(idempotency_key)
            .map(|entry| *entry.value());
        Ok(id.and_then(|id| self.read_token(id)))
    }

    async fn insert_token(&mut self, token: &Token) -> EngineResult<()> {
        // Claim the key in the shared index up front; the entry operation
        // is atomic, so two transactions under different day locks cannot
        // both take it.
        match self.inner.tokens_by_key.entry(token.idempotency_key.clone()) {
            Entry::Occupied(_) => return Err(EngineError::StorageConflict),
            Entry::Vacant(vacant) => {
                vacant.insert(token.id);
            }
        }
        self.reserved_keys
            .push((token.idempotency_key.clone(), token.id));
        self.staged_tokens.insert(token.id, token.clone());
        Ok(())
    }

    async fn update_token(&mut self, token: &Token) -> EngineResult<()> {
        self.staged_tokens.insert(token.id, token.clone());
        Ok(())
    }

    async fn allocated_tokens(&mut self, slot_id: SlotId) -> EngineResult<Vec<Token>> {
        let mut tokens = self.all_tokens();
        tokens.retain(|t| t.status == TokenStatus::Allocated && t.slot_id == Some(slot_id));
        tokens.sort_by_key(|t| t.created_at);
        Ok(tokens)
    }

    async fn waiting_tokens(
        &mut self,
        doctor_id: DoctorId,
        date: NaiveDate,
    ) -> EngineResult<Vec<Token>> {
        let mut tokens = self.all_tokens();
        tokens.retain(|t| {
            t.doctor_id == doctor_id && t.date == date && t.status == TokenStatus::Waiting
        });
        tokens.sort_by(|a, b| priority::waiting_order(a, b));
        Ok(tokens)
    }

    async fn next_sequence(
        &mut self,
        kind: SequenceKind,
        doctor_id: DoctorId,
        date: NaiveDate,
    ) -> EngineResult<u32> {
        let key = (kind, doctor_id, date);
        let current = self
            .staged_sequences
            .get(&key)
            .copied()
            .or_else(|| self.inner.sequences.get(&key).map(|v| *v.value()))
            .unwrap_or(0);
        let next = current + 1;
        self.staged_sequences.insert(key, next);
        Ok(next)
    }

    async fn append_audit(&mut self, event: AuditEvent) -> EngineResult<()> {
        self.staged_audit.push(event);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> EngineResult<()> {
        let mut this = self;
        for (id, doctor) in std::mem::take(&mut this.staged_doctors) {
            this.inner.doctors.insert(id, doctor);
        }
        for (id, slot) in std::mem::take(&mut this.staged_slots) {
            this.inner.slots.insert(id, slot);
        }
        for (id, token) in std::mem::take(&mut this.staged_tokens) {
            this.inner.tokens.insert(id, token);
        }
        for (key, value) in std::mem::take(&mut this.staged_sequences) {
            this.inner.sequences.insert(key, value);
        }
        let staged_audit = std::mem::take(&mut this.staged_audit);
        if !staged_audit.is_empty() {
            this.inner.audit_log.lock().extend(staged_audit);
        }
        // Reserved keys already sit in the shared index; keep them.
        this.reserved_keys.clear();
        Ok(())
    }
}
