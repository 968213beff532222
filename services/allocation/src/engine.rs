//! Allocation engine
//!
//! The transactional core. Every public operation opens one store
//! transaction serialized on the affected `(doctor, date)`, runs the
//! allocation or lifecycle procedure, writes its audit event through the
//! same transaction, and commits. Storage conflicts are retried with
//! bounded backoff; everything else surfaces to the caller.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use shared::types::{DoctorId, Priority, SlotId, Source, SubCap, TokenId, TokenStatus};
use shared::Clock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditOperation};
use crate::capacity::{admissible, SlotCounts};
use crate::domain::{Doctor, Slot, Token};
use crate::error::{EngineError, EngineResult};
use crate::naming::Namer;
use crate::priority::displacement_victim;
use crate::state;
use crate::store::{SequenceKind, Store, StoreTx};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Attempts per operation when the store reports a conflict.
    pub max_attempts: u32,
    /// Backoff between attempts, scaled linearly by attempt number.
    pub retry_backoff: Duration,
    /// Wall-clock budget per operation; an elapsed deadline rolls the
    /// transaction back and surfaces as unavailable.
    pub op_deadline: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff: Duration::from_millis(25),
            op_deadline: Some(Duration::from_secs(10)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateTokenInput {
    pub idempotency_key: String,
    pub doctor_id: DoctorId,
    pub date: NaiveDate,
    pub patient_name: String,
    pub patient_phone: Option<String>,
    pub patient_age: Option<u32>,
    pub notes: Option<String>,
    pub source: Source,
    pub priority: Priority,
}

#[derive(Debug, Clone)]
pub struct CreateSlotInput {
    pub doctor_id: DoctorId,
    pub date: NaiveDate,
    pub start_time: chrono::NaiveTime,
    pub end_time: chrono::NaiveTime,
    pub capacity: u32,
    pub paid_cap: SubCap,
    pub follow_up_cap: SubCap,
}

/// Partial update of a slot's caps; `None` leaves a field unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlotCapsUpdate {
    pub capacity: Option<u32>,
    pub paid_cap: Option<SubCap>,
    pub follow_up_cap: Option<SubCap>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateOutcome {
    pub token: Token,
    pub slot: Option<Slot>,
    pub displaced: Vec<Token>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelOutcome {
    pub token: Token,
    pub promoted: Vec<Token>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotAvailability {
    pub slot: Slot,
    pub allocated: u32,
    pub available: u32,
    pub has_ended: bool,
}

/// Result of one allocation pass.
struct Placement {
    slot: Option<Slot>,
    displaced: Vec<Token>,
}

impl Placement {
    fn unplaced() -> Self {
        Self {
            slot: None,
            displaced: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct AllocationEngine {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    namer: Arc<dyn Namer>,
    config: EngineConfig,
}

impl AllocationEngine {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        namer: Arc<dyn Namer>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            clock,
            namer,
            config,
        }
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    /// Runs one operation attempt under the configured deadline, retrying
    /// storage conflicts with linear backoff. Business failures are never
    /// retried.
    async fn run_op<T, Fut>(&self, op: &'static str, attempt_fn: impl Fn() -> Fut) -> EngineResult<T>
    where
        Fut: Future<Output = EngineResult<T>>,
    {
        let mut attempt: u32 = 1;
        loop {
            let result = match self.config.op_deadline {
                Some(deadline) => match tokio::time::timeout(deadline, attempt_fn()).await {
                    Ok(result) => result,
                    Err(_) => Err(EngineError::StorageUnavailable(format!(
                        "{op} exceeded its deadline"
                    ))),
                },
                None => attempt_fn().await,
            };
            match result {
                Err(err) if err.is_retryable() && attempt < self.config.max_attempts => {
                    warn!(op, attempt, "storage conflict, retrying");
                    tokio::time::sleep(self.config.retry_backoff * attempt).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    // ------------------------------------------------------------------
    // Token lifecycle
    // ------------------------------------------------------------------

    pub async fn create_token(&self, input: CreateTokenInput) -> EngineResult<CreateOutcome> {
        self.run_op("create_token", || self.create_token_tx(&input))
            .await
    }

    async fn create_token_tx(&self, input: &CreateTokenInput) -> EngineResult<CreateOutcome> {
        let now = self.clock.now();
        let mut tx = self.store.begin(input.doctor_id, input.date).await?;

        // Idempotent replay: same key returns the original token with its
        // current slot, mutating nothing and emitting nothing.
        if let Some(existing) = tx.token_by_key(&input.idempotency_key).await? {
            let slot = match existing.slot_id {
                Some(slot_id) => tx.slot(slot_id).await?,
                None => None,
            };
            tx.commit().await?;
            return Ok(CreateOutcome {
                token: existing,
                slot,
                displaced: Vec::new(),
                message: "duplicate request, returning existing token".to_string(),
            });
        }

        tx.doctor(input.doctor_id)
            .await?
            .filter(|d| d.is_active)
            .ok_or(EngineError::DoctorNotFound)?;

        let probe = tx
            .next_sequence(SequenceKind::Token, input.doctor_id, input.date)
            .await?;
        let display_name =
            self.namer
                .display_name(SequenceKind::Token, input.doctor_id, input.date, probe);

        let mut token = Token {
            id: Uuid::new_v4(),
            display_name,
            idempotency_key: input.idempotency_key.clone(),
            doctor_id: input.doctor_id,
            date: input.date,
            patient_name: input.patient_name.clone(),
            patient_phone: input.patient_phone.clone(),
            patient_age: input.patient_age,
            notes: input.notes.clone(),
            source: input.source,
            priority: input.priority,
            status: TokenStatus::Waiting,
            slot_id: None,
            created_at: now,
            allocated_at: None,
            completed_at: None,
            cancelled_at: None,
        };
        tx.insert_token(&token).await?;

        let placement = self.allocate(tx.as_mut(), &mut token, now).await?;

        let mut event = AuditEvent::new(AuditOperation::CreateToken, input.doctor_id, now)
            .token(token.id)
            .detail("priority", token.priority.as_str())
            .detail("source", token.source.as_str())
            .detail("allocated", placement.slot.is_some());
        if let Some(slot) = &placement.slot {
            event = event.slot(slot.id).detail("slot", slot.display_name.clone());
        }
        tx.append_audit(event).await?;
        tx.commit().await?;

        info!(
            token = %token.display_name,
            doctor = %input.doctor_id,
            priority = token.priority.as_str(),
            allocated = placement.slot.is_some(),
            "token created"
        );

        let message = match &placement.slot {
            Some(slot) => format!("allocated to {}", slot.display_name),
            None => "no seat available, token is waiting".to_string(),
        };
        Ok(CreateOutcome {
            token,
            slot: placement.slot,
            displaced: placement.displaced,
            message,
        })
    }

    pub async fn cancel_token(&self, id: TokenId) -> EngineResult<CancelOutcome> {
        self.run_op("cancel_token", || self.cancel_token_tx(id)).await
    }

    async fn cancel_token_tx(&self, id: TokenId) -> EngineResult<CancelOutcome> {
        let now = self.clock.now();
        let peek = self
            .store
            .peek_token(id)
            .await?
            .ok_or(EngineError::TokenNotFound)?;
        let mut tx = self.store.begin(peek.doctor_id, peek.date).await?;

        let mut token = tx.token(id).await?.ok_or(EngineError::TokenNotFound)?;
        let freed = match token.slot_id {
            Some(slot_id) => tx.slot(slot_id).await?,
            None => None,
        };
        state::cancel(&mut token, now)?;
        tx.update_token(&token).await?;

        let mut promoted = Vec::new();
        let reason = match &freed {
            None => "Cancelled while waiting",
            Some(slot) if slot.has_ended(now) => "Slot already ended",
            Some(slot) => {
                promoted = self.backfill(tx.as_mut(), slot, now).await?;
                "Seat freed"
            }
        };

        tx.append_audit(
            AuditEvent::new(AuditOperation::CancelToken, token.doctor_id, now)
                .token(token.id)
                .detail("reason", reason)
                .detail("promoted", promoted.len() as u64),
        )
        .await?;
        tx.commit().await?;

        info!(
            token = %token.display_name,
            promoted = promoted.len(),
            reason,
            "token cancelled"
        );
        Ok(CancelOutcome {
            token,
            promoted,
            message: reason.to_string(),
        })
    }

    pub async fn mark_no_show(&self, id: TokenId) -> EngineResult<CancelOutcome> {
        self.run_op("mark_no_show", || self.mark_no_show_tx(id)).await
    }

    async fn mark_no_show_tx(&self, id: TokenId) -> EngineResult<CancelOutcome> {
        let now = self.clock.now();
        let peek = self
            .store
            .peek_token(id)
            .await?
            .ok_or(EngineError::TokenNotFound)?;
        let mut tx = self.store.begin(peek.doctor_id, peek.date).await?;

        let mut token = tx.token(id).await?.ok_or(EngineError::TokenNotFound)?;
        let freed = match token.slot_id {
            Some(slot_id) => tx.slot(slot_id).await?,
            None => None,
        };
        state::no_show(&mut token)?;
        tx.update_token(&token).await?;

        let mut promoted = Vec::new();
        let reason = match &freed {
            Some(slot) if !slot.has_ended(now) => {
                promoted = self.backfill(tx.as_mut(), slot, now).await?;
                "Seat freed"
            }
            _ => "Slot already ended",
        };

        tx.append_audit(
            AuditEvent::new(AuditOperation::NoShow, token.doctor_id, now)
                .token(token.id)
                .detail("reason", reason)
                .detail("promoted", promoted.len() as u64),
        )
        .await?;
        tx.commit().await?;

        info!(token = %token.display_name, promoted = promoted.len(), "no-show recorded");
        Ok(CancelOutcome {
            token,
            promoted,
            message: reason.to_string(),
        })
    }

    pub async fn complete_token(&self, id: TokenId) -> EngineResult<Token> {
        self.run_op("complete_token", || self.complete_token_tx(id))
            .await
    }

    async fn complete_token_tx(&self, id: TokenId) -> EngineResult<Token> {
        let now = self.clock.now();
        let peek = self
            .store
            .peek_token(id)
            .await?
            .ok_or(EngineError::TokenNotFound)?;
        let mut tx = self.store.begin(peek.doctor_id, peek.date).await?;

        let mut token = tx.token(id).await?.ok_or(EngineError::TokenNotFound)?;
        let slot_id = token.slot_id;
        state::complete(&mut token, now)?;
        tx.update_token(&token).await?;

        let mut event = AuditEvent::new(AuditOperation::CompleteToken, token.doctor_id, now)
            .token(token.id);
        if let Some(slot_id) = slot_id {
            event = event.slot(slot_id);
        }
        tx.append_audit(event).await?;
        tx.commit().await?;

        info!(token = %token.display_name, "token completed");
        Ok(token)
    }

    pub async fn expire_waiting(&self, doctor_id: DoctorId, date: NaiveDate) -> EngineResult<u64> {
        self.run_op("expire_waiting", || self.expire_waiting_tx(doctor_id, date))
            .await
    }

    async fn expire_waiting_tx(&self, doctor_id: DoctorId, date: NaiveDate) -> EngineResult<u64> {
        let now = self.clock.now();
        let mut tx = self.store.begin(doctor_id, date).await?;

        let waiting = tx.waiting_tokens(doctor_id, date).await?;
        let mut count: u64 = 0;
        for mut token in waiting {
            state::expire(&mut token)?;
            tx.update_token(&token).await?;
            count += 1;
        }

        tx.append_audit(
            AuditEvent::new(AuditOperation::ExpireTokens, doctor_id, now)
                .detail("count", count),
        )
        .await?;
        tx.commit().await?;

        info!(doctor = %doctor_id, count, "waiting tokens expired");
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Read-only projections
    // ------------------------------------------------------------------

    pub async fn slot_availability(
        &self,
        doctor_id: DoctorId,
        date: NaiveDate,
    ) -> EngineResult<Vec<SlotAvailability>> {
        let now = self.clock.now();
        let mut tx = self.store.begin(doctor_id, date).await?;
        let slots = tx.active_slots(doctor_id, date).await?;
        let mut availability = Vec::with_capacity(slots.len());
        for slot in slots {
            let counts = SlotCounts::of(&tx.allocated_tokens(slot.id).await?);
            availability.push(SlotAvailability {
                allocated: counts.allocated,
                available: slot.capacity.saturating_sub(counts.allocated),
                has_ended: slot.has_ended(now),
                slot,
            });
        }
        tx.commit().await?;
        Ok(availability)
    }

    pub async fn waiting_list(
        &self,
        doctor_id: DoctorId,
        date: NaiveDate,
    ) -> EngineResult<Vec<Token>> {
        let mut tx = self.store.begin(doctor_id, date).await?;
        let waiting = tx.waiting_tokens(doctor_id, date).await?;
        tx.commit().await?;
        Ok(waiting)
    }

    // ------------------------------------------------------------------
    // Schedule administration
    // ------------------------------------------------------------------

    pub async fn register_doctor(&self, name: String) -> EngineResult<Doctor> {
        let doctor = Doctor {
            id: Uuid::new_v4(),
            name,
            is_active: true,
        };
        let date = self.clock.now().date();
        let mut tx = self.store.begin(doctor.id, date).await?;
        tx.insert_doctor(&doctor).await?;
        tx.commit().await?;
        info!(doctor = %doctor.id, name = %doctor.name, "doctor registered");
        Ok(doctor)
    }

    pub async fn create_slot(&self, input: CreateSlotInput) -> EngineResult<Slot> {
        self.run_op("create_slot", || self.create_slot_tx(&input)).await
    }

    async fn create_slot_tx(&self, input: &CreateSlotInput) -> EngineResult<Slot> {
        if input.capacity < 1 {
            return Err(EngineError::InvalidInput(
                "capacity must be at least 1".to_string(),
            ));
        }
        if input.start_time >= input.end_time {
            return Err(EngineError::InvalidInput(
                "slot start must be before its end".to_string(),
            ));
        }
        for (name, cap) in [("paid_cap", input.paid_cap), ("follow_up_cap", input.follow_up_cap)] {
            if let Some(limit) = cap.limit() {
                if limit > input.capacity {
                    return Err(EngineError::InvalidInput(format!(
                        "{name} must not exceed capacity"
                    )));
                }
            }
        }

        let mut tx = self.store.begin(input.doctor_id, input.date).await?;
        tx.doctor(input.doctor_id)
            .await?
            .filter(|d| d.is_active)
            .ok_or(EngineError::DoctorNotFound)?;

        let probe = tx
            .next_sequence(SequenceKind::Slot, input.doctor_id, input.date)
            .await?;
        let slot = Slot {
            id: Uuid::new_v4(),
            doctor_id: input.doctor_id,
            display_name: self.namer.display_name(
                SequenceKind::Slot,
                input.doctor_id,
                input.date,
                probe,
            ),
            date: input.date,
            start_time: input.start_time,
            end_time: input.end_time,
            capacity: input.capacity,
            paid_cap: input.paid_cap,
            follow_up_cap: input.follow_up_cap,
            is_active: true,
        };
        tx.insert_slot(&slot).await?;
        tx.commit().await?;
        info!(slot = %slot.display_name, doctor = %slot.doctor_id, "slot created");
        Ok(slot)
    }

    /// Adjusts a slot's caps. Tightening below the current occupancy is
    /// rejected; occupants are never displaced retroactively.
    pub async fn update_slot_caps(
        &self,
        slot_id: SlotId,
        update: SlotCapsUpdate,
    ) -> EngineResult<Slot> {
        self.run_op("update_slot_caps", || {
            self.update_slot_caps_tx(slot_id, update)
        })
        .await
    }

    async fn update_slot_caps_tx(
        &self,
        slot_id: SlotId,
        update: SlotCapsUpdate,
    ) -> EngineResult<Slot> {
        let peek = self
            .store
            .peek_slot(slot_id)
            .await?
            .ok_or(EngineError::SlotNotFound)?;
        let mut tx = self.store.begin(peek.doctor_id, peek.date).await?;

        let mut slot = tx.slot(slot_id).await?.ok_or(EngineError::SlotNotFound)?;
        let counts = SlotCounts::of(&tx.allocated_tokens(slot.id).await?);

        let capacity = update.capacity.unwrap_or(slot.capacity);
        if capacity < 1 {
            return Err(EngineError::InvalidInput(
                "capacity must be at least 1".to_string(),
            ));
        }
        if capacity < counts.allocated {
            return Err(EngineError::InvalidInput(format!(
                "capacity {capacity} is below the current allocation count {}",
                counts.allocated
            )));
        }
        let paid_cap = update.paid_cap.unwrap_or(slot.paid_cap);
        if let Some(limit) = paid_cap.limit() {
            if limit > capacity {
                return Err(EngineError::InvalidInput(
                    "paid_cap must not exceed capacity".to_string(),
                ));
            }
            if limit < counts.paid {
                return Err(EngineError::InvalidInput(format!(
                    "paid_cap {limit} is below the current paid count {}",
                    counts.paid
                )));
            }
        }
        let follow_up_cap = update.follow_up_cap.unwrap_or(slot.follow_up_cap);
        if let Some(limit) = follow_up_cap.limit() {
            if limit > capacity {
                return Err(EngineError::InvalidInput(
                    "follow_up_cap must not exceed capacity".to_string(),
                ));
            }
            if limit < counts.follow_up {
                return Err(EngineError::InvalidInput(format!(
                    "follow_up_cap {limit} is below the current follow-up count {}",
                    counts.follow_up
                )));
            }
        }

        slot.capacity = capacity;
        slot.paid_cap = paid_cap;
        slot.follow_up_cap = follow_up_cap;
        tx.update_slot(&slot).await?;
        tx.commit().await?;
        info!(slot = %slot.display_name, "slot caps updated");
        Ok(slot)
    }

    pub async fn deactivate_slot(&self, slot_id: SlotId) -> EngineResult<Slot> {
        let peek = self
            .store
            .peek_slot(slot_id)
            .await?
            .ok_or(EngineError::SlotNotFound)?;
        let mut tx = self.store.begin(peek.doctor_id, peek.date).await?;
        let mut slot = tx.slot(slot_id).await?.ok_or(EngineError::SlotNotFound)?;
        slot.is_active = false;
        tx.update_slot(&slot).await?;
        tx.commit().await?;
        info!(slot = %slot.display_name, "slot deactivated");
        Ok(slot)
    }

    // ------------------------------------------------------------------
    // Allocation procedures
    // ------------------------------------------------------------------

    /// Active slots of the token's doctor-date that have not ended,
    /// ordered by start time.
    async fn future_slots(
        &self,
        tx: &mut dyn StoreTx,
        doctor_id: DoctorId,
        date: NaiveDate,
        now: NaiveDateTime,
    ) -> EngineResult<Vec<Slot>> {
        let mut slots = tx.active_slots(doctor_id, date).await?;
        slots.retain(|s| !s.has_ended(now));
        Ok(slots)
    }

    /// Seats a WAITING token in the earliest admissible slot. A full slot
    /// admits an emergency by evicting its lowest-priority occupant; the
    /// evictee is re-seated immediately with displacement disabled, so
    /// eviction never cascades. Leaves the token WAITING when no slot
    /// accepts it.
    async fn allocate(
        &self,
        tx: &mut dyn StoreTx,
        token: &mut Token,
        now: NaiveDateTime,
    ) -> EngineResult<Placement> {
        for slot in self
            .future_slots(tx, token.doctor_id, token.date, now)
            .await?
        {
            let occupants = tx.allocated_tokens(slot.id).await?;
            let counts = SlotCounts::of(&occupants);
            if !admissible(token.priority, &slot, &counts) {
                continue;
            }
            if counts.allocated < slot.capacity {
                state::allocate(token, slot.id, now)?;
                tx.update_token(token).await?;
                return Ok(Placement {
                    slot: Some(slot),
                    displaced: Vec::new(),
                });
            }

            // Full slot; only an emergency reaches this point. A slot
            // occupied solely by emergencies yields no victim.
            let Some(victim) = displacement_victim(&occupants) else {
                continue;
            };
            let mut victim = victim.clone();
            state::displace(&mut victim)?;
            tx.update_token(&victim).await?;
            state::allocate(token, slot.id, now)?;
            tx.update_token(token).await?;

            let relocated = self.replace_evictee(tx, &mut victim, now).await?;
            tx.append_audit(
                AuditEvent::new(AuditOperation::EmergencyDisplacement, token.doctor_id, now)
                    .token(victim.id)
                    .slot(slot.id)
                    .detail("displaced_by", token.id.to_string())
                    .detail(
                        "relocated_to",
                        relocated
                            .as_ref()
                            .map(|s| s.display_name.clone())
                            .unwrap_or_else(|| "WAITING".to_string()),
                    ),
            )
            .await?;
            info!(
                evicted = %victim.display_name,
                slot = %slot.display_name,
                relocated = relocated.is_some(),
                "emergency displacement"
            );
            return Ok(Placement {
                slot: Some(slot),
                displaced: vec![victim],
            });
        }
        Ok(Placement::unplaced())
    }

    /// Re-seats a displaced token without further displacement. The
    /// evictee is never an emergency, so a full slot simply fails
    /// admissibility and the token may remain WAITING.
    async fn replace_evictee(
        &self,
        tx: &mut dyn StoreTx,
        token: &mut Token,
        now: NaiveDateTime,
    ) -> EngineResult<Option<Slot>> {
        for slot in self
            .future_slots(tx, token.doctor_id, token.date, now)
            .await?
        {
            let occupants = tx.allocated_tokens(slot.id).await?;
            let counts = SlotCounts::of(&occupants);
            if counts.allocated >= slot.capacity || !admissible(token.priority, &slot, &counts) {
                continue;
            }
            state::allocate(token, slot.id, now)?;
            tx.update_token(token).await?;
            return Ok(Some(slot));
        }
        Ok(None)
    }

    /// Promotes waiting tokens after a seat frees in `freed`. Imminent
    /// slots prefer walk-in-source tokens (patients already present),
    /// falling back to the full waiting list when none exist. Every
    /// candidate goes through the general allocation procedure and may
    /// land in any active future slot.
    async fn backfill(
        &self,
        tx: &mut dyn StoreTx,
        freed: &Slot,
        now: NaiveDateTime,
    ) -> EngineResult<Vec<Token>> {
        if freed.has_ended(now) {
            return Ok(Vec::new());
        }
        let waiting = tx.waiting_tokens(freed.doctor_id, freed.date).await?;
        let candidates = if freed.is_imminent(now) {
            let walkins: Vec<Token> = waiting
                .iter()
                .filter(|t| t.source == Source::Walkin)
                .cloned()
                .collect();
            if walkins.is_empty() {
                waiting
            } else {
                walkins
            }
        } else {
            waiting
        };

        let mut promoted = Vec::new();
        for mut candidate in candidates {
            let placement = self.allocate(tx, &mut candidate, now).await?;
            if placement.slot.is_some() {
                promoted.push(candidate);
            }
        }
        Ok(promoted)
    }
}
