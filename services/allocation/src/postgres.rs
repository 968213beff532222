//! PostgreSQL store
//!
//! Transactions take `pg_advisory_xact_lock` on a key derived from
//! `(doctor_id, date)` as their first statement; the lock releases with the
//! transaction, giving the same per-day serialization as the in-memory
//! store. Serialization failures, deadlocks, and unique violations map to
//! `StorageConflict` for the orchestrator to retry.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use shared::types::{DoctorId, Priority, SlotId, Source, SubCap, TokenId, TokenStatus};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Executor, Row, Transaction};

use crate::audit::AuditEvent;
use crate::domain::{Doctor, Slot, Token};
use crate::error::{EngineError, EngineResult};
use crate::store::{SequenceKind, Store, StoreTx};

const SCHEMA: &str = include_str!("../schema.sql");

pub async fn create_pool(database_url: &str) -> EngineResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(16)
        .connect(database_url)
        .await
        .map_err(map_sqlx)
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> EngineResult<()> {
        self.pool.execute(SCHEMA).await.map_err(map_sqlx)?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(
        &self,
        doctor_id: DoctorId,
        date: NaiveDate,
    ) -> EngineResult<Box<dyn StoreTx>> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(day_lock_key(doctor_id, date))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn peek_token(&self, id: TokenId) -> EngineResult<Option<Token>> {
        let row = sqlx::query("SELECT * FROM tokens WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.map(|r| token_from_row(&r)).transpose()
    }

    async fn peek_slot(&self, id: SlotId) -> EngineResult<Option<Slot>> {
        let row = sqlx::query("SELECT * FROM slots WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.map(|r| slot_from_row(&r)).transpose()
    }
}

struct PgTx {
    tx: Transaction<'static, sqlx::Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn doctor(&mut self, id: DoctorId) -> EngineResult<Option<Doctor>> {
        let row = sqlx::query("SELECT id, name, is_active FROM doctors WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;
        Ok(row.map(|r| Doctor {
            id: r.get("id"),
            name: r.get("name"),
            is_active: r.get("is_active"),
        }))
    }

    async fn insert_doctor(&mut self, doctor: &Doctor) -> EngineResult<()> {
        sqlx::query("INSERT INTO doctors (id, name, is_active) VALUES ($1, $2, $3)")
            .bind(doctor.id)
            .bind(&doctor.name)
            .bind(doctor.is_active)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn slot(&mut self, id: SlotId) -> EngineResult<Option<Slot>> {
        let row = sqlx::query("SELECT * FROM slots WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;
        row.map(|r| slot_from_row(&r)).transpose()
    }

    async fn insert_slot(&mut self, slot: &Slot) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO slots (id, doctor_id, display_name, date, start_time, end_time,
                                capacity, paid_cap, follow_up_cap, is_active)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(slot.id)
        .bind(slot.doctor_id)
        .bind(&slot.display_name)
        .bind(slot.date)
        .bind(slot.start_time)
        .bind(slot.end_time)
        .bind(slot.capacity as i32)
        .bind(slot.paid_cap.limit().map(|v| v as i32))
        .bind(slot.follow_up_cap.limit().map(|v| v as i32))
        .bind(slot.is_active)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn update_slot(&mut self, slot: &Slot) -> EngineResult<()> {
        sqlx::query(
            "UPDATE slots SET capacity = $2, paid_cap = $3, follow_up_cap = $4, is_active = $5
             WHERE id = $1",
        )
        .bind(slot.id)
        .bind(slot.capacity as i32)
        .bind(slot.paid_cap.limit().map(|v| v as i32))
        .bind(slot.follow_up_cap.limit().map(|v| v as i32))
        .bind(slot.is_active)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn active_slots(
        &mut self,
        doctor_id: DoctorId,
        date: NaiveDate,
    ) -> EngineResult<Vec<Slot>> {
        let rows = sqlx::query(
            "SELECT * FROM slots
             WHERE doctor_id = $1 AND date = $2 AND is_active
             ORDER BY start_time",
        )
        .bind(doctor_id)
        .bind(date)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        rows.iter().map(slot_from_row).collect()
    }

    async fn token(&mut self, id: TokenId) -> EngineResult<Option<Token>> {
        let row = sqlx::query("SELECT * FROM tokens WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;
        row.map(|r| token_from_row(&r)).transpose()
    }

    async fn token_by_key(&mut self, idempotency_key: &str) -> EngineResult<Option<Token>> {
        let row = sqlx::query("SELECT * FROM tokens WHERE idempotency_key = $1")
            .bind(idempotency_key)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;
        row.map(|r| token_from_row(&r)).transpose()
    }

    async fn insert_token(&mut self, token: &Token) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO tokens (id, display_name, idempotency_key, doctor_id, date,
                                 patient_name, patient_phone, patient_age, notes,
                                 source, priority, status, slot_id,
                                 created_at, allocated_at, completed_at, cancelled_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
        )
        .bind(token.id)
        .bind(&token.display_name)
        .bind(&token.idempotency_key)
        .bind(token.doctor_id)
        .bind(token.date)
        .bind(&token.patient_name)
        .bind(&token.patient_phone)
        .bind(token.patient_age.map(|v| v as i32))
        .bind(&token.notes)
        .bind(token.source.as_str())
        .bind(token.priority.as_str())
        .bind(token.status.as_str())
        .bind(token.slot_id)
        .bind(token.created_at)
        .bind(token.allocated_at)
        .bind(token.completed_at)
        .bind(token.cancelled_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn update_token(&mut self, token: &Token) -> EngineResult<()> {
        sqlx::query(
            "UPDATE tokens SET status = $2, slot_id = $3, allocated_at = $4,
                               completed_at = $5, cancelled_at = $6
             WHERE id = $1",
        )
        .bind(token.id)
        .bind(token.status.as_str())
        .bind(token.slot_id)
        .bind(token.allocated_at)
        .bind(token.completed_at)
        .bind(token.cancelled_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn allocated_tokens(&mut self, slot_id: SlotId) -> EngineResult<Vec<Token>> {
        let rows = sqlx::query(
            "SELECT * FROM tokens
             WHERE slot_id = $1 AND status = 'ALLOCATED'
             ORDER BY created_at",
        )
        .bind(slot_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        rows.iter().map(token_from_row).collect()
    }

    async fn waiting_tokens(
        &mut self,
        doctor_id: DoctorId,
        date: NaiveDate,
    ) -> EngineResult<Vec<Token>> {
        let rows = sqlx::query(
            "SELECT * FROM tokens
             WHERE doctor_id = $1 AND date = $2 AND status = 'WAITING'
             ORDER BY CASE priority
                          WHEN 'EMERGENCY' THEN 1
                          WHEN 'PAID' THEN 2
                          WHEN 'FOLLOWUP' THEN 3
                          WHEN 'ONLINE' THEN 4
                          ELSE 5
                      END,
                      created_at",
        )
        .bind(doctor_id)
        .bind(date)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        rows.iter().map(token_from_row).collect()
    }

    async fn next_sequence(
        &mut self,
        kind: SequenceKind,
        doctor_id: DoctorId,
        date: NaiveDate,
    ) -> EngineResult<u32> {
        let row = sqlx::query(
            "INSERT INTO naming_sequences (kind, doctor_id, date, value)
             VALUES ($1, $2, $3, 1)
             ON CONFLICT (kind, doctor_id, date)
             DO UPDATE SET value = naming_sequences.value + 1
             RETURNING value",
        )
        .bind(kind.as_str())
        .bind(doctor_id)
        .bind(date)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        let value: i32 = row.get("value");
        Ok(value as u32)
    }

    async fn append_audit(&mut self, event: AuditEvent) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO audit_events (operation, token_id, slot_id, doctor_id, details, at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(event.operation.as_str())
        .bind(event.token_id)
        .bind(event.slot_id)
        .bind(event.doctor_id)
        .bind(serde_json::Value::Object(event.details))
        .bind(event.at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> EngineResult<()> {
        self.tx.commit().await.map_err(map_sqlx)
    }
}

/// Stable 64-bit advisory-lock key for a doctor-date.
fn day_lock_key(doctor_id: DoctorId, date: NaiveDate) -> i64 {
    let bytes = doctor_id.as_bytes();
    let mut key = u64::from_le_bytes(bytes[..8].try_into().unwrap_or([0; 8]));
    key ^= u64::from_le_bytes(bytes[8..].try_into().unwrap_or([0; 8]));
    key ^= (date.num_days_from_ce() as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
    key as i64
}

fn map_sqlx(err: sqlx::Error) -> EngineError {
    if let sqlx::Error::Database(db) = &err {
        // 40001 serialization_failure, 40P01 deadlock_detected,
        // 23505 unique_violation
        if matches!(
            db.code().as_deref(),
            Some("40001") | Some("40P01") | Some("23505")
        ) {
            return EngineError::StorageConflict;
        }
    }
    EngineError::StorageUnavailable(err.to_string())
}

fn corrupt(column: &str, value: &str) -> EngineError {
    EngineError::StorageUnavailable(format!("corrupt {column} value `{value}`"))
}

fn slot_from_row(row: &PgRow) -> EngineResult<Slot> {
    let capacity: i32 = row.get("capacity");
    let paid_cap: Option<i32> = row.get("paid_cap");
    let follow_up_cap: Option<i32> = row.get("follow_up_cap");
    Ok(Slot {
        id: row.get("id"),
        doctor_id: row.get("doctor_id"),
        display_name: row.get("display_name"),
        date: row.get("date"),
        start_time: row.get("start_time"),
        end_time: row.get("end_time"),
        capacity: capacity as u32,
        paid_cap: SubCap::from(paid_cap.map(|v| v as u32)),
        follow_up_cap: SubCap::from(follow_up_cap.map(|v| v as u32)),
        is_active: row.get("is_active"),
    })
}

fn token_from_row(row: &PgRow) -> EngineResult<Token> {
    let source: String = row.get("source");
    let priority: String = row.get("priority");
    let status: String = row.get("status");
    let age: Option<i32> = row.get("patient_age");
    Ok(Token {
        id: row.get("id"),
        display_name: row.get("display_name"),
        idempotency_key: row.get("idempotency_key"),
        doctor_id: row.get("doctor_id"),
        date: row.get("date"),
        patient_name: row.get("patient_name"),
        patient_phone: row.get("patient_phone"),
        patient_age: age.map(|v| v as u32),
        notes: row.get("notes"),
        source: Source::parse(&source).ok_or_else(|| corrupt("source", &source))?,
        priority: Priority::parse(&priority).ok_or_else(|| corrupt("priority", &priority))?,
        status: TokenStatus::parse(&status).ok_or_else(|| corrupt("status", &status))?,
        slot_id: row.get("slot_id"),
        created_at: row.get("created_at"),
        allocated_at: row.get("allocated_at"),
        completed_at: row.get("completed_at"),
        cancelled_at: row.get("cancelled_at"),
    })
}
