//! Audit events
//!
//! One event per committed externally-visible operation, written through
//! the same transaction as the mutation it records, so an aborted
//! operation leaves no trace.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shared::types::{DoctorId, SlotId, TokenId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditOperation {
    CreateToken,
    EmergencyDisplacement,
    CancelToken,
    NoShow,
    CompleteToken,
    ExpireTokens,
}

impl AuditOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOperation::CreateToken => "CREATE_TOKEN",
            AuditOperation::EmergencyDisplacement => "EMERGENCY_DISPLACEMENT",
            AuditOperation::CancelToken => "CANCEL_TOKEN",
            AuditOperation::NoShow => "NO_SHOW",
            AuditOperation::CompleteToken => "COMPLETE_TOKEN",
            AuditOperation::ExpireTokens => "EXPIRE_TOKENS",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub operation: AuditOperation,
    pub token_id: Option<TokenId>,
    pub slot_id: Option<SlotId>,
    pub doctor_id: DoctorId,
    pub details: Map<String, Value>,
    pub at: NaiveDateTime,
}

impl AuditEvent {
    pub fn new(operation: AuditOperation, doctor_id: DoctorId, at: NaiveDateTime) -> Self {
        Self {
            operation,
            token_id: None,
            slot_id: None,
            doctor_id,
            details: Map::new(),
            at,
        }
    }

    pub fn token(mut self, token_id: TokenId) -> Self {
        self.token_id = Some(token_id);
        self
    }

    pub fn slot(mut self, slot_id: SlotId) -> Self {
        self.slot_id = Some(slot_id);
        self
    }

    pub fn detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}
