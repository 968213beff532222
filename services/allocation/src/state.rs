//! Token state machine
//!
//! The transition table is closed; every status change in the engine goes
//! through one of the functions below so the `slot_id ⇔ ALLOCATED`
//! invariant cannot be broken elsewhere.

use chrono::NaiveDateTime;
use shared::types::{SlotId, TokenStatus};

use crate::domain::Token;
use crate::error::{EngineError, EngineResult};

/// Whether `from -> to` appears in the transition table.
pub fn allowed(from: TokenStatus, to: TokenStatus) -> bool {
    use TokenStatus::*;
    matches!(
        (from, to),
        (Waiting, Allocated)
            | (Waiting, Cancelled)
            | (Waiting, Expired)
            | (Allocated, Completed)
            | (Allocated, NoShow)
            | (Allocated, Cancelled)
            | (Allocated, Waiting)
    )
}

fn apply(token: &mut Token, to: TokenStatus) -> EngineResult<()> {
    if !allowed(token.status, to) {
        return Err(EngineError::InvalidStatus {
            from: token.status,
            to,
        });
    }
    token.status = to;
    if to != TokenStatus::Allocated {
        token.slot_id = None;
    }
    Ok(())
}

/// WAITING -> ALLOCATED, binding the token to `slot_id`.
pub fn allocate(token: &mut Token, slot_id: SlotId, now: NaiveDateTime) -> EngineResult<()> {
    apply(token, TokenStatus::Allocated)?;
    token.slot_id = Some(slot_id);
    token.allocated_at = Some(now);
    Ok(())
}

/// ALLOCATED -> WAITING. Only legal as an emergency displacement.
pub fn displace(token: &mut Token) -> EngineResult<()> {
    apply(token, TokenStatus::Waiting)?;
    token.allocated_at = None;
    Ok(())
}

/// WAITING/ALLOCATED -> CANCELLED, with the idempotent terminal guards.
pub fn cancel(token: &mut Token, now: NaiveDateTime) -> EngineResult<()> {
    match token.status {
        TokenStatus::Cancelled => return Err(EngineError::AlreadyCancelled),
        TokenStatus::Completed => return Err(EngineError::CannotCancelCompleted),
        _ => {}
    }
    apply(token, TokenStatus::Cancelled)?;
    token.cancelled_at = Some(now);
    Ok(())
}

/// ALLOCATED -> NO_SHOW.
pub fn no_show(token: &mut Token) -> EngineResult<()> {
    apply(token, TokenStatus::NoShow)
}

/// ALLOCATED -> COMPLETED.
pub fn complete(token: &mut Token, now: NaiveDateTime) -> EngineResult<()> {
    apply(token, TokenStatus::Completed)?;
    token.completed_at = Some(now);
    Ok(())
}

/// WAITING -> EXPIRED.
pub fn expire(token: &mut Token) -> EngineResult<()> {
    apply(token, TokenStatus::Expired)
}
