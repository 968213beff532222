//! Priority calculus: queue ordering and displacement victim selection

use std::cmp::Ordering;

use shared::types::Priority;

use crate::domain::Token;

/// Service order of the waiting list: urgency first, then FIFO by
/// creation time.
pub fn waiting_order(a: &Token, b: &Token) -> Ordering {
    a.priority
        .rank()
        .cmp(&b.priority.rank())
        .then_with(|| a.created_at.cmp(&b.created_at))
}

/// The occupant an emergency admission evicts from a full slot: the
/// numerically highest rank present, and among equals the oldest
/// `created_at`. Emergencies themselves are never evicted; a full slot
/// holding only emergencies yields no victim.
pub fn displacement_victim(occupants: &[Token]) -> Option<&Token> {
    occupants
        .iter()
        .filter(|t| t.priority != Priority::Emergency)
        .max_by(|a, b| {
            a.priority
                .rank()
                .cmp(&b.priority.rank())
                .then_with(|| b.created_at.cmp(&a.created_at))
        })
}
