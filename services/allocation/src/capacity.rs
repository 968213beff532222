//! Capacity predicate

use shared::types::{Priority, TokenStatus};

use crate::domain::{Slot, Token};

/// Seat usage of a slot, computed from its currently ALLOCATED tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotCounts {
    pub allocated: u32,
    pub paid: u32,
    pub follow_up: u32,
}

impl SlotCounts {
    pub fn of(occupants: &[Token]) -> Self {
        let mut counts = SlotCounts::default();
        for token in occupants {
            if token.status != TokenStatus::Allocated {
                continue;
            }
            counts.allocated += 1;
            match token.priority {
                Priority::Paid => counts.paid += 1,
                Priority::FollowUp => counts.follow_up += 1,
                _ => {}
            }
        }
        counts
    }
}

/// Whether a token of `incoming` priority may be admitted to `slot` given
/// the current counts. Emergencies are always admissible; the allocation
/// procedure displaces when the slot is full. Sub-caps bind only their own
/// priority class and are bypassed by emergency displacement, never the
/// total capacity.
pub fn admissible(incoming: Priority, slot: &Slot, counts: &SlotCounts) -> bool {
    if incoming == Priority::Emergency {
        return true;
    }
    if counts.allocated >= slot.capacity {
        return false;
    }
    if incoming == Priority::Paid && !slot.paid_cap.admits(counts.paid) {
        return false;
    }
    if incoming == Priority::FollowUp && !slot.follow_up_cap.admits(counts.follow_up) {
        return false;
    }
    true
}
