//! Display-name collaborator
//!
//! Tokens and slots carry a human-readable identifier next to their UUID.
//! The engine treats the produced string as opaque; uniqueness within
//! `(kind, doctor, date)` comes from the store's per-day sequence, which is
//! advanced inside the same transaction as the insert.

use chrono::NaiveDate;
use shared::types::DoctorId;

use crate::store::SequenceKind;

pub trait Namer: Send + Sync {
    /// `probe` is the per-day sequence value reserved for this name.
    fn display_name(
        &self,
        kind: SequenceKind,
        doctor_id: DoctorId,
        date: NaiveDate,
        probe: u32,
    ) -> String;
}

/// Default scheme: kind prefix, day, zero-padded sequence,
/// e.g. `TKN-31072026-007`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialNamer;

impl Namer for SequentialNamer {
    fn display_name(
        &self,
        kind: SequenceKind,
        _doctor_id: DoctorId,
        date: NaiveDate,
        probe: u32,
    ) -> String {
        let prefix = match kind {
            SequenceKind::Token => "TKN",
            SequenceKind::Slot => "SLT",
        };
        format!("{}-{}-{:03}", prefix, date.format("%d%m%Y"), probe)
    }
}
