//! Backfill scenarios: cancellation, no-show, and the walk-in preference

mod common;

use common::{at, clinic_date, create_slot, harness, register_doctor, token_input};
use shared::types::{Priority, Source, TokenStatus};

#[tokio::test]
async fn test_imminent_slot_prefers_waiting_walkins() {
    // Slot 10:00-11:00, now 09:30. An online token waited longer, but
    // the walk-in is physically present and the slot is imminent.
    let h = harness(at(9, 0));
    let doctor = register_doctor(&h).await;
    create_slot(&h, doctor.id, (10, 0), (11, 0), 2, None, None).await;

    let paid = h
        .engine
        .create_token(token_input(doctor.id, "p1", Priority::Paid, Source::Online))
        .await
        .unwrap();
    h.engine
        .create_token(token_input(doctor.id, "o1", Priority::Online, Source::Online))
        .await
        .unwrap();

    let online_waiting = h
        .engine
        .create_token(token_input(doctor.id, "o2", Priority::Online, Source::Online))
        .await
        .unwrap();
    let walkin_waiting = h
        .engine
        .create_token(token_input(doctor.id, "w1", Priority::Walkin, Source::Walkin))
        .await
        .unwrap();
    assert_eq!(online_waiting.token.status, TokenStatus::Waiting);
    assert_eq!(walkin_waiting.token.status, TokenStatus::Waiting);

    h.clock.set(at(9, 30));
    let outcome = h.engine.cancel_token(paid.token.id).await.unwrap();

    assert_eq!(outcome.promoted.len(), 1);
    assert_eq!(outcome.promoted[0].id, walkin_waiting.token.id);
    assert_eq!(outcome.promoted[0].status, TokenStatus::Allocated);

    let still_waiting = h.engine.waiting_list(doctor.id, clinic_date()).await.unwrap();
    assert_eq!(still_waiting.len(), 1);
    assert_eq!(still_waiting[0].id, online_waiting.token.id);
}

#[tokio::test]
async fn test_imminent_slot_falls_back_without_walkins() {
    // No walk-in waits, so the online token is promoted
    // rather than leaving the seat empty.
    let h = harness(at(9, 0));
    let doctor = register_doctor(&h).await;
    create_slot(&h, doctor.id, (10, 0), (11, 0), 2, None, None).await;

    let paid = h
        .engine
        .create_token(token_input(doctor.id, "p1", Priority::Paid, Source::Online))
        .await
        .unwrap();
    h.engine
        .create_token(token_input(doctor.id, "o1", Priority::Online, Source::Online))
        .await
        .unwrap();
    let online_waiting = h
        .engine
        .create_token(token_input(doctor.id, "o2", Priority::Online, Source::Online))
        .await
        .unwrap();

    h.clock.set(at(9, 30));
    let outcome = h.engine.cancel_token(paid.token.id).await.unwrap();

    assert_eq!(outcome.promoted.len(), 1);
    assert_eq!(outcome.promoted[0].id, online_waiting.token.id);
}

#[tokio::test]
async fn test_distant_slot_promotes_in_priority_order() {
    // Outside the imminence window the walk-in preference does not apply;
    // the higher-priority online token wins the freed seat.
    let h = harness(at(8, 0));
    let doctor = register_doctor(&h).await;
    create_slot(&h, doctor.id, (10, 0), (11, 0), 2, None, None).await;

    let paid = h
        .engine
        .create_token(token_input(doctor.id, "p1", Priority::Paid, Source::Online))
        .await
        .unwrap();
    h.engine
        .create_token(token_input(doctor.id, "o1", Priority::Online, Source::Online))
        .await
        .unwrap();
    let walkin_waiting = h
        .engine
        .create_token(token_input(doctor.id, "w1", Priority::Walkin, Source::Walkin))
        .await
        .unwrap();
    let online_waiting = h
        .engine
        .create_token(token_input(doctor.id, "o2", Priority::Online, Source::Online))
        .await
        .unwrap();

    let outcome = h.engine.cancel_token(paid.token.id).await.unwrap();

    assert_eq!(outcome.promoted.len(), 1);
    assert_eq!(outcome.promoted[0].id, online_waiting.token.id);
    let still_waiting = h.engine.waiting_list(doctor.id, clinic_date()).await.unwrap();
    assert_eq!(still_waiting.len(), 1);
    assert_eq!(still_waiting[0].id, walkin_waiting.token.id);
}

#[tokio::test]
async fn test_cancel_waiting_token_triggers_no_backfill() {
    let h = harness(at(8, 0));
    let doctor = register_doctor(&h).await;
    create_slot(&h, doctor.id, (9, 0), (10, 0), 1, None, None).await;

    h.engine
        .create_token(token_input(doctor.id, "o1", Priority::Online, Source::Online))
        .await
        .unwrap();
    let waiting = h
        .engine
        .create_token(token_input(doctor.id, "o2", Priority::Online, Source::Online))
        .await
        .unwrap();

    let outcome = h.engine.cancel_token(waiting.token.id).await.unwrap();
    assert_eq!(outcome.token.status, TokenStatus::Cancelled);
    assert!(outcome.promoted.is_empty());
    assert_eq!(outcome.message, "Cancelled while waiting");
}

#[tokio::test]
async fn test_no_show_frees_seat_for_waiting_token() {
    let h = harness(at(8, 0));
    let doctor = register_doctor(&h).await;
    create_slot(&h, doctor.id, (9, 0), (10, 0), 1, None, None).await;

    let allocated = h
        .engine
        .create_token(token_input(doctor.id, "o1", Priority::Online, Source::Online))
        .await
        .unwrap();
    let waiting = h
        .engine
        .create_token(token_input(doctor.id, "p1", Priority::Paid, Source::Online))
        .await
        .unwrap();
    assert_eq!(waiting.token.status, TokenStatus::Waiting);

    let outcome = h.engine.mark_no_show(allocated.token.id).await.unwrap();
    assert_eq!(outcome.token.status, TokenStatus::NoShow);
    assert_eq!(outcome.token.slot_id, None);
    assert_eq!(outcome.promoted.len(), 1);
    assert_eq!(outcome.promoted[0].id, waiting.token.id);
}

#[tokio::test]
async fn test_backfill_promotes_across_slots() {
    // The backfill walks the whole waiting list through the general
    // allocation procedure, so promotions are not pinned to the freed slot.
    let h = harness(at(8, 0));
    let doctor = register_doctor(&h).await;
    create_slot(&h, doctor.id, (9, 0), (10, 0), 1, None, None).await;
    create_slot(&h, doctor.id, (10, 0), (11, 0), 1, None, None).await;

    let first = h
        .engine
        .create_token(token_input(doctor.id, "o1", Priority::Online, Source::Online))
        .await
        .unwrap();
    h.engine
        .create_token(token_input(doctor.id, "o2", Priority::Online, Source::Online))
        .await
        .unwrap();
    let waiting_a = h
        .engine
        .create_token(token_input(doctor.id, "o3", Priority::Online, Source::Online))
        .await
        .unwrap();
    let waiting_b = h
        .engine
        .create_token(token_input(doctor.id, "o4", Priority::Online, Source::Online))
        .await
        .unwrap();

    let outcome = h.engine.cancel_token(first.token.id).await.unwrap();
    // One seat freed, one promotion; the second waiter stays put.
    assert_eq!(outcome.promoted.len(), 1);
    assert_eq!(outcome.promoted[0].id, waiting_a.token.id);
    let still_waiting = h.engine.waiting_list(doctor.id, clinic_date()).await.unwrap();
    assert_eq!(still_waiting.len(), 1);
    assert_eq!(still_waiting[0].id, waiting_b.token.id);
}

#[tokio::test]
async fn test_backfill_respects_sub_caps() {
    // The freed seat does not admit a waiting paid token when the paid
    // cap is still saturated.
    let h = harness(at(8, 0));
    let doctor = register_doctor(&h).await;
    create_slot(&h, doctor.id, (9, 0), (10, 0), 3, Some(1), None).await;

    let paid_in = h
        .engine
        .create_token(token_input(doctor.id, "p1", Priority::Paid, Source::Online))
        .await
        .unwrap();
    let online_in = h
        .engine
        .create_token(token_input(doctor.id, "o1", Priority::Online, Source::Online))
        .await
        .unwrap();
    h.engine
        .create_token(token_input(doctor.id, "o2", Priority::Online, Source::Online))
        .await
        .unwrap();
    let paid_waiting = h
        .engine
        .create_token(token_input(doctor.id, "p2", Priority::Paid, Source::Online))
        .await
        .unwrap();
    assert_eq!(paid_waiting.token.status, TokenStatus::Waiting);
    let _ = paid_in;

    // Cancelling an online occupant frees a seat, but the paid class is
    // still at its cap, so no promotion happens.
    let outcome = h.engine.cancel_token(online_in.token.id).await.unwrap();
    assert!(outcome.promoted.is_empty());
    let still_waiting = h.engine.waiting_list(doctor.id, clinic_date()).await.unwrap();
    assert_eq!(still_waiting.len(), 1);
}
