use chrono::{Duration, NaiveDate, NaiveTime};

use crate::clock::{Clock, FixedClock};
use crate::types::{
    format_clinic_date, parse_clinic_date, parse_clinic_time, Priority, Source, SubCap,
    TokenStatus,
};

#[test]
fn test_priority_total_order() {
    assert!(Priority::Emergency < Priority::Paid);
    assert!(Priority::Paid < Priority::FollowUp);
    assert!(Priority::FollowUp < Priority::Online);
    assert!(Priority::Online < Priority::Walkin);

    let ranks: Vec<u8> = [
        Priority::Emergency,
        Priority::Paid,
        Priority::FollowUp,
        Priority::Online,
        Priority::Walkin,
    ]
    .iter()
    .map(Priority::rank)
    .collect();
    assert_eq!(ranks, vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_priority_round_trip() {
    for p in [
        Priority::Emergency,
        Priority::Paid,
        Priority::FollowUp,
        Priority::Online,
        Priority::Walkin,
    ] {
        assert_eq!(Priority::parse(p.as_str()), Some(p));
    }
    assert_eq!(Priority::parse("URGENT"), None);
}

#[test]
fn test_source_parse() {
    assert_eq!(Source::parse("WALKIN"), Some(Source::Walkin));
    assert_eq!(Source::parse("ONLINE"), Some(Source::Online));
    assert_eq!(Source::parse("walkin"), None);
}

#[test]
fn test_status_terminality() {
    assert!(!TokenStatus::Waiting.is_terminal());
    assert!(!TokenStatus::Allocated.is_terminal());
    assert!(TokenStatus::Completed.is_terminal());
    assert!(TokenStatus::Cancelled.is_terminal());
    assert!(TokenStatus::NoShow.is_terminal());
    assert!(TokenStatus::Expired.is_terminal());
}

#[test]
fn test_sub_cap_admits() {
    assert!(SubCap::Unlimited.admits(0));
    assert!(SubCap::Unlimited.admits(1_000));
    assert!(SubCap::Cap(3).admits(2));
    assert!(!SubCap::Cap(3).admits(3));
    assert!(!SubCap::Cap(0).admits(0));
}

#[test]
fn test_sub_cap_nullable_boundary() {
    assert_eq!(SubCap::from(None), SubCap::Unlimited);
    assert_eq!(SubCap::from(Some(4)), SubCap::Cap(4));
    assert_eq!(Option::<u32>::from(SubCap::Unlimited), None);
    assert_eq!(Option::<u32>::from(SubCap::Cap(4)), Some(4));
}

#[test]
fn test_clinic_date_parsing() {
    let date = parse_clinic_date("31-07-2026").unwrap();
    assert_eq!(date, NaiveDate::from_ymd_opt(2026, 7, 31).unwrap());
    assert_eq!(format_clinic_date(date), "31-07-2026");

    assert!(parse_clinic_date("2026-07-31").is_err());
    assert!(parse_clinic_date("31/07/2026").is_err());
    assert!(parse_clinic_date("32-01-2026").is_err());
}

#[test]
fn test_clinic_time_parsing() {
    let time = parse_clinic_time("09:30").unwrap();
    assert_eq!(time, NaiveTime::from_hms_opt(9, 30, 0).unwrap());
    assert!(parse_clinic_time("9:30 AM").is_err());
    assert!(parse_clinic_time("25:00").is_err());
}

#[test]
fn test_fixed_clock_set_and_advance() {
    let start = NaiveDate::from_ymd_opt(2026, 7, 31)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap();
    let clock = FixedClock::new(start);
    assert_eq!(clock.now(), start);

    clock.advance(Duration::minutes(90));
    assert_eq!(clock.now(), start + Duration::minutes(90));

    clock.set(start);
    assert_eq!(clock.now(), start);
}
