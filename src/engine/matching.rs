//! Interval semantics shared by both strategies.
//!
//! The scan strategy evaluates the predicates directly; the join strategy
//! pushes the equivalent filters down to the repositories. Each filter below
//! selects exactly the records its predicate accepts.

use std::collections::BTreeSet;

use ulid::Ulid;

use crate::filter::{BookingField, Filter, ListingField, PeriodField, Value};
use crate::model::*;

/// An `available` period whose bounds enclose the whole window.
pub fn period_covers(period: &Period, window: &Window) -> bool {
    period.kind == PeriodKind::Available
        && period.start_date <= window.start
        && window.end <= period.end_date
}

pub fn booking_overlaps(booking: &Booking, window: &Window, rule: OverlapRule) -> bool {
    match rule {
        OverlapRule::Endpoints => {
            window.contains_instant(booking.start) || window.contains_instant(booking.end)
        }
        OverlapRule::Intersects => booking.start <= window.end && window.start <= booking.end,
    }
}

/// At least one covering period and no overlapping booking.
pub fn is_available(doc: &ListingDocument, window: &Window, rule: OverlapRule) -> bool {
    doc.periods.iter().any(|p| period_covers(p, window))
        && !doc.bookings.iter().any(|b| booking_overlaps(b, window, rule))
}

/// Pushdown form of [`period_covers`].
pub fn covering_periods(window: &Window) -> Filter<PeriodField> {
    Filter::And(vec![
        Filter::Eq(PeriodField::Kind, Value::Kind(PeriodKind::Available)),
        Filter::Lte(PeriodField::StartDate, window.start),
        Filter::Gte(PeriodField::EndDate, window.end),
    ])
}

/// Pushdown form of [`booking_overlaps`], restricted to `listing_ids`.
pub fn overlapping_bookings(
    window: &Window,
    rule: OverlapRule,
    listing_ids: BTreeSet<Ulid>,
) -> Filter<BookingField> {
    let overlap = match rule {
        OverlapRule::Endpoints => Filter::Or(vec![
            Filter::Between(BookingField::Start, window.start, window.end),
            Filter::Between(BookingField::End, window.start, window.end),
        ]),
        OverlapRule::Intersects => Filter::And(vec![
            Filter::Lte(BookingField::Start, window.end),
            Filter::Gte(BookingField::End, window.start),
        ]),
    };
    Filter::And(vec![Filter::In(BookingField::ListingId, listing_ids), overlap])
}

pub fn listings_by_id(ids: BTreeSet<Ulid>) -> Filter<ListingField> {
    Filter::In(ListingField::Id, ids)
}
