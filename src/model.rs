use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds (UTC). Every instant in the crate uses this.
pub type Ms = i64;

/// Closed query interval `[start, end]`. Both bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: Ms,
    pub end: Ms,
}

impl Window {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start <= end, "Window start must not be after end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t <= self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_window(&self, other: &Window) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Closed-interval intersection; touching endpoints count.
    pub fn intersects(&self, other: &Window) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodKind {
    /// The listing can be booked inside this period.
    Available,
    /// Owner-declared closure. Ignored by matching.
    Blocked,
    /// Any other type label. Stored, never matched.
    Other,
}

impl PeriodKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodKind::Available => "available",
            PeriodKind::Blocked => "blocked",
            PeriodKind::Other => "other",
        }
    }
}

impl fmt::Display for PeriodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for PeriodKind {
    /// Unrecognised labels are kept as [`PeriodKind::Other`] rather than rejected.
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "available" => PeriodKind::Available,
            "blocked" | "unavailable" => PeriodKind::Blocked,
            _ => PeriodKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub id: Ulid,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub id: Ulid,
    pub listing_id: Ulid,
    pub start_date: Ms,
    pub end_date: Ms,
    pub kind: PeriodKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub listing_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub label: Option<String>,
}

/// A listing with its periods and bookings nested, as a document store hands it out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingDocument {
    pub listing: Listing,
    /// Sorted by `start_date`.
    pub periods: Vec<Period>,
    /// Sorted by `start`.
    pub bookings: Vec<Booking>,
}

impl ListingDocument {
    pub fn new(listing: Listing) -> Self {
        Self {
            listing,
            periods: Vec::new(),
            bookings: Vec::new(),
        }
    }

    /// Insert period maintaining sort order by start_date.
    pub fn insert_period(&mut self, period: Period) {
        let pos = self
            .periods
            .binary_search_by_key(&period.start_date, |p| p.start_date)
            .unwrap_or_else(|e| e);
        self.periods.insert(pos, period);
    }

    pub fn remove_period(&mut self, id: Ulid) -> Option<Period> {
        let pos = self.periods.iter().position(|p| p.id == id)?;
        Some(self.periods.remove(pos))
    }

    /// Insert booking maintaining sort order by start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.start, |b| b.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }
}

/// Which evaluation strategy answers an availability query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Strategy {
    /// V1: load every listing with nested periods and bookings, filter in memory.
    #[default]
    Scan,
    /// V2: filtered queries per collection, reconciled by id-set difference.
    Join,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Scan => "scan",
            Strategy::Join => "join",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "scan" | "v1" => Ok(Strategy::Scan),
            "join" | "v2" => Ok(Strategy::Join),
            _ => Err(UnknownVariant::new("strategy", s)),
        }
    }
}

/// When does a booking conflict with a query window?
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OverlapRule {
    /// A booking conflicts iff its start or its end lies inside the window.
    /// A booking enclosing the whole window is not a conflict under this rule.
    #[default]
    Endpoints,
    /// A booking conflicts iff its closed interval intersects the window.
    Intersects,
}

impl OverlapRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverlapRule::Endpoints => "endpoints",
            OverlapRule::Intersects => "intersects",
        }
    }
}

impl FromStr for OverlapRule {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "endpoints" => Ok(OverlapRule::Endpoints),
            "intersects" => Ok(OverlapRule::Intersects),
            _ => Err(UnknownVariant::new("overlap rule", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {what}: {value}")]
pub struct UnknownVariant {
    what: &'static str,
    value: String,
}

impl UnknownVariant {
    fn new(what: &'static str, value: &str) -> Self {
        Self {
            what,
            value: value.to_string(),
        }
    }
}

/// Parse `YYYY-MM-DD` (midnight UTC) or an RFC 3339 timestamp into `Ms`.
pub fn parse_instant(text: &str) -> Option<Ms> {
    let text = text.trim();
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp_millis());
    }
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

/// Catalog mutations, flat with no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ListingCreated {
        id: Ulid,
        name: Option<String>,
    },
    ListingDeleted {
        id: Ulid,
    },
    PeriodAdded {
        id: Ulid,
        listing_id: Ulid,
        start_date: Ms,
        end_date: Ms,
        kind: PeriodKind,
    },
    PeriodRemoved {
        id: Ulid,
        listing_id: Ulid,
    },
    BookingConfirmed {
        id: Ulid,
        listing_id: Ulid,
        start: Ms,
        end: Ms,
        label: Option<String>,
    },
    BookingCancelled {
        id: Ulid,
        listing_id: Ulid,
    },
}

impl Event {
    /// Listing the event applies to.
    pub fn listing_id(&self) -> Ulid {
        match self {
            Event::ListingCreated { id, .. } | Event::ListingDeleted { id } => *id,
            Event::PeriodAdded { listing_id, .. }
            | Event::PeriodRemoved { listing_id, .. }
            | Event::BookingConfirmed { listing_id, .. }
            | Event::BookingCancelled { listing_id, .. } => *listing_id,
        }
    }
}
