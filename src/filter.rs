//! Repository filter expressions.
//!
//! A [`Filter`] is the query contract a strategy hands to a repository: field
//! equality, inclusive `between`, `lte`/`gte`, set membership and boolean
//! composition. Storage backends are free to translate it into an indexed
//! query; [`Filter::matches`] is the reference evaluation used by the
//! in-memory store.

use std::collections::BTreeSet;

use ulid::Ulid;

use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Id(Ulid),
    Time(Ms),
    Kind(PeriodKind),
}

impl Value {
    fn as_time(&self) -> Option<Ms> {
        match self {
            Value::Time(t) => Some(*t),
            _ => None,
        }
    }

    fn as_id(&self) -> Option<Ulid> {
        match self {
            Value::Id(id) => Some(*id),
            _ => None,
        }
    }
}

/// A record a [`Filter`] can be evaluated against.
pub trait Record {
    type Field: Copy;

    fn get(&self, field: Self::Field) -> Value;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingField {
    Id,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodField {
    Id,
    ListingId,
    StartDate,
    EndDate,
    Kind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingField {
    Id,
    ListingId,
    Start,
    End,
}

impl Record for Listing {
    type Field = ListingField;

    fn get(&self, field: ListingField) -> Value {
        match field {
            ListingField::Id => Value::Id(self.id),
        }
    }
}

impl Record for Period {
    type Field = PeriodField;

    fn get(&self, field: PeriodField) -> Value {
        match field {
            PeriodField::Id => Value::Id(self.id),
            PeriodField::ListingId => Value::Id(self.listing_id),
            PeriodField::StartDate => Value::Time(self.start_date),
            PeriodField::EndDate => Value::Time(self.end_date),
            PeriodField::Kind => Value::Kind(self.kind),
        }
    }
}

impl Record for Booking {
    type Field = BookingField;

    fn get(&self, field: BookingField) -> Value {
        match field {
            BookingField::Id => Value::Id(self.id),
            BookingField::ListingId => Value::Id(self.listing_id),
            BookingField::Start => Value::Time(self.start),
            BookingField::End => Value::Time(self.end),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter<F> {
    /// Matches every record.
    All,
    Eq(F, Value),
    /// Inclusive on both ends.
    Between(F, Ms, Ms),
    Lte(F, Ms),
    Gte(F, Ms),
    In(F, BTreeSet<Ulid>),
    And(Vec<Filter<F>>),
    Or(Vec<Filter<F>>),
}

impl<F: Copy> Filter<F> {
    pub fn matches<R: Record<Field = F>>(&self, record: &R) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, value) => record.get(*field) == *value,
            Filter::Between(field, lo, hi) => record
                .get(*field)
                .as_time()
                .is_some_and(|t| *lo <= t && t <= *hi),
            Filter::Lte(field, bound) => record.get(*field).as_time().is_some_and(|t| t <= *bound),
            Filter::Gte(field, bound) => record.get(*field).as_time().is_some_and(|t| t >= *bound),
            Filter::In(field, ids) => record
                .get(*field)
                .as_id()
                .is_some_and(|id| ids.contains(&id)),
            Filter::And(parts) => parts.iter().all(|f| f.matches(record)),
            Filter::Or(parts) => parts.iter().any(|f| f.matches(record)),
        }
    }
}
