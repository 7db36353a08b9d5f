use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use ulid::Ulid;

use crate::limits::MAX_IN_CLAUSE_IDS;
use crate::model::*;
use crate::repo::{BookingRepository, ListingRepository, PeriodRepository};

use super::matching::{covering_periods, listings_by_id, overlapping_bookings};
use super::{AvailabilityResolver, EngineError};

/// V2: three sequential filtered queries, one per collection.
///
/// 1. periods covering the window → candidate listing ids
/// 2. bookings overlapping the window among candidates → disqualified ids
/// 3. listings for `candidates − disqualified`
///
/// Each step depends on the previous one, so nothing runs in parallel within
/// a call. Id sets larger than the `IN` limit are queried in chunks.
pub struct JoinAvailabilityResolver {
    periods: Arc<dyn PeriodRepository>,
    bookings: Arc<dyn BookingRepository>,
    listings: Arc<dyn ListingRepository>,
    overlap: OverlapRule,
    in_clause_limit: usize,
}

impl JoinAvailabilityResolver {
    pub fn new(
        periods: Arc<dyn PeriodRepository>,
        bookings: Arc<dyn BookingRepository>,
        listings: Arc<dyn ListingRepository>,
        overlap: OverlapRule,
    ) -> Self {
        Self {
            periods,
            bookings,
            listings,
            overlap,
            in_clause_limit: MAX_IN_CLAUSE_IDS,
        }
    }

    pub fn with_in_clause_limit(mut self, limit: usize) -> Self {
        self.in_clause_limit = limit.max(1);
        self
    }

    fn chunks(&self, ids: &BTreeSet<Ulid>) -> Vec<BTreeSet<Ulid>> {
        let ids: Vec<Ulid> = ids.iter().copied().collect();
        ids.chunks(self.in_clause_limit)
            .map(|chunk| chunk.iter().copied().collect())
            .collect()
    }
}

#[async_trait]
impl AvailabilityResolver for JoinAvailabilityResolver {
    fn strategy(&self) -> Strategy {
        Strategy::Join
    }

    async fn resolve(&self, window: Window) -> Result<Vec<Listing>, EngineError> {
        let periods = self.periods.find_periods(&covering_periods(&window)).await?;
        let candidates: BTreeSet<Ulid> = periods.iter().map(|p| p.listing_id).collect();
        metrics::histogram!(crate::observability::JOIN_CANDIDATES).record(candidates.len() as f64);
        if candidates.is_empty() {
            debug!(start = window.start, end = window.end, "join: no covering periods");
            return Ok(Vec::new());
        }

        let mut disqualified = BTreeSet::new();
        for chunk in self.chunks(&candidates) {
            let filter = overlapping_bookings(&window, self.overlap, chunk);
            let bookings = self.bookings.find_bookings(&filter).await?;
            disqualified.extend(bookings.iter().map(|b| b.listing_id));
        }

        let available: BTreeSet<Ulid> = candidates.difference(&disqualified).copied().collect();
        debug!(
            candidates = candidates.len(),
            disqualified = disqualified.len(),
            available = available.len(),
            start = window.start,
            end = window.end,
            "join resolved"
        );
        if available.is_empty() {
            return Ok(Vec::new());
        }

        let mut listings = Vec::with_capacity(available.len());
        for chunk in self.chunks(&available) {
            listings.extend(self.listings.find_listings(&listings_by_id(chunk)).await?);
        }
        Ok(listings)
    }
}
