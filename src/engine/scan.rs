use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::model::*;
use crate::repo::ListingRepository;

use super::matching::is_available;
use super::{AvailabilityResolver, EngineError};

/// V1: pull every listing with its nested periods and bookings and test each
/// one in memory. O(listings × (periods + bookings)); needs nothing from the
/// backend beyond nested traversal.
pub struct IntervalAvailabilityScanner {
    listings: Arc<dyn ListingRepository>,
    overlap: OverlapRule,
}

impl IntervalAvailabilityScanner {
    pub fn new(listings: Arc<dyn ListingRepository>, overlap: OverlapRule) -> Self {
        Self { listings, overlap }
    }
}

#[async_trait]
impl AvailabilityResolver for IntervalAvailabilityScanner {
    fn strategy(&self) -> Strategy {
        Strategy::Scan
    }

    async fn resolve(&self, window: Window) -> Result<Vec<Listing>, EngineError> {
        let documents = self.listings.find_all_documents().await?;
        let scanned = documents.len();

        let available: Vec<Listing> = documents
            .into_iter()
            .filter(|doc| is_available(doc, &window, self.overlap))
            .map(|doc| doc.listing)
            .collect();

        debug!(
            scanned,
            available = available.len(),
            start = window.start,
            end = window.end,
            "scan resolved"
        );
        Ok(available)
    }
}
