//! Data-access boundary the availability strategies query through.
//!
//! Strategies never reach for a global handle: every repository is injected
//! as an `Arc<dyn …Repository>`, so tests substitute fakes freely.

mod store;
mod timed;

pub use store::{InMemoryStore, SharedListing};
pub use timed::TimedRepository;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::filter::{BookingField, Filter, ListingField, PeriodField};
use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepoError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("query timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
}

#[async_trait]
pub trait ListingRepository: Send + Sync {
    /// Every listing with its periods and bookings nested.
    async fn find_all_documents(&self) -> Result<Vec<ListingDocument>, RepoError>;

    async fn find_listings(&self, filter: &Filter<ListingField>) -> Result<Vec<Listing>, RepoError>;
}

#[async_trait]
pub trait PeriodRepository: Send + Sync {
    async fn find_periods(&self, filter: &Filter<PeriodField>) -> Result<Vec<Period>, RepoError>;
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn find_bookings(&self, filter: &Filter<BookingField>) -> Result<Vec<Booking>, RepoError>;
}

/// The three collections a strategy may query.
#[derive(Clone)]
pub struct Repositories {
    pub listings: Arc<dyn ListingRepository>,
    pub periods: Arc<dyn PeriodRepository>,
    pub bookings: Arc<dyn BookingRepository>,
}

impl Repositories {
    /// One backend serving all three collections.
    pub fn shared<R>(backend: Arc<R>) -> Self
    where
        R: ListingRepository + PeriodRepository + BookingRepository + 'static,
    {
        Self {
            listings: backend.clone(),
            periods: backend.clone(),
            bookings: backend,
        }
    }

    /// Bound every repository call by `limit`.
    pub fn with_timeout(self, limit: Duration) -> Self {
        Self {
            listings: Arc::new(TimedRepository::new(self.listings, limit)),
            periods: Arc::new(TimedRepository::new(self.periods, limit)),
            bookings: Arc::new(TimedRepository::new(self.bookings, limit)),
        }
    }
}
