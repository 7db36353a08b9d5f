use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::filter::{BookingField, Filter, ListingField, PeriodField};
use crate::model::*;

use super::{BookingRepository, ListingRepository, PeriodRepository, RepoError};

/// Wraps a repository so that no call outlives `limit`. On expiry the inner
/// future is dropped, which cancels the underlying query.
pub struct TimedRepository<R: ?Sized> {
    inner: Arc<R>,
    limit: Duration,
}

impl<R: ?Sized> TimedRepository<R> {
    pub fn new(inner: Arc<R>, limit: Duration) -> Self {
        Self { inner, limit }
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        query: impl Future<Output = Result<T, RepoError>>,
    ) -> Result<T, RepoError> {
        match tokio::time::timeout(self.limit, query).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(op, limit_ms = self.limit.as_millis() as u64, "repository call timed out");
                Err(RepoError::Timeout(self.limit))
            }
        }
    }
}

#[async_trait]
impl<R: ListingRepository + ?Sized> ListingRepository for TimedRepository<R> {
    async fn find_all_documents(&self) -> Result<Vec<ListingDocument>, RepoError> {
        self.bounded("find_all_documents", self.inner.find_all_documents())
            .await
    }

    async fn find_listings(&self, filter: &Filter<ListingField>) -> Result<Vec<Listing>, RepoError> {
        self.bounded("find_listings", self.inner.find_listings(filter))
            .await
    }
}

#[async_trait]
impl<R: PeriodRepository + ?Sized> PeriodRepository for TimedRepository<R> {
    async fn find_periods(&self, filter: &Filter<PeriodField>) -> Result<Vec<Period>, RepoError> {
        self.bounded("find_periods", self.inner.find_periods(filter))
            .await
    }
}

#[async_trait]
impl<R: BookingRepository + ?Sized> BookingRepository for TimedRepository<R> {
    async fn find_bookings(&self, filter: &Filter<BookingField>) -> Result<Vec<Booking>, RepoError> {
        self.bounded("find_bookings", self.inner.find_bookings(filter))
            .await
    }
}
