mod error;
mod join;
pub mod matching;
mod scan;
#[cfg(test)]
mod tests;

pub use error::EngineError;
pub use join::JoinAvailabilityResolver;
pub use scan::IntervalAvailabilityScanner;

use std::time::Instant;

use async_trait::async_trait;
use tracing::warn;

use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::repo::Repositories;

/// One way of answering "which listings are free for the whole window?".
///
/// Implementations are interchangeable: for the same data and window they
/// return the same set of listings. Result order is unspecified.
#[async_trait]
pub trait AvailabilityResolver: Send + Sync {
    fn strategy(&self) -> Strategy;

    async fn resolve(&self, window: Window) -> Result<Vec<Listing>, EngineError>;
}

/// Validate raw bounds into a query window.
pub fn validate_window(start: Ms, end: Ms) -> Result<Window, EngineError> {
    if start > end {
        return Err(EngineError::InvalidArgument(format!(
            "start date {start} is after end date {end}"
        )));
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::InvalidArgument("timestamp out of range".into()));
    }
    if end - start > MAX_QUERY_WINDOW_MS {
        return Err(EngineError::InvalidArgument("query window too wide".into()));
    }
    Ok(Window::new(start, end))
}

/// Holds both strategies and dispatches each call to one of them.
pub struct AvailabilityEngine {
    scan: IntervalAvailabilityScanner,
    join: JoinAvailabilityResolver,
    default_strategy: Strategy,
}

impl AvailabilityEngine {
    pub fn new(repos: Repositories, overlap: OverlapRule, default_strategy: Strategy) -> Self {
        Self {
            scan: IntervalAvailabilityScanner::new(repos.listings.clone(), overlap),
            join: JoinAvailabilityResolver::new(repos.periods, repos.bookings, repos.listings, overlap),
            default_strategy,
        }
    }

    pub fn default_strategy(&self) -> Strategy {
        self.default_strategy
    }

    pub fn resolver(&self, strategy: Strategy) -> &dyn AvailabilityResolver {
        match strategy {
            Strategy::Scan => &self.scan,
            Strategy::Join => &self.join,
        }
    }

    /// Listings available for `[start, end]` under the configured default strategy.
    pub async fn get_all_by_date(&self, start: Ms, end: Ms) -> Result<Vec<Listing>, EngineError> {
        self.get_all_by_date_with(self.default_strategy, start, end)
            .await
    }

    pub async fn get_all_by_date_v1(&self, start: Ms, end: Ms) -> Result<Vec<Listing>, EngineError> {
        self.get_all_by_date_with(Strategy::Scan, start, end).await
    }

    pub async fn get_all_by_date_v2(&self, start: Ms, end: Ms) -> Result<Vec<Listing>, EngineError> {
        self.get_all_by_date_with(Strategy::Join, start, end).await
    }

    pub async fn get_all_by_date_with(
        &self,
        strategy: Strategy,
        start: Ms,
        end: Ms,
    ) -> Result<Vec<Listing>, EngineError> {
        let window = validate_window(start, end)?;
        let started = Instant::now();
        let result = self.resolver(strategy).resolve(window).await;

        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::RESOLVE_TOTAL, "strategy" => strategy.as_str(), "status" => status)
            .increment(1);
        metrics::histogram!(observability::RESOLVE_DURATION_SECONDS, "strategy" => strategy.as_str())
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(listings) => {
                metrics::histogram!(observability::RESOLVE_RESULT_SIZE, "strategy" => strategy.as_str())
                    .record(listings.len() as f64);
            }
            Err(e) => warn!(%strategy, start, end, "availability query failed: {e}"),
        }
        result
    }
}
