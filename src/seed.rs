//! Startup import of listing documents from a JSON file.
//!
//! ```json
//! [
//!   {
//!     "name": "Harbour flat",
//!     "periods": [{ "start_date": "2024-01-01", "end_date": "2024-03-31", "type": "available" }],
//!     "bookings": [{ "start": "2024-02-10", "end": "2024-02-14", "label": "Okafor" }]
//!   }
//! ]
//! ```
//!
//! Instants are `YYYY-MM-DD`, RFC 3339 or unix milliseconds. Ids are optional
//! and generated when absent.

use std::path::Path;

use serde::Deserialize;
use tracing::info;
use ulid::Ulid;

use crate::catalog::Catalog;
use crate::engine::EngineError;
use crate::model::*;

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("reading seed file: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing seed file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bad instant {0:?}")]
    Instant(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InstantRepr {
    Millis(Ms),
    Text(String),
}

impl InstantRepr {
    fn resolve(self) -> Result<Ms, SeedError> {
        match self {
            InstantRepr::Millis(ms) => Ok(ms),
            InstantRepr::Text(text) => parse_instant(&text).ok_or(SeedError::Instant(text)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SeedPeriod {
    id: Option<Ulid>,
    start_date: InstantRepr,
    end_date: InstantRepr,
    /// Missing means available; unrecognised labels become [`PeriodKind::Other`].
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SeedBooking {
    id: Option<Ulid>,
    start: InstantRepr,
    end: InstantRepr,
    label: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SeedListing {
    id: Option<Ulid>,
    name: Option<String>,
    #[serde(default)]
    periods: Vec<SeedPeriod>,
    #[serde(default)]
    bookings: Vec<SeedBooking>,
}

impl SeedListing {
    fn into_document(self) -> Result<ListingDocument, SeedError> {
        let listing_id = self.id.unwrap_or_else(Ulid::new);
        let mut doc = ListingDocument::new(Listing {
            id: listing_id,
            name: self.name,
        });
        for p in self.periods {
            doc.insert_period(Period {
                id: p.id.unwrap_or_else(Ulid::new),
                listing_id,
                start_date: p.start_date.resolve()?,
                end_date: p.end_date.resolve()?,
                kind: p.kind.as_deref().map_or(PeriodKind::Available, PeriodKind::from),
            });
        }
        for b in self.bookings {
            doc.insert_booking(Booking {
                id: b.id.unwrap_or_else(Ulid::new),
                listing_id,
                start: b.start.resolve()?,
                end: b.end.resolve()?,
                label: b.label,
            });
        }
        Ok(doc)
    }
}

/// Parse seed JSON into listing documents.
pub fn parse_documents(json: &str) -> Result<Vec<ListingDocument>, SeedError> {
    let listings: Vec<SeedListing> = serde_json::from_str(json)?;
    listings.into_iter().map(SeedListing::into_document).collect()
}

/// Load `path` into the catalog unless it already holds listings.
/// Returns the number of listings imported.
pub async fn load_if_empty(catalog: &Catalog, path: &Path) -> Result<usize, SeedError> {
    if catalog.store().listing_count() > 0 {
        info!("catalog not empty, skipping seed {}", path.display());
        return Ok(0);
    }
    let json = tokio::fs::read_to_string(path).await?;
    let documents = parse_documents(&json)?;
    let imported = catalog.import(documents).await?;
    info!(listings = imported, "seeded catalog from {}", path.display());
    Ok(imported)
}
