use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::filter::{BookingField, Filter, ListingField, PeriodField};
use crate::model::*;

use super::{BookingRepository, ListingRepository, PeriodRepository, RepoError};

pub type SharedListing = Arc<RwLock<ListingDocument>>;

/// Listings with their periods and bookings, held in memory.
///
/// Serves both access models: nested documents for the scan strategy and
/// per-collection filtered finds for the join strategy.
pub struct InMemoryStore {
    listings: DashMap<Ulid, SharedListing>,
    /// Reverse lookup: entity (period/booking) id → listing id
    entity_to_listing: DashMap<Ulid, Ulid>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            listings: DashMap::new(),
            entity_to_listing: DashMap::new(),
        }
    }

    /// Build a store by applying `events` in order. Documents are assembled
    /// unshared and only wrapped in locks once replay is done.
    pub fn from_events(events: &[Event]) -> Self {
        let store = Self::new();
        let mut docs: HashMap<Ulid, ListingDocument> = HashMap::new();
        for event in events {
            match event {
                Event::ListingCreated { id, name } => {
                    let listing = Listing { id: *id, name: name.clone() };
                    docs.insert(*id, ListingDocument::new(listing));
                }
                Event::ListingDeleted { id } => {
                    if let Some(doc) = docs.remove(id) {
                        store.forget_children(&doc);
                    }
                }
                other => {
                    if let Some(doc) = docs.get_mut(&other.listing_id()) {
                        store.apply_event(doc, other);
                    }
                }
            }
        }
        for (id, doc) in docs {
            store.listings.insert(id, Arc::new(RwLock::new(doc)));
        }
        store
    }

    // ── Listing CRUD ─────────────────────────────────────────

    pub fn listing_count(&self) -> usize {
        self.listings.len()
    }

    pub fn contains_listing(&self, id: &Ulid) -> bool {
        self.listings.contains_key(id)
    }

    pub fn get_listing(&self, id: &Ulid) -> Option<SharedListing> {
        self.listings.get(id).map(|e| e.value().clone())
    }

    pub fn insert_listing(&self, listing: Listing) {
        let id = listing.id;
        self.listings
            .insert(id, Arc::new(RwLock::new(ListingDocument::new(listing))));
    }

    /// Remove a listing and forget its children. The caller passes the
    /// document it already holds locked.
    pub fn remove_listing(&self, id: &Ulid, doc: &ListingDocument) {
        self.forget_children(doc);
        self.listings.remove(id);
    }

    fn forget_children(&self, doc: &ListingDocument) {
        for period in &doc.periods {
            self.unmap_entity(&period.id);
        }
        for booking in &doc.bookings {
            self.unmap_entity(&booking.id);
        }
    }

    pub fn listing_ids(&self) -> Vec<Ulid> {
        self.listings.iter().map(|e| *e.key()).collect()
    }

    /// Clone out every listing handle so no map shard stays locked across an await.
    fn snapshot(&self) -> Vec<SharedListing> {
        self.listings.iter().map(|e| e.value().clone()).collect()
    }

    fn scoped(&self, ids: &BTreeSet<Ulid>) -> Vec<SharedListing> {
        ids.iter().filter_map(|id| self.get_listing(id)).collect()
    }

    // ── Entity index ─────────────────────────────────────────

    pub fn get_listing_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_listing.get(entity_id).map(|e| *e.value())
    }

    pub fn contains_entity(&self, entity_id: &Ulid) -> bool {
        self.entity_to_listing.contains_key(entity_id)
    }

    fn map_entity(&self, entity_id: Ulid, listing_id: Ulid) {
        self.entity_to_listing.insert(entity_id, listing_id);
    }

    fn unmap_entity(&self, entity_id: &Ulid) {
        self.entity_to_listing.remove(entity_id);
    }

    // ── Event application ────────────────────────────────────

    /// Apply a child event to a listing document (no locking, caller holds the lock).
    pub fn apply_event(&self, doc: &mut ListingDocument, event: &Event) {
        match event {
            Event::PeriodAdded {
                id,
                listing_id,
                start_date,
                end_date,
                kind,
            } => {
                doc.insert_period(Period {
                    id: *id,
                    listing_id: *listing_id,
                    start_date: *start_date,
                    end_date: *end_date,
                    kind: *kind,
                });
                self.map_entity(*id, *listing_id);
            }
            Event::PeriodRemoved { id, .. } => {
                doc.remove_period(*id);
                self.unmap_entity(id);
            }
            Event::BookingConfirmed {
                id,
                listing_id,
                start,
                end,
                label,
            } => {
                doc.insert_booking(Booking {
                    id: *id,
                    listing_id: *listing_id,
                    start: *start,
                    end: *end,
                    label: label.clone(),
                });
                self.map_entity(*id, *listing_id);
            }
            Event::BookingCancelled { id, .. } => {
                doc.remove_booking(*id);
                self.unmap_entity(id);
            }
            // ListingCreated/Deleted are handled at the map level, not here
            Event::ListingCreated { .. } | Event::ListingDeleted { .. } => {}
        }
    }

    /// The minimal event sequence that recreates the current state.
    pub async fn export_events(&self) -> Vec<Event> {
        let mut events = Vec::new();
        for shared in self.snapshot() {
            let doc = shared.read().await;
            events.push(Event::ListingCreated {
                id: doc.listing.id,
                name: doc.listing.name.clone(),
            });
            for p in &doc.periods {
                events.push(Event::PeriodAdded {
                    id: p.id,
                    listing_id: p.listing_id,
                    start_date: p.start_date,
                    end_date: p.end_date,
                    kind: p.kind,
                });
            }
            for b in &doc.bookings {
                events.push(Event::BookingConfirmed {
                    id: b.id,
                    listing_id: b.listing_id,
                    start: b.start,
                    end: b.end,
                    label: b.label.clone(),
                });
            }
        }
        events
    }
}

/// If the filter pins `listing_id` to a set (directly or as a conjunct),
/// return that set so the scan can skip every other listing.
fn listing_scope<F: Copy + PartialEq>(filter: &Filter<F>, listing_field: F) -> Option<&BTreeSet<Ulid>> {
    match filter {
        Filter::In(field, ids) if *field == listing_field => Some(ids),
        Filter::And(parts) => parts.iter().find_map(|f| listing_scope(f, listing_field)),
        _ => None,
    }
}

#[async_trait]
impl ListingRepository for InMemoryStore {
    async fn find_all_documents(&self) -> Result<Vec<ListingDocument>, RepoError> {
        let mut docs = Vec::with_capacity(self.listings.len());
        for shared in self.snapshot() {
            docs.push(shared.read().await.clone());
        }
        Ok(docs)
    }

    async fn find_listings(&self, filter: &Filter<ListingField>) -> Result<Vec<Listing>, RepoError> {
        let candidates = match listing_scope(filter, ListingField::Id) {
            Some(ids) => self.scoped(ids),
            None => self.snapshot(),
        };
        let mut found = Vec::new();
        for shared in candidates {
            let doc = shared.read().await;
            if filter.matches(&doc.listing) {
                found.push(doc.listing.clone());
            }
        }
        Ok(found)
    }
}

#[async_trait]
impl PeriodRepository for InMemoryStore {
    async fn find_periods(&self, filter: &Filter<PeriodField>) -> Result<Vec<Period>, RepoError> {
        let candidates = match listing_scope(filter, PeriodField::ListingId) {
            Some(ids) => self.scoped(ids),
            None => self.snapshot(),
        };
        let mut found = Vec::new();
        for shared in candidates {
            let doc = shared.read().await;
            found.extend(doc.periods.iter().filter(|p| filter.matches(*p)).cloned());
        }
        Ok(found)
    }
}

#[async_trait]
impl BookingRepository for InMemoryStore {
    async fn find_bookings(&self, filter: &Filter<BookingField>) -> Result<Vec<Booking>, RepoError> {
        let candidates = match listing_scope(filter, BookingField::ListingId) {
            Some(ids) => self.scoped(ids),
            None => self.snapshot(),
        };
        let mut found = Vec::new();
        for shared in candidates {
            let doc = shared.read().await;
            found.extend(doc.bookings.iter().filter(|b| filter.matches(*b)).cloned());
        }
        Ok(found)
    }
}
