//! Write side: listings, periods and bookings, persisted through the WAL and
//! served to the availability strategies through [`InMemoryStore`].

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use tracing::info;
use ulid::Ulid;

use crate::engine::EngineError;
use crate::limits::*;
use crate::model::*;
use crate::repo::{InMemoryStore, SharedListing};
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_command(&mut wal, other);
                }
            }
            other => handle_command(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_command(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            commit_batch(wal, &mut vec![(event, response)]);
        }
    }
}

fn validate_range(start: Ms, end: Ms) -> Result<(), EngineError> {
    if start > end {
        return Err(EngineError::InvalidArgument(format!(
            "start {start} is after end {end}"
        )));
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

pub struct Catalog {
    store: Arc<InMemoryStore>,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Writers hold this shared from validation until their event is applied.
    /// Compaction holds it exclusively from export until the log is swapped,
    /// so no acknowledged write can fall between the snapshot and the new log.
    write_gate: RwLock<()>,
}

impl Catalog {
    /// Replay the WAL at `wal_path` and start its writer task. Must be called
    /// inside a tokio runtime.
    pub fn open(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Arc::new(InMemoryStore::from_events(&events));
        info!(
            events = events.len(),
            listings = store.listing_count(),
            "catalog replayed from {}",
            wal_path.display()
        );
        Ok(Self {
            store,
            wal_tx,
            write_gate: RwLock::new(()),
        })
    }

    /// The read side, shared with the availability strategies.
    pub fn store(&self) -> Arc<InMemoryStore> {
        self.store.clone()
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append then apply, holding the listing's write lock throughout.
    async fn persist_and_apply(&self, doc: &mut ListingDocument, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_event(doc, event);
        Ok(())
    }

    fn listing(&self, id: &Ulid) -> Result<SharedListing, EngineError> {
        self.store.get_listing(id).ok_or(EngineError::NotFound(*id))
    }

    fn ensure_new_entity(&self, id: Ulid) -> Result<(), EngineError> {
        if self.store.contains_entity(&id) || self.store.contains_listing(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        Ok(())
    }

    /// Write-lock a listing. Fails with `NotFound` if the listing was deleted
    /// (or deleted and recreated) while we waited for the lock.
    async fn lock_listing(
        &self,
        listing_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<ListingDocument>, EngineError> {
        let shared = self.listing(&listing_id)?;
        let doc = shared.clone().write_owned().await;
        match self.store.get_listing(&listing_id) {
            Some(current) if Arc::ptr_eq(&current, &shared) => Ok(doc),
            _ => Err(EngineError::NotFound(listing_id)),
        }
    }

    /// Lookup entity → listing, then write-lock that listing.
    async fn lock_owner(
        &self,
        entity_id: Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<ListingDocument>), EngineError> {
        let listing_id = self
            .store
            .get_listing_for_entity(&entity_id)
            .ok_or(EngineError::NotFound(entity_id))?;
        Ok((listing_id, self.lock_listing(listing_id).await?))
    }

    // ── Listings ─────────────────────────────────────────────

    pub async fn create_listing(&self, id: Ulid, name: Option<String>) -> Result<(), EngineError> {
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN {
                return Err(EngineError::LimitExceeded("listing name too long"));
            }
        let _gate = self.write_gate.read().await;
        self.ensure_new_entity(id)?;

        let event = Event::ListingCreated { id, name: name.clone() };
        self.wal_append(&event).await?;
        self.store.insert_listing(Listing { id, name });
        Ok(())
    }

    /// Delete a listing together with its periods and bookings.
    pub async fn delete_listing(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.write_gate.read().await;
        let doc = self.lock_listing(id).await?;
        self.wal_append(&Event::ListingDeleted { id }).await?;
        self.store.remove_listing(&id, &doc);
        Ok(())
    }

    pub async fn list_listings(&self) -> Vec<Listing> {
        let mut listings = Vec::with_capacity(self.store.listing_count());
        for id in self.store.listing_ids() {
            if let Some(shared) = self.store.get_listing(&id) {
                listings.push(shared.read().await.listing.clone());
            }
        }
        listings
    }

    // ── Periods ──────────────────────────────────────────────

    pub async fn add_period(
        &self,
        id: Ulid,
        listing_id: Ulid,
        start_date: Ms,
        end_date: Ms,
        kind: PeriodKind,
    ) -> Result<(), EngineError> {
        validate_range(start_date, end_date)?;
        let _gate = self.write_gate.read().await;
        self.ensure_new_entity(id)?;
        let mut doc = self.lock_listing(listing_id).await?;

        let event = Event::PeriodAdded { id, listing_id, start_date, end_date, kind };
        self.persist_and_apply(&mut doc, &event).await
    }

    pub async fn remove_period(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let _gate = self.write_gate.read().await;
        let (listing_id, mut doc) = self.lock_owner(id).await?;
        if !doc.periods.iter().any(|p| p.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::PeriodRemoved { id, listing_id };
        self.persist_and_apply(&mut doc, &event).await?;
        Ok(listing_id)
    }

    pub async fn get_periods(&self, listing_id: Option<Ulid>) -> Vec<Period> {
        let ids = match listing_id {
            Some(id) => vec![id],
            None => self.store.listing_ids(),
        };
        let mut periods = Vec::new();
        for id in ids {
            if let Some(shared) = self.store.get_listing(&id) {
                periods.extend(shared.read().await.periods.iter().cloned());
            }
        }
        periods
    }

    // ── Bookings ─────────────────────────────────────────────

    pub async fn confirm_booking(
        &self,
        id: Ulid,
        listing_id: Ulid,
        start: Ms,
        end: Ms,
        label: Option<String>,
    ) -> Result<(), EngineError> {
        validate_range(start, end)?;
        if let Some(ref l) = label
            && l.len() > MAX_LABEL_LEN {
                return Err(EngineError::LimitExceeded("label too long"));
            }
        let _gate = self.write_gate.read().await;
        self.ensure_new_entity(id)?;
        let mut doc = self.lock_listing(listing_id).await?;

        let event = Event::BookingConfirmed { id, listing_id, start, end, label };
        self.persist_and_apply(&mut doc, &event).await
    }

    /// Record several bookings. All rows are validated before any is written.
    pub async fn batch_confirm_bookings(
        &self,
        bookings: Vec<(Ulid, Ulid, Ms, Ms)>,
    ) -> Result<(), EngineError> {
        if bookings.is_empty() {
            return Ok(());
        }
        if bookings.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        let _gate = self.write_gate.read().await;
        for (id, listing_id, start, end) in &bookings {
            validate_range(*start, *end)?;
            self.ensure_new_entity(*id)?;
            if !self.store.contains_listing(listing_id) {
                return Err(EngineError::NotFound(*listing_id));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for (id, ..) in &bookings {
            if !seen.insert(*id) {
                return Err(EngineError::AlreadyExists(*id));
            }
        }

        for (id, listing_id, start, end) in bookings {
            let mut doc = self.lock_listing(listing_id).await?;
            let event = Event::BookingConfirmed { id, listing_id, start, end, label: None };
            self.persist_and_apply(&mut doc, &event).await?;
        }
        Ok(())
    }

    pub async fn cancel_booking(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let _gate = self.write_gate.read().await;
        let (listing_id, mut doc) = self.lock_owner(id).await?;
        if !doc.bookings.iter().any(|b| b.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::BookingCancelled { id, listing_id };
        self.persist_and_apply(&mut doc, &event).await?;
        Ok(listing_id)
    }

    pub async fn get_bookings(&self, listing_id: Option<Ulid>) -> Vec<Booking> {
        let ids = match listing_id {
            Some(id) => vec![id],
            None => self.store.listing_ids(),
        };
        let mut bookings = Vec::new();
        for id in ids {
            if let Some(shared) = self.store.get_listing(&id) {
                bookings.extend(shared.read().await.bookings.iter().cloned());
            }
        }
        bookings
    }

    // ── Seeding ──────────────────────────────────────────────

    /// Import listing documents, e.g. from a seed file.
    pub async fn import(&self, documents: Vec<ListingDocument>) -> Result<usize, EngineError> {
        let count = documents.len();
        for doc in documents {
            self.create_listing(doc.listing.id, doc.listing.name).await?;
            for p in doc.periods {
                self.add_period(p.id, doc.listing.id, p.start_date, p.end_date, p.kind)
                    .await?;
            }
            for b in doc.bookings {
                self.confirm_booking(b.id, doc.listing.id, b.start, b.end, b.label)
                    .await?;
            }
        }
        Ok(count)
    }

    // ── Compaction ───────────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate the current state.
    /// Writes wait until the compacted log is in place.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.write_gate.write().await;
        let events = self.store.export_events().await;
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
