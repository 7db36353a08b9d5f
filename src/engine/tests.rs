use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio_test::{assert_err, assert_ok};
use ulid::Ulid;

use super::*;
use crate::filter::{BookingField, Filter, ListingField, PeriodField};
use crate::repo::{BookingRepository, InMemoryStore, ListingRepository, PeriodRepository, RepoError};

const D: Ms = 86_400_000;

fn day(date: &str) -> Ms {
    parse_instant(date).unwrap()
}

// ── Fixture builders ─────────────────────────────────────

#[derive(Default)]
struct Fixture {
    events: Vec<Event>,
}

impl Fixture {
    fn listing(&mut self) -> Ulid {
        let id = Ulid::new();
        self.events.push(Event::ListingCreated { id, name: None });
        id
    }

    fn period(&mut self, listing_id: Ulid, start: Ms, end: Ms, kind: PeriodKind) -> &mut Self {
        self.events.push(Event::PeriodAdded {
            id: Ulid::new(),
            listing_id,
            start_date: start,
            end_date: end,
            kind,
        });
        self
    }

    fn available(&mut self, listing_id: Ulid, start: Ms, end: Ms) -> &mut Self {
        self.period(listing_id, start, end, PeriodKind::Available)
    }

    fn booking(&mut self, listing_id: Ulid, start: Ms, end: Ms) -> &mut Self {
        self.events.push(Event::BookingConfirmed {
            id: Ulid::new(),
            listing_id,
            start,
            end,
            label: None,
        });
        self
    }

    fn store(&self) -> Arc<InMemoryStore> {
        Arc::new(InMemoryStore::from_events(&self.events))
    }

    fn engine(&self, overlap: OverlapRule) -> AvailabilityEngine {
        AvailabilityEngine::new(Repositories::shared(self.store()), overlap, Strategy::Scan)
    }
}

fn ids(listings: &[Listing]) -> BTreeSet<Ulid> {
    listings.iter().map(|l| l.id).collect()
}

async fn both(engine: &AvailabilityEngine, start: Ms, end: Ms) -> (BTreeSet<Ulid>, BTreeSet<Ulid>) {
    let v1 = engine.get_all_by_date_v1(start, end).await.unwrap();
    let v2 = engine.get_all_by_date_v2(start, end).await.unwrap();
    (ids(&v1), ids(&v2))
}

// ── Scenarios ────────────────────────────────────────────

#[tokio::test]
async fn scenario_a_covering_period_no_bookings() {
    let mut fx = Fixture::default();
    let x = fx.listing();
    fx.available(x, day("2024-01-01"), day("2024-01-31"));
    let engine = fx.engine(OverlapRule::Endpoints);

    let (v1, v2) = both(&engine, day("2024-01-05"), day("2024-01-10")).await;
    assert_eq!(v1, BTreeSet::from([x]));
    assert_eq!(v2, BTreeSet::from([x]));
}

#[tokio::test]
async fn scenario_b_booking_inside_window() {
    let mut fx = Fixture::default();
    let y = fx.listing();
    fx.available(y, day("2024-01-01"), day("2024-01-31"))
        .booking(y, day("2024-01-06"), day("2024-01-08"));
    let engine = fx.engine(OverlapRule::Endpoints);

    let (v1, v2) = both(&engine, day("2024-01-05"), day("2024-01-10")).await;
    assert!(v1.is_empty());
    assert!(v2.is_empty());
}

#[tokio::test]
async fn scenario_c_period_does_not_contain_window() {
    let mut fx = Fixture::default();
    let z = fx.listing();
    fx.available(z, day("2024-02-01"), day("2024-02-10"));
    let engine = fx.engine(OverlapRule::Endpoints);

    let (v1, v2) = both(&engine, day("2024-01-01"), day("2024-01-31")).await;
    assert!(v1.is_empty());
    assert!(v2.is_empty());
}

#[tokio::test]
async fn scenario_d_empty_repository() {
    let engine = Fixture::default().engine(OverlapRule::Endpoints);
    let v1 = assert_ok!(engine.get_all_by_date_v1(day("2024-01-01"), day("2024-01-31")).await);
    let v2 = assert_ok!(engine.get_all_by_date_v2(day("2024-01-01"), day("2024-01-31")).await);
    assert!(v1.is_empty());
    assert!(v2.is_empty());
}

#[tokio::test]
async fn scenarios_combined() {
    let mut fx = Fixture::default();
    let x = fx.listing();
    let y = fx.listing();
    let z = fx.listing();
    fx.available(x, day("2024-01-01"), day("2024-01-31"));
    fx.available(y, day("2024-01-01"), day("2024-01-31"))
        .booking(y, day("2024-01-06"), day("2024-01-08"));
    fx.available(z, day("2024-02-01"), day("2024-02-10"));
    let engine = fx.engine(OverlapRule::Endpoints);

    let (v1, v2) = both(&engine, day("2024-01-05"), day("2024-01-10")).await;
    assert_eq!(v1, BTreeSet::from([x]));
    assert_eq!(v2, v1);

    let (v1, v2) = both(&engine, day("2024-02-02"), day("2024-02-05")).await;
    assert_eq!(v1, BTreeSet::from([z]));
    assert_eq!(v2, v1);
}

// ── Boundaries ───────────────────────────────────────────

#[tokio::test]
async fn period_equal_to_window_counts_as_covering() {
    let mut fx = Fixture::default();
    let l = fx.listing();
    fx.available(l, day("2024-03-01"), day("2024-03-07"));
    let engine = fx.engine(OverlapRule::Endpoints);

    let (v1, v2) = both(&engine, day("2024-03-01"), day("2024-03-07")).await;
    assert_eq!(v1, BTreeSet::from([l]));
    assert_eq!(v2, v1);

    // One day wider on either side no longer fits.
    let (v1, v2) = both(&engine, day("2024-02-29"), day("2024-03-07")).await;
    assert!(v1.is_empty() && v2.is_empty());
    let (v1, v2) = both(&engine, day("2024-03-01"), day("2024-03-08")).await;
    assert!(v1.is_empty() && v2.is_empty());
}

#[tokio::test]
async fn booking_touching_window_edge_disqualifies() {
    let mut fx = Fixture::default();
    let checkout_on_start = fx.listing();
    let checkin_on_end = fx.listing();
    let clear = fx.listing();
    for l in [checkout_on_start, checkin_on_end, clear] {
        fx.available(l, day("2024-01-01"), day("2024-12-31"));
    }
    fx.booking(checkout_on_start, day("2024-05-01"), day("2024-05-10"));
    fx.booking(checkin_on_end, day("2024-05-20"), day("2024-05-25"));
    fx.booking(clear, day("2024-05-21"), day("2024-05-25"));
    let engine = fx.engine(OverlapRule::Endpoints);

    let (v1, v2) = both(&engine, day("2024-05-10"), day("2024-05-20")).await;
    assert_eq!(v1, BTreeSet::from([clear]));
    assert_eq!(v2, v1);
}

#[tokio::test]
async fn overlapping_booking_excludes_regardless_of_periods() {
    let mut fx = Fixture::default();
    let l = fx.listing();
    // Many covering periods do not outweigh one conflicting booking.
    fx.available(l, day("2024-01-01"), day("2024-01-31"))
        .available(l, day("2023-12-01"), day("2024-02-28"))
        .available(l, day("2024-01-04"), day("2024-01-11"))
        .booking(l, day("2024-01-09"), day("2024-01-15"));
    let engine = fx.engine(OverlapRule::Endpoints);

    let (v1, v2) = both(&engine, day("2024-01-05"), day("2024-01-10")).await;
    assert!(v1.is_empty());
    assert!(v2.is_empty());
}

#[tokio::test]
async fn blocked_periods_are_ignored() {
    let mut fx = Fixture::default();
    let blocked_only = fx.listing();
    let mixed = fx.listing();
    fx.period(blocked_only, day("2024-01-01"), day("2024-01-31"), PeriodKind::Blocked);
    fx.period(mixed, day("2024-01-01"), day("2024-01-31"), PeriodKind::Blocked)
        .available(mixed, day("2024-01-01"), day("2024-01-31"));
    let engine = fx.engine(OverlapRule::Endpoints);

    let (v1, v2) = both(&engine, day("2024-01-05"), day("2024-01-10")).await;
    assert_eq!(v1, BTreeSet::from([mixed]));
    assert_eq!(v2, v1);
}

#[tokio::test]
async fn period_inside_window_is_not_a_cover() {
    // The double-`between` formulation would accept this period; containment does not.
    let mut fx = Fixture::default();
    let l = fx.listing();
    fx.available(l, day("2024-01-06"), day("2024-01-08"));
    let engine = fx.engine(OverlapRule::Endpoints);

    let (v1, v2) = both(&engine, day("2024-01-05"), day("2024-01-10")).await;
    assert!(v1.is_empty());
    assert!(v2.is_empty());
}

// ── Join regression: candidates minus disqualified ──────

#[tokio::test]
async fn join_excludes_candidates_with_bookings() {
    let mut fx = Fixture::default();
    let free = fx.listing();
    let booked = fx.listing();
    fx.available(free, day("2024-06-01"), day("2024-06-30"));
    fx.available(booked, day("2024-06-01"), day("2024-06-30"))
        .booking(booked, day("2024-06-12"), day("2024-06-14"));
    let engine = fx.engine(OverlapRule::Endpoints);

    let v2 = engine
        .get_all_by_date_v2(day("2024-06-10"), day("2024-06-15"))
        .await
        .unwrap();
    assert_eq!(ids(&v2), BTreeSet::from([free]));
}

#[tokio::test]
async fn join_disqualifies_on_either_endpoint() {
    let mut fx = Fixture::default();
    let start_inside = fx.listing();
    let end_inside = fx.listing();
    for l in [start_inside, end_inside] {
        fx.available(l, day("2024-06-01"), day("2024-06-30"));
    }
    fx.booking(start_inside, day("2024-06-14"), day("2024-06-20"));
    fx.booking(end_inside, day("2024-06-05"), day("2024-06-11"));
    let engine = fx.engine(OverlapRule::Endpoints);

    let (v1, v2) = both(&engine, day("2024-06-10"), day("2024-06-15")).await;
    assert!(v1.is_empty());
    assert!(v2.is_empty());
}

// ── Enclosing bookings ───────────────────────────────────

#[tokio::test]
async fn enclosing_booking_under_endpoint_rule_is_not_a_conflict() {
    let mut fx = Fixture::default();
    let l = fx.listing();
    fx.available(l, day("2024-01-01"), day("2024-01-31"))
        .booking(l, day("2024-01-02"), day("2024-01-20"));
    let engine = fx.engine(OverlapRule::Endpoints);

    let (v1, v2) = both(&engine, day("2024-01-05"), day("2024-01-10")).await;
    assert_eq!(v1, BTreeSet::from([l]));
    assert_eq!(v2, v1);
}

#[tokio::test]
async fn enclosing_booking_under_intersect_rule_is_a_conflict() {
    let mut fx = Fixture::default();
    let l = fx.listing();
    fx.available(l, day("2024-01-01"), day("2024-01-31"))
        .booking(l, day("2024-01-02"), day("2024-01-20"));
    let engine = fx.engine(OverlapRule::Intersects);

    let (v1, v2) = both(&engine, day("2024-01-05"), day("2024-01-10")).await;
    assert!(v1.is_empty());
    assert!(v2.is_empty());
}

// ── Cross-strategy consistency ───────────────────────────

/// Listings with every combination of period/booking placement around a
/// fixed grid, queried with every window on the grid.
fn grid_fixture() -> Fixture {
    let mut fx = Fixture::default();
    let points = [0, 2, 4, 6, 8];
    for (i, &ps) in points.iter().enumerate() {
        for &pe in &points[i..] {
            let l = fx.listing();
            fx.available(l, ps * D, pe * D);
            let k = fx.listing();
            fx.available(k, ps * D, pe * D);
            // Bookings drawn from the same grid, staggered by listing.
            let bs = (ps + pe) % 7;
            fx.booking(k, bs * D, (bs + 1) * D);
            let m = fx.listing();
            fx.period(m, ps * D, pe * D, PeriodKind::Blocked)
                .available(m, 0, 8 * D)
                .booking(m, ps * D, pe * D);
        }
    }
    fx
}

#[tokio::test]
async fn strategies_agree_on_grid() {
    let fx = grid_fixture();
    for rule in [OverlapRule::Endpoints, OverlapRule::Intersects] {
        let engine = fx.engine(rule);
        for qs in 0..=8 {
            for qe in qs..=8 {
                let (v1, v2) = both(&engine, qs * D, qe * D).await;
                assert_eq!(v1, v2, "window [{qs}, {qe}] under {rule:?}");
            }
        }
    }
}

#[tokio::test]
async fn strategies_agree_when_in_clause_is_chunked() {
    let fx = grid_fixture();
    let repos = Repositories::shared(fx.store());
    let scan = IntervalAvailabilityScanner::new(repos.listings.clone(), OverlapRule::Endpoints);
    let join = JoinAvailabilityResolver::new(
        repos.periods,
        repos.bookings,
        repos.listings,
        OverlapRule::Endpoints,
    )
    .with_in_clause_limit(3);

    for qs in 0..=8 {
        for qe in qs..=8 {
            let window = Window::new(qs * D, qe * D);
            let v1 = ids(&scan.resolve(window).await.unwrap());
            let v2 = ids(&join.resolve(window).await.unwrap());
            assert_eq!(v1, v2, "window [{qs}, {qe}]");
        }
    }
}

#[tokio::test]
async fn repeated_calls_are_idempotent() {
    let fx = grid_fixture();
    let engine = fx.engine(OverlapRule::Endpoints);
    let first = both(&engine, 2 * D, 4 * D).await;
    for _ in 0..3 {
        assert_eq!(both(&engine, 2 * D, 4 * D).await, first);
    }
}

#[tokio::test]
async fn concurrent_calls_share_nothing() {
    let fx = grid_fixture();
    let engine = Arc::new(fx.engine(OverlapRule::Endpoints));
    let expected = ids(&engine.get_all_by_date_v1(2 * D, 6 * D).await.unwrap());

    let mut handles = Vec::new();
    for i in 0..16 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let strategy = if i % 2 == 0 { Strategy::Scan } else { Strategy::Join };
            engine.get_all_by_date_with(strategy, 2 * D, 6 * D).await
        }));
    }
    for handle in handles {
        let listings = handle.await.unwrap().unwrap();
        assert_eq!(ids(&listings), expected);
    }
}

// ── Dispatch ─────────────────────────────────────────────

#[tokio::test]
async fn default_strategy_is_used() {
    let mut fx = Fixture::default();
    let l = fx.listing();
    fx.available(l, 0, 10 * D);
    let engine = AvailabilityEngine::new(
        Repositories::shared(fx.store()),
        OverlapRule::Endpoints,
        Strategy::Join,
    );
    assert_eq!(engine.default_strategy(), Strategy::Join);
    assert_eq!(engine.resolver(Strategy::Scan).strategy(), Strategy::Scan);
    assert_eq!(engine.resolver(Strategy::Join).strategy(), Strategy::Join);

    let listings = engine.get_all_by_date(D, 2 * D).await.unwrap();
    assert_eq!(ids(&listings), BTreeSet::from([l]));
}

// ── Invalid windows ──────────────────────────────────────

#[tokio::test]
async fn start_after_end_is_invalid() {
    let engine = Fixture::default().engine(OverlapRule::Endpoints);
    for strategy in [Strategy::Scan, Strategy::Join] {
        let result = engine
            .get_all_by_date_with(strategy, day("2024-01-10"), day("2024-01-05"))
            .await;
        assert!(matches!(result, Err(EngineError::InvalidArgument(_))));
    }
}

#[test]
fn window_validation_limits() {
    assert_ok!(validate_window(0, 0));
    assert_err!(validate_window(-1, 10));
    assert_err!(validate_window(0, MAX_VALID_TIMESTAMP_MS + 1));
    assert_err!(validate_window(0, MAX_QUERY_WINDOW_MS + 1));
    assert_eq!(validate_window(5, 9).unwrap(), Window::new(5, 9));
}

// ── Repository failures ──────────────────────────────────

/// Wraps a store, counting calls per operation and failing one on demand.
struct Probe {
    store: Arc<InMemoryStore>,
    fail: Option<&'static str>,
    documents: AtomicUsize,
    listings: AtomicUsize,
    periods: AtomicUsize,
    bookings: AtomicUsize,
}

impl Probe {
    fn new(store: Arc<InMemoryStore>, fail: Option<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            store,
            fail,
            documents: AtomicUsize::new(0),
            listings: AtomicUsize::new(0),
            periods: AtomicUsize::new(0),
            bookings: AtomicUsize::new(0),
        })
    }

    fn check(&self, op: &'static str, counter: &AtomicUsize) -> Result<(), RepoError> {
        counter.fetch_add(1, Ordering::SeqCst);
        if self.fail == Some(op) {
            return Err(RepoError::Unavailable(format!("{op} offline")));
        }
        Ok(())
    }
}

#[async_trait]
impl ListingRepository for Probe {
    async fn find_all_documents(&self) -> Result<Vec<ListingDocument>, RepoError> {
        self.check("documents", &self.documents)?;
        self.store.find_all_documents().await
    }

    async fn find_listings(&self, filter: &Filter<ListingField>) -> Result<Vec<Listing>, RepoError> {
        self.check("listings", &self.listings)?;
        self.store.find_listings(filter).await
    }
}

#[async_trait]
impl PeriodRepository for Probe {
    async fn find_periods(&self, filter: &Filter<PeriodField>) -> Result<Vec<Period>, RepoError> {
        self.check("periods", &self.periods)?;
        self.store.find_periods(filter).await
    }
}

#[async_trait]
impl BookingRepository for Probe {
    async fn find_bookings(&self, filter: &Filter<BookingField>) -> Result<Vec<Booking>, RepoError> {
        self.check("bookings", &self.bookings)?;
        if self.fail == Some("slow_bookings") {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        self.store.find_bookings(filter).await
    }
}

fn populated() -> Fixture {
    let mut fx = Fixture::default();
    for _ in 0..5 {
        let l = fx.listing();
        fx.available(l, 0, 30 * D);
    }
    fx
}

#[tokio::test]
async fn scan_failure_is_terminal() {
    let probe = Probe::new(populated().store(), Some("documents"));
    let engine = AvailabilityEngine::new(Repositories::shared(probe), OverlapRule::Endpoints, Strategy::Scan);
    let result = engine.get_all_by_date_v1(D, 2 * D).await;
    assert!(matches!(
        result,
        Err(EngineError::Repository(RepoError::Unavailable(_)))
    ));
}

#[tokio::test]
async fn join_failure_at_any_step_is_terminal() {
    for op in ["periods", "bookings", "listings"] {
        let probe = Probe::new(populated().store(), Some(op));
        let engine =
            AvailabilityEngine::new(Repositories::shared(probe), OverlapRule::Endpoints, Strategy::Join);
        let result = engine.get_all_by_date_v2(D, 2 * D).await;
        assert!(
            matches!(result, Err(EngineError::Repository(RepoError::Unavailable(_)))),
            "failure in {op} must fail the call"
        );
    }
}

#[tokio::test]
async fn join_skips_later_steps_without_candidates() {
    let probe = Probe::new(populated().store(), None);
    let engine = AvailabilityEngine::new(
        Repositories::shared(probe.clone()),
        OverlapRule::Endpoints,
        Strategy::Join,
    );
    // Window outside every period.
    let listings = engine.get_all_by_date_v2(40 * D, 41 * D).await.unwrap();
    assert!(listings.is_empty());
    assert_eq!(probe.periods.load(Ordering::SeqCst), 1);
    assert_eq!(probe.bookings.load(Ordering::SeqCst), 0);
    assert_eq!(probe.listings.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn join_queries_bookings_once_per_chunk() {
    let probe = Probe::new(populated().store(), None);
    let repos = Repositories::shared(probe.clone());
    let join = JoinAvailabilityResolver::new(
        repos.periods,
        repos.bookings,
        repos.listings,
        OverlapRule::Endpoints,
    )
    .with_in_clause_limit(2);

    let listings = join.resolve(Window::new(D, 2 * D)).await.unwrap();
    assert_eq!(listings.len(), 5);
    assert_eq!(probe.periods.load(Ordering::SeqCst), 1);
    assert_eq!(probe.bookings.load(Ordering::SeqCst), 3); // 2 + 2 + 1
    assert_eq!(probe.listings.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn scan_never_touches_per_collection_finds() {
    let probe = Probe::new(populated().store(), None);
    let engine = AvailabilityEngine::new(
        Repositories::shared(probe.clone()),
        OverlapRule::Endpoints,
        Strategy::Scan,
    );
    engine.get_all_by_date_v1(D, 2 * D).await.unwrap();
    assert_eq!(probe.documents.load(Ordering::SeqCst), 1);
    assert_eq!(probe.periods.load(Ordering::SeqCst), 0);
    assert_eq!(probe.bookings.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn slow_step_times_out_the_call() {
    let probe = Probe::new(populated().store(), Some("slow_bookings"));
    let repos = Repositories::shared(probe).with_timeout(Duration::from_millis(20));
    let engine = AvailabilityEngine::new(repos, OverlapRule::Endpoints, Strategy::Join);

    let err = engine.get_all_by_date_v2(D, 2 * D).await.unwrap_err();
    assert!(err.is_timeout(), "expected timeout, got {err}");
}
