use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage};
use ulid::Ulid;

use vacancy::catalog::Catalog;
use vacancy::engine::AvailabilityEngine;
use vacancy::model::{OverlapRule, Strategy};
use vacancy::repo::Repositories;
use vacancy::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server(default_strategy: Strategy) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("vacancy_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let catalog = Arc::new(Catalog::open(dir.join("catalog.wal")).unwrap());
    let repos = Repositories::shared(catalog.store()).with_timeout(Duration::from_secs(5));
    let engine = Arc::new(AvailabilityEngine::new(repos, OverlapRule::Endpoints, default_strategy));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let catalog = catalog.clone();
            let engine = engine.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, catalog, engine, "vacancy".to_string(), None).await;
            });
        }
    });

    addr
}

async fn connect(addr: SocketAddr) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("vacancy")
        .user("vacancy")
        .password("vacancy");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

/// Values of `column` across the data rows of a simple query.
async fn column(client: &tokio_postgres::Client, sql: &str, column: &str) -> Vec<String> {
    let mut values: Vec<String> = client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|msg| match msg {
            SimpleQueryMessage::Row(row) => row.get(column).map(str::to_string),
            _ => None,
        })
        .collect();
    values.sort();
    values
}

struct Seeded {
    free: Ulid,
    booked: Ulid,
    uncovered: Ulid,
}

/// Three listings around the window 2024-01-05..2024-01-10:
/// `free` is covered and unbooked, `booked` is covered but has a booking
/// starting inside the window, `uncovered` has a period ending too early.
async fn seed(client: &tokio_postgres::Client) -> Seeded {
    let seeded = Seeded {
        free: Ulid::new(),
        booked: Ulid::new(),
        uncovered: Ulid::new(),
    };
    let Seeded { free, booked, uncovered } = seeded;
    client
        .batch_execute(&format!(
            "INSERT INTO listings (id, name) VALUES ('{free}', 'Free');
             INSERT INTO listings (id, name) VALUES ('{booked}', 'Booked');
             INSERT INTO listings (id, name) VALUES ('{uncovered}', 'Uncovered');
             INSERT INTO periods (id, listing_id, start_date, end_date) VALUES ('{}', '{free}', '2024-01-01', '2024-01-31');
             INSERT INTO periods (id, listing_id, start_date, end_date) VALUES ('{}', '{booked}', '2024-01-01', '2024-01-31');
             INSERT INTO periods (id, listing_id, start_date, end_date) VALUES ('{}', '{uncovered}', '2024-01-01', '2024-01-08');
             INSERT INTO bookings (id, listing_id, start, \"end\", label) VALUES ('{}', '{booked}', '2024-01-09', '2024-01-15', 'Okafor');",
            Ulid::new(),
            Ulid::new(),
            Ulid::new(),
            Ulid::new(),
        ))
        .await
        .unwrap();
    seeded
}

const WINDOW: &str = "start_date = '2024-01-05' AND end_date = '2024-01-10'";

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn both_strategies_agree_over_the_wire() {
    let addr = start_test_server(Strategy::Scan).await;
    let client = connect(addr).await;
    let s = seed(&client).await;

    let v1 = column(&client, &format!("SELECT * FROM available_listings_v1 WHERE {WINDOW}"), "id").await;
    let v2 = column(&client, &format!("SELECT * FROM available_listings_v2 WHERE {WINDOW}"), "id").await;
    assert_eq!(v1, vec![s.free.to_string()]);
    assert_eq!(v1, v2);

    let names = column(&client, &format!("SELECT * FROM available_listings WHERE {WINDOW}"), "name").await;
    assert_eq!(names, vec!["Free".to_string()]);

    // Neither excluded listing sneaks in under the explicit strategy filter.
    let joined = column(
        &client,
        &format!("SELECT * FROM available_listings WHERE {WINDOW} AND strategy = 'join'"),
        "id",
    )
    .await;
    assert!(!joined.contains(&s.booked.to_string()));
    assert!(!joined.contains(&s.uncovered.to_string()));
}

#[tokio::test]
async fn cancelling_a_booking_frees_the_listing() {
    let addr = start_test_server(Strategy::Join).await;
    let client = connect(addr).await;
    let s = seed(&client).await;

    let bookings = column(
        &client,
        &format!("SELECT * FROM bookings WHERE listing_id = '{}'", s.booked),
        "id",
    )
    .await;
    assert_eq!(bookings.len(), 1);
    client
        .batch_execute(&format!("DELETE FROM bookings WHERE id = '{}'", bookings[0]))
        .await
        .unwrap();

    let available = column(&client, &format!("SELECT * FROM available_listings WHERE {WINDOW}"), "id").await;
    let mut expected = vec![s.free.to_string(), s.booked.to_string()];
    expected.sort();
    assert_eq!(available, expected);
}

#[tokio::test]
async fn catalog_tables_round_trip() {
    let addr = start_test_server(Strategy::Scan).await;
    let client = connect(addr).await;
    let s = seed(&client).await;

    assert_eq!(column(&client, "SELECT * FROM listings", "id").await.len(), 3);
    let kinds = column(
        &client,
        &format!("SELECT * FROM periods WHERE listing_id = '{}'", s.uncovered),
        "type",
    )
    .await;
    assert_eq!(kinds, vec!["available".to_string()]);
    let labels = column(&client, "SELECT * FROM bookings", "label").await;
    assert_eq!(labels, vec!["Okafor".to_string()]);

    client
        .batch_execute(&format!("DELETE FROM listings WHERE id = '{}'", s.booked))
        .await
        .unwrap();
    assert_eq!(column(&client, "SELECT * FROM listings", "id").await.len(), 2);
    assert!(column(&client, "SELECT * FROM bookings", "id").await.is_empty());
}

#[tokio::test]
async fn extended_protocol_binds_dates() {
    let addr = start_test_server(Strategy::Scan).await;
    let client = connect(addr).await;
    let s = seed(&client).await;

    let rows = client
        .query(
            "SELECT * FROM available_listings_v2 WHERE start_date = $1 AND end_date = $2",
            &[&"2024-01-05", &"2024-01-10"],
        )
        .await
        .unwrap();
    let ids: Vec<String> = rows.iter().map(|r| r.get::<_, String>("id")).collect();
    assert_eq!(ids, vec![s.free.to_string()]);
}

#[tokio::test]
async fn errors_carry_sqlstate() {
    let addr = start_test_server(Strategy::Scan).await;
    let client = connect(addr).await;

    let code = |e: tokio_postgres::Error| e.code().map(|c| c.code().to_string());

    let reversed = client
        .simple_query("SELECT * FROM available_listings WHERE start_date = '2024-01-10' AND end_date = '2024-01-05'")
        .await
        .err()
        .expect("query should fail");
    assert_eq!(code(reversed).as_deref(), Some("22023"));

    let missing = client
        .simple_query("SELECT * FROM available_listings WHERE start_date = '2024-01-10'")
        .await
        .err()
        .expect("query should fail");
    assert_eq!(code(missing).as_deref(), Some("42601"));

    let unknown = client
        .simple_query(&format!("DELETE FROM bookings WHERE id = '{}'", Ulid::new()))
        .await
        .err()
        .expect("query should fail");
    assert_eq!(code(unknown).as_deref(), Some("P0001"));
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let addr = start_test_server(Strategy::Scan).await;
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .user("vacancy")
        .password("not-the-password");
    assert!(config.connect(NoTls).await.is_err());
}
