pub mod auth;
pub mod catalog;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod filter;
pub mod limits;
pub mod model;
pub mod observability;
pub mod repo;
pub mod seed;
pub mod sql;
pub mod tls;
pub mod wal;
pub mod wire;
