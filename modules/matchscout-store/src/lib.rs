//! Postgres persistence for the crawl coordinator.
//!
//! Four durable tables: `accounts` (the BFS frontier and per-phase state),
//! `hero_stats` (authoritative per-account performance totals), `hero_top100`
//! (the capped top-performer cache the leaderboards read), and
//! `scheduler_meta` (the persisted dispatch counter). Everything else is
//! derived per request.

pub mod accounts;
pub mod error;
pub mod progress;
pub mod schema;
pub mod stats;
pub mod submissions;

pub use error::{Result, StoreError};
