//! Verge Feed - normalized JSON over The Verge's RSS feed
//!
//! Every request re-fetches the feed, normalizes its entries into articles,
//! and returns them newest first. A small HTML page consumes the listing.

pub mod config;
pub mod fetcher;
pub mod normalizer;
pub mod query;
pub mod routes;
pub mod timestamp;
