//! Batch sentiment and keyword analysis over discussion threads.
//!
//! A [`batch::BatchCoordinator`] analyses every document of a
//! [`store::DocumentStore`] in parallel and folds the results into a
//! [`models::CorpusAggregate`]. A [`cache::ResultCache`] keeps the latest
//! aggregate in memory and on disk, and [`api`] serves it over HTTP.

pub mod analyzer;
pub mod api;
pub mod batch;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod persist;
pub mod scorer;
pub mod store;
pub mod tally;

#[cfg(test)]
mod testing;
