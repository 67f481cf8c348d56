//! Polls real-estate search pages and streams listings that were not seen before.

pub mod config;
pub mod models;
pub mod monitoring;
pub mod scrapers;
pub mod storage;

#[cfg(test)]
mod testing;

pub use config::Settings;
pub use models::ListingRecord;
