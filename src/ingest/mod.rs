//! Market and trade ingestion from the public data APIs.

pub mod client;
pub mod worker;

pub use client::FeedClient;
