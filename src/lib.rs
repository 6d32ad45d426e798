//! A persistent image asset cache made of two stores.
//!
//! Binaries live in an asynchronous key to binary store, their metadata as
//! JSON records in a small synchronous key value store. `AssetCache` is the
//! only thing callers need to touch.

#[macro_use]
extern crate tracing;

pub mod asset;
pub mod cache;
pub mod config;
pub mod controller;
pub mod error;
pub mod eviction;
pub mod index;
pub mod journal;
pub mod storage;
mod utils;


pub use asset::{AssetMetadata, BinaryAsset};
pub use config::CacheConfig;
pub use controller::{AssetCache, CacheOptions, CacheStats, ImageStats};
pub use error::StoreError;
pub use journal::ReconcileReport;
