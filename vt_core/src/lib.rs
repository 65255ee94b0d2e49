//! Core virtual tourist types and traits.
//!
//! This crate defines the shared types and traits used by all `vt_*` crates.
//!
//! ## Domain types
//!
//! - Geographic coordinates (`geo::Coordinates`)
//! - Pins and their pagination state (`pin::Pin`, `pin::PinId`)
//! - Photo descriptors, photo records and cache keys (`photo::PhotoDescriptor`,
//!   `photo::Photo`, `photo::CacheKey`)
//! - Search results (`page::Page`, `page::Discovery`)
//! - The error taxonomy shared by the search client and the orchestrator
//!   (`error::FetchError` and friends)
//!
//! ## Collaborator seams
//!
//! - Byte storage tiers (`Store`) and the two-tier `ImageCache` facade built on
//!   top of them
//! - Durable Pin/Photo persistence (`RecordStore`) and its change events
//!
//! Implementations live in separate crates: `vt_cache_memory` and
//! `vt_cache_local` for the cache tiers, `vt_records_memory` and
//! `vt_records_redb` for records.

pub mod cache;
pub mod error;
pub mod geo;
pub mod page;
pub mod photo;
pub mod pin;
pub mod records;
pub mod store;

// Test utilities (behind feature flag)
#[cfg(feature = "testutil")]
pub mod testutil;

pub use cache::{CacheNamespace, ImageCache};
pub use error::{FetchError, NetworkError, ParseError};
pub use geo::Coordinates;
pub use page::{Discovery, Page, PartialPageError};
pub use photo::{CacheKey, InvalidCacheKey, Photo, PhotoDescriptor, PhotoId};
pub use pin::{Pin, PinId};
pub use records::{RecordEvent, RecordRef, RecordStore};
pub use store::{Store, StoreError, StoreFeatures, StoreResult};
