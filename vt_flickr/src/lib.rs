//! Flickr photo search and photo asset downloads.
//!
//! - [`QueryBuilder`] assembles `flickr.photos.search` parameters.
//! - [`HttpFetch`] is the one-shot GET seam; [`ReqwestFetch`] implements it.
//! - [`FlickrSearch`] implements [`PhotoSearch`] on top of both, decoding
//!   responses with [`response`].
//! - [`Downloader`] fetches individual photo assets into the image cache,
//!   each download behind a cancellable [`DownloadHandle`].

pub mod client;
pub mod download;
pub mod query;
pub mod response;
pub mod search;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use client::{HttpFetch, ReqwestFetch};
pub use download::{DownloadHandle, DownloadPolicy, Downloader};
pub use query::{ParameterSet, QueryBuilder, SearchConfig};
pub use search::{FlickrSearch, PhotoSearch};
