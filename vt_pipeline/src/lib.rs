//! Photo acquisition for pins.
//!
//! A new pin learns how many result pages exist around it (once), loads its
//! initial page, turns every result into a persisted [`vt_core::Photo`] and
//! downloads each photo's image into the cache in the background. A refresh
//! ("new collection") cycles forward through the pages and replaces the pin's
//! photos in one save.
//!
//! All of this goes through [`Pipeline`]. Per-pin ordering is enforced by a
//! single-writer actor per pin; deleting a pin cancels everything it still
//! has in flight.

mod acquisition;
mod actor;
mod api;

pub use acquisition::{Acquisition, DownloadSummary, InitialPage, PipelineConfig, materialize};
pub use api::Pipeline;
