//! Venue event discovery: resolve a venue to the adapter for its source
//! family, preview candidate events cheaply, then scrape the selected ones
//! into normalized [`DiscoveredEvent`] records for the import backend.

pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod import;
pub mod logging;
pub mod models;
pub mod normalize;
pub mod progress;
pub mod scraping;
pub mod utils;

pub use config::{EngineConfig, Timeouts, VenueRoster};
pub use engine::DiscoveryEngine;
pub use error::{DiscoveryError, PartialExtractionFailure};
pub use import::{ImportClient, ImportError, ImportReport, MessageKind};
pub use models::{BatchPreviewResult, DiscoveredEvent, PreviewEvent, SourceFamily, VenueConfig};
pub use progress::{ProgressFn, ScrapePhase, ScrapeProgress};
