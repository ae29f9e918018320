//! GlobeStream - streaming resource and tile engine for virtual-globe maps
//!
//! This library covers the data side of a map client: fetching tiled
//! resources over HTTP, caching them on disk, decoding them, keeping their
//! memory footprint under a budget, and walking the quadtree each frame to
//! decide what is worth drawing and what is worth fetching next.
//!
//! The work splits across two ticks. The render thread runs
//! [`Traversal::traverse`] plus [`ResourceManager::render_tick`] every frame;
//! a data thread loops [`ResourceManager::data_tick`], which dispatches
//! fetches, applies completions, and decodes payloads.

pub mod cache;
pub mod config;
pub mod fetcher;
pub mod geometry;
pub mod logging;
pub mod manager;
pub mod resources;
pub mod stats;
pub mod traversal;

pub use config::MapOptions;
pub use logging::init_logging;
pub use fetcher::{FetchReply, FetchTask, Fetcher, HttpFetcher};
pub use manager::ResourceManager;
pub use resources::{Resource, ResourceState, ResourceType};
pub use stats::{MapStatistics, StatsSnapshot};
pub use traversal::{Camera, DrawTask, Traversal};
