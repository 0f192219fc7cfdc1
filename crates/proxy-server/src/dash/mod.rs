//! DASH awareness: manifest ladders, throughput estimation and segment
//! path handling.

pub mod bandwidth;
pub mod manifest;
pub mod segment;

pub use bandwidth::BandwidthEstimator;
pub use manifest::{ManifestEngine, Representation};
pub use segment::RequestClass;

use std::time::Instant;

/// The most recently parsed manifest and where it was fetched from.
///
/// Segment substitutions are resolved against this origin and directory.
#[derive(Debug)]
pub struct LoadedManifest {
    pub engine: ManifestEngine,
    pub host: String,
    pub port: u16,
    pub base_dir: String,
    pub loaded_at: Instant,
}
