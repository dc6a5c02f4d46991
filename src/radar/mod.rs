//! Radar interface types: CFAR detections and tracked landmarks.
//!
//! Detection and clustering run in an external front end; only the
//! resulting types cross into the estimation core, attached to
//! propagation splits.

pub mod detection;
pub mod track;

pub use detection::RadarDetection;
pub use track::{Track, TrackHandle};
