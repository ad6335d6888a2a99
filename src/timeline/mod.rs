//! Layered composition of clips and effects over time

pub mod clip;
#[allow(clippy::module_inception)]
pub mod timeline;

pub use clip::Clip;
pub use timeline::Timeline;
