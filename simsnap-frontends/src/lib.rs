//! Concrete frontends for `simsnap`.
//!
//! `StreamFrontend` describes data already in memory and is opened in two phases.
//! `JsonFrontend` reads a JSON parameter file from disk and goes through the identity cache.
//!
mod json;
mod stream;

pub use json::JsonFrontend;

pub use stream::StreamField;
pub use stream::StreamFrontend;
pub use stream::StreamIndex;
pub use stream::StreamParticleIo;
