//! In-process request monitoring.
//!
//! `RequestSampler` keeps the last 1000 request samples and the last 100
//! security notes in memory. Statistics are computed on demand by scanning
//! the window; nothing is exported.

pub mod sampler;

pub use sampler::RequestSampler;
