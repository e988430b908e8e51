//! Key management for the Access Point

pub mod registry;

pub use registry::KeyRegistry;
