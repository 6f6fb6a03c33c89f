//! Data sources that produce raw resources for the cache.

mod rest;

pub use rest::{Document, RestSource};
