//! Compute layer: geohash and geometry primitives plus input validation.
//!
//! Independent of storage; the table and statistics modules build on it.

pub mod geohash;
pub mod geometry;
pub mod validation;

pub use self::geohash::{Rasterization, rasterize};
