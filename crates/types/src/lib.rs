//! Foundational types for the vmap virtual merkle map.
//!
//! This crate is self-contained with minimal dependencies. It does not depend
//! on any other workspace crates, making it the foundation layer.

#![warn(missing_docs)]

mod hash;

pub use hash::{Hash, HexError};
