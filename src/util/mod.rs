//! # Utilities

pub mod hash;

pub use hash::{hash_combine, hash_combine_all, ContentHash};
