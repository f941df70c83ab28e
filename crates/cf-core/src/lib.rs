//! campus-feed/crates/cf-core/src/lib.rs
//!
//! Domain models, port traits and errors shared by every campus-feed crate.

pub mod error;
pub mod models;
pub mod paths;
pub mod traits;

// Re-exporting for easier access in other crates
pub use error::*;
pub use models::*;
pub use traits::*;
