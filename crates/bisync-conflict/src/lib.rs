//! Bisync Conflict - Merging per-side changes into an action plan
//!
//! Provides:
//! - The per-path rule table that turns two change sets into actions
//! - Keep-both conflict naming with collision avoidance
//! - The path1-authoritative plan used when rebuilding history (resync)

pub mod error;
pub mod namer;
pub mod resolver;

pub use error::ConflictError;
pub use namer::ConflictNamer;
pub use resolver::ConflictResolver;
