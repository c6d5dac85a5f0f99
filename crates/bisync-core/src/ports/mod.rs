//! Port definitions (hexagonal architecture interfaces)
//!
//! Ports are interfaces that the engine depends on, but whose
//! implementations live in adapter code.
//!
//! ## Ports Overview
//!
//! - [`ITreeBackend`] - Listing and transfer primitives for one side's tree

pub mod tree_backend;

pub use tree_backend::ITreeBackend;
