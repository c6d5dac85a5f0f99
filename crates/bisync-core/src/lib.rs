//! Bisync Core - Domain logic and business rules
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `PathListing`, `Change`, `Action`, `Conflict`, `RunState`
//! - **Port definitions** - `ITreeBackend`, implemented by storage adapters
//! - **Configuration** - YAML-backed `Config` with validation and a builder
//!
//! # Architecture
//!
//! The domain module contains pure data and rules with no I/O.
//! Ports define trait interfaces that adapters implement.
//! The engine crate orchestrates domain values through those ports.

pub mod config;
pub mod domain;
pub mod ports;
