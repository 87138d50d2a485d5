//! # Vigil Core
//!
//! The core crate provides the domain model shared by every other crate
//! in the Vigil continuous-authentication engine:
//!
//! - Persistent rows: users, sessions, behavioral events, behavioral profiles
//! - Trust levels, security actions, and risk classifications
//! - The closed feature vocabulary and fixed-length vector assembly
//! - Immutable runtime configuration (weights, thresholds, decay rates)
//! - The shared error type for all crates
//!
//! ## Design constraints
//!
//! - All types are plain data: no I/O, no clocks, no hidden state
//! - Score-to-level mappings are total functions over [0, 1]
//! - Configuration is loaded once at startup and never mutated

pub mod config;
pub mod error;
pub mod types;
pub mod vocabulary;

// Re-export main types for convenience
pub use config::EngineConfig;
pub use error::{Result, VigilError};
pub use types::*;
pub use vocabulary::{
    feature_index, feature_vocabulary, is_event_feature, vector_from_map, FEATURE_COUNT,
};
