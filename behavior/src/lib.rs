//! # Vigil Behavior
//!
//! Deterministic feature extraction for the continuous-authentication
//! pipeline. Three stages:
//!
//! - `keystroke`: raw key records -> dwell/flight/rhythm features
//! - `pointer`: raw pointer records -> velocity/path/click features
//! - `aggregate`: per-session event stream -> fixed-vocabulary vector
//!
//! All functions here are pure: same input, same output, no clocks and
//! no I/O. That property is what makes anomaly scores reproducible and
//! the extractors testable in isolation.

pub mod aggregate;
pub mod keystroke;
pub mod pointer;
pub mod stats;

pub use aggregate::SessionFeatureExtractor;
pub use keystroke::{behavioral_signature, RawKeystroke};
pub use pointer::RawPointerEvent;
