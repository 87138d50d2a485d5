//! # Vigil Engine
//!
//! The runtime heart of the session supervisor:
//!
//! - `trust`: composite trust scoring over behavioral, temporal,
//!   contextual, historical, and anomaly-frequency signals
//! - `verifier`: session token validity and continuous reverification
//! - `actions`: execution of recommended security actions
//!
//! Every calculation runs against one store snapshot and takes an
//! injected clock, so results are reproducible under frozen time and
//! concurrent calculations for the same session serialise on the store.

pub mod actions;
pub mod trust;
pub mod verifier;

pub use actions::{execute_action, ActionResult};
pub use trust::{TrustComponents, TrustEngine, TrustReport, TrustTrend};
pub use verifier::{SessionVerifier, TrustVerification, VerificationReport};
