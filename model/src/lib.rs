//! # Vigil Model
//!
//! The per-user anomaly model: an ensemble of three complementary
//! one-class detectors over standardized session feature vectors.
//!
//! - `scaler`: per-feature standardization fitted at training time
//! - `iforest` / `ocsvm` / `lof`: the detectors (partition depth,
//!   kernelised boundary, local density)
//! - `ensemble`: score normalisation, weighting, confidence, attribution
//! - `bundle`: the versioned persisted artifact, one file per user
//! - `train`: the training pipeline and batch sweep
//! - `predictor`: process-wide lazy cache serving predictions
//!
//! Training and prediction are deterministic for a given event history:
//! the forest is seeded and everything else is closed-form.

pub mod bundle;
pub mod ensemble;
pub mod iforest;
pub mod lof;
pub mod ocsvm;
pub mod predictor;
pub mod scaler;
pub mod train;

pub use bundle::{bundle_path, Detectors, ModelBundle};
pub use ensemble::Prediction;
pub use predictor::{ModelStatus, Predictor};
pub use train::{train_missing_models, train_user, BatchTrainingReport, TrainingReport};
