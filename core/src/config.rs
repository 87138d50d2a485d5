//! Immutable runtime configuration.
//!
//! All weights, thresholds, and decay rates the engine uses are loaded
//! once at startup from a TOML file and shared read-only afterwards.
//! A missing file yields the built-in defaults, which match the
//! documented engine constants.

use crate::error::{Result, VigilError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Weights for the five trust components. Should sum to 1.0; the engine
/// divides by the actual sum so drift in a hand-edited file degrades
/// gracefully instead of shifting the score range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustWeights {
    pub behavioral: f64,
    pub temporal: f64,
    pub context: f64,
    pub historical: f64,
    pub anomaly_freq: f64,
}

impl Default for TrustWeights {
    fn default() -> Self {
        Self {
            behavioral: 0.4,
            temporal: 0.2,
            context: 0.15,
            historical: 0.15,
            anomaly_freq: 0.1,
        }
    }
}

impl TrustWeights {
    pub fn sum(&self) -> f64 {
        self.behavioral + self.temporal + self.context + self.historical + self.anomaly_freq
    }
}

/// Anomaly-score boundaries for the risk bands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            low: 0.3,
            medium: 0.6,
            high: 0.8,
        }
    }
}

/// Ensemble weights for the three one-class detectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelWeights {
    pub iforest: f64,
    pub ocsvm: f64,
    pub lof: f64,
}

impl Default for ModelWeights {
    fn default() -> Self {
        Self {
            iforest: 0.4,
            ocsvm: 0.3,
            lof: 0.3,
        }
    }
}

/// Trust decay rates. `idle` is applied per minute of inactivity before
/// each recalculation; `max_per_update` caps how far a single update may
/// drop the stored score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecayConfig {
    pub idle: f64,
    pub anomaly: f64,
    pub recovery: f64,
    pub max_per_update: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            idle: 0.05,
            anomaly: 0.3,
            recovery: 0.1,
            max_per_update: 0.2,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub trust_weights: TrustWeights,
    pub risk_thresholds: RiskThresholds,
    pub model_weights: ModelWeights,
    pub decay: DecayConfig,
    /// Hard session age cap in hours.
    pub session_timeout_h: i64,
    /// Directory holding per-user model bundles.
    pub model_dir: PathBuf,
    /// SQLite database path.
    pub database_path: PathBuf,
    /// HTTP/WebSocket bind address.
    pub bind_addr: String,
    /// HMAC secret for bearer tokens.
    pub token_secret: String,
    /// Bearer token lifetime in minutes.
    pub token_expiry_min: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vigil");
        Self {
            trust_weights: TrustWeights::default(),
            risk_thresholds: RiskThresholds::default(),
            model_weights: ModelWeights::default(),
            decay: DecayConfig::default(),
            session_timeout_h: 24,
            model_dir: data_dir.join("models"),
            database_path: data_dir.join("vigil.db"),
            bind_addr: "0.0.0.0:8000".to_string(),
            token_secret: "change-me-in-production".to_string(),
            token_expiry_min: 30,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file, falling back to defaults
    /// when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)
            .map_err(|e| VigilError::Config(format!("failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot operate under.
    pub fn validate(&self) -> Result<()> {
        if self.trust_weights.sum() <= 0.0 {
            return Err(VigilError::Config(
                "trust_weights must have a positive sum".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.decay.max_per_update) {
            return Err(VigilError::Config(
                "decay.max_per_update must be within [0, 1]".to_string(),
            ));
        }
        if self.session_timeout_h <= 0 {
            return Err(VigilError::Config(
                "session_timeout_h must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
