//! Error types for session configuration.

use std::fmt::{Display, Formatter};

/// A configuration value the session store cannot work with.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Product keys are lowercase ASCII words that do not clash with a
    /// reserved session field.
    InvalidProductKey { key: String },
    /// Sample rates are percentages.
    InvalidSampleRate { rate: f64 },
    UnknownExperimentalFeature { name: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidProductKey { key } => write!(f, "invalid product key: '{}'", key),
            Self::InvalidSampleRate { rate } => {
                write!(f, "sample rate must be between 0 and 100, got {}", rate)
            }
            Self::UnknownExperimentalFeature { name } => {
                write!(f, "unknown experimental feature: '{}'", name)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
