//! Tunables for the quantum mechanics, loaded from JSON and/or environment.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Prefix for environment overrides, e.g. `QUANTUM_CHESS_MAX_SUPERPOSITION_DURATION=4`.
pub const ENV_PREFIX: &str = "QUANTUM_CHESS_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Engine configuration. Every field falls back to its default when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Turns a superposition may live before it is force-collapsed.
    pub max_superposition_duration: u32,
    /// Probability that a cascaded partner lands on the correlated square.
    pub entanglement_correlation_strength: f64,
    /// Upper bound on simultaneous links per piece.
    pub max_entangled_partners: usize,
    /// Manhattan distance beyond which an entanglement dissolves.
    pub entanglement_max_distance: u32,
    /// Voluntary observations granted at the start of each colour's turn.
    pub observations_per_turn: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_superposition_duration: 3,
            entanglement_correlation_strength: 0.7,
            max_entangled_partners: 2,
            entanglement_max_distance: 3,
            observations_per_turn: 1,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
        Self::from_json_str(&raw)
    }

    /// Applies `QUANTUM_CHESS_*` variables from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(std::env::vars())
    }

    /// Applies `QUANTUM_CHESS_*` style key/value pairs; other keys are ignored.
    pub fn with_overrides<I, K, V>(mut self, vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(field) = key.as_ref().strip_prefix(ENV_PREFIX) else { continue };
            let field = field.to_ascii_lowercase();
            let value = value.as_ref().trim();
            match field.as_str() {
                "max_superposition_duration" => self.max_superposition_duration = parse_field(&field, value)?,
                "entanglement_correlation_strength" => self.entanglement_correlation_strength = parse_field(&field, value)?,
                "max_entangled_partners" => self.max_entangled_partners = parse_field(&field, value)?,
                "entanglement_max_distance" => self.entanglement_max_distance = parse_field(&field, value)?,
                "observations_per_turn" => self.observations_per_turn = parse_field(&field, value)?,
                _ => {} // Unrelated variables sharing the prefix
            }
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let strength = self.entanglement_correlation_strength;
        if !(0.0..=1.0).contains(&strength) {
            return Err(ConfigError::InvalidValue {
                field: "entanglement_correlation_strength".to_string(),
                reason: format!("{} is not a probability in [0, 1]", strength),
            });
        }
        if self.max_superposition_duration == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_superposition_duration".to_string(),
                reason: "must be at least one turn".to_string(),
            });
        }
        if self.max_entangled_partners == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_entangled_partners".to_string(),
                reason: "must allow at least one partner".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_field<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        reason: format!("cannot parse '{}'", value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_rules() {
        let config = EngineConfig::default();
        assert_eq!(config.max_superposition_duration, 3);
        assert!((config.entanglement_correlation_strength - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.entanglement_max_distance, 3);
        assert_eq!(config.observations_per_turn, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(r#"{ "max_superposition_duration": 5 }"#).unwrap();
        assert_eq!(config.max_superposition_duration, 5);
        assert_eq!(config.max_entangled_partners, 2);
    }

    #[test]
    fn out_of_range_strength_is_rejected() {
        let err = EngineConfig::from_json_str(r#"{ "entanglement_correlation_strength": 1.5 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "entanglement_correlation_strength"));
    }

    #[test]
    fn overrides_apply_only_prefixed_keys() {
        let vars = vec![
            ("QUANTUM_CHESS_ENTANGLEMENT_MAX_DISTANCE", "5"),
            ("QUANTUM_CHESS_OBSERVATIONS_PER_TURN", "2"),
            ("PATH", "/usr/bin"),
        ];
        let config = EngineConfig::default().with_overrides(vars).unwrap();
        assert_eq!(config.entanglement_max_distance, 5);
        assert_eq!(config.observations_per_turn, 2);
    }

    #[test]
    fn unparsable_override_names_the_field() {
        let err = EngineConfig::default()
            .with_overrides([("QUANTUM_CHESS_MAX_SUPERPOSITION_DURATION", "soon")])
            .unwrap_err();
        assert!(err.to_string().contains("max_superposition_duration"));
    }
}
