//! Diff and reconciliation tuning
use crate::errors::TableError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    /// A matched section is reloaded as a whole once the share of changed
    /// rows (added + deleted + updated over old rows + added rows) is
    /// strictly greater than this. `1.0` never triggers.
    pub section_reload_ratio: f64,
    /// Upper bound on tables waiting in a `TableUpdates` queue. `None` queues
    /// without limit.
    pub max_pending: Option<usize>,
}

impl Default for DiffConfig {
    fn default() -> Self {
        DiffConfig {
            section_reload_ratio: 1.0,
            max_pending: None,
        }
    }
}

impl DiffConfig {
    pub fn from_json(json: &str) -> Result<Self, TableError> {
        let config: DiffConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TableError> {
        if self.section_reload_ratio.is_nan() || self.section_reload_ratio < 0.0 {
            return Err(TableError::Config(format!(
                "section_reload_ratio must be a non-negative number, got {}",
                self.section_reload_ratio
            )));
        }
        if self.max_pending == Some(0) {
            return Err(TableError::Config("max_pending must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config = DiffConfig::from_json(r#"{"max_pending": 4}"#).unwrap();
        assert_eq!(config.section_reload_ratio, 1.0);
        assert_eq!(config.max_pending, Some(4));
    }

    #[test]
    fn rejects_negative_ratio() {
        let err = DiffConfig::from_json(r#"{"section_reload_ratio": -0.5}"#).unwrap_err();
        assert!(matches!(err, TableError::Config(_)));
    }

    #[test]
    fn rejects_zero_queue_bound() {
        let config = DiffConfig {
            max_pending: Some(0),
            ..DiffConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
