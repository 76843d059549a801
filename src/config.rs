use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Storage precision used for passes that declare `FLOAT`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FloatFormat {
    Rgba16,
    #[default]
    Rgba32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Upper bound applied to every evaluated pass dimension.
    pub max_dimension: u32,
    pub float_format: FloatFormat,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_dimension: 16_384,
            float_format: FloatFormat::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_dimension == 0 {
            return Err(EngineError::invalid_input(
                "max_dimension",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|error| EngineError::invalid_input("config", error.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}
