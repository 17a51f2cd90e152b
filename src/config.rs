use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_OUTPUT_SIZE: [u32; 2] = [512, 512];

/// Runtime settings for a [`TextureGraph`](crate::texture::TextureGraph).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextureGraphConfig {
    /// Destination image size in texels.
    pub output_size: [u32; 2],
    /// Write every generated program here.
    pub dump_source: Option<PathBuf>,
}

impl Default for TextureGraphConfig {
    fn default() -> Self {
        Self {
            output_size: DEFAULT_OUTPUT_SIZE,
            dump_source: None,
        }
    }
}

impl TextureGraphConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("invalid texture graph config")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_json_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_defaults() {
        let cfg = TextureGraphConfig::from_json_str("{}").unwrap();
        assert_eq!(cfg, TextureGraphConfig::default());
        assert_eq!(cfg.output_size, [512, 512]);

        let cfg = TextureGraphConfig::from_json_str(r#"{"output_size":[64,32]}"#).unwrap();
        assert_eq!(cfg.output_size, [64, 32]);
        assert!(cfg.dump_source.is_none());
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(TextureGraphConfig::from_json_str("{output_size").is_err());
    }
}
